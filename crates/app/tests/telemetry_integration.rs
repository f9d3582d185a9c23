//! Integration tests for the telemetry aggregator lifecycle.

use batch_shim_app::{TelemetryAggregator, TelemetryOptions};
use batch_shim_domain::Measurement;
use batch_shim_ports::LogLevel;
use batch_shim_shared::ErrorCode;
use batch_shim_testkit::in_memory::{InMemoryLogger, InMemoryMetricSink};
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

type TestResult = Result<(), Box<dyn Error>>;

fn measurement(namespace: &str, name: &str, value: f64) -> Result<Measurement, Box<dyn Error>> {
    Ok(Measurement::new(namespace, name, value, 1_700_000_000_000)?)
}

fn start(
    sink: &InMemoryMetricSink,
    logger: &InMemoryLogger,
    flush_interval: Duration,
) -> TelemetryAggregator {
    TelemetryAggregator::start(
        Arc::new(sink.clone()),
        Arc::new(logger.clone()),
        TelemetryOptions {
            flush_interval,
            channel_capacity: 16,
        },
    )
}

#[tokio::test]
async fn flush_publishes_each_namespace_in_one_call() -> TestResult {
    let sink = InMemoryMetricSink::new();
    let logger = InMemoryLogger::new();
    let aggregator = start(&sink, &logger, Duration::from_secs(60));
    let handle = aggregator.handle();

    for index in 0..5 {
        handle.submit(measurement("orders", "Processed", f64::from(index))?).await?;
    }
    handle.submit(measurement("billing", "Charged", 1.0)?).await?;

    assert_eq!(aggregator.flush().await, 2);

    let calls = sink.calls();
    assert_eq!(calls.len(), 2);
    let orders = calls
        .iter()
        .find(|(namespace, _)| namespace == "orders")
        .ok_or("orders call missing")?;
    assert_eq!(orders.1.len(), 5);
    let values: Vec<f64> = orders.1.iter().map(Measurement::value).collect();
    assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);

    assert_eq!(aggregator.flush().await, 0);
    aggregator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_publishes_pending_measurements_exactly_once() -> TestResult {
    let sink = InMemoryMetricSink::new();
    let logger = InMemoryLogger::new();
    let aggregator = start(&sink, &logger, Duration::from_secs(60));
    let handle = aggregator.handle();

    handle.submit(measurement("orders", "Processed", 1.0)?).await?;
    handle.submit(measurement("orders", "Processed", 2.0)?).await?;

    assert_eq!(aggregator.shutdown().await, 1);
    assert_eq!(aggregator.shutdown().await, 0);
    assert_eq!(sink.measurements().len(), 2);

    let error = handle
        .submit(measurement("orders", "Late", 3.0)?)
        .await
        .err()
        .ok_or("submit after shutdown must fail")?;
    assert_eq!(error.code, ErrorCode::new("telemetry", "closed"));
    assert!(handle.is_closed());
    let error = handle
        .try_submit(measurement("orders", "Late", 3.0)?)
        .err()
        .ok_or("try_submit after shutdown must fail")?;
    assert_eq!(error.code, ErrorCode::new("telemetry", "closed"));
    Ok(())
}

#[tokio::test]
async fn periodic_writer_flushes_without_explicit_call() -> TestResult {
    let sink = InMemoryMetricSink::new();
    let logger = InMemoryLogger::new();
    let aggregator = start(&sink, &logger, Duration::from_millis(50));

    aggregator
        .handle()
        .submit(measurement("orders", "Processed", 1.0)?)
        .await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while sink.calls().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(sink.measurements().len(), 1);

    aggregator.shutdown().await;
    assert_eq!(sink.measurements().len(), 1);
    Ok(())
}

#[tokio::test]
async fn sink_failure_is_logged_and_batch_dropped() -> TestResult {
    let sink = InMemoryMetricSink::new().failing_namespace("broken");
    let logger = InMemoryLogger::new();
    let aggregator = start(&sink, &logger, Duration::from_secs(60));
    let handle = aggregator.handle();

    handle.submit(measurement("broken", "Processed", 1.0)?).await?;
    handle.submit(measurement("broken", "Processed", 2.0)?).await?;
    handle.submit(measurement("orders", "Processed", 1.0)?).await?;

    assert_eq!(aggregator.flush().await, 1);
    assert_eq!(aggregator.flush().await, 0);

    let warnings = logger.events_named("telemetry.flush_failed");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].level, LogLevel::Warn);
    assert_eq!(warnings[0].message.as_ref(), "PutMetricData returned error");
    let fields = warnings[0].fields.clone().unwrap_or_default();
    assert_eq!(fields.get("namespace"), Some(&Value::from("broken")));
    assert_eq!(fields.get("dropped"), Some(&Value::from(2)));

    aggregator.shutdown().await;
    assert_eq!(sink.calls().len(), 1);
    Ok(())
}
