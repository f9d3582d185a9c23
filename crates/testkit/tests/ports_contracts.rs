//! Contract tests for the in-memory port implementations.

use batch_shim_domain::Measurement;
use batch_shim_ports::{LogEvent, LogFields, LogLevel, LoggerPort, MetricSinkPort};
use batch_shim_testkit::in_memory::{InMemoryLogger, InMemoryMetricSink, NoopLogger};
use serde_json::Value;
use std::error::Error;

fn measurement(name: &str, value: f64) -> Result<Measurement, Box<dyn Error>> {
    Ok(Measurement::new("orders", name, value, 1_700_000_000_000)?)
}

#[test]
fn logger_children_share_storage_and_merge_fields() {
    let logger = InMemoryLogger::new();
    let child = logger.child(LogFields::from([("trace_id".into(), Value::from("t-1"))]));

    logger.info("root.event", "root", None);
    child.warn(
        "child.event",
        "child",
        Some(LogFields::from([("item".into(), Value::from(3))])),
    );

    let events = logger.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].fields, None);
    let fields = events[1].fields.clone().unwrap_or_default();
    assert_eq!(fields.get("trace_id"), Some(&Value::from("t-1")));
    assert_eq!(fields.get("item"), Some(&Value::from(3)));
    assert_eq!(logger.count_at(LogLevel::Warn), 1);
    assert_eq!(logger.events_named("child.event").len(), 1);
}

#[test]
fn noop_logger_accepts_everything() {
    let logger = NoopLogger;
    logger.log(LogEvent::new("any", LogLevel::Error, "ignored"));
    logger.child(LogFields::new()).debug("any", "ignored", None);
}

#[tokio::test]
async fn metric_sink_records_calls_in_order() -> Result<(), Box<dyn Error>> {
    let sink = InMemoryMetricSink::new();
    sink.put_measurements("orders", vec![measurement("A", 1.0)?]).await?;
    sink.put_measurements("orders", vec![measurement("B", 2.0)?, measurement("C", 3.0)?])
        .await?;

    let calls = sink.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1.len(), 2);
    let names: Vec<String> = sink
        .measurements()
        .iter()
        .map(|measurement| measurement.name().to_owned())
        .collect();
    assert_eq!(names, vec!["A", "B", "C"]);
    Ok(())
}

#[tokio::test]
async fn metric_sink_failures_are_injectable() -> Result<(), Box<dyn Error>> {
    let sink = InMemoryMetricSink::new().failing_namespace("broken");
    let error = sink
        .put_measurements("broken", vec![measurement("A", 1.0)?])
        .await
        .err()
        .ok_or("expected failure")?;
    assert!(error.is_retriable());

    sink.fail_next(1);
    assert!(sink.put_measurements("orders", vec![measurement("A", 1.0)?]).await.is_err());
    sink.put_measurements("orders", vec![measurement("B", 2.0)?]).await?;
    assert_eq!(sink.calls().len(), 1);
    Ok(())
}
