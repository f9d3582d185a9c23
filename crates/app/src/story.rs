//! Story logger: many log calls for one unit of work, one record out.
//!
//! In combined mode every `info`/`warn`/`error` call becomes a stage and the
//! whole story is emitted once by [`StoryLogger::log`]. In direct mode (the
//! invocation-level logger) calls are forwarded to the sink immediately.

use batch_shim_ports::{LogEvent, LogFields, LogLevel, LoggerPort};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Maximum characters of the joined stages used as the record message.
pub const SUMMARY_LIMIT: usize = 100;

const STORY_EVENT: &str = "story.summary";
const LINE_EVENT: &str = "story.line";

/// How log calls are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryMode {
    /// Accumulate stages and emit one record on [`StoryLogger::log`].
    Combined,
    /// Forward each call to the sink immediately.
    Direct,
}

#[derive(Debug)]
struct StoryState {
    mode: StoryMode,
    stages: Vec<String>,
    params: LogFields,
    line_params: BTreeMap<Box<str>, Value>,
    error_level: bool,
    disabled: bool,
    emitted: bool,
}

impl StoryState {
    fn new(mode: StoryMode) -> Self {
        Self {
            mode,
            stages: Vec::new(),
            params: LogFields::new(),
            line_params: BTreeMap::new(),
            error_level: false,
            disabled: false,
            emitted: false,
        }
    }

    /// Writes after the record went out are ignored so an abandoned task
    /// cannot produce a second record.
    const fn accepts_writes(&self) -> bool {
        !self.emitted
    }
}

/// Shared handle to a story. Clones observe and mutate the same story.
#[derive(Clone)]
pub struct StoryLogger {
    sink: Arc<dyn LoggerPort>,
    state: Arc<Mutex<StoryState>>,
}

impl StoryLogger {
    /// Create an invocation-level logger that forwards calls immediately.
    #[must_use]
    pub fn direct(sink: Arc<dyn LoggerPort>) -> Self {
        Self::with_mode(sink, StoryMode::Direct)
    }

    /// Create a logger that aggregates into one record.
    #[must_use]
    pub fn combined(sink: Arc<dyn LoggerPort>) -> Self {
        Self::with_mode(sink, StoryMode::Combined)
    }

    fn with_mode(sink: Arc<dyn LoggerPort>, mode: StoryMode) -> Self {
        Self {
            sink,
            state: Arc::new(Mutex::new(StoryState::new(mode))),
        }
    }

    /// Independent combined-mode logger writing to the same sink.
    #[must_use]
    pub fn split(&self) -> Self {
        Self::combined(Arc::clone(&self.sink))
    }

    /// The sink records are written to.
    #[must_use]
    pub fn sink(&self) -> Arc<dyn LoggerPort> {
        Arc::clone(&self.sink)
    }

    fn state(&self) -> MutexGuard<'_, StoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> StoryMode {
        self.state().mode
    }

    /// Switch to direct mode.
    pub fn disable_combined_mode(&self) {
        self.state().mode = StoryMode::Direct;
    }

    /// Suppress all output from this logger, including the final record.
    pub fn disable(&self) {
        self.state().disabled = true;
    }

    /// Returns true when output is suppressed.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.state().disabled
    }

    /// Returns true once the combined record has been written.
    #[must_use]
    pub fn is_emitted(&self) -> bool {
        self.state().emitted
    }

    /// Append a stage. Stages read as `<noun> <verb> ...`, e.g.
    /// `Validation succeeded`.
    pub fn add_stage(&self, stage: impl Into<String>) -> &Self {
        let mut state = self.state();
        if state.accepts_writes() {
            state.stages.push(stage.into());
        }
        self
    }

    /// Append `stage` only when `result` is `Ok`; the result is passed through.
    pub fn add_stage_if_ok<T, E>(
        &self,
        stage: impl Into<String>,
        result: Result<T, E>,
    ) -> Result<T, E> {
        if result.is_ok() {
            self.add_stage(stage);
        }
        result
    }

    /// Set a record-level param. Last write for a key wins.
    pub fn add_param(&self, key: &str, value: impl Into<Value>) -> &Self {
        let mut state = self.state();
        if state.accepts_writes() {
            state
                .params
                .insert(key.to_owned().into_boxed_str(), value.into());
        }
        self
    }

    /// Set several record-level params.
    pub fn with<I, K, V>(&self, params: I) -> &Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut state = self.state();
        if state.accepts_writes() {
            for (key, value) in params {
                state.params.insert(key.as_ref().into(), value.into());
            }
        }
        self
    }

    /// Params appended to the next message only, as `msg; k='v'`.
    pub fn with_line_params<I, K, V>(&self, params: I) -> &Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut state = self.state();
        if state.accepts_writes() {
            for (key, value) in params {
                state.line_params.insert(key.as_ref().into(), value.into());
            }
        }
        self
    }

    /// Debug message; dropped in combined mode.
    pub fn debug(&self, message: &str) {
        self.message(LogLevel::Debug, message);
    }

    /// Info message.
    pub fn info(&self, message: &str) {
        self.message(LogLevel::Info, message);
    }

    /// Warn message.
    pub fn warn(&self, message: &str) {
        self.message(LogLevel::Warn, message);
    }

    /// Error message; in combined mode the record is raised to error level.
    pub fn error(&self, message: &str) {
        self.message(LogLevel::Error, message);
    }

    fn message(&self, level: LogLevel, message: &str) {
        let event = {
            let mut state = self.state();
            if !state.accepts_writes() {
                return;
            }
            match state.mode {
                StoryMode::Combined => {
                    if level == LogLevel::Debug {
                        return;
                    }
                    let line_params = std::mem::take(&mut state.line_params);
                    let stage = format_line(message, &line_params);
                    state.stages.push(stage);
                    if level == LogLevel::Error {
                        state.error_level = true;
                    }
                    return;
                },
                StoryMode::Direct => {
                    if state.disabled {
                        state.line_params.clear();
                        return;
                    }
                    let mut fields = state.params.clone();
                    fields.extend(std::mem::take(&mut state.line_params));
                    LogEvent::new(LINE_EVENT, level, message).with_fields(fields)
                },
            }
        };
        self.sink.log(event);
    }

    /// Emit the combined record.
    ///
    /// Nothing is written if the logger is disabled, in direct mode, already
    /// emitted, or has neither stages nor params. Returns true if a record
    /// was written.
    pub fn log(&self) -> bool {
        let event = {
            let mut state = self.state();
            if state.disabled
                || state.mode != StoryMode::Combined
                || state.emitted
                || (state.stages.is_empty() && state.params.is_empty())
            {
                return false;
            }
            state.emitted = true;

            let mut fields = std::mem::take(&mut state.params);
            if !state.stages.is_empty() {
                fields.insert(
                    "stages".into(),
                    Value::from(state.stages.iter().map(String::as_str).collect::<Vec<_>>()),
                );
            }
            let level = if state.error_level {
                LogLevel::Error
            } else {
                LogLevel::Info
            };
            LogEvent::new(STORY_EVENT, level, summarize(&state.stages)).with_fields(fields)
        };
        self.sink.log(event);
        true
    }
}

/// Join stages with `"; "`, truncating to [`SUMMARY_LIMIT`] characters plus
/// `"..."`.
#[must_use]
pub fn summarize(stages: &[String]) -> String {
    let joined = stages.join("; ");
    match joined.char_indices().nth(SUMMARY_LIMIT) {
        Some((cut, _)) => {
            let mut truncated = joined[..cut].to_owned();
            truncated.push_str("...");
            truncated
        },
        None => joined,
    }
}

fn format_line(message: &str, params: &BTreeMap<Box<str>, Value>) -> String {
    let mut line = message.to_owned();
    for (key, value) in params {
        let _ = match value {
            Value::String(text) => write!(line, "; {key}='{text}'"),
            other => write!(line, "; {key}='{other}'"),
        };
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CaptureLogger {
        events: StdMutex<Vec<LogEvent>>,
    }

    impl CaptureLogger {
        fn events(&self) -> Vec<LogEvent> {
            self.events.lock().expect("capture lock").clone()
        }
    }

    impl LoggerPort for CaptureLogger {
        fn log(&self, event: LogEvent) {
            self.events.lock().expect("capture lock").push(event);
        }

        fn child(&self, _fields: LogFields) -> Box<dyn LoggerPort> {
            Box::new(Self::default())
        }
    }

    fn combined() -> (Arc<CaptureLogger>, StoryLogger) {
        let capture = Arc::new(CaptureLogger::default());
        let story = StoryLogger::combined(capture.clone());
        (capture, story)
    }

    #[test]
    fn combined_story_emits_single_record() {
        let (capture, story) = combined();

        story.add_param("orderId", 42);
        story.info("Validation succeeded");
        story.with_line_params([("attempt", Value::from(2)), ("queue", Value::from("orders"))]);
        story.warn("Downstream slow");
        story.debug("dropped in combined mode");

        assert!(capture.events().is_empty());
        assert!(!story.is_emitted());
        assert!(story.log());
        assert!(story.is_emitted());
        assert!(!story.log());

        let events = capture.events();
        assert_eq!(events.len(), 1);
        let record = &events[0];
        assert_eq!(record.level, LogLevel::Info);
        assert_eq!(
            record.message.as_ref(),
            "Validation succeeded; Downstream slow; attempt='2'; queue='orders'"
        );
        let fields = record.fields.as_ref().expect("fields");
        assert_eq!(fields.get("orderId"), Some(&Value::from(42)));
        assert_eq!(
            fields.get("stages"),
            Some(&serde_json::json!([
                "Validation succeeded",
                "Downstream slow; attempt='2'; queue='orders'"
            ]))
        );
    }

    #[test]
    fn error_call_raises_record_level() {
        let (capture, story) = combined();

        story.info("Processing started");
        story.error("Processing returned error: boom");
        story.log();

        let events = capture.events();
        assert_eq!(events[0].level, LogLevel::Error);
    }

    #[test]
    fn log_is_idempotent_and_ignores_late_writes() {
        let (capture, story) = combined();

        story.add_stage("Processing succeeded");
        assert!(story.log());
        story.add_stage("late stage");
        story.error("late error");
        assert!(!story.log());

        let events = capture.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, LogLevel::Info);
    }

    #[test]
    fn disabled_or_empty_story_emits_nothing() {
        let (capture, story) = combined();
        assert!(!story.log());

        let (_, disabled) = combined();
        disabled.add_stage("hidden");
        disabled.disable();
        assert!(!disabled.log());

        assert!(capture.events().is_empty());
    }

    #[test]
    fn direct_mode_forwards_with_params() {
        let capture = Arc::new(CaptureLogger::default());
        let story = StoryLogger::direct(capture.clone());

        story.add_param("trace", "t-1");
        story.info("Invocation started");
        assert!(!story.log());

        let events = capture.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_ref(), LINE_EVENT);
        assert_eq!(
            events[0].fields.as_ref().and_then(|fields| fields.get("trace")),
            Some(&Value::from("t-1"))
        );
    }

    #[test]
    fn add_stage_if_ok_passes_result_through() {
        let (_, story) = combined();

        let ok: Result<u8, &str> = story.add_stage_if_ok("Lookup succeeded", Ok(1));
        let err: Result<u8, &str> = story.add_stage_if_ok("Lookup succeeded twice", Err("nope"));

        assert_eq!(ok, Ok(1));
        assert_eq!(err, Err("nope"));
        assert_eq!(summarize(&story.state().stages), "Lookup succeeded");
    }

    #[test]
    fn split_is_independent_and_combined() {
        let capture = Arc::new(CaptureLogger::default());
        let parent = StoryLogger::direct(capture.clone());
        parent.disable();

        let child = parent.split();
        assert_eq!(child.mode(), StoryMode::Combined);
        assert!(!child.is_disabled());
        child.add_stage("Child ran");
        assert!(child.log());
        assert_eq!(capture.events().len(), 1);
    }

    #[test]
    fn summary_truncates_at_limit() {
        let stages = vec!["x".repeat(60), "y".repeat(60)];
        let summary = summarize(&stages);

        assert_eq!(summary.chars().count(), SUMMARY_LIMIT + 3);
        assert!(summary.ends_with("..."));
        assert_eq!(summarize(&["short".to_string()]), "short");
    }

    proptest! {
        #[test]
        fn summary_is_bounded_and_keeps_prefix(stages in prop::collection::vec(".{0,40}", 0..8)) {
            let joined = stages.join("; ");
            let summary = summarize(&stages);

            prop_assert!(summary.chars().count() <= SUMMARY_LIMIT + 3);
            let kept: String = joined.chars().take(SUMMARY_LIMIT).collect();
            prop_assert!(summary.starts_with(&kept));
            if joined.chars().count() <= SUMMARY_LIMIT {
                prop_assert_eq!(summary, joined);
            }
        }
    }
}
