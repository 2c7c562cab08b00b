//! Progress reporting for reconcile steps
//!
//! Pipeline actions announce long-running steps through a [`StatusReporter`]
//! (`start` / `end` plus free-form `warn` / `info` annotations). Reporting has
//! no effect on control flow. Each reconcile gets its own reporter, scoped to
//! the resource key, from a [`StatusSink`]:
//! - **Log**: structured `tracing` events (default for in-cluster use)
//! - **Terminal**: styled lines on stderr
//! - **Json**: one JSON object per event on stdout, for CI/CD integration

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use console::style;
use humantime_serde::re::humantime;
use kcluster_core::{ResourceKey, StatusOutput};
use tracing::{info, warn};

/// Human-facing progress sink used by pipeline actions
///
/// Implementations must be callable from any worker task.
pub trait StatusReporter: Send + Sync {
    /// Begin a step
    fn start(&self, message: &str);

    /// Finish the current step
    fn end(&self, success: bool);

    /// Annotate with a warning
    fn warn(&self, message: &str);

    /// Annotate with an informational line
    fn info(&self, message: &str);
}

/// Hands out one reporter per reconcile
pub trait StatusSink: Send + Sync {
    fn reporter(&self, key: &ResourceKey) -> Arc<dyn StatusReporter>;
}

impl StatusSink for StatusOutput {
    fn reporter(&self, key: &ResourceKey) -> Arc<dyn StatusReporter> {
        match self {
            StatusOutput::Log => Arc::new(LogStatus::new(key.clone())),
            StatusOutput::Terminal => Arc::new(TerminalStatus::new(key.clone())),
            StatusOutput::Json => Arc::new(JsonStatus::new(key.clone())),
        }
    }
}

/// Round to whole seconds and render like `1m 5s`
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if duration.subsec_millis() >= 500 {
        secs += 1;
    }
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

/// The step currently in progress
#[derive(Default)]
struct StepTracker {
    current: Mutex<Option<(String, Instant)>>,
}

impl StepTracker {
    fn begin(&self, message: &str) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((message.to_string(), Instant::now()));
    }

    /// Take the current step, if any, with its elapsed time
    fn finish(&self) -> Option<(String, Duration)> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|(message, started)| (message, started.elapsed()))
    }
}

/// Reporter emitting `tracing` events
pub struct LogStatus {
    key: ResourceKey,
    step: StepTracker,
}

impl LogStatus {
    pub fn new(key: ResourceKey) -> Self {
        Self {
            key,
            step: StepTracker::default(),
        }
    }
}

impl StatusReporter for LogStatus {
    fn start(&self, message: &str) {
        self.step.begin(message);
        info!(key = %self.key, "{}", message);
    }

    fn end(&self, success: bool) {
        let Some((message, elapsed)) = self.step.finish() else {
            return;
        };
        let elapsed_ms = elapsed.as_millis() as u64;
        if success {
            info!(key = %self.key, elapsed_ms, "{} done", message);
        } else {
            warn!(key = %self.key, elapsed_ms, "{} failed", message);
        }
    }

    fn warn(&self, message: &str) {
        warn!(key = %self.key, "{}", message);
    }

    fn info(&self, message: &str) {
        info!(key = %self.key, "{}", message);
    }
}

/// Reporter writing styled lines to stderr
pub struct TerminalStatus {
    key: ResourceKey,
    step: StepTracker,
}

impl TerminalStatus {
    pub fn new(key: ResourceKey) -> Self {
        Self {
            key,
            step: StepTracker::default(),
        }
    }

    fn line(&self, symbol: console::StyledObject<&'static str>, message: &str) {
        let _ = writeln!(
            io::stderr(),
            "  {} {} {}",
            symbol,
            style(format!("[{}]", self.key)).dim(),
            message
        );
    }
}

impl StatusReporter for TerminalStatus {
    fn start(&self, message: &str) {
        self.step.begin(message);
        self.line(style("⟳").cyan(), message);
    }

    fn end(&self, success: bool) {
        let Some((message, elapsed)) = self.step.finish() else {
            return;
        };
        let symbol = if success {
            style("✓").green()
        } else {
            style("✗").red()
        };
        self.line(
            symbol,
            &format!("{} ({:.1}s)", message, elapsed.as_secs_f64()),
        );
    }

    fn warn(&self, message: &str) {
        self.line(style("⚠").yellow(), message);
    }

    fn info(&self, message: &str) {
        self.line(style("ℹ").blue(), message);
    }
}

/// Reporter printing one JSON event per line on stdout
pub struct JsonStatus {
    key: ResourceKey,
    step: StepTracker,
}

impl JsonStatus {
    pub fn new(key: ResourceKey) -> Self {
        Self {
            key,
            step: StepTracker::default(),
        }
    }

    fn event(&self, event_type: &str, message: &str) -> serde_json::Value {
        serde_json::json!({
            "type": event_type,
            "resource": self.key.to_string(),
            "message": message,
        })
    }
}

impl StatusReporter for JsonStatus {
    fn start(&self, message: &str) {
        self.step.begin(message);
        println!("{}", self.event("start", message));
    }

    fn end(&self, success: bool) {
        let Some((message, elapsed)) = self.step.finish() else {
            return;
        };
        let mut event = self.event("end", &message);
        event["success"] = success.into();
        event["elapsedMs"] = (elapsed.as_millis() as u64).into();
        println!("{}", event);
    }

    fn warn(&self, message: &str) {
        println!("{}", self.event("warning", message));
    }

    fn info(&self, message: &str) {
        println!("{}", self.event("info", message));
    }
}

/// A call recorded by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Start { key: ResourceKey, message: String },
    End { key: ResourceKey, success: bool },
    Warn { key: ResourceKey, message: String },
    Info { key: ResourceKey, message: String },
}

/// In-memory sink recording every reporter call, for tests and dry runs
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Warning messages recorded for `key`
    pub fn warnings_for(&self, key: &ResourceKey) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::Warn { key: k, message } if &k == key => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingSink {
    fn reporter(&self, key: &ResourceKey) -> Arc<dyn StatusReporter> {
        Arc::new(RecordingStatus {
            key: key.clone(),
            events: self.events.clone(),
        })
    }
}

/// Reporter half of [`RecordingSink`]
pub struct RecordingStatus {
    key: ResourceKey,
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl RecordingStatus {
    fn push(&self, event: StatusEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl StatusReporter for RecordingStatus {
    fn start(&self, message: &str) {
        self.push(StatusEvent::Start {
            key: self.key.clone(),
            message: message.to_string(),
        });
    }

    fn end(&self, success: bool) {
        self.push(StatusEvent::End {
            key: self.key.clone(),
            success,
        });
    }

    fn warn(&self, message: &str) {
        self.push(StatusEvent::Warn {
            key: self.key.clone(),
            message: message.to_string(),
        });
    }

    fn info(&self, message: &str) {
        self.push(StatusEvent::Info {
            key: self.key.clone(),
            message: message.to_string(),
        });
    }
}
