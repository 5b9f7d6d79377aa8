//! Generation progress reporting.
//!
//! The orchestrator emits a [`ProgressEvent`] for every visible change of a
//! generation job: countdown ticks, the switch to completion checks, and the
//! terminal outcome. Terminal reporters write to **stderr** so stdout stays
//! parseable; the server keeps the latest event for `GET /api/job`.

use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;
use tracing::{debug, info};

/// A single visible change of the active generation job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Job accepted; the countdown starts.
    Submitted {
        job_id: String,
        topic: String,
        details: String,
    },
    /// Seconds left on the estimated-duration countdown.
    Countdown { remaining_secs: u64 },
    /// The countdown ran out; completion has not been detected yet.
    Finalizing,
    /// Completion checks begin.
    Checking { topic: String, interval_secs: u64 },
    /// One completion check ran without finding the document.
    Attempt { attempt: u32, max_attempts: u32 },
    Completed { topic: String },
    TimedOut { topic: String, attempts: u32 },
    Cancelled,
    Failed { message: String },
    /// The job slot is free again and the form was cleared.
    Reset,
}

/// Receives progress events. Called from timer tasks.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// `m:ss`
pub fn format_countdown(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Human-readable line for an event, as shown in the progress toast.
pub fn describe(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Submitted { topic, details, .. } => {
            format!("Generating {}  ({})", topic, details)
        }
        ProgressEvent::Countdown { remaining_secs } => {
            format!("Estimated time: {}", format_countdown(*remaining_secs))
        }
        ProgressEvent::Finalizing => "Finalizing research...".to_string(),
        ProgressEvent::Checking {
            topic,
            interval_secs,
        } => format!(
            "{} In Progress  (checking every {} seconds...)",
            topic, interval_secs
        ),
        ProgressEvent::Attempt {
            attempt,
            max_attempts,
        } => format!("Not ready yet  (check {} of {})", attempt, max_attempts),
        ProgressEvent::Completed { topic } => format!("{} Complete! Ready to view", topic),
        ProgressEvent::TimedOut { topic, attempts } => format!(
            "{} timed out: no document appeared after {} checks",
            topic, attempts
        ),
        ProgressEvent::Cancelled => "Research generation cancelled".to_string(),
        ProgressEvent::Failed { message } => format!("Research generation failed: {}", message),
        ProgressEvent::Reset => "Ready".to_string(),
    }
}

/// Human-friendly progress on stderr. Countdown ticks overwrite one line.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let mut err = std::io::stderr().lock();
        let _ = match &event {
            ProgressEvent::Countdown { .. } => write!(err, "\r{}   ", describe(&event)),
            _ => writeln!(err, "\r{}", describe(&event)),
        };
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last(&self) -> Option<ProgressEvent> {
        self.events().pop()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Logs events through `tracing` and keeps the most recent one, for
/// clients that poll `GET /api/job`.
#[derive(Default)]
pub struct LatestProgress {
    last: Mutex<Option<ProgressEvent>>,
}

impl LatestProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<ProgressEvent> {
        match self.last.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressReporter for LatestProgress {
    fn report(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::Countdown { .. } => debug!(progress = %describe(&event), "job progress"),
            _ => info!(progress = %describe(&event), "job progress"),
        }
        match self.last.lock() {
            Ok(mut guard) => *guard = Some(event),
            Err(poisoned) => *poisoned.into_inner() = Some(event),
        }
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}': expected off, human or json",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_format() {
        assert_eq!(format_countdown(300), "5:00");
        assert_eq!(format_countdown(65), "1:05");
        assert_eq!(format_countdown(0), "0:00");
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(ProgressEvent::Attempt {
            attempt: 2,
            max_attempts: 20,
        })
        .unwrap();
        assert_eq!(json["event"], "attempt");
        assert_eq!(json["attempt"], 2);
    }

    #[test]
    fn recorder_keeps_order() {
        let rec = RecordingProgress::new();
        rec.report(ProgressEvent::Finalizing);
        rec.report(ProgressEvent::Cancelled);
        assert_eq!(
            rec.events(),
            vec![ProgressEvent::Finalizing, ProgressEvent::Cancelled]
        );
        assert_eq!(rec.last(), Some(ProgressEvent::Cancelled));
    }

    #[test]
    fn latest_keeps_only_last_event() {
        let latest = LatestProgress::new();
        assert_eq!(latest.last(), None);
        latest.report(ProgressEvent::Countdown { remaining_secs: 3 });
        latest.report(ProgressEvent::Reset);
        assert_eq!(latest.last(), Some(ProgressEvent::Reset));
    }

    #[test]
    fn progress_mode_parse() {
        assert_eq!("json".parse::<ProgressMode>().unwrap(), ProgressMode::Json);
        assert!("loud".parse::<ProgressMode>().is_err());
    }
}
