// Events module - Notifications emitted towards the UI / event layer

use crate::process::ProcessId;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub const EVENT_LOG_BATCH: &str = "process-log:batch";
pub const EVENT_PROCESS_CRASH: &str = "process-crash";
pub const EVENT_PROCESS_RESTART: &str = "process-restart";

/// Current UTC time as RFC3339 with nanosecond precision
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Which stream a log record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Stdout,
    Stderr,
    Exit,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogKind::Stdout => write!(f, "stdout"),
            LogKind::Stderr => write!(f, "stderr"),
            LogKind::Exit => write!(f, "exit"),
        }
    }
}

/// A single line of process output, or the exit marker of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub process_id: ProcessId,
    #[serde(rename = "type")]
    pub kind: LogKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

impl LogRecord {
    pub fn output(process_id: ProcessId, kind: LogKind, output: String) -> Self {
        Self {
            process_id,
            kind,
            output: Some(output),
            timestamp: timestamp_now(),
            code: None,
            signal: None,
        }
    }

    pub fn exit(process_id: ProcessId, code: Option<i32>, signal: Option<String>) -> Self {
        Self {
            process_id,
            kind: LogKind::Exit,
            output: None,
            timestamp: timestamp_now(),
            code,
            signal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashNotification {
    pub process_id: ProcessId,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub will_restart: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartNotification {
    pub process_id: ProcessId,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timestamp: String,
}

/// Everything the supervisor pushes out, fire-and-forget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum Notification {
    #[serde(rename = "process-log:batch")]
    LogBatch(Vec<LogRecord>),
    #[serde(rename = "process-crash")]
    ProcessCrash(CrashNotification),
    #[serde(rename = "process-restart")]
    ProcessRestart(RestartNotification),
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::LogBatch(_) => EVENT_LOG_BATCH,
            Notification::ProcessCrash(_) => EVENT_PROCESS_CRASH,
            Notification::ProcessRestart(_) => EVENT_PROCESS_RESTART,
        }
    }
}

/// Receiver of supervisor notifications. No acknowledgment, no backpressure.
pub trait EventSink: Send + Sync {
    fn emit(&self, notification: Notification);
}

/// Drops every notification
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _notification: Notification) {}
}

/// Forwards notifications into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, notification: Notification) {
        // Receiver gone means nobody is listening anymore
        if self.tx.send(notification).is_err() {
            tracing::debug!("Notification dropped, receiver closed");
        }
    }
}

/// In-memory recorder, mostly useful for tests and embedding
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far, in emission order
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn crashes(&self) -> Vec<CrashNotification> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Notification::ProcessCrash(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn restarts(&self) -> Vec<RestartNotification> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Notification::ProcessRestart(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// All log records across batches, flattened in emission order
    pub fn log_records(&self) -> Vec<LogRecord> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Notification::LogBatch(batch) => Some(batch.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, notification: Notification) {
        self.events.lock().push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_rfc3339_nano_utc() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        let parsed = chrono::DateTime::parse_from_rfc3339(&ts);
        assert!(parsed.is_ok());
        // 9 fractional digits
        let frac = ts.split('.').nth(1).unwrap();
        assert_eq!(frac.trim_end_matches('Z').len(), 9);
    }

    #[test]
    fn test_log_record_serialization_skips_empty_fields() {
        let id = ProcessId::new();
        let record = LogRecord::output(id.clone(), LogKind::Stdout, "hello\n".to_string());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "stdout");
        assert_eq!(json["output"], "hello\n");
        assert_eq!(json["processId"], id.as_str());
        assert!(json.get("code").is_none());
        assert!(json.get("signal").is_none());
    }

    #[test]
    fn test_crash_notification_keeps_null_fields() {
        let crash = CrashNotification {
            process_id: ProcessId::new(),
            exit_code: None,
            signal: Some("SIGKILL".to_string()),
            will_restart: false,
            timestamp: timestamp_now(),
        };
        let json = serde_json::to_value(Notification::ProcessCrash(crash)).unwrap();

        assert_eq!(json["event"], EVENT_PROCESS_CRASH);
        assert!(json["data"]["exitCode"].is_null());
        assert_eq!(json["data"]["signal"], "SIGKILL");
        assert_eq!(json["data"]["willRestart"], false);
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        let id = ProcessId::new();

        sink.emit(Notification::LogBatch(vec![LogRecord::exit(id.clone(), Some(0), None)]));
        sink.emit(Notification::ProcessRestart(RestartNotification {
            process_id: id,
            retry_count: 1,
            max_retries: 3,
            timestamp: timestamp_now(),
        }));

        assert_eq!(sink.count(EVENT_LOG_BATCH), 1);
        assert_eq!(sink.count(EVENT_PROCESS_RESTART), 1);
        assert_eq!(sink.count(EVENT_PROCESS_CRASH), 0);
        assert_eq!(sink.log_records().len(), 1);
        assert_eq!(sink.restarts()[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(Notification::LogBatch(vec![]));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), EVENT_LOG_BATCH);

        drop(rx);
        // Must not panic with the receiver gone
        sink.emit(Notification::LogBatch(vec![]));
    }
}
