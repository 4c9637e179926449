use crate::error::LaunchError;
use crate::process::restart::RestartPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Opaque handle for one logical supervised process. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ProcessId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ProcessId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a process terminated: an exit code, or the signal that killed it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<String>,
}

impl ExitInfo {
    pub fn from_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        if let Some(raw) = status.signal() {
            let name = nix::sys::signal::Signal::try_from(raw)
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|_| format!("signal {}", raw));
            return Self {
                code: None,
                signal: Some(name),
            };
        }

        Self {
            code: status.code(),
            signal: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.signal) {
            (_, Some(signal)) => write!(f, "signal {}", signal),
            (Some(code), None) => write!(f, "code {}", code),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Everything needed to (re)launch a logical process. Shared verbatim across
/// restart attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    pub cwd: PathBuf,
    pub command: String,
    pub env: HashMap<String, String>,
    pub restart: Option<RestartPolicy>,
}

/// A live OS process owned by the registry
#[derive(Debug)]
pub(crate) struct ActiveProcess {
    /// OS pid of the shell, which is also its process group id
    pub pid: u32,
    pub spec: Arc<ProcessSpec>,
    pub retry_count: u32,
    pub started_at: Instant,
    pub manual_stop: bool,
    pub exited: bool,
    /// Pending SIGKILL escalation scheduled by a stop request
    pub kill_timer: Option<JoinHandle<()>>,
}

/// A crashed process waiting for its scheduled relaunch
#[derive(Debug)]
pub(crate) struct PendingRestart {
    pub spec: Arc<ProcessSpec>,
    /// Retry count the relaunched run will carry
    pub retry_count: u32,
    pub timer: JoinHandle<()>,
}

#[derive(Debug)]
pub(crate) enum ProcessRecord {
    Active(ActiveProcess),
    PendingRestart(PendingRestart),
}

impl ProcessRecord {
    /// Active and not yet reaped
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessRecord::Active(active) if !active.exited)
    }

    pub fn running_pid(&self) -> Option<u32> {
        match self {
            ProcessRecord::Active(active) if !active.exited => Some(active.pid),
            _ => None,
        }
    }
}

/// Result of a start request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<ProcessId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<ProcessId, LaunchError>> for StartResult {
    fn from(result: Result<ProcessId, LaunchError>) -> Self {
        match result {
            Ok(id) => Self {
                success: true,
                process_id: Some(id),
                error: None,
            },
            Err(e) => Self {
                success: false,
                process_id: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Result of a stop request. Stopping never fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StopResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }
}

/// Aggregated resource usage of a process tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// CPU percent summed over the tree, one decimal place
    pub cpu: f64,
    /// Resident memory summed over the tree
    pub memory_bytes: u64,
}
