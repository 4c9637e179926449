use crate::error::{LaunchError, Result};
use crate::events::{LogKind, LogRecord};
use crate::logs::{read_capped_line, LogBatcher};
use crate::process::types::{ProcessId, ProcessSpec};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::watch;

/// Variables that make most CLIs keep their colors when piped
pub const COLOR_ENV: [(&str, &str); 3] = [
    ("FORCE_COLOR", "1"),
    ("TERM", "xterm-256color"),
    ("COLORTERM", "truecolor"),
];

/// A freshly started child with its output pipes taken
#[derive(Debug)]
pub(crate) struct SpawnedProcess {
    pub child: Child,
    /// OS pid, equal to the process group id
    pub pid: u32,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Build the shell invocation for a spec.
///
/// The child gets its own process group so the whole tree can be signalled
/// through the group id. Environment is the host's, plus the color
/// variables, plus the custom entries; later entries win.
pub(crate) fn build_command(spec: &ProcessSpec) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(&spec.command);
    command.current_dir(&spec.cwd);

    for (key, value) in COLOR_ENV {
        command.env(key, value);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.process_group(0);

    command
}

/// Start the shell for `spec`
pub(crate) fn spawn_process(spec: &ProcessSpec) -> Result<SpawnedProcess> {
    let mut child = build_command(spec)
        .spawn()
        .map_err(|e| LaunchError::SpawnError(format!("starting command '{}': {}", spec.command, e)))?;

    let pid = child.id().ok_or_else(|| {
        LaunchError::SpawnError(format!("no pid for command '{}'", spec.command))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| LaunchError::SpawnError("creating stdout pipe".to_string()))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| LaunchError::SpawnError("creating stderr pipe".to_string()))?;

    Ok(SpawnedProcess {
        child,
        pid,
        stdout,
        stderr,
    })
}

/// Send `sig` to every process in the group led by `pgid`
pub(crate) fn signal_group(pgid: u32, sig: Signal) -> Result<()> {
    let raw = i32::try_from(pgid)
        .map_err(|_| LaunchError::SignalError(format!("invalid process group id {}", pgid)))?;

    signal::killpg(Pid::from_raw(raw), sig).map_err(|e| {
        LaunchError::SignalError(format!("Failed to send {} to group {}: {}", sig, pgid, e))
    })
}

/// Forward lines from one output pipe into the log batcher until the pipe
/// closes or `cancel` fires.
pub(crate) async fn stream_output<R>(
    process_id: ProcessId,
    kind: LogKind,
    pipe: R,
    max_line_bytes: usize,
    batcher: Arc<LogBatcher>,
    mut cancel: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);

    loop {
        tokio::select! {
            biased;

            _ = cancel.changed() => break,

            line = read_capped_line(&mut reader, max_line_bytes) => match line {
                Ok(Some(line)) => {
                    if line.truncated {
                        tracing::debug!(
                            "Truncated {} line of process {} to {} bytes",
                            kind,
                            process_id,
                            max_line_bytes
                        );
                    }
                    let mut output = line.text;
                    output.push('\n');
                    batcher.push(LogRecord::output(process_id.clone(), kind, output));
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Error reading {} of process {}: {}", kind, process_id, e);
                    break;
                }
            },
        }
    }
}
