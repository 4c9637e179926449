use crate::config::{ProcessDefinition, SupervisorConfig};
use crate::error::{LaunchError, Result};
use crate::events::{
    timestamp_now, CrashNotification, EventSink, LogKind, LogRecord, Notification,
    RestartNotification,
};
use crate::logs::LogBatcher;
use crate::process::monitor::ResourceSampler;
use crate::process::registry::{Registry, StopAction};
use crate::process::restart::{self, RestartDecision, RestartPolicy};
use crate::process::spawner::{signal_group, spawn_process, stream_output};
use crate::process::types::{
    ActiveProcess, ExitInfo, PendingRestart, ProcessId, ProcessRecord, ProcessSpec, ResourceUsage,
    StartResult, StopResult,
};
use nix::sys::signal::Signal;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Inner {
    registry: Registry,
    batcher: Arc<LogBatcher>,
    sink: Arc<dyn EventSink>,
    config: SupervisorConfig,
    /// Reapers and restart timers that have not finished reporting yet
    in_flight: AtomicUsize,
}

/// Counts a worker as in flight until it is dropped, aborted tasks included
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the lifecycle of every supervised process: start, output capture,
/// exit detection, auto-restart and stop.
///
/// Cheap to clone; clones share the same registry. Methods that launch
/// processes or timers must run inside a tokio runtime.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig, sink: Arc<dyn EventSink>) -> Self {
        let batcher = LogBatcher::new(sink.clone(), config.log_batch_interval());
        Self::with_batcher(config, sink, batcher)
    }

    /// Build a supervisor around an existing log batcher
    pub fn with_batcher(
        config: SupervisorConfig,
        sink: Arc<dyn EventSink>,
        batcher: Arc<LogBatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Registry::new(),
                batcher,
                sink,
                config,
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn batcher(&self) -> &Arc<LogBatcher> {
        &self.inner.batcher
    }

    /// Start `command` through a shell in `cwd`.
    ///
    /// Never panics or returns an error directly; failures are reported in the
    /// result.
    pub fn start(
        &self,
        cwd: impl AsRef<Path>,
        command: &str,
        restart: Option<RestartPolicy>,
        env: Option<HashMap<String, String>>,
    ) -> StartResult {
        self.try_start(cwd, command, restart, env.unwrap_or_default())
            .into()
    }

    /// Start a process from a project definition rooted at `root`
    pub fn start_definition(&self, definition: &ProcessDefinition, root: &Path) -> StartResult {
        self.start(
            definition.resolve_cwd(root),
            &definition.command_line(),
            definition.restart.clone(),
            Some(definition.env.clone()),
        )
    }

    pub fn try_start(
        &self,
        cwd: impl AsRef<Path>,
        command: &str,
        restart: Option<RestartPolicy>,
        env: HashMap<String, String>,
    ) -> Result<ProcessId> {
        let cwd = cwd.as_ref();
        if !cwd.exists() {
            return Err(LaunchError::DirectoryNotFound(cwd.to_path_buf()));
        }

        let id = ProcessId::new();
        let spec = Arc::new(ProcessSpec {
            cwd: cwd.to_path_buf(),
            command: command.to_string(),
            env,
            restart,
        });

        self.launch(id.clone(), spec, 0)?;
        Ok(id)
    }

    /// Spawn the child, install its active record and attach its workers.
    ///
    /// The fork happens outside the registry lock; only the insert takes it.
    /// Returns whether an existing record (the pending-restart placeholder)
    /// was replaced.
    fn launch(&self, id: ProcessId, spec: Arc<ProcessSpec>, retry_count: u32) -> Result<bool> {
        let spawned = spawn_process(&spec)?;
        let pid = spawned.pid;

        info!(
            "Started process {} (PID: {}, retry: {}): {}",
            id, pid, retry_count, spec.command
        );

        let replaced = self
            .inner
            .registry
            .write()
            .insert(
                id.clone(),
                ProcessRecord::Active(ActiveProcess {
                    pid,
                    spec,
                    retry_count,
                    started_at: Instant::now(),
                    manual_stop: false,
                    exited: false,
                    kill_timer: None,
                }),
            )
            .is_some();

        self.inner.batcher.start();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let max_line_bytes = self.inner.config.max_line_bytes;
        let readers = vec![
            tokio::spawn(stream_output(
                id.clone(),
                LogKind::Stdout,
                spawned.stdout,
                max_line_bytes,
                self.inner.batcher.clone(),
                cancel_rx.clone(),
            )),
            tokio::spawn(stream_output(
                id.clone(),
                LogKind::Stderr,
                spawned.stderr,
                max_line_bytes,
                self.inner.batcher.clone(),
                cancel_rx,
            )),
        ];

        tokio::spawn(self.clone().reap(id, spawned.child, pid, readers, cancel_tx));
        Ok(replaced)
    }

    /// Wait for the child to terminate and decide what happens next. Runs
    /// exactly once per spawned process.
    async fn reap(
        self,
        id: ProcessId,
        mut child: Child,
        pid: u32,
        mut readers: Vec<JoinHandle<()>>,
        cancel: watch::Sender<bool>,
    ) {
        let _busy = InFlight::enter(&self.inner.in_flight);

        let exit = match child.wait().await {
            Ok(status) => ExitInfo::from_status(status),
            Err(e) => {
                error!("Failed to wait for process {} (PID: {}): {}", id, pid, e);
                ExitInfo::default()
            }
        };

        self.inner.registry.mark_exited(&id, pid);
        debug!("Process {} (PID: {}) exited with {}", id, pid, exit);

        // Let the readers reach EOF, then stop whatever is still attached
        // (a grandchild may hold the pipes open)
        let drained = tokio::time::timeout(self.inner.config.reader_drain(), async {
            for reader in readers.iter_mut() {
                let _ = reader.await;
            }
        })
        .await
        .is_ok();

        let _ = cancel.send(true);
        if !drained {
            for reader in readers {
                if !reader.is_finished() {
                    let _ = reader.await;
                }
            }
        }

        self.inner.batcher.flush();

        let Some((decision, armed)) = self.settle(&id, pid, &exit) else {
            return;
        };

        // Nothing below runs under the registry lock
        self.inner
            .batcher
            .push(LogRecord::exit(id.clone(), exit.code, exit.signal.clone()));
        self.inner.batcher.flush();

        match decision {
            RestartDecision::Clean => {
                info!("Process {} exited cleanly ({})", id, exit);
            }
            RestartDecision::Crashed => {
                warn!("Process {} crashed ({}), no restart policy", id, exit);
            }
            RestartDecision::Exhausted {
                retry_count,
                max_retries,
            } => {
                warn!(
                    "Process {} crashed ({}), giving up after {}/{} retries",
                    id, exit, retry_count, max_retries
                );
            }
            RestartDecision::Restart {
                retry_count,
                max_retries,
                delay,
            } => {
                info!(
                    "Process {} crashed ({}), restarting in {:?} (retry {}/{})",
                    id, exit, delay, retry_count, max_retries
                );
            }
        }

        if decision.is_crash() {
            self.emit_crash(&id, &exit, decision.will_restart());
        }
        // The relaunch timer only starts counting once the crash is out
        if let Some(armed) = armed {
            let _ = armed.send(());
        }
    }

    /// Remove the reaped run and, if it is to be relaunched, install the
    /// pending-restart placeholder in the same critical section.
    ///
    /// Returns `None` when the record no longer belongs to this run.
    fn settle(
        &self,
        id: &ProcessId,
        pid: u32,
        exit: &ExitInfo,
    ) -> Option<(RestartDecision, Option<oneshot::Sender<()>>)> {
        let mut records = self.inner.registry.write();
        let mut active = Registry::remove_active(&mut records, id, pid)?;
        if let Some(timer) = active.kill_timer.take() {
            timer.abort();
        }

        let decision = restart::evaluate(
            exit,
            active.manual_stop,
            active.spec.restart.as_ref(),
            active.retry_count,
            active.started_at.elapsed(),
        );

        let armed = match decision {
            RestartDecision::Restart {
                retry_count,
                max_retries,
                delay,
            } => {
                let (armed_tx, armed_rx) = oneshot::channel();
                let timer = self.schedule_restart(id.clone(), max_retries, delay, armed_rx);
                records.insert(
                    id.clone(),
                    ProcessRecord::PendingRestart(PendingRestart {
                        spec: active.spec.clone(),
                        retry_count,
                        timer,
                    }),
                );
                Some(armed_tx)
            }
            _ => None,
        };

        Some((decision, armed))
    }

    fn schedule_restart(
        &self,
        id: ProcessId,
        max_retries: u32,
        delay: Duration,
        armed: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let _busy = InFlight::enter(&this.inner.in_flight);
            let _ = armed.await;
            tokio::time::sleep(delay).await;
            this.respawn(id, max_retries);
        })
    }

    /// Replace the pending-restart placeholder with a fresh run.
    ///
    /// The placeholder stays in the map until the new run is installed, so a
    /// concurrent stop always finds something to act on.
    fn respawn(&self, id: ProcessId, max_retries: u32) {
        let Some((spec, retry_count)) = self.inner.registry.pending_restart(&id) else {
            debug!("Restart of process {} was cancelled", id);
            return;
        };

        self.inner
            .sink
            .emit(Notification::ProcessRestart(RestartNotification {
                process_id: id.clone(),
                retry_count,
                max_retries,
                timestamp: timestamp_now(),
            }));

        match self.launch(id.clone(), spec, retry_count) {
            Ok(true) => {}
            Ok(false) => {
                // Stopped while relaunching: the new run goes down right away
                info!("Process {} was stopped during its restart", id);
                self.stop(&id);
            }
            Err(e) => {
                error!("Failed to restart process {}: {}", id, e);
                if self.inner.registry.remove_pending(&id) {
                    self.emit_crash(&id, &ExitInfo::default(), false);
                }
            }
        }
    }

    fn emit_crash(&self, id: &ProcessId, exit: &ExitInfo, will_restart: bool) {
        self.inner
            .sink
            .emit(Notification::ProcessCrash(CrashNotification {
                process_id: id.clone(),
                exit_code: exit.code,
                signal: exit.signal.clone(),
                will_restart,
                timestamp: timestamp_now(),
            }));
    }

    /// Stop a process. Unknown ids and repeated stops are no-ops; always succeeds.
    pub fn stop(&self, id: &ProcessId) -> StopResult {
        match self.inner.registry.request_stop(id) {
            StopAction::Unknown => {
                debug!("Stop requested for unknown process {}", id);
            }
            StopAction::CancelledRestart => {
                info!("Cancelled pending restart of process {}", id);
            }
            StopAction::AlreadyStopping => {
                debug!("Process {} is already stopping", id);
            }
            StopAction::Terminate { pgid } => {
                info!("Stopping process {} (PGID: {}) with SIGTERM", id, pgid);
                if let Err(e) = signal_group(pgid, Signal::SIGTERM) {
                    warn!("{}", e);
                }

                let timer = self.schedule_kill(id.clone(), pgid);
                self.inner.registry.attach_kill_timer(id, pgid, timer);
            }
        }

        StopResult::ok()
    }

    /// SIGKILL the group if it is still alive once the kill timeout elapses
    fn schedule_kill(&self, id: ProcessId, pgid: u32) -> JoinHandle<()> {
        let registry = self.inner.registry.clone();
        let timeout = self.inner.config.kill_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if registry.is_live_pid(&id, pgid) {
                warn!(
                    "Process {} did not exit within {:?}, sending SIGKILL",
                    id, timeout
                );
                if let Err(e) = signal_group(pgid, Signal::SIGKILL) {
                    warn!("{}", e);
                }
            }
        })
    }

    pub fn is_running(&self, id: &ProcessId) -> bool {
        self.inner.registry.is_running(id)
    }

    /// Whether `id` crashed and is waiting for its scheduled relaunch
    pub fn is_pending_restart(&self, id: &ProcessId) -> bool {
        self.inner.registry.is_pending_restart(id)
    }

    pub fn bulk_status(&self, ids: &[ProcessId]) -> HashMap<ProcessId, bool> {
        self.inner.registry.bulk_status(ids)
    }

    /// OS pids of the given ids that are running right now
    pub fn running_pids(&self, ids: &[ProcessId]) -> HashMap<ProcessId, u32> {
        self.inner.registry.running_pids(ids)
    }

    /// Every id with a record: running, exiting, or waiting to restart
    pub fn known_ids(&self) -> Vec<ProcessId> {
        self.inner.registry.ids()
    }

    /// Sample CPU and memory for those of `ids` that are running
    pub async fn sample_resources(
        &self,
        sampler: &ResourceSampler,
        ids: &[ProcessId],
    ) -> HashMap<ProcessId, ResourceUsage> {
        sampler.sample(self.running_pids(ids)).await
    }

    /// Stop everything and tear down log batching. Safe with no processes.
    pub fn stop_all(&self) {
        self.inner.batcher.flush();

        let ids = self.inner.registry.ids();
        if !ids.is_empty() {
            info!("Stopping {} processes", ids.len());
        }
        for id in &ids {
            self.stop(id);
        }

        self.inner.batcher.stop();
    }

    /// No records are left and every exit has been fully reported
    pub fn is_idle(&self) -> bool {
        self.inner.registry.len() == 0 && self.inner.in_flight.load(Ordering::SeqCst) == 0
    }

    /// Wait until the supervisor is idle, up to `timeout`. Returns whether it
    /// got there.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}
