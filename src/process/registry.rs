use crate::process::types::{ActiveProcess, ProcessId, ProcessRecord, ProcessSpec};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub(crate) type RecordMap = HashMap<ProcessId, ProcessRecord>;

/// What a stop request has to do once the registry has been updated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopAction {
    /// No record for this id
    Unknown,
    /// A pending relaunch was cancelled and its placeholder removed
    CancelledRestart,
    /// Already being stopped, or already exited
    AlreadyStopping,
    /// Send SIGTERM to this process group
    Terminate { pgid: u32 },
}

/// Single source of truth for which processes exist and in what shape.
///
/// Every access goes through one reader/writer lock. Callers copy out what
/// they need while the lock is held; records never leave the map by reference.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    records: Arc<RwLock<RecordMap>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access for compound transitions (install, swap placeholder)
    pub fn write(&self) -> RwLockWriteGuard<'_, RecordMap> {
        self.records.write()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn ids(&self) -> Vec<ProcessId> {
        self.records.read().keys().cloned().collect()
    }

    pub fn is_running(&self, id: &ProcessId) -> bool {
        self.records
            .read()
            .get(id)
            .map(ProcessRecord::is_running)
            .unwrap_or(false)
    }

    pub fn is_pending_restart(&self, id: &ProcessId) -> bool {
        matches!(
            self.records.read().get(id),
            Some(ProcessRecord::PendingRestart(_))
        )
    }

    pub fn bulk_status(&self, ids: &[ProcessId]) -> HashMap<ProcessId, bool> {
        let records = self.records.read();
        ids.iter()
            .map(|id| {
                let running = records.get(id).map(ProcessRecord::is_running).unwrap_or(false);
                (id.clone(), running)
            })
            .collect()
    }

    pub fn running_pids(&self, ids: &[ProcessId]) -> HashMap<ProcessId, u32> {
        let records = self.records.read();
        ids.iter()
            .filter_map(|id| {
                records
                    .get(id)
                    .and_then(ProcessRecord::running_pid)
                    .map(|pid| (id.clone(), pid))
            })
            .collect()
    }

    /// Spec and retry count of a pending relaunch, if one is scheduled
    pub fn pending_restart(&self, id: &ProcessId) -> Option<(Arc<ProcessSpec>, u32)> {
        match self.records.read().get(id) {
            Some(ProcessRecord::PendingRestart(pending)) => {
                Some((pending.spec.clone(), pending.retry_count))
            }
            _ => None,
        }
    }

    /// Drop a pending-restart placeholder. False if there was none.
    pub fn remove_pending(&self, id: &ProcessId) -> bool {
        let mut records = self.records.write();
        if !matches!(records.get(id), Some(ProcessRecord::PendingRestart(_))) {
            return false;
        }
        records.remove(id);
        true
    }

    /// True while `id` is the live, unreaped run with this pid
    pub fn is_live_pid(&self, id: &ProcessId, pid: u32) -> bool {
        matches!(
            self.records.read().get(id),
            Some(ProcessRecord::Active(active)) if active.pid == pid && !active.exited
        )
    }

    /// Flag the run as exited so status queries stop reporting it right away
    pub fn mark_exited(&self, id: &ProcessId, pid: u32) {
        if let Some(ProcessRecord::Active(active)) = self.records.write().get_mut(id) {
            if active.pid == pid {
                active.exited = true;
            }
        }
    }

    /// Register a stop request and tell the caller what is left to do
    pub fn request_stop(&self, id: &ProcessId) -> StopAction {
        let mut records = self.records.write();

        if matches!(records.get(id), Some(ProcessRecord::PendingRestart(_))) {
            if let Some(ProcessRecord::PendingRestart(pending)) = records.remove(id) {
                pending.timer.abort();
            }
            return StopAction::CancelledRestart;
        }

        match records.get_mut(id) {
            // An exit already observed keeps its own verdict
            Some(ProcessRecord::Active(active)) if active.exited => StopAction::AlreadyStopping,
            Some(ProcessRecord::Active(active)) => {
                let already_requested = active.manual_stop;
                active.manual_stop = true;
                if already_requested {
                    StopAction::AlreadyStopping
                } else {
                    StopAction::Terminate { pgid: active.pid }
                }
            }
            _ => StopAction::Unknown,
        }
    }

    /// Keep the kill escalation with the run it governs. If that run is
    /// already gone the timer is cancelled instead.
    pub fn attach_kill_timer(&self, id: &ProcessId, pid: u32, timer: JoinHandle<()>) {
        let mut records = self.records.write();
        match records.get_mut(id) {
            Some(ProcessRecord::Active(active)) if active.pid == pid && !active.exited => {
                if let Some(previous) = active.kill_timer.replace(timer) {
                    previous.abort();
                }
            }
            _ => timer.abort(),
        }
    }

    /// Take the active record for a reaped run out of the map
    pub fn remove_active(records: &mut RecordMap, id: &ProcessId, pid: u32) -> Option<ActiveProcess> {
        match records.get(id) {
            Some(ProcessRecord::Active(active)) if active.pid == pid => {}
            _ => return None,
        }
        match records.remove(id) {
            Some(ProcessRecord::Active(active)) => Some(active),
            _ => None,
        }
    }
}
