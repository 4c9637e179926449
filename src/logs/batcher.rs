use crate::events::{EventSink, LogRecord, Notification};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Buffers log records from every managed process and delivers them as one
/// `process-log:batch` notification per tick.
///
/// The buffer has its own lock, independent of the process registry, so log
/// ingestion never waits on process state changes.
pub struct LogBatcher {
    /// Records queued since the last flush, in insertion order
    pending: Mutex<Vec<LogRecord>>,
    /// Serializes flushes so batches reach the sink in the order they were taken
    emit_lock: Mutex<()>,
    /// Background ticker, present while the batcher is started
    ticker: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
    sink: Arc<dyn EventSink>,
}

impl LogBatcher {
    pub fn new(sink: Arc<dyn EventSink>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(Vec::new()),
            emit_lock: Mutex::new(()),
            ticker: Mutex::new(None),
            interval,
            sink,
        })
    }

    /// Start the periodic flush task. Calling it again while running is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.interval;
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(batcher) => batcher.flush(),
                    None => break,
                }
            }
        }));

        tracing::debug!("Log batcher started (interval: {:?})", period);
    }

    pub fn is_running(&self) -> bool {
        self.ticker.lock().is_some()
    }

    /// Queue a record for the next batch
    pub fn push(&self, record: LogRecord) {
        self.pending.lock().push(record);
    }

    /// Emit everything queued so far as a single batch. Empty buffers emit nothing.
    pub fn flush(&self) {
        let _emitting = self.emit_lock.lock();
        let batch = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return;
            }
            std::mem::take(&mut *pending)
        };
        self.sink.emit(Notification::LogBatch(batch));
    }

    /// Flush once more and release the ticker
    pub fn stop(&self) {
        self.flush();
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            tracing::debug!("Log batcher stopped");
        }
    }
}

impl Drop for LogBatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
    }
}
