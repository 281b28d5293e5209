use async_std::channel::{self, Receiver, Sender};
use async_std::future;
use async_std::task::{self, JoinHandle};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// The interval between two sweeps of a store's background collector.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Something that holds expiring state locally and can evict it.
#[async_trait]
pub(crate) trait Sweep: Send + Sync + 'static {
    /// Evict all expired entries. Failures are logged, never returned.
    async fn sweep(&self);
}

/// Owns the background worker that periodically sweeps one store.
///
/// Stopping is idempotent: the stop channel is closed (closing twice is a no-op),
/// and the worker handle is taken out exactly once and awaited.
#[derive(Debug)]
pub(crate) struct Collector {
    stop: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Collector {
    /// Spawn a worker sweeping `target` every `interval`.
    pub(crate) fn spawn<S: Sweep>(target: Arc<S>, interval: Duration) -> Self {
        let (stop, stopped) = channel::bounded(1);
        let worker = task::spawn(run(target, interval, stopped));
        Self {
            stop,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Signal the worker and wait until it has exited.
    /// A sweep that is in progress runs to completion first.
    pub(crate) async fn stop(&self) {
        self.stop.close();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.await;
            log::debug!("session garbage collector stopped");
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.stop.close();
    }
}

async fn run<S: Sweep>(target: Arc<S>, interval: Duration, stopped: Receiver<()>) {
    log::debug!("session garbage collector started, interval {interval:?}");
    // Receiving fails once the channel is closed, so both a message and closing end the loop.
    while future::timeout(interval, stopped.recv()).await.is_err() {
        log::trace!("sweeping expired sessions");
        target.sweep().await;
    }
}
