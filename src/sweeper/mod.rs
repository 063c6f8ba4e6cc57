use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::allocator::CodeAllocator;
use crate::contracts::{Clock, CounterStore, LockResultExt, StorageError};

/// Configuration for the background reservation sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between sweeps
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

impl SweeperConfig {
    /// Creates a config from environment variables.
    ///
    /// Reads `LABSEQ_SWEEP_INTERVAL_SECS` (default: 30).
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            interval: std::env::var("LABSEQ_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.interval),
        }
    }
}

/// Periodically drops expired reservations.
///
/// The allocator already expires lazily on every key read; the sweeper
/// covers keys nobody reads again, so abandoned previews do not sit in
/// memory until the next request happens to touch them.
pub struct BackgroundSweeper<S, C>
where
    S: CounterStore + 'static,
    C: Clock + 'static,
{
    allocator: Arc<CodeAllocator<S, C>>,
    config: SweeperConfig,
    /// Flag to signal shutdown
    shutdown: Arc<AtomicBool>,
    /// Notify for immediate sweep requests
    sweep_notify: Arc<Notify>,
    /// Handle to the background task
    task_handle: RwLock<Option<JoinHandle<()>>>,
}

impl<S, C> BackgroundSweeper<S, C>
where
    S: CounterStore + 'static,
    C: Clock + 'static,
{
    /// Creates a new background sweeper.
    pub fn new(allocator: Arc<CodeAllocator<S, C>>, config: SweeperConfig) -> Self {
        Self {
            allocator,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            sweep_notify: Arc::new(Notify::new()),
            task_handle: RwLock::new(None),
        }
    }

    /// Starts the sweep loop.
    pub fn start(&self) -> Result<(), StorageError> {
        let allocator = Arc::clone(&self.allocator);
        let shutdown = Arc::clone(&self.shutdown);
        let notify = Arc::clone(&self.sweep_notify);
        let interval = self.config.interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = notify.notified() => {}
                }

                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                let dropped = allocator.expire_stale();
                if dropped > 0 {
                    tracing::debug!(dropped, "Expired stale reservations");
                }
            }
        });

        *self.task_handle.write().map_lock_err()? = Some(handle);
        Ok(())
    }

    /// Requests an immediate sweep outside the normal interval.
    pub fn sweep_now(&self) {
        self.sweep_notify.notify_one();
    }

    /// Signals shutdown and stops the sweep task.
    pub fn stop(&self) -> Result<(), StorageError> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.sweep_notify.notify_one();
        if let Some(handle) = self.task_handle.write().map_lock_err()?.take() {
            handle.abort();
        }
        Ok(())
    }
}
