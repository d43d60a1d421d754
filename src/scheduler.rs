/// Periodic callback scheduling
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub type ScheduledCallback = Arc<dyn Fn() + Send + Sync>;

/// Something that runs zero-argument callbacks on a cadence
pub trait Scheduler: Send + Sync {
    fn register(&self, callback: ScheduledCallback);
}

/// Runs every registered callback once per interval on a background task.
///
/// Each callback runs on the blocking pool and is awaited before the next one
/// starts, so callbacks may do file I/O.
pub struct IntervalScheduler {
    interval: Duration,
    callbacks: Arc<Mutex<Vec<ScheduledCallback>>>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalScheduler {
    pub fn new(interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        IntervalScheduler {
            interval,
            callbacks: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the loop; calling again while it runs does nothing
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() {
            return;
        }

        let callbacks = Arc::clone(&self.callbacks);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.interval;

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let registered = callbacks.lock().unwrap_or_else(|e| e.into_inner()).clone();
                        debug!("Running {} scheduled callbacks", registered.len());
                        for callback in registered {
                            if let Err(e) = tokio::task::spawn_blocking(move || callback()).await {
                                error!("Scheduled callback failed: {}; continuing", e);
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));

        info!("⏱️  Scheduler started (every {:?})", self.interval);
    }

    /// Signal the loop to stop and wait for it
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
            info!("Scheduler stopped");
        }
    }
}

impl Scheduler for IntervalScheduler {
    fn register(&self, callback: ScheduledCallback) {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).push(callback);
    }
}
