//! Background draining on a timer.

use crate::engine::SyncEngine;
use crate::transport::SyncTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Runs `drain_all` on a fixed interval and whenever triggered.
///
/// The first cycle runs immediately. Cycles run on the blocking pool, so
/// the engine never blocks the async runtime.
pub struct AutoSync<T: SyncTransport + 'static> {
    engine: Arc<SyncEngine<T>>,
    trigger: Arc<Notify>,
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl<T: SyncTransport + 'static> AutoSync<T> {
    /// Starts the loop. Must be called from within a tokio runtime.
    pub fn start(engine: Arc<SyncEngine<T>>, interval: Duration) -> Self {
        let trigger = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());
        let handle = tokio::spawn(run(
            Arc::clone(&engine),
            interval,
            Arc::clone(&trigger),
            Arc::clone(&stop),
        ));
        Self {
            engine,
            trigger,
            stop,
            handle,
        }
    }

    /// Starts the loop with the engine's configured interval, if any.
    pub fn from_config(engine: Arc<SyncEngine<T>>) -> Option<Self> {
        let interval = engine.config().sync_interval?;
        Some(Self::start(engine, interval))
    }

    /// Asks for a cycle now, for example after a local write or when the
    /// network comes back.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// The engine being driven.
    pub fn engine(&self) -> &Arc<SyncEngine<T>> {
        &self.engine
    }

    /// Stops the loop, cancelling a running cycle.
    pub async fn shutdown(self) {
        self.stop.notify_one();
        self.engine.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "auto-sync task panicked");
        }
    }
}

async fn run<T: SyncTransport + 'static>(
    engine: Arc<SyncEngine<T>>,
    interval: Duration,
    trigger: Arc<Notify>,
    stop: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.notified() => break,
            _ = ticker.tick() => {}
            _ = trigger.notified() => {}
        }

        let cycle = Arc::clone(&engine);
        match tokio::task::spawn_blocking(move || cycle.drain_all()).await {
            Ok(Ok(summary)) => {
                if summary.submitted > 0 || summary.paused {
                    tracing::debug!(
                        submitted = summary.submitted,
                        paused = summary.paused,
                        "auto-sync cycle finished"
                    );
                }
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "auto-sync cycle failed"),
            Err(e) => tracing::error!(error = %e, "auto-sync cycle panicked"),
        }
    }

    tracing::debug!("auto-sync stopped");
}
