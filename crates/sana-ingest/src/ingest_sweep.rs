//! Background expiry sweep for fingerprint caches.
//!
//! One tokio task services every cache handed to it on a fixed cadence.
//! Each pass takes each cache's lock once for a bounded retain, so
//! concurrent `get`/`put`/`claim` callers wait at most one iteration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use sana_core::current_unix_timestamp_ms;

use crate::ingest_fingerprint::FingerprintCache;

/// Handle to a running sweeper; dropping it without [`shutdown`] leaves the
/// task running until its runtime stops.
///
/// [`shutdown`]: FingerprintSweeperHandle::shutdown
pub struct FingerprintSweeperHandle {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl FingerprintSweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}

pub fn spawn_fingerprint_sweeper(
    caches: Vec<Arc<FingerprintCache>>,
    interval: Duration,
) -> FingerprintSweeperHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join = tokio::spawn(run_fingerprint_sweep_loop(caches, interval, shutdown_rx));
    FingerprintSweeperHandle { shutdown_tx, join }
}

async fn run_fingerprint_sweep_loop(
    caches: Vec<Arc<FingerprintCache>>,
    interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now_ms = current_unix_timestamp_ms();
                for cache in &caches {
                    let removed = cache.sweep(now_ms);
                    if removed > 0 {
                        tracing::debug!(
                            "fingerprint sweep: removed={} remaining={} window_ms={}",
                            removed,
                            cache.len(),
                            cache.window_ms()
                        );
                    }
                }
            }
            _ = &mut shutdown_rx => {
                break;
            }
        }
    }
}
