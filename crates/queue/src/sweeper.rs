//! Background reclamation of expired leases.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use jobq_storage::Store;

/// How often the sweeper looks for expired leases.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Deadline for a single sweep operation.
const TICK_DEADLINE: Duration = Duration::from_secs(30);

/// Periodic task that transitions tasks with elapsed leases to `failed`.
///
/// One instance per service; started at construction, stopped at shutdown.
#[derive(Debug)]
pub struct TimeoutSweeper;

impl TimeoutSweeper {
    /// Spawn the sweep loop on the current runtime.
    pub fn spawn(store: Arc<dyn Store>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(sweep_loop(store, interval, shutdown_rx));
        SweeperHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// Handle to stop a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal termination and wait for the loop to exit. Returns only after
    /// an in-progress tick has settled.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

async fn sweep_loop(
    store: Arc<dyn Store>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(interval_secs = interval.as_secs_f64(), "timeout sweeper started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; consume it so
    // the loop waits a full period before the first sweep.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                match tokio::time::timeout(TICK_DEADLINE, store.mark_expired_tasks()).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(reclaimed)) => info!(reclaimed, "reclaimed expired tasks"),
                    Ok(Err(err)) => error!(error = %err, "failed to mark expired tasks"),
                    Err(_) => error!("expired-task sweep exceeded its deadline"),
                }
            }
        }
    }

    debug!("timeout sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use jobq_core::{Queue, Task, TaskStatus};
    use jobq_storage::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn reclaims_an_expired_lease() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_queue(&Queue::new("q", Duration::from_secs(1)))
            .await
            .unwrap();
        let task = store
            .create_task(&Task::new("q", json!({ "k": "v" })))
            .await
            .unwrap();
        store.lease_next_task("q", "c1").await.unwrap().unwrap();

        let handle = TimeoutSweeper::spawn(store.clone(), Duration::from_millis(100));

        // Lease is 1s; well within 3s the sweeper must have reclaimed it.
        let mut reclaimed = false;
        for _ in 0..30 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let task = store.get_task(task.id).await.unwrap().unwrap();
            if task.status == TaskStatus::Failed {
                assert_eq!(task.data["error"], "Task timeout exceeded");
                assert_eq!(task.data["k"], "v");
                reclaimed = true;
                break;
            }
        }
        assert!(reclaimed, "sweeper did not reclaim the expired lease");

        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_returns_promptly_when_idle() {
        let store = Arc::new(MemoryStore::new());
        let handle = TimeoutSweeper::spawn(store, Duration::from_secs(3600));
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("stop should not hang");
    }
}
