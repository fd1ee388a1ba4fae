//! Periodic purge of expired revocation entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::RevocationRegistry;

/// Purges revocation entries once the access token they guard could no
/// longer validate anyway.
pub struct Sweeper {
    registry: Arc<dyn RevocationRegistry>,
    period: Duration,
}

/// Handle on a running [`Sweeper`].
pub struct SweeperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Create a new [`Sweeper`].
    pub fn new(registry: Arc<dyn RevocationRegistry>, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Run a single sweep. Failures are logged, never propagated.
    pub async fn run_once(&self) -> u64 {
        match self.registry.sweep().await {
            Ok(count) => {
                metrics::counter!("revocations_swept_total").increment(count);
                tracing::debug!(count, "revocation entries swept");
                count
            },
            Err(err) => {
                tracing::error!(error = %err, "revocation sweep failed, retrying next tick");
                0
            },
        }
    }

    /// Spawn the periodic task. The first sweep runs immediately.
    pub fn start(self) -> SweeperHandle {
        let (shutdown, mut stop) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(period = ?self.period, "revocation sweeper started");
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = interval.tick() => {
                        self.run_once().await;
                    }
                }
            }
            tracing::info!("revocation sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}

impl SweeperHandle {
    /// Stop the task and wait for it to finish its current sweep.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "revocation sweeper panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_run_once() {
        let store = Arc::new(MemoryStore::default());
        store
            .record("expired", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();
        store
            .record("live", Utc::now() + chrono::Duration::minutes(15))
            .await
            .unwrap();

        let sweeper = Sweeper::new(store.clone(), Duration::from_secs(60));
        assert_eq!(sweeper.run_once().await, 1);
        assert_eq!(sweeper.run_once().await, 0);
        assert!(store.revocation("expired").is_none());
        assert!(store.revocation("live").is_some());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let store = Arc::new(MemoryStore::default());
        store
            .record("expired", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        let handle = Sweeper::new(store.clone(), Duration::from_secs(3600)).start();

        // the first tick fires right away.
        for _ in 0..100 {
            if store.revocation("expired").is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.revocation("expired").is_none());

        handle.stop().await;
    }
}
