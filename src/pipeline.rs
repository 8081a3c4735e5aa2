use std::sync::Arc;

use tokio::{sync::watch, task::JoinHandle};

use crate::{
    config::IngestConfig,
    fetcher::{Fetcher, FetcherSettings},
    normalizer::Normalizer,
    provider::AccountDataProvider,
    queue::{sync_queue, JobReceiver},
    storage::{AccountStore, SnapshotStore},
};

/// Fetcher, queue and normalizer workers wired to one set of stores.
pub struct Pipeline {
    fetcher: Fetcher,
    normalizer: Normalizer,
    jobs: JobReceiver,
    workers: usize,
}

pub struct PipelineHandle {
    fetcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn AccountStore>,
        snapshots: Arc<dyn SnapshotStore>,
        provider: Arc<dyn AccountDataProvider>,
        config: &IngestConfig,
    ) -> Self {
        let (tx, rx) = sync_queue(config.queue_capacity);
        let fetcher = Fetcher::new(
            store.clone(),
            snapshots.clone(),
            provider,
            tx,
            FetcherSettings::from_config(config),
        );
        let normalizer = Normalizer::new(store, snapshots, config.default_priority);
        Self {
            fetcher,
            normalizer,
            jobs: rx,
            workers: config.normalizer_workers.max(1),
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> PipelineHandle {
        let workers = (0..self.workers)
            .map(|worker| tokio::spawn(self.normalizer.clone().run(self.jobs.clone(), worker)))
            .collect();
        let fetcher = tokio::spawn(self.fetcher.run(shutdown));
        PipelineHandle { fetcher, workers }
    }
}

impl PipelineHandle {
    /// Waits for the fetcher to stop and the workers to drain the queue.
    pub async fn join(self) {
        if let Err(e) = self.fetcher.await {
            tracing::error!(error = %e, "Fetcher task failed");
        }
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Normalizer task failed");
            }
        }
        tracing::info!("Pipeline drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use acctsync_core::{NewAccount, SyncStatus};
    use acctsync_memory::{InMemoryAccountStore, InMemorySnapshotStore};

    use crate::provider::MockBankProvider;

    #[tokio::test]
    async fn test_spawned_pipeline_syncs_and_drains_on_shutdown() {
        let store = Arc::new(InMemoryAccountStore::new());
        store
            .insert_account(
                &NewAccount::new("acc-test-001", "user-dave", "bank_leumi", "8888-99")
                    .with_status(SyncStatus::PendingSync)
                    .with_priority(100),
            )
            .unwrap();

        let config = IngestConfig {
            tick_interval_secs: 1,
            ..IngestConfig::default()
        };
        let pipeline = Pipeline::new(
            store.clone(),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(MockBankProvider::new(Duration::ZERO)),
            &config,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = pipeline.spawn(shutdown_rx);

        // the first interval tick fires immediately
        let mut synced = false;
        for _ in 0..100 {
            if store.get_account("acc-test-001").unwrap().sync_status == SyncStatus::Idle {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(synced, "account never returned to IDLE");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.join()).await.unwrap();
        assert_eq!(store.count_transactions("acc-test-001").unwrap(), 2);
    }
}
