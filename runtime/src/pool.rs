//! Fixed pool of materializer workers sharing one consumer group.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::materializer::Materializer;

/// Running workers.
pub struct MaterializerPool {
    workers: Vec<(String, JoinHandle<()>)>,
}

impl MaterializerPool {
    /// Spawn `workers` copies of `template`, named `{prefix}1..={prefix}N`.
    ///
    /// Names are stable across restarts so each worker recovers its own
    /// predecessor's pending entries.
    #[must_use]
    pub fn spawn(
        template: &Materializer,
        workers: usize,
        consumer_prefix: &str,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let workers = (1..=workers.max(1))
            .map(|index| {
                let consumer = format!("{consumer_prefix}{index}");
                let worker = template.clone().with_consumer(consumer.clone());
                let handle = tokio::spawn(worker.run(shutdown.subscribe()));
                (consumer, handle)
            })
            .collect::<Vec<_>>();

        tracing::info!(workers = workers.len(), "Materializer pool started");
        Self { workers }
    }

    /// Consumer names of the workers.
    #[must_use]
    pub fn consumers(&self) -> Vec<&str> {
        self.workers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Wait for every worker to stop, all within one shared `timeout`.
    ///
    /// Returns how many workers did not stop cleanly in time.
    pub async fn join(self, timeout: Duration) -> usize {
        let started = Instant::now();
        // An unrepresentable deadline means "wait as long as it takes"
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + Duration::from_secs(86_400 * 365));
        let mut unclean = 0;
        for (consumer, handle) in self.workers {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => tracing::info!(consumer = %consumer, "Worker stopped gracefully"),
                Ok(Err(e)) => {
                    unclean += 1;
                    tracing::warn!(consumer = %consumer, error = %e, "Worker task failed");
                }
                Err(_) => {
                    unclean += 1;
                    tracing::warn!(consumer = %consumer, "Worker shutdown timed out");
                }
            }
        }
        unclean
    }
}
