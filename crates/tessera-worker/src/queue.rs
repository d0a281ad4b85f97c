//! Import queue: bounded worker pool, polling and wake-ups, retry with backoff.
//!
//! Claiming is the `Pending -> Processing` transition in the repository, so an
//! id that is enqueued twice, or claimed by another process, runs once.
//! Shutdown stops claiming; imports already running continue to completion.

use std::sync::Arc;
use std::time::Duration;

use tessera_core::{Config, TaskError};
use tessera_db::ImportRepository;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use crate::context::ImportHandler;

/// Upper bound for a single retry delay.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
#[inline]
pub fn compute_retry_backoff(base: Duration, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_BACKOFF)
}

#[derive(Clone, Debug)]
pub struct ImportQueueConfig {
    pub max_workers: usize,
    pub poll_interval: Duration,
    /// Retries after the first attempt for recoverable failures
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Wall-clock bound for one attempt
    pub import_timeout: Duration,
}

impl Default for ImportQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval: Duration::from_millis(1000),
            max_retries: 3,
            base_backoff: Duration::from_secs(60),
            import_timeout: Duration::from_secs(4 * 60 * 60),
        }
    }
}

impl ImportQueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.worker_max_workers(),
            poll_interval: config.worker_poll_interval(),
            max_retries: config.retry_max_attempts(),
            base_backoff: config.retry_base_backoff(),
            import_timeout: config.import_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct ImportQueue {
    notify_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ImportQueue {
    /// Spawn the worker pool and return a handle to it.
    pub fn start(
        imports: Arc<dyn ImportRepository>,
        config: ImportQueueConfig,
        handler: Arc<dyn ImportHandler>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (notify_tx, notify_rx) = mpsc::channel(16);

        tokio::spawn(async move {
            Self::worker_pool(imports, config, handler, notify_rx, shutdown_rx).await;
        });

        Self {
            notify_tx,
            shutdown_tx,
        }
    }

    /// Wake the pool for a freshly created journal. The journal is picked up
    /// by the next poll even if the wake-up is lost.
    #[tracing::instrument(skip(self))]
    pub fn enqueue(&self, import_id: Uuid) {
        if self.notify_tx.try_send(()).is_err() {
            tracing::debug!(import_id = %import_id, "Wake-up channel full, relying on poll");
        }
    }

    /// Stop claiming new imports. Returns without waiting for running ones.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating import queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }

    async fn worker_pool(
        imports: Arc<dyn ImportRepository>,
        config: ImportQueueConfig,
        handler: Arc<dyn ImportHandler>,
        mut notify_rx: mpsc::Receiver<()>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            max_retries = config.max_retries,
            "Import worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Import worker pool shutting down");
                    break;
                }
                Some(()) = notify_rx.recv() => {
                    Self::claim_and_dispatch(&imports, &semaphore, &handler, &config).await;
                }
                _ = sleep(config.poll_interval) => {
                    Self::claim_and_dispatch(&imports, &semaphore, &handler, &config).await;
                }
            }
        }

        tracing::info!("Import worker pool stopped");
    }

    async fn claim_and_dispatch(
        imports: &Arc<dyn ImportRepository>,
        semaphore: &Arc<Semaphore>,
        handler: &Arc<dyn ImportHandler>,
        config: &ImportQueueConfig,
    ) {
        let available = semaphore.available_permits();
        if available == 0 {
            tracing::debug!("No workers available, skipping claim");
            return;
        }

        let pending = match imports.list_pending(available as i64).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list pending imports");
                return;
            }
        };

        for import_id in pending {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                break;
            };

            match imports.mark_processing(import_id).await {
                Ok(true) => {
                    let handler = handler.clone();
                    let config = config.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        Self::process_with_retry(import_id, handler, config).await;
                    });
                }
                Ok(false) => {
                    tracing::debug!(import_id = %import_id, "Import already claimed");
                }
                Err(e) => {
                    tracing::error!(import_id = %import_id, error = %e, "Failed to claim import");
                }
            }
        }
    }

    #[tracing::instrument(skip(handler, config), fields(import.id = %import_id))]
    async fn process_with_retry(
        import_id: Uuid,
        handler: Arc<dyn ImportHandler>,
        config: ImportQueueConfig,
    ) {
        let mut attempt = 1u32;
        loop {
            let start = std::time::Instant::now();
            let outcome =
                tokio::time::timeout(config.import_timeout, handler.clone().run(import_id, attempt))
                    .await;

            let error = match outcome {
                Ok(Ok(())) => {
                    tracing::info!(
                        import_id = %import_id,
                        attempt,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "Import finished"
                    );
                    return;
                }
                Ok(Err(e)) => e,
                Err(_) => {
                    tracing::error!(
                        import_id = %import_id,
                        timeout_secs = config.import_timeout.as_secs(),
                        "Import timed out"
                    );
                    TaskError::unrecoverable(anyhow::anyhow!(
                        "import timed out after {}s",
                        config.import_timeout.as_secs()
                    ))
                }
            };

            tracing::warn!(
                import_id = %import_id,
                attempt,
                error = %error,
                recoverable = error.is_recoverable(),
                "Import attempt failed"
            );

            if error.is_recoverable() && attempt <= config.max_retries {
                let backoff = compute_retry_backoff(config.base_backoff, attempt);
                handler.retrying(import_id, attempt, backoff, &error).await;
                sleep(backoff).await;
                attempt += 1;
                continue;
            }

            handler.give_up(import_id, &error).await;
            return;
        }
    }
}
