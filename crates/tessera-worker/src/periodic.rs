//! Interval-driven maintenance jobs (upload session reaping and the like).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// One pass; returns how many items it acted on.
    async fn run_once(&self) -> anyhow::Result<usize>;
}

pub struct PeriodicHandle {
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PeriodicHandle {
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Run `job` every `every`, first tick immediately. A zero interval disables
/// the job.
pub fn spawn_periodic(job: Arc<dyn PeriodicJob>, every: Duration) -> PeriodicHandle {
    if every.is_zero() {
        tracing::info!(job = job.name(), "Periodic job disabled");
        return PeriodicHandle {
            shutdown_tx: None,
            task: None,
        };
    }

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match job.run_once().await {
                        Ok(0) => tracing::trace!(job = job.name(), "Nothing to do"),
                        Ok(count) => tracing::info!(job = job.name(), count, "Periodic job pass"),
                        Err(e) => tracing::error!(job = job.name(), error = %e, "Periodic job failed"),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    });

    PeriodicHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}
