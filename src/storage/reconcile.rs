/// Background reconciliation scheduler
///
/// Runs the coordinator's pending-sync sweep on a cron schedule using
/// tokio-cron-scheduler. Sweeps never overlap: a tick that fires while a
/// sweep (scheduled or on-demand) is still running is skipped. Stopping the
/// scheduler cancels an in-flight sweep between keys.

use crate::storage::coordinator::{ReconcileReport, StorageCoordinator};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Cron-driven reconciliation service
pub struct ReconcileScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    job_uuid: Mutex<Option<Uuid>>,
    coordinator: Arc<StorageCoordinator>,
    shutdown: CancellationToken,
}

impl ReconcileScheduler {
    pub async fn new(coordinator: Arc<StorageCoordinator>, shutdown: CancellationToken) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid: Mutex::new(None),
            coordinator,
            shutdown,
        })
    }

    /// Register the sweep job and start ticking
    pub async fn start(&self, schedule: &str) -> Result<()> {
        if self.coordinator.is_local_only() {
            tracing::info!("⏭️ Local-only storage, reconciliation scheduler not started");
            return Ok(());
        }

        tracing::info!("⏰ Starting reconciliation scheduler ({})", schedule);

        let coordinator = Arc::clone(&self.coordinator);
        let shutdown = self.shutdown.clone();

        let job = Job::new_async(schedule, move |_uuid, _l| {
            let coordinator = Arc::clone(&coordinator);
            let shutdown = shutdown.clone();

            Box::pin(async move {
                if shutdown.is_cancelled() {
                    return;
                }
                if let Err(e) = coordinator.try_reconcile(&shutdown.child_token()).await {
                    tracing::error!("❌ Scheduled reconciliation failed: {}", e);
                }
            })
        })?;

        let job_uuid = {
            let scheduler = self.scheduler.write().await;
            let uuid = scheduler.add(job).await?;
            scheduler.start().await?;
            uuid
        };
        *self.job_uuid.lock().await = Some(job_uuid);

        tracing::info!("✅ Reconciliation scheduler started");
        Ok(())
    }

    /// Run one sweep now (on-demand reconciliation)
    ///
    /// Returns `None` when a sweep is already running.
    pub async fn run_now(&self) -> Result<Option<ReconcileReport>> {
        Ok(self.coordinator.try_reconcile(&self.shutdown.child_token()).await?)
    }

    /// Cancel any in-flight sweep and shut the scheduler down
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping reconciliation scheduler");
        self.shutdown.cancel();

        // Only a started scheduler has a job registered
        if let Some(job_uuid) = self.job_uuid.lock().await.take() {
            let mut scheduler = self.scheduler.write().await;
            if let Err(e) = scheduler.remove(&job_uuid).await {
                tracing::warn!("⚠️ Failed to remove reconciliation job: {}", e);
            }
            if let Err(e) = scheduler.shutdown().await {
                tracing::warn!("⚠️ Scheduler shutdown reported: {}", e);
            }
        }

        tracing::info!("✅ Reconciliation scheduler stopped");
        Ok(())
    }
}
