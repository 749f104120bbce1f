use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, instrument, warn};

use crate::services::{
    batch::DailyBatchScheduler,
    in_app::InAppNotificationHub,
    worker::ReminderWorkerService,
};
use crate::{QueueStats, ReminderQueueError};

/// Supervises the reminder workers, the daily batch trigger and the housekeeping loop
/// that requeues stalled jobs and prunes finished ones.
pub struct ReminderConsumerService {
    worker_service: Arc<ReminderWorkerService>,
    batch_scheduler: Arc<DailyBatchScheduler>,
    in_app_hub: Option<Arc<InAppNotificationHub>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ReminderConsumerService {
    pub fn new(worker_service: Arc<ReminderWorkerService>, batch_scheduler: Arc<DailyBatchScheduler>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            worker_service,
            batch_scheduler,
            in_app_hub: None,
            shutdown_tx,
        }
    }

    /// Lets the cleanup loop also prune idle in-app channels.
    pub fn with_in_app_hub(mut self, hub: Arc<InAppNotificationHub>) -> Self {
        self.in_app_hub = Some(hub);
        self
    }

    /// Runs until `shutdown` is called, then waits for every loop to stop.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), ReminderQueueError> {
        if *self.shutdown_tx.borrow() {
            warn!("Consumer service was already shut down");
            return Ok(());
        }

        let config = self.worker_service.config().clone();
        info!(
            "Starting reminder consumer {} with {} workers",
            config.worker_id, config.worker_count
        );

        match self.worker_service.recover_stalled(Utc::now()).await {
            Ok(requeued) if requeued > 0 => info!("Recovered {} reminder jobs left active by a previous run", requeued),
            Ok(_) => {}
            Err(e) => error!("Failed to recover stalled reminder jobs: {}", e),
        }

        let mut handles = Vec::new();

        for i in 0..config.worker_count {
            let worker = Arc::clone(&self.worker_service);
            let worker_name = format!("{}-{}", config.worker_id, i);
            let shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move { worker.run(worker_name, shutdown).await }));
        }

        let batch = Arc::clone(&self.batch_scheduler);
        let shutdown = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move { batch.run(shutdown).await }));

        let worker = Arc::clone(&self.worker_service);
        let hub = self.in_app_hub.clone();
        let shutdown = self.shutdown_tx.subscribe();
        let cleanup_every = Duration::from_secs(config.cleanup_interval_seconds.max(1));
        let retention = ChronoDuration::hours(config.finished_retention_hours);
        handles.push(tokio::spawn(async move {
            cleanup_loop(worker, hub, cleanup_every, retention, shutdown).await
        }));

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Reminder consumer task panicked: {}", e);
            }
        }

        info!("Reminder consumer shutdown complete");
        Ok(())
    }

    pub fn shutdown(&self) {
        info!("Initiating reminder consumer shutdown");
        self.shutdown_tx.send_replace(true);
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        self.worker_service.get_queue_stats().await
    }
}

async fn cleanup_loop(
    worker: Arc<ReminderWorkerService>,
    hub: Option<Arc<InAppNotificationHub>>,
    every: Duration,
    retention: ChronoDuration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut cleanup_interval = interval(every);
    // Recovery runs at least twice per visibility timeout so an abandoned job waits at
    // most one and a half timeouts.
    let recover_every = Duration::from_secs((worker.config().visibility_timeout_seconds / 2).max(1)).min(every);
    let mut recover_interval = interval(recover_every);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Cleanup loop stopping due to shutdown");
                    break;
                }
            }
            _ = recover_interval.tick() => {
                if let Err(e) = worker.recover_stalled(Utc::now()).await {
                    error!("Failed to recover stalled reminder jobs: {}", e);
                }
            }
            _ = cleanup_interval.tick() => {
                match worker.store().cleanup_finished(Utc::now() - retention).await {
                    Ok(cleaned) if cleaned > 0 => info!("Cleaned up {} finished reminder jobs", cleaned),
                    Ok(_) => {}
                    Err(e) => error!("Failed to clean up finished reminder jobs: {}", e),
                }

                if let Some(hub) = &hub {
                    let pruned = hub.prune_idle_channels().await;
                    if pruned > 0 {
                        debug!("Pruned {} idle in-app channels", pruned);
                    }
                }
            }
        }
    }
}
