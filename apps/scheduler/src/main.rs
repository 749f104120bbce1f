use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clinic_cell::SupabaseClinicDirectory;
use reminder_queue_cell::{
    ChannelRouter, DailyBatchScheduler, GatewayDispatcher, InAppNotificationHub, NotificationDispatcher, QueueStats,
    RedisReminderStore, ReminderConsumerService, ReminderJobStore, ReminderSchedulerService, ReminderWorkerService,
    WorkerConfig,
};
use shared_config::AppConfig;
use shared_database::{AppointmentRepository, SupabaseAppointmentRepository, SupabaseClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic reminder scheduler");

    let config = AppConfig::from_env();
    if !config.is_configured() {
        warn!("Supabase is not configured; appointment lookups will fail");
    }

    let store: Arc<dyn ReminderJobStore> = Arc::new(
        RedisReminderStore::new(&config)
            .await
            .context("failed to connect to the reminder queue")?,
    );

    let supabase = Arc::new(SupabaseClient::new(&config));
    let appointments: Arc<dyn AppointmentRepository> =
        Arc::new(SupabaseAppointmentRepository::new(Arc::clone(&supabase)));
    let directory = Arc::new(SupabaseClinicDirectory::new(Arc::clone(&supabase)));

    let in_app_hub = Arc::new(InAppNotificationHub::new());
    let dispatcher: Arc<dyn NotificationDispatcher> = Arc::new(ChannelRouter::new(
        Arc::new(GatewayDispatcher::new(&config)),
        in_app_hub.clone(),
    ));

    let stats = Arc::new(RwLock::new(QueueStats::default()));
    let producer = Arc::new(
        ReminderSchedulerService::new(Arc::clone(&store), &config).with_stats(Arc::clone(&stats)),
    );
    let worker = Arc::new(
        ReminderWorkerService::new(
            WorkerConfig::from_app_config(&config),
            &config,
            Arc::clone(&store),
            Arc::clone(&appointments),
            directory,
            dispatcher,
        )
        .with_stats(Arc::clone(&stats)),
    );
    let batch = Arc::new(DailyBatchScheduler::new(appointments, producer, &config));

    // Re-prime tomorrow's reminders in case the last trigger was missed while down.
    if let Err(e) = batch.run_once().await {
        error!("Startup reminder batch failed: {}", e);
    }

    let consumer = Arc::new(ReminderConsumerService::new(worker, batch).with_in_app_hub(in_app_hub));

    let runner = Arc::clone(&consumer);
    let handle = tokio::spawn(async move { runner.start().await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    consumer.shutdown();

    handle.await.context("reminder consumer task panicked")??;

    let stats = consumer.get_queue_stats().await;
    info!(
        "Scheduler stopped: {} scheduled, {} delivered, {} failed, {} skipped",
        stats.scheduled, stats.completed, stats.failed, stats.skipped_stale
    );
    Ok(())
}
