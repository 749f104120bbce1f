use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use shared_config::AppConfig;
use shared_database::AppointmentRepository;
use shared_models::AppointmentStatus;

use crate::services::producer::ReminderSchedulerService;
use crate::{BatchReport, ReminderQueueError};

/// Once a day, re-primes the queue with reminders for tomorrow's appointments.
/// Scheduling is idempotent, so running it redundantly is harmless.
pub struct DailyBatchScheduler {
    appointments: Arc<dyn AppointmentRepository>,
    producer: Arc<ReminderSchedulerService>,
    clinic_offset: FixedOffset,
    batch_hour: u32,
}

impl DailyBatchScheduler {
    pub fn new(
        appointments: Arc<dyn AppointmentRepository>,
        producer: Arc<ReminderSchedulerService>,
        config: &AppConfig,
    ) -> Self {
        Self {
            appointments,
            producer,
            clinic_offset: config.clinic_offset(),
            batch_hour: config.batch_hour(),
        }
    }

    /// First trigger instant strictly after `now` on the clinic clock.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.clinic_offset);
        let trigger = NaiveTime::from_hms_opt(self.batch_hour, 0, 0).unwrap_or(NaiveTime::MIN);

        let mut date = local.date_naive();
        if local.time() >= trigger {
            date += Duration::days(1);
        }

        self.clinic_offset
            .from_local_datetime(&date.and_time(trigger))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| now + Duration::days(1))
    }

    /// Tomorrow relative to `now` on the clinic clock.
    pub fn tomorrow(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.clinic_offset).date_naive() + Duration::days(1)
    }

    pub async fn run_once(&self) -> Result<BatchReport, ReminderQueueError> {
        self.run_for(Utc::now()).await
    }

    #[instrument(skip(self))]
    pub async fn run_for(&self, now: DateTime<Utc>) -> Result<BatchReport, ReminderQueueError> {
        let date = self.tomorrow(now);
        let appointments = self
            .appointments
            .list_on_date(date, &AppointmentStatus::BLOCKING)
            .await?;

        let mut report = BatchReport { date: Some(date), ..BatchReport::default() };

        for appointment in appointments
            .iter()
            .filter(|a| a.notification_preferences.wants_reminders())
        {
            report.appointments_seen += 1;
            match self.producer.schedule_at(appointment, now).await {
                Ok(scheduled) => {
                    report.jobs_created += (scheduled.created.len() + scheduled.replaced.len()) as u32;
                    report.jobs_unchanged += scheduled.unchanged.len() as u32;
                }
                Err(e) => {
                    report.errors += 1;
                    warn!("Batch could not schedule reminders for appointment {}: {}", appointment.id, e);
                }
            }
        }

        info!(
            "Daily reminder batch for {}: {} appointments, {} new jobs, {} already queued, {} errors",
            date, report.appointments_seen, report.jobs_created, report.jobs_unchanged, report.errors
        );
        Ok(report)
    }

    /// Sleeps until each daily trigger and runs the batch, until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let now = Utc::now();
            let next = self.next_run_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next daily reminder batch at {}", next);

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.run_once().await {
                        error!("Daily reminder batch failed: {}", e);
                    }
                }
            }
        }

        info!("Daily reminder batch loop stopped");
    }
}
