use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::Appointment;

use crate::services::queue::ReminderJobStore;
use crate::{QueueStats, ReminderJob, ReminderQueueError, ScheduleReport, UpsertOutcome};

/// Enqueues and drops reminder jobs for appointments.
pub struct ReminderSchedulerService {
    store: Arc<dyn ReminderJobStore>,
    clinic_offset: FixedOffset,
    max_attempts: u32,
    stats: Arc<RwLock<QueueStats>>,
}

impl ReminderSchedulerService {
    pub fn new(store: Arc<dyn ReminderJobStore>, config: &AppConfig) -> Self {
        Self {
            store,
            clinic_offset: config.clinic_offset(),
            max_attempts: config.reminder_max_attempts.max(1),
            stats: Arc::new(RwLock::new(QueueStats::default())),
        }
    }

    /// Shares counters with the worker so one `QueueStats` covers the whole queue.
    pub fn with_stats(mut self, stats: Arc<RwLock<QueueStats>>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats_handle(&self) -> Arc<RwLock<QueueStats>> {
        Arc::clone(&self.stats)
    }

    pub fn store(&self) -> Arc<dyn ReminderJobStore> {
        Arc::clone(&self.store)
    }

    pub async fn schedule(&self, appointment: &Appointment) -> Result<ScheduleReport, ReminderQueueError> {
        self.schedule_at(appointment, Utc::now()).await
    }

    /// One job per configured offset, fired at `start - offset`. Offsets whose fire
    /// time is not in the future are skipped.
    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    pub async fn schedule_at(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<ScheduleReport, ReminderQueueError> {
        let mut report = ScheduleReport::default();
        let preferences = &appointment.notification_preferences;

        if appointment.status.is_terminal() || !preferences.wants_reminders() {
            debug!("Appointment {} wants no reminders ({})", appointment.id, appointment.status);
            return Ok(report);
        }

        let starts_at = appointment.starts_at(&self.clinic_offset);

        for &offset_hours in &preferences.reminder_offsets_hours {
            let fire_at = starts_at - Duration::hours(offset_hours as i64);
            if fire_at <= now {
                debug!("Skipping {}h reminder for {}: fire time {} already passed", offset_hours, appointment.id, fire_at);
                report.skipped_past.push(offset_hours);
                continue;
            }

            let job = ReminderJob::new(
                appointment.id,
                appointment.patient_id,
                offset_hours,
                fire_at,
                preferences.channels,
                self.max_attempts,
            );

            match self.store.upsert(&job).await? {
                UpsertOutcome::Created => report.created.push(job.job_id),
                UpsertOutcome::Replaced => report.replaced.push(job.job_id),
                UpsertOutcome::Unchanged => report.unchanged.push(job.job_id),
            }
        }

        let fresh = (report.created.len() + report.replaced.len()) as u64;
        if fresh > 0 {
            self.stats.write().await.scheduled += fresh;
            info!("Scheduled {} reminder jobs for appointment {}", fresh, appointment.id);
        }

        Ok(report)
    }

    /// Drops every not-yet-fired job for the appointment. Repeating it is a no-op.
    #[instrument(skip(self))]
    pub async fn cancel(&self, appointment_id: Uuid) -> Result<Vec<String>, ReminderQueueError> {
        let cancelled = self.store.remove_pending_for_appointment(appointment_id).await?;

        if cancelled.is_empty() {
            debug!("No pending reminder jobs to cancel for appointment {}", appointment_id);
        } else {
            self.stats.write().await.cancelled += cancelled.len() as u64;
            info!("Cancelled {} reminder jobs for appointment {}", cancelled.len(), appointment_id);
        }

        Ok(cancelled)
    }

    pub async fn jobs_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<ReminderJob>, ReminderQueueError> {
        self.store.jobs_for_appointment(appointment_id).await
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        self.stats.read().await.clone()
    }
}
