use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use tokio::sync::{watch, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, instrument, warn};

use clinic_cell::{ClinicCalendarProvider, ClinicError, ContactDirectory, StaffRosterProvider};
use shared_config::AppConfig;
use shared_database::AppointmentRepository;
use shared_models::Appointment;

use crate::services::dispatcher::NotificationDispatcher;
use crate::services::queue::ReminderJobStore;
use crate::{
    ExecuteOutcome, NotificationPriority, QueueStats, ReminderJob, ReminderJobState, ReminderNotification,
    ReminderQueueError, WorkerConfig,
};

/// Executes due reminder jobs. Delivery is at-least-once: a job re-reads its
/// appointment before every attempt and only re-sends channels not yet delivered.
pub struct ReminderWorkerService {
    config: WorkerConfig,
    clinic_offset: FixedOffset,
    store: Arc<dyn ReminderJobStore>,
    appointments: Arc<dyn AppointmentRepository>,
    calendar: Arc<dyn ClinicCalendarProvider>,
    roster: Arc<dyn StaffRosterProvider>,
    contacts: Arc<dyn ContactDirectory>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    stats: Arc<RwLock<QueueStats>>,
}

impl ReminderWorkerService {
    pub fn new<D>(
        config: WorkerConfig,
        app_config: &AppConfig,
        store: Arc<dyn ReminderJobStore>,
        appointments: Arc<dyn AppointmentRepository>,
        directory: Arc<D>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self
    where
        D: ClinicCalendarProvider + StaffRosterProvider + ContactDirectory + 'static,
    {
        let calendar: Arc<dyn ClinicCalendarProvider> = directory.clone();
        let roster: Arc<dyn StaffRosterProvider> = directory.clone();
        let contacts: Arc<dyn ContactDirectory> = directory;

        Self {
            config,
            clinic_offset: app_config.clinic_offset(),
            store,
            appointments,
            calendar,
            roster,
            contacts,
            dispatcher,
            stats: Arc::new(RwLock::new(QueueStats::default())),
        }
    }

    pub fn with_stats(mut self, stats: Arc<RwLock<QueueStats>>) -> Self {
        self.stats = stats;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn ReminderJobStore> {
        Arc::clone(&self.store)
    }

    pub async fn get_queue_stats(&self) -> QueueStats {
        self.stats.read().await.clone()
    }

    /// Polls for due jobs until `shutdown` flips to `true` or its sender goes away.
    pub async fn run(&self, worker_name: String, mut shutdown: watch::Receiver<bool>) {
        info!("Reminder worker {} started", worker_name);
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.process_due(&worker_name, Utc::now()).await {
                Ok(0) => poll,
                Ok(_) => Duration::ZERO,
                Err(e) => {
                    error!("Worker {} failed to claim reminder jobs: {}", worker_name, e);
                    Duration::from_secs(5)
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Reminder worker {} stopped", worker_name);
    }

    /// Claims one batch of due jobs and executes them. Returns how many were claimed.
    pub async fn process_due(&self, worker_name: &str, now: DateTime<Utc>) -> Result<usize, ReminderQueueError> {
        let jobs = self
            .store
            .claim_due(now, self.config.claim_batch_size, worker_name)
            .await?;
        let claimed = jobs.len();

        for job in jobs {
            let job_id = job.job_id.clone();
            if let Err(e) = self.execute(job, now).await {
                error!("Worker {} could not record result of job {}: {}", worker_name, job_id, e);
            }
        }

        Ok(claimed)
    }

    /// Hands jobs whose worker went silent for longer than the visibility timeout back
    /// to the queue. Returns how many were requeued.
    pub async fn recover_stalled(&self, now: DateTime<Utc>) -> Result<usize, ReminderQueueError> {
        let timeout_seconds = i64::try_from(self.config.visibility_timeout_seconds)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        let Some(cutoff) = now.checked_sub_signed(ChronoDuration::seconds(timeout_seconds)) else {
            return Ok(0);
        };
        let requeued = self.store.requeue_stalled(cutoff).await?;
        if !requeued.is_empty() {
            warn!("Requeued {} stalled reminder jobs", requeued.len());
        }
        Ok(requeued.len())
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    pub async fn execute(&self, mut job: ReminderJob, now: DateTime<Utc>) -> Result<ExecuteOutcome, ReminderQueueError> {
        job.attempts += 1;

        let appointment = match self.appointments.get(job.appointment_id).await {
            Ok(Some(appointment)) => appointment,
            Ok(None) => return self.finish_stale(job, "appointment no longer exists").await,
            Err(e) => return self.record_failure(job, now, format!("appointment lookup failed: {}", e)).await,
        };

        if let Some(reason) = self.stale_reason(&job, &appointment) {
            return self.finish_stale(job, &reason).await;
        }

        let notification = match self.build_notification(&job, &appointment).await {
            Ok(notification) => notification,
            Err(e) => return self.record_failure(job, now, format!("context lookup failed: {}", e)).await,
        };

        let dispatch_timeout = Duration::from_secs(self.config.dispatch_timeout_seconds);
        let mut failures = Vec::new();

        for channel in job.undelivered().iter() {
            match timeout(dispatch_timeout, self.dispatcher.dispatch(channel, &notification)).await {
                Ok(Ok(())) => {
                    debug!("Delivered {} reminder for job {}", channel, job.job_id);
                    job.delivered.insert(channel);
                }
                Ok(Err(e)) => {
                    warn!("{} reminder for job {} failed: {}", channel, job.job_id, e);
                    failures.push(format!("{}: {}", channel, e));
                }
                Err(_) => {
                    let e = ReminderQueueError::DispatchTimeout {
                        timeout_seconds: self.config.dispatch_timeout_seconds,
                    };
                    warn!("{} reminder for job {} timed out", channel, job.job_id);
                    failures.push(format!("{}: {}", channel, e));
                }
            }
        }

        if !failures.is_empty() {
            return self.record_failure(job, now, failures.join("; ")).await;
        }

        job.state = ReminderJobState::Completed;
        job.next_attempt_at = None;
        job.last_error = None;
        job.updated_at = Utc::now();
        if !self.store.save(&job).await? {
            return Ok(ExecuteOutcome::Superseded);
        }

        self.stats.write().await.completed += 1;
        info!("Reminder job {} delivered on attempt {}", job.job_id, job.attempts);
        Ok(ExecuteOutcome::Delivered)
    }

    fn stale_reason(&self, job: &ReminderJob, appointment: &Appointment) -> Option<String> {
        if appointment.status.is_terminal() {
            return Some(format!("appointment is {}", appointment.status));
        }
        if !appointment.notification_preferences.enabled {
            return Some("notifications disabled".to_string());
        }
        let expected = appointment.starts_at(&self.clinic_offset) - ChronoDuration::hours(job.offset_hours as i64);
        if expected != job.fire_at {
            return Some("appointment was rescheduled".to_string());
        }
        None
    }

    async fn build_notification(
        &self,
        job: &ReminderJob,
        appointment: &Appointment,
    ) -> Result<ReminderNotification, ReminderQueueError> {
        let patient = self
            .contacts
            .patient_contact(appointment.patient_id)
            .await?
            .ok_or(ClinicError::PatientNotFound(appointment.patient_id))?;

        let practitioner_name = match appointment.practitioner_id {
            Some(id) => self.roster.practitioner(id).await?.map(|p| p.full_name()),
            None => None,
        };
        let clinic = self.calendar.clinic(appointment.clinic_id).await?;

        Ok(ReminderNotification {
            job_id: job.job_id.clone(),
            appointment_id: appointment.id,
            patient_id: appointment.patient_id,
            patient_name: patient.full_name(),
            patient_email: patient.email,
            patient_phone: patient.phone,
            practitioner_name,
            clinic_name: clinic.as_ref().map(|c| c.name.clone()),
            clinic_phone: clinic.and_then(|c| c.phone),
            service_type: appointment.service_type.clone(),
            appointment_date: appointment.appointment_date,
            time_slot: appointment.time_slot,
            offset_hours: job.offset_hours,
            priority: if appointment.emergency {
                NotificationPriority::High
            } else {
                NotificationPriority::Normal
            },
        })
    }

    async fn finish_stale(&self, mut job: ReminderJob, reason: &str) -> Result<ExecuteOutcome, ReminderQueueError> {
        debug!("Skipping reminder job {}: {}", job.job_id, reason);

        job.state = ReminderJobState::Completed;
        job.next_attempt_at = None;
        job.last_error = Some(format!("skipped: {}", reason));
        job.updated_at = Utc::now();
        if !self.store.save(&job).await? {
            return Ok(ExecuteOutcome::Superseded);
        }

        self.stats.write().await.skipped_stale += 1;
        Ok(ExecuteOutcome::SkippedStale)
    }

    async fn record_failure(
        &self,
        mut job: ReminderJob,
        now: DateTime<Utc>,
        reason: String,
    ) -> Result<ExecuteOutcome, ReminderQueueError> {
        job.last_error = Some(reason);
        job.updated_at = Utc::now();

        let outcome = if job.can_retry() {
            let next_attempt_at = now + job.retry_delay(self.config.retry_base_seconds);
            job.state = ReminderJobState::Pending;
            job.next_attempt_at = Some(next_attempt_at);
            warn!(
                "Reminder job {} attempt {}/{} failed, retrying at {}",
                job.job_id, job.attempts, job.max_attempts, next_attempt_at
            );
            ExecuteOutcome::RetryScheduled { attempt: job.attempts, next_attempt_at }
        } else {
            job.state = ReminderJobState::Failed;
            job.next_attempt_at = None;
            error!(
                "Reminder job {} failed after {} attempts: {}",
                job.job_id,
                job.attempts,
                job.last_error.as_deref().unwrap_or_default()
            );
            ExecuteOutcome::Failed
        };

        if !self.store.save(&job).await? {
            return Ok(ExecuteOutcome::Superseded);
        }

        let mut stats = self.stats.write().await;
        match outcome {
            ExecuteOutcome::Failed => stats.failed += 1,
            _ => stats.retried += 1,
        }
        Ok(outcome)
    }
}
