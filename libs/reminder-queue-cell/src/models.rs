use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{ChannelSet, TimeSlot};

// ==============================================================================
// REMINDER JOB
// ==============================================================================

/// Persisted reminder record. One exists per `(appointment, offset)` pair, keyed by a
/// deterministic id so scheduling the same pair twice is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderJob {
    pub job_id: String,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub offset_hours: u32,
    /// Target fire time, fixed at enqueue. Retries never move it.
    pub fire_at: DateTime<Utc>,
    /// Set while a retry is waiting out its backoff.
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub channels: ChannelSet,
    #[serde(default)]
    pub delivered: ChannelSet,
    pub attempts: u32,
    pub max_attempts: u32,
    pub state: ReminderJobState,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReminderJob {
    pub fn job_id_for(appointment_id: Uuid, offset_hours: u32) -> String {
        format!("{}:{}", appointment_id, offset_hours)
    }

    pub fn new(
        appointment_id: Uuid,
        patient_id: Uuid,
        offset_hours: u32,
        fire_at: DateTime<Utc>,
        channels: ChannelSet,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: Self::job_id_for(appointment_id, offset_hours),
            appointment_id,
            patient_id,
            offset_hours,
            fire_at,
            next_attempt_at: None,
            channels,
            delivered: ChannelSet::default(),
            attempts: 0,
            max_attempts: max_attempts.max(1),
            state: ReminderJobState::Pending,
            last_error: None,
            worker_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// When the job should next be picked up by a worker.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.next_attempt_at.unwrap_or(self.fire_at)
    }

    pub fn undelivered(&self) -> ChannelSet {
        self.channels.difference(&self.delivered)
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// `base * 2^(attempts - 1)`; the first retry waits exactly `base`.
    pub fn retry_delay(&self, base_seconds: u64) -> Duration {
        let exponent = self.attempts.saturating_sub(1).min(16);
        let seconds = base_seconds.saturating_mul(1u64 << exponent);
        Duration::seconds(seconds.min(i64::MAX as u64) as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderJobState {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl ReminderJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReminderJobState::Completed | ReminderJobState::Failed | ReminderJobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderJobState::Pending => "pending",
            ReminderJobState::Active => "active",
            ReminderJobState::Completed => "completed",
            ReminderJobState::Failed => "failed",
            ReminderJobState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Replaced,
    Unchanged,
}

// ==============================================================================
// SCHEDULING AND EXECUTION RESULTS
// ==============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub created: Vec<String>,
    pub replaced: Vec<String>,
    pub unchanged: Vec<String>,
    /// Offsets whose fire time had already passed.
    pub skipped_past: Vec<u32>,
}

impl ScheduleReport {
    pub fn job_count(&self) -> usize {
        self.created.len() + self.replaced.len() + self.unchanged.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    Delivered,
    SkippedStale,
    RetryScheduled { attempt: u32, next_attempt_at: DateTime<Utc> },
    Failed,
    /// A newer record replaced the claimed one; nothing was written.
    Superseded,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub date: Option<NaiveDate>,
    pub appointments_seen: u32,
    pub jobs_created: u32,
    pub jobs_unchanged: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub scheduled: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub cancelled: u64,
    pub skipped_stale: u64,
}

// ==============================================================================
// NOTIFICATIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Normal,
    High,
}

/// Everything a dispatcher needs to render one reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderNotification {
    pub job_id: String,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_email: Option<String>,
    pub patient_phone: Option<String>,
    pub practitioner_name: Option<String>,
    pub clinic_name: Option<String>,
    pub clinic_phone: Option<String>,
    pub service_type: String,
    pub appointment_date: NaiveDate,
    pub time_slot: TimeSlot,
    pub offset_hours: u32,
    pub priority: NotificationPriority,
}

impl ReminderNotification {
    pub fn subject(&self) -> String {
        match self.priority {
            NotificationPriority::High => format!("Urgent: appointment on {} at {}", self.appointment_date, self.time_slot),
            NotificationPriority::Normal => format!("Reminder: appointment on {} at {}", self.appointment_date, self.time_slot),
        }
    }

    pub fn message(&self) -> String {
        let with = self
            .practitioner_name
            .as_ref()
            .map(|name| format!(" with {}", name))
            .unwrap_or_default();
        let at = self
            .clinic_name
            .as_ref()
            .map(|name| format!(" at {}", name))
            .unwrap_or_default();
        format!(
            "Hi {}, this is a reminder of your {} appointment{}{} on {} at {}.",
            self.patient_name, self.service_type, with, at, self.appointment_date, self.time_slot
        )
    }
}

// ==============================================================================
// WORKER CONFIGURATION
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub worker_count: u32,
    pub claim_batch_size: usize,
    pub poll_interval_ms: u64,
    pub dispatch_timeout_seconds: u64,
    pub max_attempts: u32,
    pub retry_base_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub finished_retention_hours: i64,
    /// Active jobs untouched for this long are treated as abandoned by a dead worker.
    pub visibility_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("reminder-worker-{}", Uuid::new_v4()),
            worker_count: 2,
            claim_batch_size: 10,
            poll_interval_ms: 1000,
            dispatch_timeout_seconds: 30,
            max_attempts: 3,
            retry_base_seconds: 30,
            cleanup_interval_seconds: 3600,
            finished_retention_hours: 24 * 7,
            visibility_timeout_seconds: 1800,
        }
    }
}

impl WorkerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            worker_count: config.reminder_workers.max(1),
            max_attempts: config.reminder_max_attempts.max(1),
            retry_base_seconds: config.reminder_retry_base_seconds,
            visibility_timeout_seconds: config.reminder_visibility_timeout_seconds.max(1),
            ..Self::default()
        }
    }
}
