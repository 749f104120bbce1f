use thiserror::Error;

use clinic_cell::ClinicError;
use shared_database::DatabaseError;
use shared_models::NotificationChannel;

#[derive(Error, Debug)]
pub enum ReminderQueueError {
    #[error("Queue operation failed: {0}")]
    QueueError(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    PoolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Clinic lookup failed: {0}")]
    ClinicError(#[from] ClinicError),

    #[error("Dispatch over {channel} failed: {reason}")]
    DispatchError { channel: NotificationChannel, reason: String },

    #[error("Notification gateway error: {0}")]
    GatewayError(#[from] reqwest::Error),

    #[error("Dispatch timeout: operation took longer than {timeout_seconds} seconds")]
    DispatchTimeout { timeout_seconds: u64 },
}

impl ReminderQueueError {
    pub fn dispatch(channel: NotificationChannel, reason: impl Into<String>) -> Self {
        ReminderQueueError::DispatchError { channel, reason: reason.into() }
    }
}
