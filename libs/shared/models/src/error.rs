use serde::Serialize;
use thiserror::Error;

/// Error kinds the engine surfaces to callers, independent of any transport.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP-equivalent status, for callers that front the engine with a transport.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::InvalidState(_) => 422,
            AppError::Timeout(_) => 504,
            AppError::Internal(_) => 500,
        }
    }

    pub fn log(&self) {
        match self {
            AppError::Internal(msg) | AppError::Timeout(msg) => {
                tracing::error!("Error: {}: {}", self.status_code(), msg)
            }
            _ => tracing::debug!("Request rejected: {}", self),
        }
    }
}
