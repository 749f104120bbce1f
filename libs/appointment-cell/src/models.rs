use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use clinic_cell::ClinicError;
use shared_database::DatabaseError;
use shared_models::{AppError, AppointmentStatus, NotificationPreferences, TimeSlot, TimeSlotParseError};

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
    /// Left empty to let the clinic auto-assign a practitioner.
    #[serde(default)]
    pub practitioner_id: Option<Uuid>,
    pub service_type: String,
    pub appointment_date: NaiveDate,
    pub time_slot: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub emergency: bool,
    #[serde(default)]
    pub notification_preferences: Option<NotificationPreferences>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleAppointmentRequest {
    pub appointment_date: NaiveDate,
    pub time_slot: String,
    /// Keeps the current duration when absent.
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAppointmentRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlotsQuery {
    pub clinic_id: Uuid,
    pub appointment_date: NaiveDate,
    #[serde(default)]
    pub practitioner_id: Option<Uuid>,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCheckRequest {
    pub clinic_id: Uuid,
    #[serde(default)]
    pub practitioner_id: Option<Uuid>,
    pub appointment_date: NaiveDate,
    pub time_slot: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub exclude_appointment_id: Option<Uuid>,
}

// ==============================================================================
// AVAILABILITY MODELS
// ==============================================================================

/// A bookable start time. Only available slots are ever returned, so
/// `is_available` is always `true`; it is kept for callers that render grids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub time: TimeSlot,
    pub is_available: bool,
    pub is_peak: bool,
    /// Practitioners free at this time, in roster order.
    pub practitioner_ids: Vec<Uuid>,
}

/// Why a day has no bookable slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoSlotsReason {
    ClinicClosed,
    NoPractitionersAssigned,
    NoPractitionersScheduled,
    FullyBooked,
}

impl fmt::Display for NoSlotsReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NoSlotsReason::ClinicClosed => "clinic is closed",
            NoSlotsReason::NoPractitionersAssigned => "no practitioners assigned to clinic",
            NoSlotsReason::NoPractitionersScheduled => "no practitioners scheduled",
            NoSlotsReason::FullyBooked => "fully booked",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSlots {
    pub date: NaiveDate,
    pub duration_minutes: u32,
    pub slots: Vec<Slot>,
    /// Set exactly when `slots` is empty.
    pub reason: Option<NoSlotsReason>,
}

impl AvailableSlots {
    pub fn empty(date: NaiveDate, duration_minutes: u32, reason: NoSlotsReason) -> Self {
        Self {
            date,
            duration_minutes,
            slots: Vec::new(),
            reason: Some(reason),
        }
    }

    pub fn from_slots(date: NaiveDate, duration_minutes: u32, slots: Vec<Slot>) -> Self {
        let reason = if slots.is_empty() { Some(NoSlotsReason::FullyBooked) } else { None };
        Self {
            date,
            duration_minutes,
            slots,
            reason,
        }
    }

    pub fn times(&self) -> Vec<TimeSlot> {
        self.slots.iter().map(|s| s.time).collect()
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

/// Which guard caught a double booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSource {
    /// The read-side overlap check found a blocking appointment.
    PreCheck,
    /// The storage uniqueness constraint rejected the write.
    Constraint,
}

impl fmt::Display for ConflictSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictSource::PreCheck => f.write_str("conflict check"),
            ConflictSource::Constraint => f.write_str("storage constraint"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppointmentError {
    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Clinic not found: {0}")]
    ClinicNotFound(Uuid),

    #[error("Practitioner not found: {0}")]
    PractitionerNotFound(Uuid),

    #[error("Patient not found: {0}")]
    PatientNotFound(Uuid),

    #[error("Appointment conflicts with existing booking ({origin})")]
    Conflict {
        origin: ConflictSource,
        conflicting_ids: Vec<Uuid>,
    },

    #[error("Appointment cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Clinic directory error: {0}")]
    Directory(#[from] ClinicError),
}

impl AppointmentError {
    pub fn conflict(origin: ConflictSource, conflicting_ids: Vec<Uuid>) -> Self {
        AppointmentError::Conflict { origin, conflicting_ids }
    }

    pub fn conflict_source(&self) -> Option<ConflictSource> {
        match self {
            AppointmentError::Conflict { origin, .. } => Some(*origin),
            _ => None,
        }
    }
}

impl From<TimeSlotParseError> for AppointmentError {
    fn from(e: TimeSlotParseError) -> Self {
        AppointmentError::ValidationError(e.to_string())
    }
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::NotFound(_)
            | AppointmentError::ClinicNotFound(_)
            | AppointmentError::PractitionerNotFound(_)
            | AppointmentError::PatientNotFound(_) => AppError::NotFound(e.to_string()),
            AppointmentError::Conflict { .. } => AppError::Conflict(e.to_string()),
            AppointmentError::InvalidStatusTransition { .. } => AppError::InvalidState(e.to_string()),
            AppointmentError::ValidationError(msg) => AppError::Validation(msg),
            AppointmentError::Database(DatabaseError::UniqueViolation(_)) => AppError::Conflict(e.to_string()),
            AppointmentError::Database(DatabaseError::NotFound(msg)) => AppError::NotFound(msg),
            AppointmentError::Database(_) | AppointmentError::Directory(_) => AppError::Internal(e.to_string()),
        }
    }
}
