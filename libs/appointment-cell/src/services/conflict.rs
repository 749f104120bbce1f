use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use shared_database::AppointmentRepository;
use shared_models::{Appointment, AppointmentStatus, TimeSlot};

use crate::models::AppointmentError;

/// Overlap detection against a practitioner's blocking appointments.
///
/// Conflicts are global per practitioner: an appointment at any clinic occupies
/// the practitioner. Only `Scheduled` and `Confirmed` rows block.
pub struct ConflictDetectionService {
    repository: Arc<dyn AppointmentRepository>,
}

impl ConflictDetectionService {
    pub fn new(repository: Arc<dyn AppointmentRepository>) -> Self {
        Self { repository }
    }

    /// Blocking appointments of `practitioner_id` on `date` that overlap
    /// `[slot, slot + duration)`. An unassigned request cannot conflict.
    pub async fn find_conflicts(
        &self,
        practitioner_id: Option<Uuid>,
        date: NaiveDate,
        slot: TimeSlot,
        duration_minutes: u32,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let Some(practitioner_id) = practitioner_id else {
            return Ok(Vec::new());
        };

        let conflicts: Vec<Appointment> = self
            .blocking_appointments(practitioner_id, date)
            .await?
            .into_iter()
            .filter(|a| Some(a.id) != exclude_appointment_id)
            .filter(|a| a.overlaps(date, slot, duration_minutes))
            .collect();

        debug!(
            "Practitioner {} on {} at {} for {}m: {} conflicts",
            practitioner_id,
            date,
            slot,
            duration_minutes,
            conflicts.len()
        );
        Ok(conflicts)
    }

    /// Occupied `[start, end)` minute intervals of the practitioner on `date`.
    pub async fn booked_intervals(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<(u32, u32)>, AppointmentError> {
        Ok(self
            .blocking_appointments(practitioner_id, date)
            .await?
            .iter()
            .map(|a| (a.start_minutes(), a.end_minutes()))
            .collect())
    }

    async fn blocking_appointments(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let appointments = self
            .repository
            .list_for_practitioner_on_date(practitioner_id, date, &AppointmentStatus::BLOCKING)
            .await?;
        // Repositories may ignore the status filter; the invariant is enforced here.
        Ok(appointments.into_iter().filter(|a| a.status.blocks_calendar()).collect())
    }
}
