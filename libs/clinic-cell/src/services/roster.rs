use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ClinicError, Practitioner, StaffScheduleWindow};

/// Read-only view of practitioners and their shifts.
#[async_trait]
pub trait StaffRosterProvider: Send + Sync {
    async fn practitioner(&self, practitioner_id: Uuid) -> Result<Option<Practitioner>, ClinicError>;

    /// Active practitioners assigned to the clinic, in a stable enumeration order.
    async fn practitioners_for_clinic(&self, clinic_id: Uuid) -> Result<Vec<Practitioner>, ClinicError>;

    async fn schedule_windows(
        &self,
        practitioner_id: Uuid,
        clinic_id: Uuid,
    ) -> Result<Vec<StaffScheduleWindow>, ClinicError>;

    /// Exact-date record for `date`, or an unexpired weekly pattern including its weekday.
    async fn is_scheduled(
        &self,
        practitioner_id: Uuid,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<bool, ClinicError> {
        let windows = self.schedule_windows(practitioner_id, clinic_id).await?;
        let scheduled = windows.iter().any(|w| w.covers(date));
        debug!("Practitioner {} scheduled on {}: {}", practitioner_id, date, scheduled);
        Ok(scheduled)
    }

    /// Clinic practitioners with a shift on `date`, preserving enumeration order.
    async fn scheduled_practitioners(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Practitioner>, ClinicError> {
        let mut scheduled = Vec::new();
        for practitioner in self.practitioners_for_clinic(clinic_id).await? {
            if self.is_scheduled(practitioner.id, clinic_id, date).await? {
                scheduled.push(practitioner);
            }
        }
        Ok(scheduled)
    }
}
