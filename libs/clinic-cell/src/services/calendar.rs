use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{Clinic, ClinicError, OperatingHoursWindow};

/// Read-only view of a clinic's weekly operating hours.
#[async_trait]
pub trait ClinicCalendarProvider: Send + Sync {
    async fn clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, ClinicError>;

    /// The window for `date`'s weekday. `None` means the clinic has no hours
    /// recorded for that day and is treated as closed.
    async fn operating_hours(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<OperatingHoursWindow>, ClinicError>;
}
