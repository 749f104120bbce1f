use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::TimeSlot;

/// 0 = Sunday, 1 = Monday, ... 6 = Saturday, matching the `day_of_week` columns.
pub fn day_of_week(date: NaiveDate) -> u8 {
    match date.weekday() {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clinic {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Practitioner {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub is_active: bool,
}

impl Practitioner {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientContact {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl PatientContact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

// ==============================================================================
// CALENDAR AND ROSTER WINDOWS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatingHoursWindow {
    pub clinic_id: Uuid,
    pub day_of_week: u8,
    pub open_time: TimeSlot,
    pub close_time: TimeSlot,
    #[serde(default)]
    pub is_closed: bool,
}

impl OperatingHoursWindow {
    pub fn is_open(&self) -> bool {
        !self.is_closed && self.open_time < self.close_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Completed,
    Cancelled,
    Leave,
}

impl ScheduleStatus {
    pub fn counts_as_available(&self) -> bool {
        matches!(self, ScheduleStatus::Scheduled | ScheduleStatus::Completed)
    }
}

/// A practitioner's shift record: either one exact date or a weekly pattern that
/// optionally expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffScheduleWindow {
    pub id: Uuid,
    pub practitioner_id: Uuid,
    pub clinic_id: Uuid,
    #[serde(default)]
    pub specific_date: Option<NaiveDate>,
    #[serde(default)]
    pub recurring_days: Vec<u8>,
    #[serde(default)]
    pub recurring_until: Option<NaiveDate>,
    pub status: ScheduleStatus,
}

impl StaffScheduleWindow {
    pub fn covers(&self, date: NaiveDate) -> bool {
        if !self.status.counts_as_available() {
            return false;
        }
        if let Some(specific) = self.specific_date {
            return specific == date;
        }
        let unexpired = self.recurring_until.map_or(true, |until| date <= until);
        unexpired && self.recurring_days.contains(&day_of_week(date))
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error("Clinic not found: {0}")]
    ClinicNotFound(Uuid),

    #[error("Practitioner not found: {0}")]
    PractitionerNotFound(Uuid),

    #[error("Patient not found: {0}")]
    PatientNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(specific: Option<NaiveDate>, days: Vec<u8>, until: Option<NaiveDate>) -> StaffScheduleWindow {
        StaffScheduleWindow {
            id: Uuid::new_v4(),
            practitioner_id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            specific_date: specific,
            recurring_days: days,
            recurring_until: until,
            status: ScheduleStatus::Scheduled,
        }
    }

    #[test]
    fn test_day_of_week_starts_on_sunday() {
        // 2030-03-03 is a Sunday
        assert_eq!(day_of_week(NaiveDate::from_ymd_opt(2030, 3, 3).unwrap()), 0);
        assert_eq!(day_of_week(NaiveDate::from_ymd_opt(2030, 3, 9).unwrap()), 6);
    }

    #[test]
    fn test_exact_date_window_only_covers_that_date() {
        let date = NaiveDate::from_ymd_opt(2030, 3, 4).unwrap();
        let w = window(Some(date), vec![], None);
        assert!(w.covers(date));
        assert!(!w.covers(date + chrono::Duration::days(7)));
    }

    #[test]
    fn test_recurring_window_respects_expiry() {
        let monday = NaiveDate::from_ymd_opt(2030, 3, 4).unwrap();
        let w = window(None, vec![1, 3], Some(monday + chrono::Duration::days(7)));
        assert!(w.covers(monday));
        assert!(w.covers(monday + chrono::Duration::days(7)));
        assert!(!w.covers(monday + chrono::Duration::days(14)));
        assert!(!w.covers(monday + chrono::Duration::days(1)));
    }

    #[test]
    fn test_leave_status_never_covers() {
        let monday = NaiveDate::from_ymd_opt(2030, 3, 4).unwrap();
        let mut w = window(None, vec![1], None);
        w.status = ScheduleStatus::Leave;
        assert!(!w.covers(monday));
    }
}
