use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use clinic_cell::{ClinicCalendarProvider, OperatingHoursWindow, StaffRosterProvider};
use shared_database::AppointmentRepository;
use shared_models::{intervals_overlap, AppointmentStatus, TimeSlot, MAX_DURATION_MINUTES, MIN_DURATION_MINUTES};

use crate::models::{AppointmentError, AvailableSlots, NoSlotsReason, Slot};
use crate::services::conflict::ConflictDetectionService;

const PEAK_START_MINUTES: u32 = 10 * 60;
const PEAK_END_MINUTES: u32 = 14 * 60;

/// Display hint: slot start falls in `[10:00, 14:00)`.
pub fn is_peak(slot: TimeSlot) -> bool {
    (PEAK_START_MINUTES..PEAK_END_MINUTES).contains(&slot.minutes())
}

pub fn validate_duration(duration_minutes: u32) -> Result<(), AppointmentError> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration_minutes) {
        return Err(AppointmentError::ValidationError(format!(
            "Duration must be between {} and {} minutes, got {}",
            MIN_DURATION_MINUTES, MAX_DURATION_MINUTES, duration_minutes
        )));
    }
    Ok(())
}

/// Grid starts from opening time whose `[start, start + duration)` fits before
/// closing and overlaps none of `booked`. The grid sets where slots may start; a
/// duration off the grid is still honored as long as it fits.
pub fn open_starts(
    window: &OperatingHoursWindow,
    granularity_minutes: u32,
    duration_minutes: u32,
    booked: &[(u32, u32)],
) -> Vec<TimeSlot> {
    if !window.is_open() {
        return Vec::new();
    }

    let step = granularity_minutes.max(1);
    let close = window.close_time.minutes();
    let mut starts = Vec::new();
    let mut start = window.open_time.minutes();

    while start + duration_minutes <= close {
        let end = start + duration_minutes;
        if !booked.iter().any(|&(b_start, b_end)| intervals_overlap(start, end, b_start, b_end)) {
            if let Some(slot) = TimeSlot::from_minutes(start) {
                starts.push(slot);
            }
        }
        start += step;
    }

    starts
}

/// Computes bookable start times for one practitioner or for a whole clinic.
pub struct AvailabilityService {
    repository: Arc<dyn AppointmentRepository>,
    conflicts: Arc<ConflictDetectionService>,
    calendar: Arc<dyn ClinicCalendarProvider>,
    roster: Arc<dyn StaffRosterProvider>,
    slot_granularity_minutes: u32,
}

impl AvailabilityService {
    pub fn new(
        repository: Arc<dyn AppointmentRepository>,
        conflicts: Arc<ConflictDetectionService>,
        calendar: Arc<dyn ClinicCalendarProvider>,
        roster: Arc<dyn StaffRosterProvider>,
        slot_granularity_minutes: u32,
    ) -> Self {
        Self {
            repository,
            conflicts,
            calendar,
            roster,
            slot_granularity_minutes,
        }
    }

    pub async fn available_slots(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        practitioner_id: Option<Uuid>,
        duration_minutes: u32,
    ) -> Result<AvailableSlots, AppointmentError> {
        match practitioner_id {
            Some(practitioner_id) => self.practitioner_slots(practitioner_id, date, duration_minutes).await,
            None => self.clinic_slots(clinic_id, date, duration_minutes).await,
        }
    }

    /// Open slots for one practitioner within their clinic's hours.
    #[instrument(skip(self))]
    pub async fn practitioner_slots(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<AvailableSlots, AppointmentError> {
        validate_duration(duration_minutes)?;

        let practitioner = self
            .roster
            .practitioner(practitioner_id)
            .await?
            .ok_or(AppointmentError::PractitionerNotFound(practitioner_id))?;

        let Some(window) = self.open_window(practitioner.clinic_id, date).await? else {
            return Ok(AvailableSlots::empty(date, duration_minutes, NoSlotsReason::ClinicClosed));
        };

        let booked = self.conflicts.booked_intervals(practitioner_id, date).await?;
        let slots = open_starts(&window, self.slot_granularity_minutes, duration_minutes, &booked)
            .into_iter()
            .map(|time| Slot {
                time,
                is_available: true,
                is_peak: is_peak(time),
                practitioner_ids: vec![practitioner_id],
            })
            .collect::<Vec<_>>();

        debug!("{} open slots for practitioner {} on {}", slots.len(), practitioner_id, date);
        Ok(AvailableSlots::from_slots(date, duration_minutes, slots))
    }

    /// Union of every scheduled practitioner's open slots, grouped by start time.
    #[instrument(skip(self))]
    pub async fn clinic_slots(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<AvailableSlots, AppointmentError> {
        validate_duration(duration_minutes)?;
        self.ensure_clinic(clinic_id).await?;

        // Reported on closed days too.
        if self.roster.practitioners_for_clinic(clinic_id).await?.is_empty() {
            info!("Clinic {} has no practitioners assigned", clinic_id);
            return Ok(AvailableSlots::empty(
                date,
                duration_minutes,
                NoSlotsReason::NoPractitionersAssigned,
            ));
        }

        let Some(window) = self.hours_window(clinic_id, date).await? else {
            return Ok(AvailableSlots::empty(date, duration_minutes, NoSlotsReason::ClinicClosed));
        };

        let scheduled = self.roster.scheduled_practitioners(clinic_id, date).await?;
        if scheduled.is_empty() {
            debug!("No practitioners scheduled at clinic {} on {}", clinic_id, date);
            return Ok(AvailableSlots::empty(
                date,
                duration_minutes,
                NoSlotsReason::NoPractitionersScheduled,
            ));
        }

        let mut by_time: BTreeMap<TimeSlot, Vec<Uuid>> = BTreeMap::new();
        for practitioner in &scheduled {
            let booked = self.conflicts.booked_intervals(practitioner.id, date).await?;
            for time in open_starts(&window, self.slot_granularity_minutes, duration_minutes, &booked) {
                by_time.entry(time).or_default().push(practitioner.id);
            }
        }

        let slots = by_time
            .into_iter()
            .map(|(time, practitioner_ids)| Slot {
                time,
                is_available: true,
                is_peak: is_peak(time),
                practitioner_ids,
            })
            .collect::<Vec<_>>();

        debug!(
            "{} open slots across {} practitioners at clinic {} on {}",
            slots.len(),
            scheduled.len(),
            clinic_id,
            date
        );
        Ok(AvailableSlots::from_slots(date, duration_minutes, slots))
    }

    /// First clinic-wide open slot starting at or after the end of the day's latest
    /// blocking booking. With no bookings, the first open slot of the day.
    #[instrument(skip(self))]
    pub async fn next_slot_after_last_booking(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Option<Slot>, AppointmentError> {
        let last_end = self
            .repository
            .list_for_clinic_on_date(clinic_id, date, &AppointmentStatus::BLOCKING)
            .await?
            .iter()
            .filter(|a| a.status.blocks_calendar())
            .map(|a| a.end_minutes())
            .max()
            .unwrap_or(0);

        let available = self.clinic_slots(clinic_id, date, duration_minutes).await?;
        Ok(available.slots.into_iter().find(|slot| slot.time.minutes() >= last_end))
    }

    async fn open_window(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<OperatingHoursWindow>, AppointmentError> {
        self.ensure_clinic(clinic_id).await?;
        self.hours_window(clinic_id, date).await
    }

    async fn ensure_clinic(&self, clinic_id: Uuid) -> Result<(), AppointmentError> {
        match self.calendar.clinic(clinic_id).await? {
            Some(_) => Ok(()),
            None => Err(AppointmentError::ClinicNotFound(clinic_id)),
        }
    }

    async fn hours_window(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<OperatingHoursWindow>, AppointmentError> {
        let window = self.calendar.operating_hours(clinic_id, date).await?;
        Ok(window.filter(|w| w.is_open()))
    }
}
