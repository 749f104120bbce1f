use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use clinic_cell::{ClinicCalendarProvider, ContactDirectory, StaffRosterProvider};
use reminder_queue_cell::ReminderSchedulerService;
use shared_config::AppConfig;
use shared_database::{AppointmentRepository, DatabaseError};
use shared_models::{Appointment, AppointmentStatus, NotificationPreferences, TimeSlot};

use crate::models::{
    AppointmentError, AvailableSlots, AvailableSlotsQuery, CancelAppointmentRequest, ConflictCheckRequest,
    ConflictSource, CreateAppointmentRequest, RescheduleAppointmentRequest, Slot,
};
use crate::services::assignment::AutoAssignmentService;
use crate::services::availability::{validate_duration, AvailabilityService};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;

/// Entry point for every appointment operation.
///
/// Double booking is guarded twice: the conflict pre-check produces an early,
/// descriptive error and the storage uniqueness constraint is the authority.
/// Reminder scheduling and auto-assignment never fail the primary operation.
pub struct AppointmentBookingService {
    repository: Arc<dyn AppointmentRepository>,
    calendar: Arc<dyn ClinicCalendarProvider>,
    roster: Arc<dyn StaffRosterProvider>,
    contacts: Arc<dyn ContactDirectory>,
    conflict_service: Arc<ConflictDetectionService>,
    availability_service: AvailabilityService,
    assignment_service: AutoAssignmentService,
    lifecycle_service: AppointmentLifecycleService,
    reminders: Arc<ReminderSchedulerService>,
    clinic_offset: FixedOffset,
    default_reminder_offsets: Vec<u32>,
}

impl AppointmentBookingService {
    pub fn new<D>(
        config: &AppConfig,
        repository: Arc<dyn AppointmentRepository>,
        directory: Arc<D>,
        reminders: Arc<ReminderSchedulerService>,
    ) -> Self
    where
        D: ClinicCalendarProvider + StaffRosterProvider + ContactDirectory + 'static,
    {
        let calendar: Arc<dyn ClinicCalendarProvider> = directory.clone();
        let roster: Arc<dyn StaffRosterProvider> = directory.clone();
        let contacts: Arc<dyn ContactDirectory> = directory;

        let conflict_service = Arc::new(ConflictDetectionService::new(Arc::clone(&repository)));
        let availability_service = AvailabilityService::new(
            Arc::clone(&repository),
            Arc::clone(&conflict_service),
            Arc::clone(&calendar),
            Arc::clone(&roster),
            config.slot_granularity_minutes,
        );
        let assignment_service = AutoAssignmentService::new(
            Arc::clone(&roster),
            Arc::clone(&conflict_service),
            config.auto_assign_deadline,
        );

        Self {
            repository,
            calendar,
            roster,
            contacts,
            conflict_service,
            availability_service,
            assignment_service,
            lifecycle_service: AppointmentLifecycleService::new(),
            reminders,
            clinic_offset: config.clinic_offset(),
            default_reminder_offsets: config.default_reminder_offsets.clone(),
        }
    }

    /// Today on the clinic's canonical clock.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.clinic_offset).date_naive()
    }

    // ==========================================================================
    // BOOKING OPERATIONS
    // ==========================================================================

    #[instrument(skip(self, request), fields(clinic_id = %request.clinic_id, patient_id = %request.patient_id))]
    pub async fn create_appointment(&self, request: CreateAppointmentRequest) -> Result<Appointment, AppointmentError> {
        let slot = Self::parse_slot(&request.time_slot)?;
        validate_duration(request.duration_minutes)?;
        self.validate_date(request.appointment_date, request.emergency)?;

        if self.calendar.clinic(request.clinic_id).await?.is_none() {
            return Err(AppointmentError::ClinicNotFound(request.clinic_id));
        }
        if self.contacts.patient_contact(request.patient_id).await?.is_none() {
            return Err(AppointmentError::PatientNotFound(request.patient_id));
        }

        let (practitioner_id, auto_assigned) = match request.practitioner_id {
            Some(practitioner_id) => {
                if self.roster.practitioner(practitioner_id).await?.is_none() {
                    return Err(AppointmentError::PractitionerNotFound(practitioner_id));
                }
                (Some(practitioner_id), false)
            }
            None => {
                let assigned = self
                    .assignment_service
                    .auto_assign(request.clinic_id, request.appointment_date, slot, request.duration_minutes)
                    .await;
                (assigned, assigned.is_some())
            }
        };

        let status = if request.emergency && request.appointment_date <= self.today() {
            AppointmentStatus::Urgent
        } else {
            AppointmentStatus::Scheduled
        };

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            practitioner_id,
            clinic_id: request.clinic_id,
            service_type: request.service_type,
            appointment_date: request.appointment_date,
            time_slot: slot,
            duration_minutes: request.duration_minutes,
            status,
            emergency: request.emergency,
            notification_preferences: request
                .notification_preferences
                .unwrap_or_else(|| NotificationPreferences::with_offsets(self.default_reminder_offsets.iter().copied())),
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        let created = match self.insert_checked(&appointment).await {
            Err(AppointmentError::Conflict { origin: ConflictSource::Constraint, .. }) if auto_assigned => {
                // Lost a race for the auto-assigned practitioner; book unassigned instead.
                warn!("Auto-assigned practitioner was taken concurrently, booking {} unassigned", appointment.id);
                let unassigned = Appointment { practitioner_id: None, ..appointment };
                self.insert_checked(&unassigned).await?
            }
            other => other?,
        };

        info!(
            "Appointment {} booked for {} {} ({}, practitioner {:?})",
            created.id, created.appointment_date, created.time_slot, created.status, created.practitioner_id
        );

        self.schedule_reminders(&created).await;
        Ok(created)
    }

    #[instrument(skip(self, request))]
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(appointment_id).await?;
        self.lifecycle_service.ensure_reschedulable(current.status)?;

        let slot = Self::parse_slot(&request.time_slot)?;
        let duration_minutes = request.duration_minutes.unwrap_or(current.duration_minutes);
        validate_duration(duration_minutes)?;
        self.validate_date(request.appointment_date, current.emergency)?;

        let conflicts = self
            .conflict_service
            .find_conflicts(
                current.practitioner_id,
                request.appointment_date,
                slot,
                duration_minutes,
                Some(appointment_id),
            )
            .await?;
        if !conflicts.is_empty() {
            warn!("Reschedule of {} rejected by conflict check", appointment_id);
            return Err(AppointmentError::conflict(
                ConflictSource::PreCheck,
                conflicts.iter().map(|a| a.id).collect(),
            ));
        }

        let rescheduled = Appointment {
            appointment_date: request.appointment_date,
            time_slot: slot,
            duration_minutes,
            updated_at: Utc::now(),
            ..current
        };
        let updated = self.write_update(&rescheduled).await?;

        info!(
            "Appointment {} rescheduled to {} {} for {}m",
            updated.id, updated.appointment_date, updated.time_slot, updated.duration_minutes
        );

        self.cancel_reminders(updated.id).await;
        self.schedule_reminders(&updated).await;
        Ok(updated)
    }

    #[instrument(skip(self, request))]
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let cancelled = self
            .transition(appointment_id, AppointmentStatus::Cancelled, request.reason)
            .await?;
        self.cancel_reminders(cancelled.id).await;
        Ok(cancelled)
    }

    pub async fn complete_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let completed = self
            .transition(appointment_id, AppointmentStatus::Completed, None)
            .await?;
        self.cancel_reminders(completed.id).await;
        Ok(completed)
    }

    pub async fn confirm_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(appointment_id, AppointmentStatus::Confirmed, None).await
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.repository
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    pub async fn get_available_slots(&self, query: AvailableSlotsQuery) -> Result<AvailableSlots, AppointmentError> {
        self.availability_service
            .available_slots(
                query.clinic_id,
                query.appointment_date,
                query.practitioner_id,
                query.duration_minutes,
            )
            .await
    }

    pub async fn get_next_slot_after_last_booking(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Option<Slot>, AppointmentError> {
        self.availability_service
            .next_slot_after_last_booking(clinic_id, date, duration_minutes)
            .await
    }

    pub async fn check_conflicts(&self, request: ConflictCheckRequest) -> Result<Vec<Appointment>, AppointmentError> {
        let slot = Self::parse_slot(&request.time_slot)?;
        validate_duration(request.duration_minutes)?;
        debug!("Checking conflicts at clinic {} on {}", request.clinic_id, request.appointment_date);

        self.conflict_service
            .find_conflicts(
                request.practitioner_id,
                request.appointment_date,
                slot,
                request.duration_minutes,
                request.exclude_appointment_id,
            )
            .await
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    fn parse_slot(raw: &str) -> Result<TimeSlot, AppointmentError> {
        Ok(raw.trim().parse::<TimeSlot>()?)
    }

    fn validate_date(&self, date: NaiveDate, emergency: bool) -> Result<(), AppointmentError> {
        if date < self.today() && !emergency {
            return Err(AppointmentError::ValidationError(format!(
                "Appointment date {} is in the past",
                date
            )));
        }
        Ok(())
    }

    /// Pre-check, then write. The constraint error from a lost race is reported
    /// as the same conflict kind as the pre-check.
    async fn insert_checked(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        let conflicts = self
            .conflict_service
            .find_conflicts(
                appointment.practitioner_id,
                appointment.appointment_date,
                appointment.time_slot,
                appointment.duration_minutes,
                None,
            )
            .await?;
        if !conflicts.is_empty() {
            warn!(
                "Booking for practitioner {:?} at {} {} rejected by conflict check",
                appointment.practitioner_id, appointment.appointment_date, appointment.time_slot
            );
            return Err(AppointmentError::conflict(
                ConflictSource::PreCheck,
                conflicts.iter().map(|a| a.id).collect(),
            ));
        }

        match self.repository.insert(appointment).await {
            Ok(created) => Ok(created),
            Err(DatabaseError::UniqueViolation(detail)) => {
                warn!("Booking {} rejected by storage constraint: {}", appointment.id, detail);
                Err(AppointmentError::conflict(ConflictSource::Constraint, Vec::new()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_update(&self, appointment: &Appointment) -> Result<Appointment, AppointmentError> {
        match self.repository.update(appointment).await {
            Ok(updated) => Ok(updated),
            Err(DatabaseError::UniqueViolation(detail)) => {
                warn!("Update of {} rejected by storage constraint: {}", appointment.id, detail);
                Err(AppointmentError::conflict(ConflictSource::Constraint, Vec::new()))
            }
            Err(DatabaseError::NotFound(_)) => Err(AppointmentError::NotFound(appointment.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn transition(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(appointment_id).await?;
        self.lifecycle_service
            .validate_status_transition(current.status, new_status)?;

        let previous = current.status;
        let next = Appointment {
            status: new_status,
            cancellation_reason: reason.or(current.cancellation_reason.clone()),
            updated_at: Utc::now(),
            ..current
        };
        let updated = self.write_update(&next).await?;

        info!("Appointment {} moved from {} to {}", appointment_id, previous, new_status);
        Ok(updated)
    }

    async fn schedule_reminders(&self, appointment: &Appointment) {
        match self.reminders.schedule(appointment).await {
            Ok(report) => debug!("Reminders for {}: {} jobs", appointment.id, report.job_count()),
            Err(e) => warn!("Failed to schedule reminders for appointment {}: {}", appointment.id, e),
        }
    }

    async fn cancel_reminders(&self, appointment_id: Uuid) {
        match self.reminders.cancel(appointment_id).await {
            Ok(removed) => debug!("Dropped {} reminder jobs for {}", removed.len(), appointment_id),
            Err(e) => warn!("Failed to drop reminders for appointment {}: {}", appointment_id, e),
        }
    }
}
