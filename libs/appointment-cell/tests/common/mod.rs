#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use appointment_cell::{AppointmentBookingService, CreateAppointmentRequest};
use clinic_cell::{
    Clinic, ClinicCalendarProvider, ClinicError, ContactDirectory, InMemoryClinicDirectory, OperatingHoursWindow,
    PatientContact, Practitioner, ScheduleStatus, StaffRosterProvider, StaffScheduleWindow,
};
use reminder_queue_cell::{
    InMemoryReminderStore, NotificationDispatcher, ReminderNotification, ReminderQueueError,
    ReminderSchedulerService, ReminderWorkerService, WorkerConfig,
};
use shared_config::AppConfig;
use shared_database::InMemoryAppointmentRepository;
use shared_models::NotificationChannel;

/// A month out, so reminder offsets always land in the future.
pub fn booking_date() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(30)
}

pub fn test_config() -> AppConfig {
    AppConfig {
        slot_granularity_minutes: 30,
        auto_assign_deadline: StdDuration::from_secs(5),
        default_reminder_offsets: vec![24],
        ..AppConfig::default()
    }
}

pub fn practitioner(clinic_id: Uuid, last_name: &str) -> Practitioner {
    Practitioner {
        id: Uuid::new_v4(),
        clinic_id,
        first_name: "Dr".to_string(),
        last_name: last_name.to_string(),
        email: None,
        is_active: true,
    }
}

pub fn every_day(practitioner_id: Uuid, clinic_id: Uuid) -> StaffScheduleWindow {
    StaffScheduleWindow {
        id: Uuid::new_v4(),
        practitioner_id,
        clinic_id,
        specific_date: None,
        recurring_days: (0..7).collect(),
        recurring_until: None,
        status: ScheduleStatus::Scheduled,
    }
}

/// Opens `clinic_id` 09:00-17:00 on every weekday.
pub async fn open_all_week(directory: &InMemoryClinicDirectory, clinic_id: Uuid) {
    for day in 0..7 {
        directory
            .set_operating_hours(OperatingHoursWindow {
                clinic_id,
                day_of_week: day,
                open_time: "09:00".parse().unwrap(),
                close_time: "17:00".parse().unwrap(),
                is_closed: false,
            })
            .await;
    }
}

/// Counts dispatch attempts; always succeeds.
#[derive(Default)]
pub struct CountingDispatcher {
    pub calls: Mutex<Vec<(NotificationChannel, Uuid)>>,
}

impl CountingDispatcher {
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl NotificationDispatcher for CountingDispatcher {
    async fn dispatch(
        &self,
        channel: NotificationChannel,
        notification: &ReminderNotification,
    ) -> Result<(), ReminderQueueError> {
        self.calls.lock().await.push((channel, notification.appointment_id));
        Ok(())
    }
}

/// Delegates to an in-memory directory but stalls every shift lookup.
pub struct SlowRosterDirectory {
    pub inner: Arc<InMemoryClinicDirectory>,
    pub delay: StdDuration,
}

#[async_trait]
impl ClinicCalendarProvider for SlowRosterDirectory {
    async fn clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, ClinicError> {
        self.inner.clinic(clinic_id).await
    }

    async fn operating_hours(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<OperatingHoursWindow>, ClinicError> {
        self.inner.operating_hours(clinic_id, date).await
    }
}

#[async_trait]
impl StaffRosterProvider for SlowRosterDirectory {
    async fn practitioner(&self, practitioner_id: Uuid) -> Result<Option<Practitioner>, ClinicError> {
        self.inner.practitioner(practitioner_id).await
    }

    async fn practitioners_for_clinic(&self, clinic_id: Uuid) -> Result<Vec<Practitioner>, ClinicError> {
        self.inner.practitioners_for_clinic(clinic_id).await
    }

    async fn schedule_windows(
        &self,
        practitioner_id: Uuid,
        clinic_id: Uuid,
    ) -> Result<Vec<StaffScheduleWindow>, ClinicError> {
        tokio::time::sleep(self.delay).await;
        self.inner.schedule_windows(practitioner_id, clinic_id).await
    }
}

#[async_trait]
impl ContactDirectory for SlowRosterDirectory {
    async fn patient_contact(&self, patient_id: Uuid) -> Result<Option<PatientContact>, ClinicError> {
        self.inner.patient_contact(patient_id).await
    }
}

pub struct Harness {
    pub config: AppConfig,
    pub appointments: Arc<InMemoryAppointmentRepository>,
    pub directory: Arc<InMemoryClinicDirectory>,
    pub reminder_store: Arc<InMemoryReminderStore>,
    pub reminders: Arc<ReminderSchedulerService>,
    pub service: Arc<AppointmentBookingService>,
    pub clinic_id: Uuid,
    /// Roster order: Adams, then Baker.
    pub practitioner_a: Uuid,
    pub practitioner_b: Uuid,
    pub patient_id: Uuid,
}

impl Harness {
    pub async fn new() -> Self {
        let config = test_config();
        let directory = Arc::new(InMemoryClinicDirectory::new());
        let clinic_id = Uuid::new_v4();
        let patient_id = Uuid::new_v4();

        directory
            .add_clinic(Clinic {
                id: clinic_id,
                name: "Harbour Dental".to_string(),
                phone: None,
                address: None,
            })
            .await;
        open_all_week(&directory, clinic_id).await;

        let adams = practitioner(clinic_id, "Adams");
        let baker = practitioner(clinic_id, "Baker");
        for p in [&adams, &baker] {
            directory.add_practitioner(p.clone()).await;
            directory.add_schedule(every_day(p.id, clinic_id)).await;
        }

        directory
            .add_patient(PatientContact {
                id: patient_id,
                first_name: "Sam".to_string(),
                last_name: "Lee".to_string(),
                email: Some("sam@example.com".to_string()),
                phone: None,
            })
            .await;

        Self::with_directory(config, directory, clinic_id, adams.id, baker.id, patient_id)
    }

    pub fn with_directory(
        config: AppConfig,
        directory: Arc<InMemoryClinicDirectory>,
        clinic_id: Uuid,
        practitioner_a: Uuid,
        practitioner_b: Uuid,
        patient_id: Uuid,
    ) -> Self {
        let appointments = Arc::new(InMemoryAppointmentRepository::new());
        let reminder_store = Arc::new(InMemoryReminderStore::new());
        let reminders = Arc::new(ReminderSchedulerService::new(reminder_store.clone(), &config));
        let service = Arc::new(AppointmentBookingService::new(
            &config,
            appointments.clone(),
            directory.clone(),
            Arc::clone(&reminders),
        ));

        Self {
            config,
            appointments,
            directory,
            reminder_store,
            reminders,
            service,
            clinic_id,
            practitioner_a,
            practitioner_b,
            patient_id,
        }
    }

    pub fn request(&self, practitioner_id: Option<Uuid>, slot: &str, duration_minutes: u32) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            patient_id: self.patient_id,
            clinic_id: self.clinic_id,
            practitioner_id,
            service_type: "check-up".to_string(),
            appointment_date: booking_date(),
            time_slot: slot.to_string(),
            duration_minutes,
            emergency: false,
            notification_preferences: None,
        }
    }

    pub fn worker(&self, dispatcher: Arc<CountingDispatcher>) -> ReminderWorkerService {
        ReminderWorkerService::new(
            WorkerConfig {
                worker_id: "test-worker".to_string(),
                worker_count: 1,
                ..WorkerConfig::default()
            },
            &self.config,
            self.reminder_store.clone(),
            self.appointments.clone(),
            self.directory.clone(),
            dispatcher,
        )
    }
}
