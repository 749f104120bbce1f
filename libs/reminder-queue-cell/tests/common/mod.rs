#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use clinic_cell::{Clinic, InMemoryClinicDirectory, PatientContact, Practitioner};
use reminder_queue_cell::*;
use shared_config::AppConfig;
use shared_database::{AppointmentRepository, InMemoryAppointmentRepository};
use shared_models::{Appointment, AppointmentStatus, NotificationChannel, NotificationPreferences};

/// Wednesday 2031-05-14, the day every fixture appointment takes place.
pub fn appointment_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2031, 5, 14).unwrap()
}

/// The morning before the appointment day.
pub fn day_before_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 5, 13, 8, 0, 0).unwrap()
}

pub fn test_config() -> AppConfig {
    AppConfig {
        reminder_max_attempts: 3,
        reminder_retry_base_seconds: 30,
        ..AppConfig::default()
    }
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        worker_id: "test-worker".to_string(),
        worker_count: 1,
        poll_interval_ms: 10,
        retry_base_seconds: 30,
        max_attempts: 3,
        ..WorkerConfig::default()
    }
}

/// Records every dispatch and fails on demand per channel.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub calls: Mutex<Vec<(NotificationChannel, ReminderNotification)>>,
    pub failing: Mutex<HashSet<NotificationChannel>>,
}

impl RecordingDispatcher {
    pub async fn fail(&self, channel: NotificationChannel) {
        self.failing.lock().await.insert(channel);
    }

    pub async fn recover(&self, channel: NotificationChannel) {
        self.failing.lock().await.remove(&channel);
    }

    pub async fn channels_sent(&self) -> Vec<NotificationChannel> {
        self.calls.lock().await.iter().map(|(c, _)| *c).collect()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        channel: NotificationChannel,
        notification: &ReminderNotification,
    ) -> Result<(), ReminderQueueError> {
        self.calls.lock().await.push((channel, notification.clone()));
        if self.failing.lock().await.contains(&channel) {
            return Err(ReminderQueueError::dispatch(channel, "simulated outage"));
        }
        Ok(())
    }
}

pub struct Harness {
    pub config: AppConfig,
    pub store: Arc<InMemoryReminderStore>,
    pub appointments: Arc<InMemoryAppointmentRepository>,
    pub directory: Arc<InMemoryClinicDirectory>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub producer: Arc<ReminderSchedulerService>,
    pub worker: Arc<ReminderWorkerService>,
    pub clinic_id: Uuid,
    pub practitioner_id: Uuid,
    pub patient_id: Uuid,
}

impl Harness {
    pub async fn new() -> Self {
        let config = test_config();
        let store = Arc::new(InMemoryReminderStore::new());
        let appointments = Arc::new(InMemoryAppointmentRepository::new());
        let directory = Arc::new(InMemoryClinicDirectory::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());

        let clinic_id = Uuid::new_v4();
        let practitioner_id = Uuid::new_v4();
        let patient_id = Uuid::new_v4();

        directory
            .add_clinic(Clinic {
                id: clinic_id,
                name: "Harbour Dental".to_string(),
                phone: Some("555-0100".to_string()),
                address: None,
            })
            .await;
        directory
            .add_practitioner(Practitioner {
                id: practitioner_id,
                clinic_id,
                first_name: "Dana".to_string(),
                last_name: "Adams".to_string(),
                email: None,
                is_active: true,
            })
            .await;
        directory
            .add_patient(PatientContact {
                id: patient_id,
                first_name: "Sam".to_string(),
                last_name: "Lee".to_string(),
                email: Some("sam@example.com".to_string()),
                phone: Some("555-0199".to_string()),
            })
            .await;

        let stats = Arc::new(tokio::sync::RwLock::new(QueueStats::default()));
        let producer = Arc::new(
            ReminderSchedulerService::new(store.clone(), &config).with_stats(Arc::clone(&stats)),
        );
        let worker = Arc::new(
            ReminderWorkerService::new(
                worker_config(),
                &config,
                store.clone(),
                appointments.clone(),
                directory.clone(),
                dispatcher.clone(),
            )
            .with_stats(stats),
        );

        Self {
            config,
            store,
            appointments,
            directory,
            dispatcher,
            producer,
            worker,
            clinic_id,
            practitioner_id,
            patient_id,
        }
    }

    pub fn appointment(&self, slot: &str, offsets: &[u32]) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: Uuid::new_v4(),
            patient_id: self.patient_id,
            practitioner_id: Some(self.practitioner_id),
            clinic_id: self.clinic_id,
            service_type: "check-up".to_string(),
            appointment_date: appointment_date(),
            time_slot: slot.parse().unwrap(),
            duration_minutes: 30,
            status: AppointmentStatus::Scheduled,
            emergency: false,
            notification_preferences: NotificationPreferences::with_offsets(offsets.iter().copied()),
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn book(&self, slot: &str, offsets: &[u32]) -> Appointment {
        let appointment = self.appointment(slot, offsets);
        self.appointments.insert(&appointment).await.unwrap()
    }
}
