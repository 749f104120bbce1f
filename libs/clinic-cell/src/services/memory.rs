use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    day_of_week, Clinic, ClinicError, OperatingHoursWindow, PatientContact, Practitioner,
    StaffScheduleWindow,
};
use crate::services::{ClinicCalendarProvider, ContactDirectory, StaffRosterProvider};

#[derive(Default)]
struct DirectoryState {
    clinics: HashMap<Uuid, Clinic>,
    hours: Vec<OperatingHoursWindow>,
    practitioners: Vec<Practitioner>,
    schedules: Vec<StaffScheduleWindow>,
    patients: HashMap<Uuid, PatientContact>,
}

/// Process-local directory for tests and local runs. Practitioners enumerate in
/// insertion order.
#[derive(Default)]
pub struct InMemoryClinicDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryClinicDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_clinic(&self, clinic: Clinic) {
        self.state.write().await.clinics.insert(clinic.id, clinic);
    }

    /// Replaces any existing window for the same clinic and weekday.
    pub async fn set_operating_hours(&self, window: OperatingHoursWindow) {
        let mut state = self.state.write().await;
        state
            .hours
            .retain(|w| !(w.clinic_id == window.clinic_id && w.day_of_week == window.day_of_week));
        state.hours.push(window);
    }

    pub async fn add_practitioner(&self, practitioner: Practitioner) {
        self.state.write().await.practitioners.push(practitioner);
    }

    pub async fn add_schedule(&self, window: StaffScheduleWindow) {
        self.state.write().await.schedules.push(window);
    }

    pub async fn add_patient(&self, patient: PatientContact) {
        self.state.write().await.patients.insert(patient.id, patient);
    }
}

#[async_trait]
impl ClinicCalendarProvider for InMemoryClinicDirectory {
    async fn clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, ClinicError> {
        Ok(self.state.read().await.clinics.get(&clinic_id).cloned())
    }

    async fn operating_hours(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<OperatingHoursWindow>, ClinicError> {
        let weekday = day_of_week(date);
        Ok(self
            .state
            .read()
            .await
            .hours
            .iter()
            .find(|w| w.clinic_id == clinic_id && w.day_of_week == weekday)
            .cloned())
    }
}

#[async_trait]
impl StaffRosterProvider for InMemoryClinicDirectory {
    async fn practitioner(&self, practitioner_id: Uuid) -> Result<Option<Practitioner>, ClinicError> {
        Ok(self
            .state
            .read()
            .await
            .practitioners
            .iter()
            .find(|p| p.id == practitioner_id)
            .cloned())
    }

    async fn practitioners_for_clinic(&self, clinic_id: Uuid) -> Result<Vec<Practitioner>, ClinicError> {
        Ok(self
            .state
            .read()
            .await
            .practitioners
            .iter()
            .filter(|p| p.clinic_id == clinic_id && p.is_active)
            .cloned()
            .collect())
    }

    async fn schedule_windows(
        &self,
        practitioner_id: Uuid,
        clinic_id: Uuid,
    ) -> Result<Vec<StaffScheduleWindow>, ClinicError> {
        Ok(self
            .state
            .read()
            .await
            .schedules
            .iter()
            .filter(|w| w.practitioner_id == practitioner_id && w.clinic_id == clinic_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ContactDirectory for InMemoryClinicDirectory {
    async fn patient_contact(&self, patient_id: Uuid) -> Result<Option<PatientContact>, ClinicError> {
        Ok(self.state.read().await.patients.get(&patient_id).cloned())
    }
}
