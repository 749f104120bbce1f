use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{
    day_of_week, Clinic, ClinicError, OperatingHoursWindow, PatientContact, Practitioner,
    StaffScheduleWindow,
};
use crate::services::{ClinicCalendarProvider, ContactDirectory, StaffRosterProvider};

/// Calendar, roster and contact lookups against the clinic tables.
pub struct SupabaseClinicDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseClinicDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn rows<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ClinicError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(self.supabase.service_token()), None)
            .await?;

        let rows = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(shared_database::DatabaseError::from)?;
        Ok(rows)
    }
}

#[async_trait]
impl ClinicCalendarProvider for SupabaseClinicDirectory {
    async fn clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, ClinicError> {
        let path = format!("/rest/v1/clinics?id=eq.{}", clinic_id);
        Ok(self.rows(&path).await?.into_iter().next())
    }

    async fn operating_hours(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<OperatingHoursWindow>, ClinicError> {
        let path = format!(
            "/rest/v1/clinic_operating_hours?clinic_id=eq.{}&day_of_week=eq.{}",
            clinic_id,
            day_of_week(date)
        );
        let mut windows: Vec<OperatingHoursWindow> = self.rows(&path).await?;
        if windows.len() > 1 {
            warn!("Clinic {} has {} operating-hour rows for {}, using the first", clinic_id, windows.len(), date);
        }
        Ok(if windows.is_empty() { None } else { Some(windows.swap_remove(0)) })
    }
}

#[async_trait]
impl StaffRosterProvider for SupabaseClinicDirectory {
    async fn practitioner(&self, practitioner_id: Uuid) -> Result<Option<Practitioner>, ClinicError> {
        let path = format!("/rest/v1/practitioners?id=eq.{}", practitioner_id);
        Ok(self.rows(&path).await?.into_iter().next())
    }

    async fn practitioners_for_clinic(&self, clinic_id: Uuid) -> Result<Vec<Practitioner>, ClinicError> {
        debug!("Listing active practitioners for clinic {}", clinic_id);
        let path = format!(
            "/rest/v1/practitioners?clinic_id=eq.{}&is_active=eq.true&order=last_name.asc,id.asc",
            clinic_id
        );
        self.rows(&path).await
    }

    async fn schedule_windows(
        &self,
        practitioner_id: Uuid,
        clinic_id: Uuid,
    ) -> Result<Vec<StaffScheduleWindow>, ClinicError> {
        let path = format!(
            "/rest/v1/staff_schedules?practitioner_id=eq.{}&clinic_id=eq.{}",
            practitioner_id, clinic_id
        );
        self.rows(&path).await
    }
}

#[async_trait]
impl ContactDirectory for SupabaseClinicDirectory {
    async fn patient_contact(&self, patient_id: Uuid) -> Result<Option<PatientContact>, ClinicError> {
        let path = format!(
            "/rest/v1/patients?id=eq.{}&select=id,first_name,last_name,email,phone",
            patient_id
        );
        Ok(self.rows(&path).await?.into_iter().next())
    }
}
