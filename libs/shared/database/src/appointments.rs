use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::{Appointment, AppointmentStatus};

use crate::error::DatabaseError;
use crate::supabase::SupabaseClient;

/// Persistence for appointments.
///
/// Implementations must enforce the partial uniqueness constraint on
/// `(practitioner_id, appointment_date, time_slot)` among rows whose status blocks the
/// calendar, and report a violation as [`DatabaseError::UniqueViolation`]. That
/// constraint, not any read-side check, is what serializes two racing bookings.
///
/// An empty `statuses` slice means "any status".
#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, DatabaseError>;

    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, DatabaseError>;

    async fn update(&self, appointment: &Appointment) -> Result<Appointment, DatabaseError>;

    async fn list_for_practitioner_on_date(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, DatabaseError>;

    async fn list_for_clinic_on_date(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, DatabaseError>;

    async fn list_on_date(
        &self,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, DatabaseError>;
}

// ==============================================================================
// SUPABASE (POSTGREST) IMPLEMENTATION
// ==============================================================================

/// Backed by the `appointments` table. The schema carries
/// `create unique index appointments_practitioner_slot_uniq on appointments
/// (practitioner_id, appointment_date, time_slot) where status in ('scheduled', 'confirmed')`,
/// which PostgREST reports as HTTP 409 / code 23505.
pub struct SupabaseAppointmentRepository {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch(&self, filters: Vec<String>) -> Result<Vec<Appointment>, DatabaseError> {
        let path = format!(
            "/rest/v1/appointments?{}&order=appointment_date.asc,time_slot.asc",
            filters.join("&")
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(self.supabase.service_token()), None)
            .await?;

        let appointments = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()?;

        Ok(appointments)
    }

    async fn write(&self, method: Method, path: &str, appointment: &Appointment) -> Result<Appointment, DatabaseError> {
        let body = serde_json::to_value(appointment)?;

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                method,
                path,
                Some(self.supabase.service_token()),
                Some(body),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;

        let row = result
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::NotFound(format!("appointment {}", appointment.id)))?;

        Ok(serde_json::from_value(row)?)
    }
}

fn status_filter(statuses: &[AppointmentStatus]) -> Option<String> {
    if statuses.is_empty() {
        return None;
    }
    let list: Vec<&str> = statuses.iter().map(AppointmentStatus::as_str).collect();
    Some(format!("status=in.({})", list.join(",")))
}

#[async_trait]
impl AppointmentRepository for SupabaseAppointmentRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        debug!("Fetching appointment {}", id);
        Ok(self.fetch(vec![format!("id=eq.{}", id)]).await?.into_iter().next())
    }

    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, DatabaseError> {
        self.write(Method::POST, "/rest/v1/appointments", appointment).await
    }

    async fn update(&self, appointment: &Appointment) -> Result<Appointment, DatabaseError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment.id);
        self.write(Method::PATCH, &path, appointment).await
    }

    async fn list_for_practitioner_on_date(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, DatabaseError> {
        let mut filters = vec![
            format!("practitioner_id=eq.{}", practitioner_id),
            format!("appointment_date=eq.{}", date),
        ];
        filters.extend(status_filter(statuses));
        self.fetch(filters).await
    }

    async fn list_for_clinic_on_date(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, DatabaseError> {
        let mut filters = vec![
            format!("clinic_id=eq.{}", clinic_id),
            format!("appointment_date=eq.{}", date),
        ];
        filters.extend(status_filter(statuses));
        self.fetch(filters).await
    }

    async fn list_on_date(
        &self,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, DatabaseError> {
        let mut filters = vec![format!("appointment_date=eq.{}", date)];
        filters.extend(status_filter(statuses));
        self.fetch(filters).await
    }
}

// ==============================================================================
// IN-MEMORY IMPLEMENTATION
// ==============================================================================

#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    rows: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn violates_constraint(candidate: &Appointment, rows: &HashMap<Uuid, Appointment>) -> bool {
        let Some(practitioner_id) = candidate.practitioner_id else {
            return false;
        };
        if !candidate.status.blocks_calendar() {
            return false;
        }
        rows.values().any(|row| {
            row.id != candidate.id
                && row.practitioner_id == Some(practitioner_id)
                && row.appointment_date == candidate.appointment_date
                && row.time_slot == candidate.time_slot
                && row.status.blocks_calendar()
        })
    }

    async fn select<F>(&self, statuses: &[AppointmentStatus], predicate: F) -> Vec<Appointment>
    where
        F: Fn(&Appointment) -> bool,
    {
        let rows = self.rows.read().await;
        let mut selected: Vec<Appointment> = rows
            .values()
            .filter(|row| statuses.is_empty() || statuses.contains(&row.status))
            .filter(|row| predicate(row))
            .cloned()
            .collect();
        selected.sort_by(|a, b| {
            (a.appointment_date, a.time_slot, a.created_at).cmp(&(b.appointment_date, b.time_slot, b.created_at))
        });
        selected
    }
}

#[async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn insert(&self, appointment: &Appointment) -> Result<Appointment, DatabaseError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&appointment.id) {
            return Err(DatabaseError::UniqueViolation(format!("appointment id {}", appointment.id)));
        }
        if Self::violates_constraint(appointment, &rows) {
            warn!(
                "Uniqueness constraint rejected appointment {} at {} {}",
                appointment.id, appointment.appointment_date, appointment.time_slot
            );
            return Err(DatabaseError::UniqueViolation(format!(
                "practitioner slot {} {} already taken",
                appointment.appointment_date, appointment.time_slot
            )));
        }
        rows.insert(appointment.id, appointment.clone());
        Ok(appointment.clone())
    }

    async fn update(&self, appointment: &Appointment) -> Result<Appointment, DatabaseError> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&appointment.id) {
            return Err(DatabaseError::NotFound(format!("appointment {}", appointment.id)));
        }
        if Self::violates_constraint(appointment, &rows) {
            return Err(DatabaseError::UniqueViolation(format!(
                "practitioner slot {} {} already taken",
                appointment.appointment_date, appointment.time_slot
            )));
        }
        rows.insert(appointment.id, appointment.clone());
        Ok(appointment.clone())
    }

    async fn list_for_practitioner_on_date(
        &self,
        practitioner_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, DatabaseError> {
        Ok(self
            .select(statuses, |row| {
                row.practitioner_id == Some(practitioner_id) && row.appointment_date == date
            })
            .await)
    }

    async fn list_for_clinic_on_date(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, DatabaseError> {
        Ok(self
            .select(statuses, |row| row.clinic_id == clinic_id && row.appointment_date == date)
            .await)
    }

    async fn list_on_date(
        &self,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, DatabaseError> {
        Ok(self.select(statuses, |row| row.appointment_date == date).await)
    }
}
