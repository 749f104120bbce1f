use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{ClinicError, PatientContact};

/// Patient contact lookup used when composing reminder notifications.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn patient_contact(&self, patient_id: Uuid) -> Result<Option<PatientContact>, ClinicError>;
}
