use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::stream::{FuturesOrdered, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use clinic_cell::StaffRosterProvider;
use shared_models::TimeSlot;

use crate::models::AppointmentError;
use crate::services::conflict::ConflictDetectionService;

/// Picks a practitioner for bookings made without one.
///
/// Fails open: an empty roster, a lookup error or an elapsed deadline all yield
/// `None`, and the booking proceeds unassigned.
pub struct AutoAssignmentService {
    roster: Arc<dyn StaffRosterProvider>,
    conflicts: Arc<ConflictDetectionService>,
    deadline: Duration,
}

impl AutoAssignmentService {
    pub fn new(
        roster: Arc<dyn StaffRosterProvider>,
        conflicts: Arc<ConflictDetectionService>,
        deadline: Duration,
    ) -> Self {
        Self {
            roster,
            conflicts,
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    #[instrument(skip(self))]
    pub async fn auto_assign(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        duration_minutes: u32,
    ) -> Option<Uuid> {
        // Dropping the search on timeout cancels every in-flight conflict check.
        match timeout(self.deadline, self.first_free_practitioner(clinic_id, date, slot, duration_minutes)).await {
            Ok(Ok(Some(practitioner_id))) => {
                info!("Auto-assigned practitioner {} for {} {}", practitioner_id, date, slot);
                Some(practitioner_id)
            }
            Ok(Ok(None)) => {
                warn!("No eligible practitioner at clinic {} for {} {}, booking unassigned", clinic_id, date, slot);
                None
            }
            Ok(Err(e)) => {
                warn!("Auto-assignment failed, booking unassigned: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Auto-assignment exceeded {:?} deadline, booking unassigned",
                    self.deadline
                );
                None
            }
        }
    }

    /// Scheduled practitioners are checked concurrently; results are consumed in
    /// roster order so the first conflict-free one wins deterministically.
    async fn first_free_practitioner(
        &self,
        clinic_id: Uuid,
        date: NaiveDate,
        slot: TimeSlot,
        duration_minutes: u32,
    ) -> Result<Option<Uuid>, AppointmentError> {
        let candidates = self.roster.scheduled_practitioners(clinic_id, date).await?;
        debug!("{} scheduled candidates at clinic {} on {}", candidates.len(), clinic_id, date);

        let mut checks: FuturesOrdered<_> = candidates
            .iter()
            .map(|practitioner| {
                let practitioner_id = practitioner.id;
                async move {
                    let result = self
                        .conflicts
                        .find_conflicts(Some(practitioner_id), date, slot, duration_minutes, None)
                        .await;
                    (practitioner_id, result)
                }
            })
            .collect();

        while let Some((practitioner_id, result)) = checks.next().await {
            match result {
                Ok(conflicts) if conflicts.is_empty() => return Ok(Some(practitioner_id)),
                Ok(conflicts) => {
                    debug!("Practitioner {} has {} conflicts", practitioner_id, conflicts.len());
                }
                Err(e) => {
                    warn!("Conflict check for practitioner {} failed: {}", practitioner_id, e);
                }
            }
        }

        Ok(None)
    }
}
