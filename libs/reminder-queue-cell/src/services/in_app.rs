use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use shared_models::NotificationChannel;

use crate::services::dispatcher::NotificationDispatcher;
use crate::{ReminderNotification, ReminderQueueError};

pub type InAppSender = broadcast::Sender<String>;
pub type InAppReceiver = broadcast::Receiver<String>;

/// In-process fan-out of in-app reminders: one broadcast channel per patient plus a
/// global feed for monitoring.
pub struct InAppNotificationHub {
    channels: Arc<RwLock<HashMap<Uuid, InAppSender>>>,
    global_sender: InAppSender,
}

impl InAppNotificationHub {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(1000);

        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            global_sender,
        }
    }

    /// Subscribes to a patient's reminders, creating the channel on first use.
    pub async fn subscribe(&self, patient_id: Uuid) -> InAppReceiver {
        let mut channels = self.channels.write().await;
        let sender = channels
            .entry(patient_id)
            .or_insert_with(|| broadcast::channel(100).0);

        debug!("In-app subscriber attached for patient {}", patient_id);
        sender.subscribe()
    }

    pub async fn remove_channel(&self, patient_id: Uuid) {
        let mut channels = self.channels.write().await;
        channels.remove(&patient_id);
        debug!("Removed in-app channel for patient {}", patient_id);
    }

    pub fn subscribe_global(&self) -> InAppReceiver {
        self.global_sender.subscribe()
    }

    pub async fn get_active_channels(&self) -> Vec<Uuid> {
        let channels = self.channels.read().await;
        channels.keys().cloned().collect()
    }

    /// Drops channels nobody listens to any more.
    pub async fn prune_idle_channels(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }
}

#[async_trait]
impl NotificationDispatcher for InAppNotificationHub {
    async fn dispatch(
        &self,
        _channel: NotificationChannel,
        notification: &ReminderNotification,
    ) -> Result<(), ReminderQueueError> {
        let message = serde_json::json!({
            "type": "appointment_reminder",
            "timestamp": Utc::now().to_rfc3339(),
            "subject": notification.subject(),
            "message": notification.message(),
            "data": notification,
        })
        .to_string();

        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(&notification.patient_id) {
                if let Err(e) = sender.send(message.clone()) {
                    // No live session; the global feed still records it.
                    debug!("No in-app listener for patient {}: {}", notification.patient_id, e);
                }
            }
        }

        if let Err(e) = self.global_sender.send(message) {
            debug!("Failed to send to global channel: {}", e);
        }

        debug!("Sent in-app reminder for job {}", notification.job_id);
        Ok(())
    }
}

impl Default for InAppNotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InAppNotificationHub {
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
            global_sender: self.global_sender.clone(),
        }
    }
}
