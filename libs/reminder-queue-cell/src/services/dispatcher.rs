use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, warn};

use shared_config::AppConfig;
use shared_models::NotificationChannel;

use crate::{ReminderNotification, ReminderQueueError};

/// Delivers one reminder over one channel. The queue decides when and what; a
/// dispatcher only decides how.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        channel: NotificationChannel,
        notification: &ReminderNotification,
    ) -> Result<(), ReminderQueueError>;
}

// ==============================================================================
// HTTP NOTIFICATION GATEWAY (EMAIL / SMS)
// ==============================================================================

pub struct GatewayDispatcher {
    client: Client,
    base_url: Option<String>,
    api_token: String,
}

impl GatewayDispatcher {
    pub fn new(config: &AppConfig) -> Self {
        if config.notification_gateway_url.is_none() {
            warn!("NOTIFICATION_GATEWAY_URL not set, email and SMS reminders will fail");
        }
        Self {
            client: Client::new(),
            base_url: config
                .notification_gateway_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            api_token: config.supabase_service_token.clone(),
        }
    }

    fn recipient(channel: NotificationChannel, notification: &ReminderNotification) -> Result<String, ReminderQueueError> {
        let address = match channel {
            NotificationChannel::Email => notification.patient_email.clone(),
            NotificationChannel::Sms => notification.patient_phone.clone(),
            NotificationChannel::InApp => {
                return Err(ReminderQueueError::dispatch(channel, "in-app delivery is not handled by the gateway"));
            }
        };
        address
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| ReminderQueueError::dispatch(channel, "patient has no contact on file"))
    }
}

#[async_trait]
impl NotificationDispatcher for GatewayDispatcher {
    async fn dispatch(
        &self,
        channel: NotificationChannel,
        notification: &ReminderNotification,
    ) -> Result<(), ReminderQueueError> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| ReminderQueueError::dispatch(channel, "notification gateway not configured"))?;
        let to = Self::recipient(channel, notification)?;

        let url = format!("{}/v1/notifications/{}", base_url, channel);
        let body = json!({
            "to": to,
            "subject": notification.subject(),
            "message": notification.message(),
            "priority": notification.priority,
            "reference": notification.job_id,
            "appointment_id": notification.appointment_id,
        });

        debug!("Sending {} reminder for job {} to gateway", channel, notification.job_id);

        let mut request = self.client.post(&url).json(&body);
        if !self.api_token.is_empty() {
            request = request.bearer_auth(&self.api_token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Gateway rejected {} reminder ({}): {}", channel, status, text);
            return Err(ReminderQueueError::dispatch(channel, format!("gateway returned {}: {}", status, text)));
        }

        Ok(())
    }
}

// ==============================================================================
// CHANNEL ROUTER
// ==============================================================================

/// Routes in-app reminders to the in-process hub and everything else to the gateway.
pub struct ChannelRouter {
    gateway: Arc<dyn NotificationDispatcher>,
    in_app: Arc<dyn NotificationDispatcher>,
}

impl ChannelRouter {
    pub fn new(gateway: Arc<dyn NotificationDispatcher>, in_app: Arc<dyn NotificationDispatcher>) -> Self {
        Self { gateway, in_app }
    }
}

#[async_trait]
impl NotificationDispatcher for ChannelRouter {
    async fn dispatch(
        &self,
        channel: NotificationChannel,
        notification: &ReminderNotification,
    ) -> Result<(), ReminderQueueError> {
        match channel {
            NotificationChannel::InApp => self.in_app.dispatch(channel, notification).await,
            NotificationChannel::Email | NotificationChannel::Sms => self.gateway.dispatch(channel, notification).await,
        }
    }
}
