use async_trait::async_trait;

use crate::errors::NotifyError;

/**
 * Outbound notification channels. Fire-and-forget from the card operations'
 * point of view: delivery failures are reported to the monitor so it can
 * count attempts, but they never escalate to the caller of a card operation.
 */
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_webhook(&self, url: &str, payload: &serde_json::Value)
        -> Result<(), NotifyError>;

    async fn send_push(&self, user_id: &str, title: &str, body: &str) -> Result<(), NotifyError>;

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;

    /// Coarse dashboard refresh signal derived from observed ledger events.
    async fn update_dashboard(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), NotifyError>;
}

/// Posts webhooks over HTTP. Push and email are logged only; wiring real
/// transports is a deployment concern, not part of the core.
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Webhook(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn send_webhook(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| NotifyError::Webhook(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Webhook(format!(
                "webhook returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn send_push(&self, user_id: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        tracing::info!(user_id, title, body, "push notification");
        Ok(())
    }

    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> Result<(), NotifyError> {
        tracing::info!(to, subject, "email notification");
        Ok(())
    }

    async fn update_dashboard(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        tracing::debug!(event_type, %payload, "dashboard update");
        Ok(())
    }
}
