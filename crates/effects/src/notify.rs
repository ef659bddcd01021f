//! Notification and alert sinks.
//!
//! Routine notifications and emergency alerts travel through separate
//! traits so an alert can never be queued behind (or merged with) routine
//! traffic.

use crate::intent::{EmergencyAlert, Notification};
use async_trait::async_trait;
use healthflow_config::NotificationConfig;
use healthflow_core::error::NotifyError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the `sha256=<hex>` body signature.
pub const SIGNATURE_HEADER: &str = "X-HealthFlow-Signature";

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn create(&self, user_id: &str, notification: &Notification) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn raise(&self, user_id: &str, alert: &EmergencyAlert) -> Result<(), NotifyError>;
}

/// Logs notifications and alerts via `tracing`.
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn create(&self, user_id: &str, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            user_id,
            category = notification.category.as_str(),
            title = %notification.title,
            deep_link = ?notification.deep_link,
            "NOTIFY"
        );
        Ok(())
    }
}

#[async_trait]
impl AlertSink for TracingNotifier {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn raise(&self, user_id: &str, alert: &EmergencyAlert) -> Result<(), NotifyError> {
        warn!(
            user_id,
            kind = ?alert.kind,
            flow = %alert.flow,
            title = %alert.title,
            "ALERT"
        );
        Ok(())
    }
}

/// Keeps everything it receives. Used by tests and the CLI's dry runs.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    notifications: Mutex<Vec<(String, Notification)>>,
    alerts: Mutex<Vec<(String, EmergencyAlert)>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(String, Notification)> {
        self.notifications.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn alerts(&self) -> Vec<(String, EmergencyAlert)> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotifier {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create(&self, user_id: &str, notification: &Notification) -> Result<(), NotifyError> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((user_id.to_string(), notification.clone()));
        Ok(())
    }
}

#[async_trait]
impl AlertSink for InMemoryNotifier {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn raise(&self, user_id: &str, alert: &EmergencyAlert) -> Result<(), NotifyError> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((user_id.to_string(), alert.clone()));
        Ok(())
    }
}

/// Sign a webhook body: `sha256=<hex hmac>`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, NotifyError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|e| NotifyError::DeliveryFailed {
        sink: "webhook".into(),
        reason: format!("invalid signing key: {e}"),
    })?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a `sha256=<hex>` signature in constant time.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let sig_hex = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(provided) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// POSTs JSON to an HTTP endpoint, optionally HMAC-signed.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    async fn post(&self, body: serde_json::Value) -> Result<(), NotifyError> {
        let bytes = serde_json::to_vec(&body).map_err(|e| NotifyError::DeliveryFailed {
            sink: "webhook".into(),
            reason: e.to_string(),
        })?;

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign(secret, &bytes)?);
        }

        let response = request.body(bytes).send().await.map_err(|e| NotifyError::DeliveryFailed {
            sink: "webhook".into(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(NotifyError::DeliveryFailed {
                sink: "webhook".into(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        debug!(url = %self.url, "Webhook delivered");
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn create(&self, user_id: &str, notification: &Notification) -> Result<(), NotifyError> {
        self.post(serde_json::json!({
            "kind": "notification",
            "userId": user_id,
            "notification": notification,
        }))
        .await
    }
}

#[async_trait]
impl AlertSink for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn raise(&self, user_id: &str, alert: &EmergencyAlert) -> Result<(), NotifyError> {
        self.post(serde_json::json!({
            "kind": "alert",
            "priority": "high",
            "userId": user_id,
            "alert": alert,
        }))
        .await
    }
}

/// Build the notification and alert sinks described by config.
///
/// Without URLs both fall back to [`TracingNotifier`].
pub fn sinks_from_config(config: &NotificationConfig) -> (Arc<dyn NotificationSink>, Arc<dyn AlertSink>) {
    let notifier: Arc<dyn NotificationSink> = match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), config.webhook_secret.clone())),
        None => Arc::new(TracingNotifier),
    };
    let alerts: Arc<dyn AlertSink> = match &config.alert_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), config.webhook_secret.clone())),
        None => Arc::new(TracingNotifier),
    };
    (notifier, alerts)
}
