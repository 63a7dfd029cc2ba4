//! Alert delivery over a signed JSON webhook.

use std::time::Duration;

use async_trait::async_trait;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tally_core::reconciliation::{Alert, AlertError, AlertSink};
use tally_shared::config::ReconciliationConfig;
use tracing::{debug, instrument};

use crate::error::ClientError;
use crate::{deliver_alert, http_client};

/// Header carrying the hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn sign_payload(secret: &[u8], body: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// POSTs alerts as JSON to a webhook, signing the body when a secret is set.
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookAlertSink {
    /// Creates a sink posting to `url`.
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Result<Self, ClientError> {
        Ok(Self {
            client: http_client(WEBHOOK_TIMEOUT)?,
            url: url.into(),
            secret: secret.filter(|s| !s.is_empty()),
        })
    }

    /// Builds the sink from reconciliation settings; `None` when alerting is off or
    /// no webhook is configured.
    pub fn from_config(config: &ReconciliationConfig) -> Result<Option<Self>, ClientError> {
        match config.alert_webhook_url.as_deref() {
            Some(url) if config.enable_alerting && !url.is_empty() => {
                Self::new(url, config.alert_webhook_secret.clone()).map(Some)
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    #[instrument(skip(self, alert), fields(report_id = %alert.report_id, severity = %alert.severity))]
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let body = serde_json::to_vec(alert).map_err(|e| AlertError::Delivery(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            let signature = sign_payload(secret.as_bytes(), &body)
                .map_err(|e| AlertError::Delivery(e.to_string()))?;
            request = request.header(SIGNATURE_HEADER, signature);
        }

        deliver_alert(request.body(body)).await?;
        debug!(count = alert.count, "Alert delivered");
        Ok(())
    }
}
