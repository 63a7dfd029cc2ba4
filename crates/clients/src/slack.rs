//! Alert delivery to a Slack incoming webhook.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tally_core::reconciliation::{Alert, AlertError, AlertSink};
use tracing::{debug, instrument};

use crate::error::ClientError;
use crate::{deliver_alert, http_client};

const SLACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Exceptions listed individually before the message falls back to a count.
const MAX_LISTED_EXCEPTIONS: usize = 5;

/// Posts a Block Kit summary of each alert to Slack.
#[derive(Debug, Clone)]
pub struct SlackAlertSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackAlertSink {
    /// Creates a sink posting to the incoming webhook at `webhook_url`.
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            client: http_client(SLACK_TIMEOUT)?,
            webhook_url: webhook_url.into(),
        })
    }
}

/// Header, a count line, up to five exception sections and a remainder note.
pub(crate) fn message(alert: &Alert) -> Value {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": "Reconciliation Alert" }
        }),
        json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("*{} high-priority exceptions detected*", alert.count)
            }
        }),
    ];

    for exception in alert.exceptions.iter().take(MAX_LISTED_EXCEPTIONS) {
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": exception.description },
            "fields": [
                { "type": "mrkdwn", "text": format!("*Type:*\n{}", exception.check_type) },
                { "type": "mrkdwn", "text": format!("*Severity:*\n{}", exception.severity) }
            ]
        }));
    }

    let remaining = alert.exceptions.len().saturating_sub(MAX_LISTED_EXCEPTIONS);
    if remaining > 0 {
        blocks.push(json!({
            "type": "context",
            "elements": [{ "type": "mrkdwn", "text": format!("_...and {remaining} more_") }]
        }));
    }

    json!({
        "text": format!("Reconciliation alert: {} {} exceptions", alert.count, alert.severity),
        "blocks": blocks,
    })
}

#[async_trait]
impl AlertSink for SlackAlertSink {
    #[instrument(skip(self, alert), fields(report_id = %alert.report_id))]
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        deliver_alert(self.client.post(&self.webhook_url).json(&message(alert))).await?;
        debug!(count = alert.count, "Slack alert delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{TestServer, reply};
    use axum::http::Method;
    use rust_decimal_macros::dec;
    use tally_core::reconciliation::{
        CheckResult, CheckType, ReconciliationException, ReconciliationReport, RunType, Severity,
    };

    fn alert_with(count: usize) -> Alert {
        let mut report = ReconciliationReport::start(RunType::Daily);
        let exceptions = (0..count)
            .map(|i| {
                ReconciliationException::new(
                    report.id,
                    CheckType::ConversionJobs,
                    Severity::High,
                    format!("Deposit {i} completed without a ledger entry"),
                    dec!(0),
                    dec!(25),
                    None,
                )
            })
            .collect();
        report.record(CheckResult::completed(
            CheckType::ConversionJobs,
            dec!(0),
            dec!(25),
            exceptions,
            Duration::ZERO,
        ));
        Alert::from_report(&report).unwrap()
    }

    #[test]
    fn test_message_lists_at_most_five_exceptions() {
        let body = message(&alert_with(7));

        let blocks = body["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 2 + 5 + 1);
        assert_eq!(blocks[0]["text"]["text"], "Reconciliation Alert");
        assert_eq!(blocks[1]["text"]["text"], "*7 high-priority exceptions detected*");
        assert_eq!(blocks[2]["fields"][0]["text"], "*Type:*\nconversion_jobs");
        assert_eq!(blocks[2]["fields"][1]["text"], "*Severity:*\nhigh");
        assert_eq!(blocks[7]["elements"][0]["text"], "_...and 2 more_");
    }

    #[test]
    fn test_short_message_has_no_remainder_note() {
        let body = message(&alert_with(2));

        let blocks = body["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| b["type"] != "context"));
    }

    #[tokio::test]
    async fn test_posts_blocks_to_the_webhook() {
        let server = TestServer::start(vec![reply(200, "ok")]).await;
        let sink = SlackAlertSink::new(format!("{}/services/T0/B0/secret", server.base_url())).unwrap();

        sink.send(&alert_with(1)).await.unwrap();

        let requests = server.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].is(Method::POST, "/services/T0/B0/secret"));
        assert_eq!(requests[0].json()["blocks"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let server = TestServer::start(vec![reply(404, "no_service")]).await;
        let sink = SlackAlertSink::new(server.base_url()).unwrap();

        let err = sink.send(&alert_with(1)).await.unwrap_err();

        assert!(matches!(err, AlertError::Rejected(404)));
    }
}
