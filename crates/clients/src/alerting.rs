//! Assembles the configured alert destinations.

use std::sync::Arc;

use tally_core::reconciliation::FanoutAlertSink;
use tally_shared::config::ReconciliationConfig;
use tracing::info;

use crate::error::ClientError;
use crate::{PagerDutyAlertSink, SlackAlertSink, WebhookAlertSink};

fn configured(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

/// Every configured destination behind one fan-out sink.
///
/// Returns `None` when alerting is off or nothing is configured.
pub fn alert_sink_from_config(
    config: &ReconciliationConfig,
) -> Result<Option<FanoutAlertSink>, ClientError> {
    if !config.enable_alerting {
        return Ok(None);
    }

    let mut fanout = FanoutAlertSink::new();
    if let Some(sink) = WebhookAlertSink::from_config(config)? {
        fanout = fanout.with_sink("webhook", Arc::new(sink));
    }
    if let Some(url) = configured(config.slack_webhook_url.as_ref()) {
        fanout = fanout.with_sink("slack", Arc::new(SlackAlertSink::new(url)?));
    }
    if let Some(key) = configured(config.pagerduty_routing_key.as_ref()) {
        let sink = PagerDutyAlertSink::new(&config.pagerduty_events_url, key)?;
        fanout = fanout.with_sink("pagerduty", Arc::new(sink));
    }

    if fanout.is_empty() {
        return Ok(None);
    }
    info!(destinations = ?fanout.names(), "Alert destinations configured");
    Ok(Some(fanout))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alerting() -> ReconciliationConfig {
        ReconciliationConfig {
            enable_alerting: true,
            ..ReconciliationConfig::default()
        }
    }

    #[test]
    fn test_disabled_alerting_builds_nothing() {
        let config = ReconciliationConfig {
            slack_webhook_url: Some("https://hooks.slack.com/services/T/B/X".to_string()),
            ..ReconciliationConfig::default()
        };

        assert!(alert_sink_from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_no_destination_builds_nothing() {
        let config = ReconciliationConfig {
            pagerduty_routing_key: Some(String::new()),
            ..alerting()
        };

        assert!(alert_sink_from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_every_configured_destination_is_included() {
        let config = ReconciliationConfig {
            alert_webhook_url: Some("https://alerts.internal/hook".to_string()),
            slack_webhook_url: Some("https://hooks.slack.com/services/T/B/X".to_string()),
            pagerduty_routing_key: Some("R0UT1NG".to_string()),
            ..alerting()
        };

        let sink = alert_sink_from_config(&config).unwrap().unwrap();

        assert_eq!(sink.names(), vec!["webhook", "slack", "pagerduty"]);
    }

    #[test]
    fn test_slack_alone_is_enough() {
        let config = ReconciliationConfig {
            slack_webhook_url: Some("https://hooks.slack.com/services/T/B/X".to_string()),
            ..alerting()
        };

        let sink = alert_sink_from_config(&config).unwrap().unwrap();

        assert_eq!(sink.names(), vec!["slack"]);
    }
}
