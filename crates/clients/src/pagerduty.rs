//! Paging on critical exceptions through the PagerDuty Events API v2.
//!
//! Each critical exception becomes its own `trigger` event, deduplicated on the
//! exception ID so a redelivered alert does not open a second incident. High
//! exceptions are left to the other destinations.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_core::reconciliation::{Alert, AlertError, AlertSink, ReconciliationException, Severity};
use tracing::{debug, instrument, warn};

use crate::error::ClientError;
use crate::{deliver_alert, http_client};

const PAGERDUTY_TIMEOUT: Duration = Duration::from_secs(10);

/// `source` reported on every event.
const EVENT_SOURCE: &str = "tally-reconciler";

#[derive(Debug, Serialize)]
pub(crate) struct Event<'a> {
    routing_key: &'a str,
    event_action: &'static str,
    dedup_key: String,
    payload: EventPayload<'a>,
}

#[derive(Debug, Serialize)]
struct EventPayload<'a> {
    summary: String,
    severity: &'static str,
    source: &'static str,
    timestamp: DateTime<Utc>,
    custom_details: EventDetails<'a>,
}

#[derive(Debug, Serialize)]
struct EventDetails<'a> {
    report_id: String,
    check_type: &'static str,
    affected_entity: Option<&'a str>,
    description: &'a str,
    expected: String,
    actual: String,
    difference: String,
    created_at: DateTime<Utc>,
}

impl<'a> Event<'a> {
    pub(crate) fn trigger(routing_key: &'a str, exception: &'a ReconciliationException) -> Self {
        Self {
            routing_key,
            event_action: "trigger",
            dedup_key: exception.id.to_string(),
            payload: EventPayload {
                summary: format!("Reconciliation Exception: {}", exception.check_type),
                severity: "critical",
                source: EVENT_SOURCE,
                timestamp: exception.created_at,
                custom_details: EventDetails {
                    report_id: exception.report_id.to_string(),
                    check_type: exception.check_type.as_str(),
                    affected_entity: exception.affected_entity.as_deref(),
                    description: &exception.description,
                    expected: exception.expected.to_string(),
                    actual: exception.actual.to_string(),
                    difference: exception.difference.to_string(),
                    created_at: exception.created_at,
                },
            },
        }
    }
}

/// Triggers one PagerDuty incident per critical exception.
#[derive(Debug, Clone)]
pub struct PagerDutyAlertSink {
    client: reqwest::Client,
    events_url: String,
    routing_key: String,
}

impl PagerDutyAlertSink {
    /// Creates a sink enqueueing events at `events_url` under `routing_key`.
    pub fn new(
        events_url: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: http_client(PAGERDUTY_TIMEOUT)?,
            events_url: events_url.into(),
            routing_key: routing_key.into(),
        })
    }
}

#[async_trait]
impl AlertSink for PagerDutyAlertSink {
    #[instrument(skip(self, alert), fields(report_id = %alert.report_id))]
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let mut first_error = None;
        let mut paged = 0;

        for exception in alert
            .exceptions
            .iter()
            .filter(|e| e.severity == Severity::Critical)
        {
            let event = Event::trigger(&self.routing_key, exception);
            match deliver_alert(self.client.post(&self.events_url).json(&event)).await {
                Ok(()) => paged += 1,
                Err(e) => {
                    warn!(exception_id = %exception.id, error = %e, "PagerDuty event failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        debug!(paged, "PagerDuty events enqueued");
        Ok(())
    }
}
