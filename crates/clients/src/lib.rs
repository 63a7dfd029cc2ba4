//! HTTP adapters for the systems the reconciler audits against.
//!
//! - `HttpCustodianClient`: stablecoin custodian wallet balances
//! - `HttpBrokerageClient`: brokerage buying power across user accounts
//! - `WebhookAlertSink`: signed alert delivery
//! - `SlackAlertSink`, `PagerDutyAlertSink`: chat and paging destinations
//!
//! `alert_sink_from_config` combines the configured destinations into one
//! `FanoutAlertSink`.
//!
//! Failures are mapped onto `SourceError` so the retry wrappers in `tally-core`
//! can tell transient failures from permanent ones.

pub mod alerting;
pub mod brokerage;
pub mod custodian;
pub mod error;
pub mod pagerduty;
pub mod slack;
pub mod webhook;

#[cfg(test)]
mod test_server;

pub use alerting::alert_sink_from_config;
pub use brokerage::HttpBrokerageClient;
pub use custodian::HttpCustodianClient;
pub use error::ClientError;
pub use pagerduty::PagerDutyAlertSink;
pub use slack::SlackAlertSink;
pub use webhook::{SIGNATURE_HEADER, WebhookAlertSink, sign_payload};

use std::time::Duration;

use serde::de::DeserializeOwned;
use tally_core::reconciliation::{AlertError, SourceError};

/// Builds the shared reqwest client with a request timeout.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ClientError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("tally-reconciler/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Sends `request` and decodes the JSON body, mapping failures for `source_name`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    source_name: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, SourceError> {
    let response = request
        .send()
        .await
        .map_err(|e| error::from_reqwest(source_name, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(error::from_status(source_name, status, &body));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| error::from_reqwest(source_name, &e))
}

/// Sends an alert request; any non-2xx answer is `Rejected`.
pub(crate) async fn deliver_alert(request: reqwest::RequestBuilder) -> Result<(), AlertError> {
    let response = request
        .send()
        .await
        .map_err(|e| AlertError::Delivery(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AlertError::Rejected(status.as_u16()));
    }
    Ok(())
}
