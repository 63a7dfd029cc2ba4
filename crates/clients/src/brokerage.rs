//! Brokerage adapter: total buying power across active user accounts.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tally_core::reconciliation::{BrokerageClient, SourceError};
use tally_shared::config::ExternalApiConfig;
use tracing::{debug, instrument};

use crate::error::ClientError;
use crate::{get_json, http_client};

const SOURCE: &str = "brokerage";
const ACTIVE_STATUS: &str = "ACTIVE";

#[derive(Debug, Deserialize)]
struct BrokerAccount {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TradingAccount {
    buying_power: Decimal,
}

/// Reads the sum of buying power over every active brokerage account.
#[derive(Debug, Clone)]
pub struct HttpBrokerageClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpBrokerageClient {
    /// Creates a client from configuration.
    pub fn new(config: &ExternalApiConfig) -> Result<Self, ClientError> {
        if config.base_url.is_empty() {
            return Err(ClientError::MissingBaseUrl(SOURCE));
        }
        Ok(Self {
            client: http_client(config.timeout())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl BrokerageClient for HttpBrokerageClient {
    #[instrument(skip(self))]
    async fn total_buying_power(&self) -> Result<Decimal, SourceError> {
        let accounts: Vec<BrokerAccount> = get_json(SOURCE, self.get("/v1/accounts")).await?;

        let mut total = Decimal::ZERO;
        let mut counted = 0usize;
        for account in accounts.iter().filter(|a| a.status == ACTIVE_STATUS) {
            let trading: TradingAccount = get_json(
                SOURCE,
                self.get(&format!("/v1/trading/accounts/{}/account", account.id)),
            )
            .await?;
            total += trading.buying_power;
            counted += 1;
        }

        debug!(%total, accounts = counted, "Fetched brokerage buying power");
        Ok(total)
    }
}
