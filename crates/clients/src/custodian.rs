//! Stablecoin custodian adapter.
//!
//! The custodian has no aggregate endpoint: live wallets are listed, then each
//! wallet's USDC token balance is fetched and summed. Any wallet that cannot be
//! read fails the whole read, so a partial sum never reaches the check.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tally_core::reconciliation::{CustodianClient, SourceError};
use tally_shared::config::ExternalApiConfig;
use tracing::{debug, instrument};

use crate::error::ClientError;
use crate::{get_json, http_client};

const SOURCE: &str = "custodian";
const LIVE_STATE: &str = "LIVE";
const USDC_SYMBOL: &str = "USDC";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct WalletList {
    wallets: Vec<Wallet>,
}

#[derive(Debug, Deserialize)]
struct Wallet {
    id: String,
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletBalances {
    token_balances: Vec<TokenBalance>,
}

#[derive(Debug, Deserialize)]
struct TokenBalance {
    token: Token,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct Token {
    symbol: String,
}

impl WalletBalances {
    fn usdc(&self) -> Decimal {
        self.token_balances
            .iter()
            .filter(|b| b.token.symbol.eq_ignore_ascii_case(USDC_SYMBOL))
            .map(|b| b.amount)
            .sum()
    }
}

/// Reads total USDC held across the platform's custodial wallets.
#[derive(Debug, Clone)]
pub struct HttpCustodianClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCustodianClient {
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
impl CustodianClient for HttpCustodianClient {
    #[instrument(skip(self))]
    async fn total_stablecoin_balance(&self) -> Result<Decimal, SourceError> {
        let wallets: Envelope<WalletList> = get_json(SOURCE, self.get("/v1/w3s/wallets")).await?;

        let mut total = Decimal::ZERO;
        for wallet in wallets.data.wallets.iter().filter(|w| w.state == LIVE_STATE) {
            let balances: Envelope<WalletBalances> = get_json(
                SOURCE,
                self.get(&format!("/v1/w3s/wallets/{}/balances", wallet.id)),
            )
            .await?;
            total += balances.data.usdc();
        }

        debug!(%total, "Fetched custodian balance");
        Ok(total)
    }
}
