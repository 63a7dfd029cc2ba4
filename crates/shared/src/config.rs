//! Application configuration management.
//!
//! Values are layered: `config/default.toml`, then `config/{RUN_MODE}.toml`, then
//! environment variables prefixed with `TALLY__` (e.g. `TALLY__DATABASE__URL`).

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Format of `scheduler.daily_run_time`.
pub const DAILY_RUN_TIME_FORMAT: &str = "%H:%M";

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
    /// Ledger posting rules.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Reconciliation checks, tolerances and alerting.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Reconciliation schedule.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Stablecoin custodian API.
    #[serde(default)]
    pub custodian: ExternalApiConfig,
    /// Brokerage API.
    #[serde(default)]
    pub brokerage: ExternalApiConfig,
    /// Retry policy for external reads.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default)]
    pub filter: Option<String>,
}

/// How the two entries of a posting must relate in amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancingPolicy {
    /// Debit amount must equal credit amount, even when one side is USDC and the
    /// other USD (1 USDC = 1 USD parity).
    #[default]
    RequireEqualAmounts,
    /// Two entries form a linked pair of movements. Amounts must match when the
    /// currencies match, and may differ when they do not.
    LinkedPair,
}

/// Ledger configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    /// Balancing rule applied to every posting.
    #[serde(default)]
    pub balancing: BalancingPolicy,
}

/// Upper bounds (inclusive, on the absolute difference) for each severity band.
/// Anything above `high_max` is critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SeverityThresholds {
    /// Largest difference still classified as low.
    pub low_max: Decimal,
    /// Largest difference still classified as medium.
    pub medium_max: Decimal,
    /// Largest difference still classified as high.
    pub high_max: Decimal,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low_max: Decimal::ONE,
            medium_max: Decimal::ONE_HUNDRED,
            high_max: Decimal::ONE_THOUSAND,
        }
    }
}

impl SeverityThresholds {
    /// Returns true if the bands are non-negative and strictly increasing.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.low_max >= Decimal::ZERO
            && self.low_max < self.medium_max
            && self.medium_max < self.high_max
    }
}

/// Reconciliation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// Whether the scheduler runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Allowed absolute gap between the USDC buffer and custodian balances.
    #[serde(default = "default_tolerance_custodian")]
    pub tolerance_custodian: Decimal,
    /// Allowed absolute gap between user fiat exposure and brokerage buying power.
    #[serde(default = "default_tolerance_brokerage")]
    pub tolerance_brokerage: Decimal,
    /// Hand low-severity exceptions to the correction hook.
    #[serde(default)]
    pub auto_correct_low_severity: bool,
    /// Send alerts for high and critical exceptions.
    #[serde(default)]
    pub enable_alerting: bool,
    /// Webhook receiving alerts.
    #[serde(default)]
    pub alert_webhook_url: Option<String>,
    /// Shared secret used to sign alert payloads.
    #[serde(default)]
    pub alert_webhook_secret: Option<String>,
    /// Slack incoming webhook receiving a summary of each alert.
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    /// PagerDuty Events v2 routing key. Critical exceptions page when set.
    #[serde(default)]
    pub pagerduty_routing_key: Option<String>,
    /// PagerDuty Events v2 enqueue endpoint.
    #[serde(default = "default_pagerduty_events_url")]
    pub pagerduty_events_url: String,
    /// Run the checks of a run concurrently instead of one after another.
    #[serde(default)]
    pub concurrent_checks: bool,
    /// Upper bound for a single run, in seconds.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Default severity bands.
    #[serde(default)]
    pub severity: SeverityThresholds,
    /// Severity bands per currency code, overriding `severity`.
    #[serde(default)]
    pub severity_overrides: HashMap<String, SeverityThresholds>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tolerance_custodian: default_tolerance_custodian(),
            tolerance_brokerage: default_tolerance_brokerage(),
            auto_correct_low_severity: false,
            enable_alerting: false,
            alert_webhook_url: None,
            alert_webhook_secret: None,
            slack_webhook_url: None,
            pagerduty_routing_key: None,
            pagerduty_events_url: default_pagerduty_events_url(),
            concurrent_checks: false,
            run_timeout_secs: default_run_timeout_secs(),
            severity: SeverityThresholds::default(),
            severity_overrides: HashMap::new(),
        }
    }
}

impl ReconciliationConfig {
    /// Per-run timeout.
    #[must_use]
    pub const fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Whether any of the webhook, Slack or PagerDuty destinations is set.
    #[must_use]
    pub fn has_alert_destination(&self) -> bool {
        [
            &self.alert_webhook_url,
            &self.slack_webhook_url,
            &self.pagerduty_routing_key,
        ]
        .into_iter()
        .any(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

fn default_pagerduty_events_url() -> String {
    "https://events.pagerduty.com/v2/enqueue".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tolerance_custodian() -> Decimal {
    Decimal::TEN
}

fn default_tolerance_brokerage() -> Decimal {
    Decimal::ONE_HUNDRED
}

fn default_run_timeout_secs() -> u64 {
    600 // 10 minutes
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between hourly runs, in seconds.
    #[serde(default = "default_hourly_interval_secs")]
    pub hourly_interval_secs: u64,
    /// Interval between daily runs once the first one has happened, in seconds.
    #[serde(default = "default_daily_interval_secs")]
    pub daily_interval_secs: u64,
    /// Local wall-clock time of the daily run, `HH:MM`.
    #[serde(default = "default_daily_run_time")]
    pub daily_run_time: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hourly_interval_secs: default_hourly_interval_secs(),
            daily_interval_secs: default_daily_interval_secs(),
            daily_run_time: default_daily_run_time(),
        }
    }
}

impl SchedulerConfig {
    /// Interval between hourly runs.
    #[must_use]
    pub const fn hourly_interval(&self) -> Duration {
        Duration::from_secs(self.hourly_interval_secs)
    }

    /// Interval between daily runs.
    #[must_use]
    pub const fn daily_interval(&self) -> Duration {
        Duration::from_secs(self.daily_interval_secs)
    }

    /// Parses `daily_run_time`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a valid `HH:MM` time.
    pub fn daily_run_time(&self) -> Result<NaiveTime, chrono::ParseError> {
        NaiveTime::parse_from_str(&self.daily_run_time, DAILY_RUN_TIME_FORMAT)
    }
}

fn default_hourly_interval_secs() -> u64 {
    3600
}

fn default_daily_interval_secs() -> u64 {
    86400
}

fn default_daily_run_time() -> String {
    "02:00".to_string()
}

/// Connection settings for an external HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalApiConfig {
    /// Base URL of the API.
    #[serde(default)]
    pub base_url: String,
    /// Bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExternalApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ExternalApiConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Bounded exponential backoff for external reads.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Cap on any single delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or fails validation.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("TALLY").separator("__"))
            .build()?;

        let app: Self = config.try_deserialize()?;
        app.validate().map_err(config::ConfigError::Message)?;
        Ok(app)
    }

    /// Checks cross-field rules that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        let recon = &self.reconciliation;
        if recon.tolerance_custodian.is_sign_negative() || recon.tolerance_brokerage.is_sign_negative() {
            return Err("reconciliation tolerances must not be negative".to_string());
        }
        if !recon.severity.is_ordered() {
            return Err("reconciliation.severity bands must be increasing".to_string());
        }
        for (currency, bands) in &recon.severity_overrides {
            if !bands.is_ordered() {
                return Err(format!("severity override for {currency} must be increasing"));
            }
        }
        if recon.enable_alerting && !recon.has_alert_destination() {
            return Err(
                "reconciliation alerting needs alert_webhook_url, slack_webhook_url or pagerduty_routing_key"
                    .to_string(),
            );
        }
        if recon.run_timeout_secs == 0 {
            return Err("reconciliation.run_timeout_secs must be positive".to_string());
        }
        if self.scheduler.hourly_interval_secs == 0 || self.scheduler.daily_interval_secs == 0 {
            return Err("scheduler intervals must be positive".to_string());
        }
        self.scheduler
            .daily_run_time()
            .map_err(|e| format!("scheduler.daily_run_time must be HH:MM: {e}"))?;
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
