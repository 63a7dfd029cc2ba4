//! Shared severity classifier.
//!
//! Every numeric discrepancy is scored by the same policy so results from different
//! checks are comparable.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use tally_shared::config::{ReconciliationConfig, SeverityThresholds};
use tally_shared::types::Currency;

use super::types::Severity;

/// Maps `(difference, currency)` to a severity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeverityPolicy {
    default: SeverityThresholds,
    overrides: HashMap<Currency, SeverityThresholds>,
}

impl SeverityPolicy {
    /// Policy using the same bands for every currency.
    #[must_use]
    pub fn new(default: SeverityThresholds) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Uses `thresholds` for `currency` instead of the default bands.
    #[must_use]
    pub fn with_override(mut self, currency: Currency, thresholds: SeverityThresholds) -> Self {
        self.overrides.insert(currency, thresholds);
        self
    }

    /// Builds the policy from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an override names an unknown currency.
    pub fn from_config(config: &ReconciliationConfig) -> Result<Self, String> {
        config
            .severity_overrides
            .iter()
            .try_fold(Self::new(config.severity), |policy, (code, bands)| {
                Ok(policy.with_override(Currency::from_str(code)?, *bands))
            })
    }

    /// Classifies the absolute value of `difference`.
    #[must_use]
    pub fn classify(&self, difference: Decimal, currency: Currency) -> Severity {
        let bands = self.overrides.get(&currency).unwrap_or(&self.default);
        let magnitude = difference.abs();

        if magnitude <= bands.low_max {
            Severity::Low
        } else if magnitude <= bands.medium_max {
            Severity::Medium
        } else if magnitude <= bands.high_max {
            Severity::High
        } else {
            Severity::Critical
        }
    }
}
