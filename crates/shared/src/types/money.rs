//! Currencies that ledger accounts can be denominated in.
//!
//! CRITICAL: Never use floating-point for money calculations.
//! Amounts are always `rust_decimal::Decimal`.

use serde::{Deserialize, Serialize};

/// Currency codes supported by the ledger.
///
/// The ledger holds stablecoin (USDC) on the custodial side and US dollars on the
/// brokerage and card side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// USD Coin stablecoin
    Usdc,
    /// US Dollar
    Usd,
}

impl Currency {
    /// Returns the currency code as stored in the database.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Usdc => "USDC",
            Self::Usd => "USD",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USDC" => Ok(Self::Usdc),
            "USD" => Ok(Self::Usd),
            _ => Err(format!("Unknown currency: {s}")),
        }
    }
}

#[cfg(test)]
#[path = "money_tests.rs"]
mod tests;
