//! Immutable ledger entries, the unit of truth for replay.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    /// Sign convention for ledger amounts: cash leaves the account on a buy.
    pub fn signed(&self, amount: f64) -> f64 {
        match self {
            TradeSide::Buy => -amount,
            TradeSide::Sell => amount,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            other => Err(format!("unknown trade side: {other}")),
        }
    }
}

/// One executed trade, append-only. Never updated or deleted once written;
/// `id` is an always-increasing key used as the replay tie-break when
/// timestamps collide at sub-resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: i64,
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub side: TradeSide,
    /// Signed cash movement: negative for buys, positive for sells.
    pub amount: f64,
    /// Account balance immediately after this entry committed.
    pub balance_after: f64,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

/// Human-readable ledger line, e.g. `BUY 10 shares of AAPL at $100`.
pub fn describe(side: TradeSide, quantity: f64, symbol: &str, price: f64) -> String {
    format!("{side} {quantity} shares of {symbol} at ${price}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn side_parses_case_insensitively() {
        assert_eq!("buy".parse::<TradeSide>().unwrap(), TradeSide::Buy);
        assert_eq!("SELL".parse::<TradeSide>().unwrap(), TradeSide::Sell);
        assert_eq!("Buy".parse::<TradeSide>().unwrap(), TradeSide::Buy);
        assert!("hold".parse::<TradeSide>().is_err());
    }

    #[test]
    fn signed_amount_convention() {
        assert_relative_eq!(TradeSide::Buy.signed(1000.0), -1000.0);
        assert_relative_eq!(TradeSide::Sell.signed(1000.0), 1000.0);
    }

    #[test]
    fn description_format() {
        assert_eq!(
            describe(TradeSide::Buy, 10.0, "AAPL", 100.0),
            "BUY 10 shares of AAPL at $100"
        );
        assert_eq!(
            describe(TradeSide::Sell, 2.5, "MSFT", 310.25),
            "SELL 2.5 shares of MSFT at $310.25"
        );
    }
}
