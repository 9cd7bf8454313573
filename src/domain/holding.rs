//! Holding tracking under the average-cost method.

use serde::Serialize;

/// One position in one symbol, keyed by (account, symbol).
///
/// Invariants: `quantity > 0` and `avg_cost > 0` while the row exists;
/// `avg_cost` is the quantity-weighted mean acquisition price of the shares
/// currently held. A holding is deleted exactly when its quantity reaches
/// zero; it never goes negative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Holding {
    pub account_id: i64,
    pub symbol: String,
    pub quantity: f64,
    pub avg_cost: f64,
}

impl Holding {
    /// Total acquisition cost of the held shares.
    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.avg_cost
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    /// Paper gain/loss against a current price.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.avg_cost) * self.quantity
    }
}
