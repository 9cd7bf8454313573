//! Cost-basis replay: derives realized gains, portfolio growth, and trading
//! statistics from the ledger alone.
//!
//! Every pass here is a pure forward fold over the account's entries in
//! timestamp order (entry id as tie-break, preserved by the store). The
//! replay is the source of truth for analytics; the live holdings table is
//! only consulted for the unrealized-gain section and is cross-checked
//! against the replayed state, with drift reported rather than repaired.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use super::holding::Holding;
use super::ledger::{LedgerEntry, TradeSide};
use super::QTY_EPSILON;

/// Tolerance when comparing replayed state against the live holdings table.
const DRIFT_EPSILON: f64 = 1e-6;

/// Profit or loss locked in by one sell, against the average cost at that
/// moment of the replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealizedGain {
    pub symbol: String,
    pub quantity_sold: f64,
    pub avg_cost_at_sale: f64,
    pub sell_price: f64,
    pub realized: f64,
    pub timestamp: DateTime<Utc>,
}

/// One point of the cost-flow curve: cumulative invested value after an
/// entry, priced at the ledger's own prices rather than the market.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrowthPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub total_trades: usize,
    pub buys: usize,
    pub sells: usize,
    pub most_traded: Option<String>,
}

/// Valuation of one live holding. `degraded` marks rows where no usable
/// market price was available and the average cost stood in for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingPerformance {
    pub symbol: String,
    pub quantity: f64,
    pub avg_cost: f64,
    pub current_price: f64,
    pub current_value: f64,
    pub unrealized_pnl: f64,
    pub degraded: bool,
}

/// A divergence between the ledger and the live holdings found during
/// replay. Surfaced to operators, never silently fixed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IntegrityWarning {
    /// A sell entry with no prior holding in the replayed history.
    OrphanSell {
        symbol: String,
        quantity: f64,
        timestamp: DateTime<Utc>,
    },
    /// Live holding state disagrees with the state replayed from the ledger.
    HoldingDrift {
        symbol: String,
        live_quantity: f64,
        replayed_quantity: f64,
        live_avg_cost: f64,
        replayed_avg_cost: f64,
    },
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityWarning::OrphanSell {
                symbol,
                quantity,
                timestamp,
            } => write!(
                f,
                "sell of {quantity} {symbol} at {timestamp} has no prior holding in the ledger"
            ),
            IntegrityWarning::HoldingDrift {
                symbol,
                live_quantity,
                replayed_quantity,
                live_avg_cost,
                replayed_avg_cost,
            } => write!(
                f,
                "holding {symbol} diverges from ledger replay: \
                 live {live_quantity} @ {live_avg_cost}, replayed {replayed_quantity} @ {replayed_avg_cost}"
            ),
        }
    }
}

/// Composite analysis of one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub total_portfolio_value: f64,
    pub holdings: Vec<HoldingPerformance>,
    pub activity: ActivitySummary,
    pub realized_gains: Vec<RealizedGain>,
    pub portfolio_growth: Vec<GrowthPoint>,
    pub warnings: Vec<IntegrityWarning>,
}

#[derive(Debug, Clone, Copy, Default)]
struct RunningPosition {
    quantity: f64,
    cost_total: f64,
}

impl RunningPosition {
    fn avg_cost(&self) -> f64 {
        self.cost_total / self.quantity
    }
}

/// Result of the realized-gain forward pass, including the final replayed
/// per-symbol positions for reconciliation against live holdings.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub realized_gains: Vec<RealizedGain>,
    pub warnings: Vec<IntegrityWarning>,
    positions: BTreeMap<String, RunningPosition>,
}

/// Single forward pass over ordered entries, independent per symbol.
///
/// Buys accumulate quantity and cost; sells realize `(price - running avg)
/// * sold` and consume cost at the running average, clamped to what the
/// replay actually holds. A sell against an empty replayed position yields
/// an [`IntegrityWarning::OrphanSell`] and no realized record.
pub fn replay_ledger(entries: &[LedgerEntry]) -> ReplayOutcome {
    let mut positions: BTreeMap<String, RunningPosition> = BTreeMap::new();
    let mut realized_gains = Vec::new();
    let mut warnings = Vec::new();

    for entry in entries {
        let position = positions.entry(entry.symbol.clone()).or_default();
        match entry.side {
            TradeSide::Buy => {
                position.quantity += entry.quantity;
                position.cost_total += entry.quantity * entry.price;
            }
            TradeSide::Sell => {
                if position.quantity <= QTY_EPSILON {
                    warnings.push(IntegrityWarning::OrphanSell {
                        symbol: entry.symbol.clone(),
                        quantity: entry.quantity,
                        timestamp: entry.timestamp,
                    });
                    continue;
                }
                let avg_cost_at_sale = position.avg_cost();
                let sold = entry.quantity.min(position.quantity);
                realized_gains.push(RealizedGain {
                    symbol: entry.symbol.clone(),
                    quantity_sold: sold,
                    avg_cost_at_sale,
                    sell_price: entry.price,
                    realized: (entry.price - avg_cost_at_sale) * sold,
                    timestamp: entry.timestamp,
                });
                position.quantity -= sold;
                position.cost_total -= avg_cost_at_sale * sold;
                // Absorb floating-point residue once the position is spent.
                if position.quantity < QTY_EPSILON {
                    *position = RunningPosition::default();
                }
            }
        }
    }

    ReplayOutcome {
        realized_gains,
        warnings,
        positions,
    }
}

/// Compare the replayed final positions against the live holdings table.
pub fn reconcile(outcome: &ReplayOutcome, live: &[Holding]) -> Vec<IntegrityWarning> {
    let mut warnings = Vec::new();

    for holding in live {
        let replayed = outcome
            .positions
            .get(&holding.symbol)
            .copied()
            .unwrap_or_default();
        let replayed_avg = if replayed.quantity > QTY_EPSILON {
            replayed.avg_cost()
        } else {
            0.0
        };
        if (holding.quantity - replayed.quantity).abs() > DRIFT_EPSILON
            || (holding.avg_cost - replayed_avg).abs() > DRIFT_EPSILON
        {
            warnings.push(IntegrityWarning::HoldingDrift {
                symbol: holding.symbol.clone(),
                live_quantity: holding.quantity,
                replayed_quantity: replayed.quantity,
                live_avg_cost: holding.avg_cost,
                replayed_avg_cost: replayed_avg,
            });
        }
    }

    // Replayed positions with no surviving holding row.
    for (symbol, position) in &outcome.positions {
        if position.quantity > DRIFT_EPSILON && !live.iter().any(|h| &h.symbol == symbol) {
            warnings.push(IntegrityWarning::HoldingDrift {
                symbol: symbol.clone(),
                live_quantity: 0.0,
                replayed_quantity: position.quantity,
                live_avg_cost: 0.0,
                replayed_avg_cost: position.avg_cost(),
            });
        }
    }

    warnings
}

/// Cost-flow curve: one point per entry, +quantity*price on buys,
/// -quantity*price on sells.
pub fn portfolio_growth(entries: &[LedgerEntry]) -> Vec<GrowthPoint> {
    let mut value = 0.0;
    entries
        .iter()
        .map(|entry| {
            match entry.side {
                TradeSide::Buy => value += entry.quantity * entry.price,
                TradeSide::Sell => value -= entry.quantity * entry.price,
            }
            GrowthPoint {
                timestamp: entry.timestamp,
                value,
            }
        })
        .collect()
}

/// Entry counts by side plus the most-traded symbol. Ties resolve to the
/// first symbol in ascending name order, so the result is deterministic.
pub fn activity_summary(entries: &[LedgerEntry]) -> ActivitySummary {
    let mut buys = 0;
    let mut sells = 0;
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();

    for entry in entries {
        match entry.side {
            TradeSide::Buy => buys += 1,
            TradeSide::Sell => sells += 1,
        }
        *counts.entry(entry.symbol.as_str()).or_insert(0) += 1;
    }

    let mut most_traded: Option<(&str, usize)> = None;
    for (symbol, count) in &counts {
        if most_traded.is_none_or(|(_, best)| *count > best) {
            most_traded = Some((symbol, *count));
        }
    }

    ActivitySummary {
        total_trades: entries.len(),
        buys,
        sells,
        most_traded: most_traded.map(|(symbol, _)| symbol.to_string()),
    }
}

/// Value each live holding at the resolved current price.
///
/// `price_of` returning `None` marks the row as degraded: the holding's own
/// average cost stands in, yielding zero unrealized gain rather than a
/// failed report.
pub fn holdings_performance(
    holdings: &[Holding],
    price_of: &mut dyn FnMut(&str) -> Option<f64>,
) -> (Vec<HoldingPerformance>, f64) {
    let mut total_value = 0.0;
    let rows = holdings
        .iter()
        .map(|holding| {
            let (current_price, degraded) = match price_of(&holding.symbol) {
                Some(price) if price.is_finite() && price > 0.0 => (price, false),
                _ => {
                    warn!(
                        symbol = %holding.symbol,
                        "no usable current price, falling back to average cost"
                    );
                    (holding.avg_cost, true)
                }
            };
            total_value += holding.market_value(current_price);
            HoldingPerformance {
                symbol: holding.symbol.clone(),
                quantity: holding.quantity,
                avg_cost: holding.avg_cost,
                current_price,
                current_value: holding.market_value(current_price),
                unrealized_pnl: holding.unrealized_pnl(current_price),
                degraded,
            }
        })
        .collect();
    (rows, total_value)
}

/// Assemble the full report from an account snapshot and a price resolver.
///
/// Partial valuation failure degrades individual rows; integrity findings
/// are logged and carried in the report. Nothing here can fail.
pub fn analyze_history(
    entries: &[LedgerEntry],
    holdings: &[Holding],
    price_of: &mut dyn FnMut(&str) -> Option<f64>,
) -> AnalysisReport {
    let outcome = replay_ledger(entries);
    let mut warnings = outcome.warnings.clone();
    warnings.extend(reconcile(&outcome, holdings));
    for warning in &warnings {
        warn!(%warning, "ledger integrity");
    }

    let (holding_rows, total_portfolio_value) = holdings_performance(holdings, price_of);

    AnalysisReport {
        total_portfolio_value,
        holdings: holding_rows,
        activity: activity_summary(entries),
        realized_gains: outcome.realized_gains,
        portfolio_growth: portfolio_growth(entries),
        warnings,
    }
}
