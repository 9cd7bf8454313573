//! Trade planning: the read-modify-write arithmetic for a single order.
//!
//! [`plan_trade`] is pure — it maps the state loaded under the store's
//! transaction (balance plus the optional holding row) to the complete
//! outcome of the order. Adapters persist the plan atomically, so every
//! branch here either succeeds in full or leaves no trace.

use chrono::{DateTime, Utc};

use super::error::PapertraderError;
use super::holding::Holding;
use super::ledger::{describe, TradeSide};
use super::QTY_EPSILON;

/// A validated order. Construction rejects malformed input before the
/// engine or any storage is touched.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRequest {
    pub account_id: i64,
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub side: TradeSide,
}

impl TradeRequest {
    pub fn new(
        account_id: i64,
        symbol: &str,
        quantity: f64,
        price: f64,
        side: TradeSide,
    ) -> Result<Self, PapertraderError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(PapertraderError::Validation {
                reason: "symbol must not be empty".into(),
            });
        }
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(PapertraderError::Validation {
                reason: format!("quantity must be a positive number, got {quantity}"),
            });
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(PapertraderError::Validation {
                reason: format!("price must be a positive number, got {price}"),
            });
        }
        Ok(Self {
            account_id,
            symbol: symbol.to_string(),
            quantity,
            price,
            side,
        })
    }

    /// Gross cash value of the order, always positive.
    pub fn amount(&self) -> f64 {
        self.quantity * self.price
    }
}

/// What happens to the (account, symbol) holding row when the plan commits.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldingChange {
    Create(Holding),
    Update(Holding),
    Delete,
}

/// Ledger entry to append, minus the store-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDraft {
    pub account_id: i64,
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub side: TradeSide,
    pub amount: f64,
    pub balance_after: f64,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

/// The full, not-yet-persisted outcome of one order.
#[derive(Debug, Clone, PartialEq)]
pub struct TradePlan {
    pub new_balance: f64,
    pub holding: HoldingChange,
    pub entry: EntryDraft,
}

impl TradePlan {
    pub fn result(&self) -> TradeResult {
        let new_holding = match &self.holding {
            HoldingChange::Create(h) | HoldingChange::Update(h) => Some(h.clone()),
            HoldingChange::Delete => None,
        };
        TradeResult {
            amount: self.entry.amount,
            new_balance: self.new_balance,
            new_holding,
        }
    }
}

/// Summary returned to the caller after a successful commit.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeResult {
    /// Signed cash movement: negative for buys, positive for sells.
    pub amount: f64,
    pub new_balance: f64,
    pub new_holding: Option<Holding>,
}

/// Compute the outcome of an order against the currently-loaded state.
///
/// Average cost blends on buys and is untouched by sells; a sell that
/// leaves less than [`QTY_EPSILON`] shares closes the position outright.
pub fn plan_trade(
    balance: f64,
    holding: Option<&Holding>,
    request: &TradeRequest,
    now: DateTime<Utc>,
) -> Result<TradePlan, PapertraderError> {
    let amount = request.amount();

    let (new_balance, holding_change) = match request.side {
        TradeSide::Buy => {
            if amount > balance {
                return Err(PapertraderError::InsufficientFunds {
                    required: amount,
                    available: balance,
                });
            }
            let change = match holding {
                None => HoldingChange::Create(Holding {
                    account_id: request.account_id,
                    symbol: request.symbol.clone(),
                    quantity: request.quantity,
                    avg_cost: request.price,
                }),
                Some(held) => {
                    let new_quantity = held.quantity + request.quantity;
                    let new_avg_cost = (held.cost_basis() + amount) / new_quantity;
                    HoldingChange::Update(Holding {
                        quantity: new_quantity,
                        avg_cost: new_avg_cost,
                        ..held.clone()
                    })
                }
            };
            (balance - amount, change)
        }
        TradeSide::Sell => {
            let held = holding.ok_or_else(|| PapertraderError::NoPosition {
                symbol: request.symbol.clone(),
            })?;
            if request.quantity > held.quantity {
                return Err(PapertraderError::InsufficientShares {
                    symbol: request.symbol.clone(),
                    requested: request.quantity,
                    held: held.quantity,
                });
            }
            let new_quantity = held.quantity - request.quantity;
            let change = if new_quantity < QTY_EPSILON {
                HoldingChange::Delete
            } else {
                HoldingChange::Update(Holding {
                    quantity: new_quantity,
                    ..held.clone()
                })
            };
            (balance + amount, change)
        }
    };

    Ok(TradePlan {
        new_balance,
        holding: holding_change,
        entry: EntryDraft {
            account_id: request.account_id,
            symbol: request.symbol.clone(),
            quantity: request.quantity,
            price: request.price,
            side: request.side,
            amount: request.side.signed(amount),
            balance_after: new_balance,
            timestamp: now,
            description: describe(request.side, request.quantity, &request.symbol, request.price),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn now() -> DateTime<Utc> {
        "2024-06-01T10:30:00Z".parse().unwrap()
    }

    fn buy(quantity: f64, price: f64) -> TradeRequest {
        TradeRequest::new(1, "AAPL", quantity, price, TradeSide::Buy).unwrap()
    }

    fn sell(quantity: f64, price: f64) -> TradeRequest {
        TradeRequest::new(1, "AAPL", quantity, price, TradeSide::Sell).unwrap()
    }

    fn held(quantity: f64, avg_cost: f64) -> Holding {
        Holding {
            account_id: 1,
            symbol: "AAPL".into(),
            quantity,
            avg_cost,
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn rejects_zero_quantity() {
            let err = TradeRequest::new(1, "AAPL", 0.0, 100.0, TradeSide::Buy).unwrap_err();
            assert!(matches!(err, PapertraderError::Validation { .. }));
        }

        #[test]
        fn rejects_negative_price() {
            let err = TradeRequest::new(1, "AAPL", 10.0, -5.0, TradeSide::Buy).unwrap_err();
            assert!(matches!(err, PapertraderError::Validation { .. }));
        }

        #[test]
        fn rejects_nan_inputs() {
            assert!(TradeRequest::new(1, "AAPL", f64::NAN, 100.0, TradeSide::Buy).is_err());
            assert!(TradeRequest::new(1, "AAPL", 10.0, f64::INFINITY, TradeSide::Sell).is_err());
        }

        #[test]
        fn rejects_blank_symbol() {
            let err = TradeRequest::new(1, "   ", 10.0, 100.0, TradeSide::Buy).unwrap_err();
            assert!(matches!(err, PapertraderError::Validation { .. }));
        }

        #[test]
        fn trims_symbol() {
            let req = TradeRequest::new(1, " AAPL ", 10.0, 100.0, TradeSide::Buy).unwrap();
            assert_eq!(req.symbol, "AAPL");
        }
    }

    mod buys {
        use super::*;

        #[test]
        fn first_buy_creates_holding_at_price() {
            let plan = plan_trade(10000.0, None, &buy(10.0, 100.0), now()).unwrap();
            assert_relative_eq!(plan.new_balance, 9000.0);
            match &plan.holding {
                HoldingChange::Create(h) => {
                    assert_relative_eq!(h.quantity, 10.0);
                    assert_relative_eq!(h.avg_cost, 100.0);
                }
                other => panic!("expected Create, got {other:?}"),
            }
        }

        #[test]
        fn subsequent_buy_blends_average_cost() {
            let plan = plan_trade(9000.0, Some(&held(10.0, 100.0)), &buy(5.0, 120.0), now()).unwrap();
            assert_relative_eq!(plan.new_balance, 8400.0);
            match &plan.holding {
                HoldingChange::Update(h) => {
                    assert_relative_eq!(h.quantity, 15.0);
                    assert_relative_eq!(h.avg_cost, 1600.0 / 15.0, max_relative = 1e-12);
                }
                other => panic!("expected Update, got {other:?}"),
            }
        }

        #[test]
        fn buy_exactly_at_balance_is_allowed() {
            let plan = plan_trade(1000.0, None, &buy(10.0, 100.0), now()).unwrap();
            assert_relative_eq!(plan.new_balance, 0.0);
        }

        #[test]
        fn buy_above_balance_is_rejected() {
            let err = plan_trade(999.99, None, &buy(10.0, 100.0), now()).unwrap_err();
            match err {
                PapertraderError::InsufficientFunds {
                    required,
                    available,
                } => {
                    assert_relative_eq!(required, 1000.0);
                    assert_relative_eq!(available, 999.99);
                }
                other => panic!("expected InsufficientFunds, got {other}"),
            }
        }
    }

    mod sells {
        use super::*;

        #[test]
        fn partial_sell_keeps_average_cost() {
            let plan = plan_trade(0.0, Some(&held(15.0, 106.0)), &sell(5.0, 110.0), now()).unwrap();
            assert_relative_eq!(plan.new_balance, 550.0);
            match &plan.holding {
                HoldingChange::Update(h) => {
                    assert_relative_eq!(h.quantity, 10.0);
                    assert_relative_eq!(h.avg_cost, 106.0);
                }
                other => panic!("expected Update, got {other:?}"),
            }
        }

        #[test]
        fn full_sell_deletes_holding() {
            let plan = plan_trade(0.0, Some(&held(15.0, 106.0)), &sell(15.0, 110.0), now()).unwrap();
            assert_eq!(plan.holding, HoldingChange::Delete);
            assert_relative_eq!(plan.new_balance, 1650.0);
            assert!(plan.result().new_holding.is_none());
        }

        #[test]
        fn residual_below_epsilon_deletes_holding() {
            let holding = held(10.0, 100.0);
            let plan = plan_trade(0.0, Some(&holding), &sell(10.0 - 1e-12, 100.0), now()).unwrap();
            assert_eq!(plan.holding, HoldingChange::Delete);
        }

        #[test]
        fn sell_without_position_is_rejected() {
            let err = plan_trade(10000.0, None, &sell(5.0, 110.0), now()).unwrap_err();
            assert!(matches!(err, PapertraderError::NoPosition { .. }));
        }

        #[test]
        fn overselling_is_rejected() {
            let err = plan_trade(0.0, Some(&held(5.0, 100.0)), &sell(6.0, 110.0), now()).unwrap_err();
            match err {
                PapertraderError::InsufficientShares {
                    requested, held, ..
                } => {
                    assert_relative_eq!(requested, 6.0);
                    assert_relative_eq!(held, 5.0);
                }
                other => panic!("expected InsufficientShares, got {other}"),
            }
        }
    }

    mod ledger_drafts {
        use super::*;

        #[test]
        fn buy_draft_carries_negative_amount() {
            let plan = plan_trade(10000.0, None, &buy(10.0, 100.0), now()).unwrap();
            assert_relative_eq!(plan.entry.amount, -1000.0);
            assert_relative_eq!(plan.entry.balance_after, 9000.0);
            assert_eq!(plan.entry.side, TradeSide::Buy);
            assert_eq!(plan.entry.description, "BUY 10 shares of AAPL at $100");
            assert_eq!(plan.entry.timestamp, now());
        }

        #[test]
        fn sell_draft_carries_positive_amount() {
            let plan = plan_trade(0.0, Some(&held(15.0, 106.0)), &sell(15.0, 110.0), now()).unwrap();
            assert_relative_eq!(plan.entry.amount, 1650.0);
            assert_relative_eq!(plan.entry.balance_after, 1650.0);
            assert_eq!(plan.entry.description, "SELL 15 shares of AAPL at $110");
        }

        #[test]
        fn result_reflects_signed_amount() {
            let plan = plan_trade(10000.0, None, &buy(10.0, 100.0), now()).unwrap();
            let result = plan.result();
            assert_relative_eq!(result.amount, -1000.0);
            assert_relative_eq!(result.new_balance, 9000.0);
            assert_relative_eq!(result.new_holding.unwrap().quantity, 10.0);
        }
    }

    #[test]
    fn worked_example_round_trip() {
        // Start at 10000, buy 10 @ 100, buy 5 @ 120, sell all 15 @ 110.
        let plan1 = plan_trade(10000.0, None, &buy(10.0, 100.0), now()).unwrap();
        assert_relative_eq!(plan1.new_balance, 9000.0);
        let h1 = plan1.result().new_holding.unwrap();

        let plan2 = plan_trade(plan1.new_balance, Some(&h1), &buy(5.0, 120.0), now()).unwrap();
        assert_relative_eq!(plan2.new_balance, 8400.0);
        let h2 = plan2.result().new_holding.unwrap();
        assert_relative_eq!(h2.avg_cost, 106.0 + 2.0 / 3.0, max_relative = 1e-12);

        let plan3 = plan_trade(plan2.new_balance, Some(&h2), &sell(15.0, 110.0), now()).unwrap();
        assert_relative_eq!(plan3.new_balance, 10050.0, max_relative = 1e-12);
        assert!(plan3.result().new_holding.is_none());
    }
}
