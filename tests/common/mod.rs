#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use papertrader::domain::account::Account;
use papertrader::domain::error::PapertraderError;
use papertrader::domain::execution::{TradeRequest, TradeResult};
use papertrader::domain::holding::Holding;
use papertrader::domain::ledger::{describe, LedgerEntry, TradeSide};
use papertrader::ports::ledger_store::{AccountSnapshot, LedgerStore};
use papertrader::ports::valuation_port::ValuationPort;
use std::collections::{HashMap, HashSet};

pub fn base_time() -> DateTime<Utc> {
    "2024-06-01T10:00:00Z".parse().unwrap()
}

pub fn entry(id: i64, symbol: &str, quantity: f64, price: f64, side: TradeSide) -> LedgerEntry {
    LedgerEntry {
        id,
        account_id: 1,
        symbol: symbol.to_string(),
        quantity,
        price,
        side,
        amount: side.signed(quantity * price),
        balance_after: 0.0,
        timestamp: base_time() + Duration::seconds(id),
        description: describe(side, quantity, symbol, price),
    }
}

pub fn holding(symbol: &str, quantity: f64, avg_cost: f64) -> Holding {
    Holding {
        account_id: 1,
        symbol: symbol.to_string(),
        quantity,
        avg_cost,
    }
}

pub fn buy(account_id: i64, symbol: &str, quantity: f64, price: f64) -> TradeRequest {
    TradeRequest::new(account_id, symbol, quantity, price, TradeSide::Buy).unwrap()
}

pub fn sell(account_id: i64, symbol: &str, quantity: f64, price: f64) -> TradeRequest {
    TradeRequest::new(account_id, symbol, quantity, price, TradeSide::Sell).unwrap()
}

/// Read-only in-memory store for exercising the replay engine against
/// arbitrary (possibly corrupted) histories.
pub struct MockLedgerStore {
    pub account: Account,
    pub holdings: Vec<Holding>,
    pub entries: Vec<LedgerEntry>,
}

impl MockLedgerStore {
    pub fn new() -> Self {
        Self {
            account: Account {
                id: 1,
                name: "mock".into(),
                balance: 10000.0,
            },
            holdings: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn with_holdings(mut self, holdings: Vec<Holding>) -> Self {
        self.holdings = holdings;
        self
    }

    pub fn with_entries(mut self, entries: Vec<LedgerEntry>) -> Self {
        self.entries = entries;
        self
    }
}

impl LedgerStore for MockLedgerStore {
    fn get_account(&self, account_id: i64) -> Result<Account, PapertraderError> {
        if account_id == self.account.id {
            Ok(self.account.clone())
        } else {
            Err(PapertraderError::AccountNotFound { account_id })
        }
    }

    fn get_holding(
        &self,
        _account_id: i64,
        symbol: &str,
    ) -> Result<Option<Holding>, PapertraderError> {
        Ok(self.holdings.iter().find(|h| h.symbol == symbol).cloned())
    }

    fn list_holdings(&self, _account_id: i64) -> Result<Vec<Holding>, PapertraderError> {
        Ok(self.holdings.clone())
    }

    fn ordered_history(&self, _account_id: i64) -> Result<Vec<LedgerEntry>, PapertraderError> {
        Ok(self.entries.clone())
    }

    fn snapshot(&self, account_id: i64) -> Result<AccountSnapshot, PapertraderError> {
        Ok(AccountSnapshot {
            account: self.get_account(account_id)?,
            holdings: self.holdings.clone(),
            entries: self.entries.clone(),
        })
    }

    fn execute_trade(&self, _request: &TradeRequest) -> Result<TradeResult, PapertraderError> {
        Err(PapertraderError::Database {
            reason: "mock store is read-only".into(),
        })
    }
}

/// Configurable price source: fixed quotes, per-symbol failures, or silence.
pub struct MockValuation {
    prices: HashMap<String, f64>,
    failures: HashSet<String>,
}

impl MockValuation {
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
            failures: HashSet::new(),
        }
    }

    pub fn with_price(mut self, symbol: &str, price: f64) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }

    pub fn with_failure(mut self, symbol: &str) -> Self {
        self.failures.insert(symbol.to_string());
        self
    }
}

impl ValuationPort for MockValuation {
    fn current_price(&self, symbol: &str) -> Result<Option<f64>, PapertraderError> {
        if self.failures.contains(symbol) {
            return Err(PapertraderError::ValuationUnavailable {
                symbol: symbol.to_string(),
                reason: "simulated outage".into(),
            });
        }
        Ok(self.prices.get(symbol).copied())
    }
}
