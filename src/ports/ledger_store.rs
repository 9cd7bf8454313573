//! Ledger store port trait: all durable financial state lives behind it.

use tracing::warn;

use crate::domain::account::Account;
use crate::domain::analysis::{analyze_history, AnalysisReport};
use crate::domain::error::PapertraderError;
use crate::domain::execution::{TradeRequest, TradeResult};
use crate::domain::holding::Holding;
use crate::domain::ledger::LedgerEntry;

/// A consistent read of one account's full financial state, taken in a
/// single transaction so no half-committed trade is visible.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub account: Account,
    /// Live holdings, ordered by symbol ascending.
    pub holdings: Vec<Holding>,
    /// Full history ordered by timestamp ascending, entry id as tie-break.
    pub entries: Vec<LedgerEntry>,
}

pub trait LedgerStore {
    fn get_account(&self, account_id: i64) -> Result<Account, PapertraderError>;

    fn get_holding(
        &self,
        account_id: i64,
        symbol: &str,
    ) -> Result<Option<Holding>, PapertraderError>;

    /// Live holdings ordered by symbol ascending.
    fn list_holdings(&self, account_id: i64) -> Result<Vec<Holding>, PapertraderError>;

    /// Full history ordered by timestamp ascending, entry id as tie-break.
    fn ordered_history(&self, account_id: i64) -> Result<Vec<LedgerEntry>, PapertraderError>;

    /// Consistent snapshot of balance, holdings, and history.
    fn snapshot(&self, account_id: i64) -> Result<AccountSnapshot, PapertraderError>;

    /// Execute a validated order atomically: load balance and holding,
    /// plan the trade, persist balance + holding + one appended ledger
    /// entry, commit. On any failure nothing is applied. Concurrent orders
    /// for the same account serialize; ledger order matches commit order.
    fn execute_trade(&self, request: &TradeRequest) -> Result<TradeResult, PapertraderError>;

    /// Replay-based analysis of one account against this store's snapshot.
    ///
    /// Valuation failures degrade individual holding rows; only storage
    /// errors fail the report.
    fn analyze(
        &self,
        valuation: &dyn crate::ports::valuation_port::ValuationPort,
        account_id: i64,
    ) -> Result<AnalysisReport, PapertraderError> {
        let snapshot = self.snapshot(account_id)?;
        let mut price_of = |symbol: &str| match valuation.current_price(symbol) {
            Ok(price) => price,
            Err(err) => {
                warn!(symbol, error = %err, "valuation lookup failed");
                None
            }
        };
        Ok(analyze_history(
            &snapshot.entries,
            &snapshot.holdings,
            &mut price_of,
        ))
    }
}
