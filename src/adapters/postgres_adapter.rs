//! PostgreSQL ledger adapter.
//!
//! Unlike SQLite's single-writer lock, trades here take row-level
//! pessimistic locks (`SELECT ... FOR UPDATE`) on the account row and the
//! (account, symbol) holding row, so orders for different accounts never
//! block each other while orders for the same account serialize in commit
//! order.

use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::{Client, NoTls, Transaction};
use std::cell::RefCell;
use tracing::debug;

use crate::domain::account::{Account, DEFAULT_OPENING_BALANCE};
use crate::domain::error::PapertraderError;
use crate::domain::execution::{plan_trade, EntryDraft, HoldingChange, TradeRequest, TradeResult};
use crate::domain::holding::Holding;
use crate::domain::ledger::{LedgerEntry, TradeSide};
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_store::{AccountSnapshot, LedgerStore};

pub struct PostgresLedger {
    client: RefCell<Client>,
}

impl PostgresLedger {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PapertraderError> {
        let connection_string = config
            .get_string("postgres", "connection_string")
            .ok_or_else(|| PapertraderError::ConfigMissing {
                section: "postgres".into(),
                key: "connection_string".into(),
            })?;

        let client = Client::connect(&connection_string, NoTls).map_err(|e| {
            PapertraderError::Database {
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            client: RefCell::new(client),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), PapertraderError> {
        self.client
            .borrow_mut()
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS accounts (
                    id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    balance DOUBLE PRECISION NOT NULL CHECK (balance >= 0)
                );
                CREATE TABLE IF NOT EXISTS holdings (
                    account_id BIGINT NOT NULL REFERENCES accounts(id),
                    symbol TEXT NOT NULL,
                    quantity DOUBLE PRECISION NOT NULL CHECK (quantity > 0),
                    avg_cost DOUBLE PRECISION NOT NULL CHECK (avg_cost > 0),
                    PRIMARY KEY (account_id, symbol)
                );
                CREATE TABLE IF NOT EXISTS ledger (
                    id BIGSERIAL PRIMARY KEY,
                    account_id BIGINT NOT NULL REFERENCES accounts(id),
                    symbol TEXT NOT NULL,
                    quantity DOUBLE PRECISION NOT NULL,
                    price DOUBLE PRECISION NOT NULL,
                    side TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
                    amount DOUBLE PRECISION NOT NULL,
                    balance_after DOUBLE PRECISION NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    description TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_ledger_account_time
                    ON ledger(account_id, created_at);",
            )
            .map_err(query_error)?;
        Ok(())
    }

    pub fn open_account(
        &self,
        name: &str,
        opening_balance: Option<f64>,
    ) -> Result<Account, PapertraderError> {
        let balance = opening_balance.unwrap_or(DEFAULT_OPENING_BALANCE);
        if !balance.is_finite() || balance < 0.0 {
            return Err(PapertraderError::Validation {
                reason: format!("opening balance must be non-negative, got {balance}"),
            });
        }

        let row = self
            .client
            .borrow_mut()
            .query_one(
                "INSERT INTO accounts (name, balance) VALUES ($1, $2) RETURNING id",
                &[&name, &balance],
            )
            .map_err(query_error)?;

        Ok(Account {
            id: row.get(0),
            name: name.to_string(),
            balance,
        })
    }
}

impl LedgerStore for PostgresLedger {
    fn get_account(&self, account_id: i64) -> Result<Account, PapertraderError> {
        let row = self
            .client
            .borrow_mut()
            .query_opt(
                "SELECT id, name, balance FROM accounts WHERE id = $1",
                &[&account_id],
            )
            .map_err(query_error)?;
        row.map(|r| Account {
            id: r.get(0),
            name: r.get(1),
            balance: r.get(2),
        })
        .ok_or(PapertraderError::AccountNotFound { account_id })
    }

    fn get_holding(
        &self,
        account_id: i64,
        symbol: &str,
    ) -> Result<Option<Holding>, PapertraderError> {
        let row = self
            .client
            .borrow_mut()
            .query_opt(
                "SELECT account_id, symbol, quantity, avg_cost
                 FROM holdings WHERE account_id = $1 AND symbol = $2",
                &[&account_id, &symbol],
            )
            .map_err(query_error)?;
        Ok(row.map(map_holding))
    }

    fn list_holdings(&self, account_id: i64) -> Result<Vec<Holding>, PapertraderError> {
        let rows = self
            .client
            .borrow_mut()
            .query(
                "SELECT account_id, symbol, quantity, avg_cost
                 FROM holdings WHERE account_id = $1 ORDER BY symbol ASC",
                &[&account_id],
            )
            .map_err(query_error)?;
        Ok(rows.into_iter().map(map_holding).collect())
    }

    fn ordered_history(&self, account_id: i64) -> Result<Vec<LedgerEntry>, PapertraderError> {
        let rows = self
            .client
            .borrow_mut()
            .query(
                "SELECT id, account_id, symbol, quantity, price, side, amount,
                        balance_after, created_at, description
                 FROM ledger WHERE account_id = $1
                 ORDER BY created_at ASC, id ASC",
                &[&account_id],
            )
            .map_err(query_error)?;
        rows.into_iter().map(map_entry).collect()
    }

    fn snapshot(&self, account_id: i64) -> Result<AccountSnapshot, PapertraderError> {
        let mut client = self.client.borrow_mut();
        let mut tx = client.transaction().map_err(query_error)?;

        let account = tx
            .query_opt(
                "SELECT id, name, balance FROM accounts WHERE id = $1",
                &[&account_id],
            )
            .map_err(query_error)?
            .map(|r| Account {
                id: r.get(0),
                name: r.get(1),
                balance: r.get(2),
            })
            .ok_or(PapertraderError::AccountNotFound { account_id })?;

        let holdings = tx
            .query(
                "SELECT account_id, symbol, quantity, avg_cost
                 FROM holdings WHERE account_id = $1 ORDER BY symbol ASC",
                &[&account_id],
            )
            .map_err(query_error)?
            .into_iter()
            .map(map_holding)
            .collect();

        let entries = tx
            .query(
                "SELECT id, account_id, symbol, quantity, price, side, amount,
                        balance_after, created_at, description
                 FROM ledger WHERE account_id = $1
                 ORDER BY created_at ASC, id ASC",
                &[&account_id],
            )
            .map_err(query_error)?
            .into_iter()
            .map(map_entry)
            .collect::<Result<Vec<_>, _>>()?;

        tx.commit().map_err(query_error)?;

        Ok(AccountSnapshot {
            account,
            holdings,
            entries,
        })
    }

    fn execute_trade(&self, request: &TradeRequest) -> Result<TradeResult, PapertraderError> {
        let mut client = self.client.borrow_mut();
        let mut tx = client.transaction().map_err(trade_error)?;

        // Lock order is fixed (account row, then holding row) so two
        // concurrent orders for the same account cannot deadlock.
        let balance: f64 = tx
            .query_opt(
                "SELECT balance FROM accounts WHERE id = $1 FOR UPDATE",
                &[&request.account_id],
            )
            .map_err(trade_error)?
            .ok_or(PapertraderError::AccountNotFound {
                account_id: request.account_id,
            })?
            .get(0);

        let holding = tx
            .query_opt(
                "SELECT account_id, symbol, quantity, avg_cost
                 FROM holdings WHERE account_id = $1 AND symbol = $2 FOR UPDATE",
                &[&request.account_id, &request.symbol],
            )
            .map_err(trade_error)?
            .map(map_holding);

        let plan = plan_trade(balance, holding.as_ref(), request, Utc::now())?;

        tx.execute(
            "UPDATE accounts SET balance = $1 WHERE id = $2",
            &[&plan.new_balance, &request.account_id],
        )
        .map_err(trade_error)?;
        apply_holding_change(&mut tx, request, &plan.holding).map_err(trade_error)?;
        insert_entry(&mut tx, &plan.entry).map_err(trade_error)?;

        tx.commit().map_err(trade_error)?;

        debug!(
            account_id = request.account_id,
            symbol = %request.symbol,
            side = %request.side,
            amount = plan.entry.amount,
            new_balance = plan.new_balance,
            "trade committed"
        );
        Ok(plan.result())
    }
}

fn apply_holding_change(
    tx: &mut Transaction<'_>,
    request: &TradeRequest,
    change: &HoldingChange,
) -> Result<(), postgres::Error> {
    match change {
        HoldingChange::Create(h) => {
            tx.execute(
                "INSERT INTO holdings (account_id, symbol, quantity, avg_cost)
                 VALUES ($1, $2, $3, $4)",
                &[&h.account_id, &h.symbol, &h.quantity, &h.avg_cost],
            )?;
        }
        HoldingChange::Update(h) => {
            tx.execute(
                "UPDATE holdings SET quantity = $1, avg_cost = $2
                 WHERE account_id = $3 AND symbol = $4",
                &[&h.quantity, &h.avg_cost, &h.account_id, &h.symbol],
            )?;
        }
        HoldingChange::Delete => {
            tx.execute(
                "DELETE FROM holdings WHERE account_id = $1 AND symbol = $2",
                &[&request.account_id, &request.symbol],
            )?;
        }
    }
    Ok(())
}

fn insert_entry(tx: &mut Transaction<'_>, entry: &EntryDraft) -> Result<(), postgres::Error> {
    tx.execute(
        "INSERT INTO ledger (account_id, symbol, quantity, price, side, amount,
                             balance_after, created_at, description)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        &[
            &entry.account_id,
            &entry.symbol,
            &entry.quantity,
            &entry.price,
            &entry.side.as_str(),
            &entry.amount,
            &entry.balance_after,
            &entry.timestamp,
            &entry.description,
        ],
    )?;
    Ok(())
}

fn map_holding(row: postgres::Row) -> Holding {
    Holding {
        account_id: row.get(0),
        symbol: row.get(1),
        quantity: row.get(2),
        avg_cost: row.get(3),
    }
}

fn map_entry(row: postgres::Row) -> Result<LedgerEntry, PapertraderError> {
    let side_str: String = row.get(5);
    let side = side_str
        .parse::<TradeSide>()
        .map_err(|reason| PapertraderError::DatabaseQuery { reason })?;
    let created_at: DateTime<Utc> = row.get(8);
    Ok(LedgerEntry {
        id: row.get(0),
        account_id: row.get(1),
        symbol: row.get(2),
        quantity: row.get(3),
        price: row.get(4),
        side,
        amount: row.get(6),
        balance_after: row.get(7),
        timestamp: created_at,
        description: row.get(9),
    })
}

fn query_error(err: postgres::Error) -> PapertraderError {
    PapertraderError::DatabaseQuery {
        reason: err.to_string(),
    }
}

/// Deadlocks and serialization failures are retryable by the caller;
/// everything else is a plain query failure.
fn trade_error(err: postgres::Error) -> PapertraderError {
    let code = err.code();
    if code == Some(&SqlState::T_R_SERIALIZATION_FAILURE)
        || code == Some(&SqlState::T_R_DEADLOCK_DETECTED)
    {
        PapertraderError::ConcurrencyConflict { retries: 0 }
    } else {
        PapertraderError::DatabaseQuery {
            reason: err.to_string(),
        }
    }
}
