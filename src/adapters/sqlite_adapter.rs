//! SQLite ledger adapter.
//!
//! SQLite is a single-writer store, so the atomic trade unit runs inside an
//! `Immediate` transaction: the write lock is taken up front, concurrent
//! orders serialize in commit order, and a locked database surfaces as a
//! bounded busy-retry loop rather than a partial write.

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::domain::account::{Account, DEFAULT_OPENING_BALANCE};
use crate::domain::error::PapertraderError;
use crate::domain::execution::{plan_trade, EntryDraft, HoldingChange, TradeRequest, TradeResult};
use crate::domain::holding::Holding;
use crate::domain::ledger::{LedgerEntry, TradeSide};
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_store::{AccountSnapshot, LedgerStore};

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
const DEFAULT_BUSY_RETRIES: u32 = 5;

#[derive(Clone)]
pub struct SqliteLedger {
    pool: Pool<SqliteConnectionManager>,
    busy_retries: u32,
}

/// Outcome of one trade attempt: a locked database is retryable, anything
/// else aborts.
enum AttemptError {
    Busy,
    Fatal(PapertraderError),
}

impl From<rusqlite::Error> for AttemptError {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            AttemptError::Busy
        } else {
            AttemptError::Fatal(PapertraderError::DatabaseQuery {
                reason: err.to_string(),
            })
        }
    }
}

impl From<PapertraderError> for AttemptError {
    fn from(err: PapertraderError) -> Self {
        AttemptError::Fatal(err)
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

impl SqliteLedger {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PapertraderError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| PapertraderError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4) as u32;
        let busy_timeout =
            config.get_int("sqlite", "busy_timeout_ms", DEFAULT_BUSY_TIMEOUT_MS as i64) as u64;
        let busy_retries =
            config.get_int("sqlite", "busy_retries", DEFAULT_BUSY_RETRIES as i64) as u32;

        let mut ledger = Self::open(&db_path, pool_size, busy_timeout)?;
        ledger.busy_retries = busy_retries;
        Ok(ledger)
    }

    pub fn open<P: AsRef<Path>>(
        path: P,
        pool_size: u32,
        busy_timeout_ms: u64,
    ) -> Result<Self, PapertraderError> {
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
        });
        let pool =
            Pool::builder()
                .max_size(pool_size)
                .build(manager)
                .map_err(|e: r2d2::Error| PapertraderError::Database {
                    reason: e.to_string(),
                })?;

        Ok(Self {
            pool,
            busy_retries: DEFAULT_BUSY_RETRIES,
        })
    }

    pub fn in_memory() -> Result<Self, PapertraderError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| PapertraderError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self {
            pool,
            busy_retries: DEFAULT_BUSY_RETRIES,
        })
    }

    pub fn initialize_schema(&self) -> Result<(), PapertraderError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                balance REAL NOT NULL CHECK (balance >= 0)
            );
            CREATE TABLE IF NOT EXISTS holdings (
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                symbol TEXT NOT NULL,
                quantity REAL NOT NULL CHECK (quantity > 0),
                avg_cost REAL NOT NULL CHECK (avg_cost > 0),
                PRIMARY KEY (account_id, symbol)
            );
            CREATE TABLE IF NOT EXISTS ledger (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                symbol TEXT NOT NULL,
                quantity REAL NOT NULL,
                price REAL NOT NULL,
                side TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
                amount REAL NOT NULL,
                balance_after REAL NOT NULL,
                created_at TEXT NOT NULL,
                description TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ledger_account_time
                ON ledger(account_id, created_at);",
        )
        .map_err(query_error)?;

        Ok(())
    }

    /// Open a new account. Registration itself (identity, auth) lives
    /// outside this crate; the store only needs the funded row.
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

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (name, balance) VALUES (?1, ?2)",
            params![name, balance],
        )
        .map_err(query_error)?;

        Ok(Account {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            balance,
        })
    }

    fn conn(
        &self,
    ) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, PapertraderError> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| PapertraderError::Database {
                reason: e.to_string(),
            })
    }

    fn try_execute(&self, request: &TradeRequest) -> Result<TradeResult, AttemptError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let account = read_account(&tx, request.account_id)?.ok_or(
            PapertraderError::AccountNotFound {
                account_id: request.account_id,
            },
        )?;
        let holding = read_holding(&tx, request.account_id, &request.symbol)?;

        let plan = plan_trade(account.balance, holding.as_ref(), request, Utc::now())?;

        tx.execute(
            "UPDATE accounts SET balance = ?1 WHERE id = ?2",
            params![plan.new_balance, request.account_id],
        )?;
        match &plan.holding {
            HoldingChange::Create(h) => {
                tx.execute(
                    "INSERT INTO holdings (account_id, symbol, quantity, avg_cost)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![h.account_id, h.symbol, h.quantity, h.avg_cost],
                )?;
            }
            HoldingChange::Update(h) => {
                tx.execute(
                    "UPDATE holdings SET quantity = ?1, avg_cost = ?2
                     WHERE account_id = ?3 AND symbol = ?4",
                    params![h.quantity, h.avg_cost, h.account_id, h.symbol],
                )?;
            }
            HoldingChange::Delete => {
                tx.execute(
                    "DELETE FROM holdings WHERE account_id = ?1 AND symbol = ?2",
                    params![request.account_id, request.symbol],
                )?;
            }
        }
        insert_entry(&tx, &plan.entry)?;

        tx.commit()?;

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

impl LedgerStore for SqliteLedger {
    fn get_account(&self, account_id: i64) -> Result<Account, PapertraderError> {
        let conn = self.conn()?;
        read_account(&conn, account_id)
            .map_err(query_error)?
            .ok_or(PapertraderError::AccountNotFound { account_id })
    }

    fn get_holding(
        &self,
        account_id: i64,
        symbol: &str,
    ) -> Result<Option<Holding>, PapertraderError> {
        let conn = self.conn()?;
        read_holding(&conn, account_id, symbol).map_err(query_error)
    }

    fn list_holdings(&self, account_id: i64) -> Result<Vec<Holding>, PapertraderError> {
        let conn = self.conn()?;
        read_holdings(&conn, account_id).map_err(query_error)
    }

    fn ordered_history(&self, account_id: i64) -> Result<Vec<LedgerEntry>, PapertraderError> {
        let conn = self.conn()?;
        read_history(&conn, account_id).map_err(query_error)
    }

    fn snapshot(&self, account_id: i64) -> Result<AccountSnapshot, PapertraderError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;

        let account = read_account(&tx, account_id)
            .map_err(query_error)?
            .ok_or(PapertraderError::AccountNotFound { account_id })?;
        let holdings = read_holdings(&tx, account_id).map_err(query_error)?;
        let entries = read_history(&tx, account_id).map_err(query_error)?;

        Ok(AccountSnapshot {
            account,
            holdings,
            entries,
        })
    }

    fn execute_trade(&self, request: &TradeRequest) -> Result<TradeResult, PapertraderError> {
        let mut attempts = 0;
        loop {
            match self.try_execute(request) {
                Ok(result) => return Ok(result),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Busy) if attempts < self.busy_retries => {
                    attempts += 1;
                    debug!(
                        account_id = request.account_id,
                        attempts, "database busy, retrying trade"
                    );
                }
                Err(AttemptError::Busy) => {
                    return Err(PapertraderError::ConcurrencyConflict { retries: attempts });
                }
            }
        }
    }
}

fn query_error(err: rusqlite::Error) -> PapertraderError {
    PapertraderError::DatabaseQuery {
        reason: err.to_string(),
    }
}

fn read_account(conn: &Connection, account_id: i64) -> Result<Option<Account>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, name, balance FROM accounts WHERE id = ?1",
        params![account_id],
        |row| {
            Ok(Account {
                id: row.get(0)?,
                name: row.get(1)?,
                balance: row.get(2)?,
            })
        },
    )
    .optional()
}

fn read_holding(
    conn: &Connection,
    account_id: i64,
    symbol: &str,
) -> Result<Option<Holding>, rusqlite::Error> {
    conn.query_row(
        "SELECT account_id, symbol, quantity, avg_cost
         FROM holdings WHERE account_id = ?1 AND symbol = ?2",
        params![account_id, symbol],
        map_holding,
    )
    .optional()
}

fn read_holdings(conn: &Connection, account_id: i64) -> Result<Vec<Holding>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT account_id, symbol, quantity, avg_cost
         FROM holdings WHERE account_id = ?1 ORDER BY symbol ASC",
    )?;
    let rows = stmt.query_map(params![account_id], map_holding)?;
    rows.collect()
}

fn read_history(conn: &Connection, account_id: i64) -> Result<Vec<LedgerEntry>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, account_id, symbol, quantity, price, side, amount,
                balance_after, created_at, description
         FROM ledger WHERE account_id = ?1
         ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![account_id], |row| {
        let side_str: String = row.get(5)?;
        let side = side_str.parse::<TradeSide>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;
        let created_at: DateTime<Utc> = row.get(8)?;
        Ok(LedgerEntry {
            id: row.get(0)?,
            account_id: row.get(1)?,
            symbol: row.get(2)?,
            quantity: row.get(3)?,
            price: row.get(4)?,
            side,
            amount: row.get(6)?,
            balance_after: row.get(7)?,
            timestamp: created_at,
            description: row.get(9)?,
        })
    })?;
    rows.collect()
}

fn map_holding(row: &rusqlite::Row<'_>) -> Result<Holding, rusqlite::Error> {
    Ok(Holding {
        account_id: row.get(0)?,
        symbol: row.get(1)?,
        quantity: row.get(2)?,
        avg_cost: row.get(3)?,
    })
}

fn insert_entry(conn: &Connection, entry: &EntryDraft) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO ledger (account_id, symbol, quantity, price, side, amount,
                             balance_after, created_at, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.account_id,
            entry.symbol,
            entry.quantity,
            entry.price,
            entry.side.as_str(),
            entry.amount,
            entry.balance_after,
            entry.timestamp,
            entry.description
        ],
    )?;
    Ok(())
}
