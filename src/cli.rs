//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::analysis::AnalysisReport;
use crate::domain::error::PapertraderError;
use crate::domain::execution::TradeRequest;
use crate::domain::ledger::TradeSide;
use crate::ports::ledger_store::LedgerStore;
use crate::ports::valuation_port::ValuationPort;

#[derive(Parser, Debug)]
#[command(name = "papertrader", about = "Paper-trading ledger and cost-basis accounting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize the ledger schema
    Init {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Open a new account
    OpenAccount {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        name: String,
        /// Opening balance; defaults to 10000.00
        #[arg(long)]
        balance: Option<f64>,
    },
    /// Execute a buy or sell order
    Trade {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        account: i64,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        quantity: f64,
        #[arg(long)]
        price: f64,
        /// BUY or SELL
        #[arg(long)]
        side: String,
    },
    /// Show current holdings and balance
    Portfolio {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        account: i64,
        #[arg(long)]
        json: bool,
    },
    /// Show the transaction history, newest first
    History {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        account: i64,
        #[arg(long)]
        json: bool,
    },
    /// Replay the ledger into a full analysis report
    Analyze {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        account: i64,
        #[arg(long)]
        json: bool,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Init { config } => run_init(&config),
        Command::OpenAccount {
            config,
            name,
            balance,
        } => run_open_account(&config, &name, balance),
        Command::Trade {
            config,
            account,
            symbol,
            quantity,
            price,
            side,
        } => run_trade(&config, account, &symbol, quantity, price, &side),
        Command::Portfolio {
            config,
            account,
            json,
        } => run_portfolio(&config, account, json),
        Command::History {
            config,
            account,
            json,
        } => run_history(&config, account, json),
        Command::Analyze {
            config,
            account,
            json,
        } => run_analyze(&config, account, json),
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = PapertraderError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// Pick the configured storage backend: postgres when a connection string
/// is present and compiled in, sqlite otherwise.
fn open_store(config: &FileConfigAdapter) -> Result<Box<dyn LedgerStore>, PapertraderError> {
    #[cfg(feature = "postgres")]
    {
        use crate::adapters::postgres_adapter::PostgresLedger;
        use crate::ports::config_port::ConfigPort;
        if config.get_string("postgres", "connection_string").is_some() {
            return Ok(Box::new(PostgresLedger::from_config(config)?));
        }
    }
    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::sqlite_adapter::SqliteLedger;
        return Ok(Box::new(SqliteLedger::from_config(config)?));
    }
    #[cfg(not(feature = "sqlite"))]
    Err(PapertraderError::ConfigInvalid {
        section: "sqlite".into(),
        key: "path".into(),
        reason: "no storage backend compiled in".into(),
    })
}

/// Valuation source for analysis. With no [quotes] section configured every
/// lookup is unavailable and the report degrades to average-cost rows. An
/// unreadable quote snapshot is treated the same way: valuation outages mark
/// rows as degraded, they never fail an analysis.
pub(crate) fn open_valuation(config: &FileConfigAdapter) -> Box<dyn ValuationPort> {
    use crate::adapters::csv_quote_adapter::CsvQuoteAdapter;
    use crate::ports::config_port::ConfigPort;

    struct NoQuotes;
    impl ValuationPort for NoQuotes {
        fn current_price(&self, _symbol: &str) -> Result<Option<f64>, PapertraderError> {
            Ok(None)
        }
    }

    if config.get_string("quotes", "path").is_some() {
        match CsvQuoteAdapter::from_config(config) {
            Ok(adapter) => return Box::new(adapter),
            Err(err) => {
                warn!(error = %err, "quote snapshot unusable, reporting at average cost");
            }
        }
    }
    Box::new(NoQuotes)
}

/// Render a value as pretty JSON on stdout, routing serialization failures
/// through the usual error path instead of printing nothing.
fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(payload) => {
            println!("{payload}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let err = PapertraderError::Serialize {
                reason: e.to_string(),
            };
            eprintln!("error: {err}");
            (&err).into()
        }
    }
}

fn run_init(config_path: &PathBuf) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<(), PapertraderError> {
        #[cfg(feature = "postgres")]
        {
            use crate::adapters::postgres_adapter::PostgresLedger;
            use crate::ports::config_port::ConfigPort;
            if config.get_string("postgres", "connection_string").is_some() {
                PostgresLedger::from_config(&config)?.initialize_schema()?;
                return Ok(());
            }
        }
        #[cfg(feature = "sqlite")]
        {
            use crate::adapters::sqlite_adapter::SqliteLedger;
            SqliteLedger::from_config(&config)?.initialize_schema()?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            println!("Ledger schema initialized");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn run_open_account(config_path: &PathBuf, name: &str, balance: Option<f64>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<crate::domain::account::Account, PapertraderError> {
        #[cfg(feature = "postgres")]
        {
            use crate::adapters::postgres_adapter::PostgresLedger;
            use crate::ports::config_port::ConfigPort;
            if config.get_string("postgres", "connection_string").is_some() {
                return PostgresLedger::from_config(&config)?.open_account(name, balance);
            }
        }
        #[cfg(feature = "sqlite")]
        {
            use crate::adapters::sqlite_adapter::SqliteLedger;
            return SqliteLedger::from_config(&config)?.open_account(name, balance);
        }
        #[cfg(not(feature = "sqlite"))]
        Err(PapertraderError::ConfigInvalid {
            section: "sqlite".into(),
            key: "path".into(),
            reason: "no storage backend compiled in".into(),
        })
    })();

    match result {
        Ok(account) => {
            println!(
                "Opened account {} ({}) with balance ${:.2}",
                account.id, account.name, account.balance
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn run_trade(
    config_path: &PathBuf,
    account: i64,
    symbol: &str,
    quantity: f64,
    price: f64,
    side: &str,
) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| {
        let side = side
            .parse::<TradeSide>()
            .map_err(|reason| PapertraderError::Validation { reason })?;
        let request = TradeRequest::new(account, symbol, quantity, price, side)?;
        let store = open_store(&config)?;
        store.execute_trade(&request)
    })();

    match result {
        Ok(result) => {
            println!(
                "Executed: amount ${:.2}, new balance ${:.2}",
                result.amount, result.new_balance
            );
            match result.new_holding {
                Some(h) => println!(
                    "Holding: {} {} @ avg ${:.2}",
                    h.quantity, h.symbol, h.avg_cost
                ),
                None => println!("Position closed"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn run_portfolio(config_path: &PathBuf, account: i64, json: bool) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let snapshot = match open_store(&config).and_then(|store| store.snapshot(account)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    if json {
        let payload = serde_json::json!({
            "account": snapshot.account,
            "holdings": snapshot.holdings,
        });
        return print_json(&payload);
    }

    println!(
        "Account {} ({}) — cash balance ${:.2}",
        snapshot.account.id, snapshot.account.name, snapshot.account.balance
    );
    if snapshot.holdings.is_empty() {
        println!("No holdings");
        return ExitCode::SUCCESS;
    }
    println!("{:<8} {:>12} {:>12} {:>14}", "SYMBOL", "QTY", "AVG COST", "COST VALUE");
    let mut total = 0.0;
    for holding in &snapshot.holdings {
        total += holding.cost_basis();
        println!(
            "{:<8} {:>12.4} {:>12.2} {:>14.2}",
            holding.symbol,
            holding.quantity,
            holding.avg_cost,
            holding.cost_basis()
        );
    }
    println!("Total cost value: ${total:.2}");
    ExitCode::SUCCESS
}

fn run_history(config_path: &PathBuf, account: i64, json: bool) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let history = match open_store(&config).and_then(|store| store.ordered_history(account)) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    if json {
        let newest_first: Vec<_> = history.iter().rev().collect();
        return print_json(&newest_first);
    }

    for entry in history.iter().rev() {
        println!(
            "{}  {:<40} amount {:>10.2}  balance {:>10.2}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.description,
            entry.amount,
            entry.balance_after
        );
    }
    ExitCode::SUCCESS
}

fn run_analyze(config_path: &PathBuf, account: i64, json: bool) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let report = match (|| -> Result<AnalysisReport, PapertraderError> {
        let store = open_store(&config)?;
        let valuation = open_valuation(&config);
        store.analyze(valuation.as_ref(), account)
    })() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    if json {
        return print_json(&report);
    }

    print_report(&report);
    ExitCode::SUCCESS
}

fn print_report(report: &AnalysisReport) {
    println!("Total portfolio value: ${:.2}", report.total_portfolio_value);

    if !report.holdings.is_empty() {
        println!("\nHoldings:");
        println!(
            "{:<8} {:>10} {:>10} {:>10} {:>12} {:>12}",
            "SYMBOL", "QTY", "AVG COST", "PRICE", "VALUE", "UNREALIZED"
        );
        for row in &report.holdings {
            println!(
                "{:<8} {:>10.4} {:>10.2} {:>10.2} {:>12.2} {:>12.2}{}",
                row.symbol,
                row.quantity,
                row.avg_cost,
                row.current_price,
                row.current_value,
                row.unrealized_pnl,
                if row.degraded { "  (no quote)" } else { "" }
            );
        }
    }

    let activity = &report.activity;
    println!(
        "\nActivity: {} trades ({} buys, {} sells), most traded: {}",
        activity.total_trades,
        activity.buys,
        activity.sells,
        activity.most_traded.as_deref().unwrap_or("N/A")
    );

    if !report.realized_gains.is_empty() {
        println!("\nRealized gains:");
        for gain in &report.realized_gains {
            println!(
                "{}  {:<8} sold {:>10.4} @ {:>8.2} (avg cost {:>8.2})  {:>10.2}",
                gain.timestamp.format("%Y-%m-%d"),
                gain.symbol,
                gain.quantity_sold,
                gain.sell_price,
                gain.avg_cost_at_sale,
                gain.realized
            );
        }
    }

    if !report.warnings.is_empty() {
        println!("\nIntegrity warnings:");
        for warning in &report.warnings {
            println!("  {warning}");
        }
    }
}
