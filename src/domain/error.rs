//! Domain error types.

/// Top-level error type for papertrader.
#[derive(Debug, thiserror::Error)]
pub enum PapertraderError {
    #[error("invalid trade request: {reason}")]
    Validation { reason: String },

    #[error("account {account_id} does not exist")]
    AccountNotFound { account_id: i64 },

    #[error("insufficient funds: required ${required:.2}, available ${available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("no position in {symbol} to sell")]
    NoPosition { symbol: String },

    #[error("insufficient shares of {symbol}: requested {requested}, held {held}")]
    InsufficientShares {
        symbol: String,
        requested: f64,
        held: f64,
    },

    #[error("trade aborted after {retries} conflict retries")]
    ConcurrencyConflict { retries: u32 },

    #[error("no current price for {symbol}: {reason}")]
    ValuationUnavailable { symbol: String, reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("serialization error: {reason}")]
    Serialize { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&PapertraderError> for std::process::ExitCode {
    fn from(err: &PapertraderError) -> Self {
        let code: u8 = match err {
            PapertraderError::Io(_) | PapertraderError::Serialize { .. } => 1,
            PapertraderError::ConfigParse { .. }
            | PapertraderError::ConfigMissing { .. }
            | PapertraderError::ConfigInvalid { .. } => 2,
            PapertraderError::Database { .. } | PapertraderError::DatabaseQuery { .. } => 3,
            PapertraderError::Validation { .. } | PapertraderError::AccountNotFound { .. } => 4,
            PapertraderError::InsufficientFunds { .. }
            | PapertraderError::NoPosition { .. }
            | PapertraderError::InsufficientShares { .. } => 5,
            PapertraderError::ConcurrencyConflict { .. } => 6,
            PapertraderError::ValuationUnavailable { .. } => 7,
        };
        std::process::ExitCode::from(code)
    }
}
