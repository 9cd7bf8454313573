//! Market valuation port trait.

use crate::domain::error::PapertraderError;

/// Supplies the current market price for a symbol.
///
/// Implementations must bound each lookup (a remote quote source needs a
/// per-symbol timeout); the replay engine treats `Ok(None)` and `Err` alike
/// as "no usable price" and degrades that holding row instead of failing
/// the report.
pub trait ValuationPort {
    fn current_price(&self, symbol: &str) -> Result<Option<f64>, PapertraderError>;
}
