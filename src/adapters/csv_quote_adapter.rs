//! CSV quote snapshot adapter.
//!
//! Reads a `symbol,price` snapshot file once at construction and serves
//! lookups from memory, so a valuation call during analysis can never
//! block. A missing symbol is `Ok(None)`: the replay engine degrades that
//! holding row to its average cost.

use std::collections::HashMap;
use std::path::Path;

use crate::domain::error::PapertraderError;
use crate::ports::config_port::ConfigPort;
use crate::ports::valuation_port::ValuationPort;

pub struct CsvQuoteAdapter {
    prices: HashMap<String, f64>,
}

impl CsvQuoteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PapertraderError> {
        let path =
            config
                .get_string("quotes", "path")
                .ok_or_else(|| PapertraderError::ConfigMissing {
                    section: "quotes".into(),
                    key: "path".into(),
                })?;
        Self::from_file(&path)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PapertraderError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| PapertraderError::ValuationUnavailable {
                symbol: "*".into(),
                reason: format!("failed to read {}: {}", path.display(), e),
            })?;
        Self::from_reader(content.as_bytes())
    }

    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, PapertraderError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut prices = HashMap::new();
        for result in rdr.records() {
            let record = result.map_err(|e| PapertraderError::ValuationUnavailable {
                symbol: "*".into(),
                reason: format!("CSV parse error: {}", e),
            })?;

            let symbol = record
                .get(0)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| PapertraderError::ValuationUnavailable {
                    symbol: "*".into(),
                    reason: "missing symbol column".into(),
                })?;
            let price: f64 = record
                .get(1)
                .ok_or_else(|| PapertraderError::ValuationUnavailable {
                    symbol: symbol.to_string(),
                    reason: "missing price column".into(),
                })?
                .parse()
                .map_err(|e| PapertraderError::ValuationUnavailable {
                    symbol: symbol.to_string(),
                    reason: format!("invalid price value: {}", e),
                })?;

            prices.insert(symbol.to_string(), price);
        }

        Ok(Self { prices })
    }
}

impl ValuationPort for CsvQuoteAdapter {
    fn current_price(&self, symbol: &str) -> Result<Option<f64>, PapertraderError> {
        Ok(self.prices.get(symbol).copied())
    }
}
