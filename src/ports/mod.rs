//! Port traits: the boundaries the domain is driven through.

pub mod config_port;
pub mod ledger_store;
pub mod valuation_port;
