//! Core domain types and logic.

pub mod account;
pub mod holding;
pub mod ledger;
pub mod execution;
pub mod analysis;
pub mod error;

/// Quantities closer to zero than this are treated as a fully closed
/// position, absorbing floating-point drift from repeated partial sells.
pub const QTY_EPSILON: f64 = 1e-9;
