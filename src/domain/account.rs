//! Account record and balance invariants.

use serde::Serialize;

/// Opening balance credited to a newly opened account.
pub const DEFAULT_OPENING_BALANCE: f64 = 10000.0;

/// A trading account. Identity is opaque to the engine; registration,
/// authentication, and deactivation live outside this crate. The balance is
/// mutated only by committed trades and never goes negative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub balance: f64,
}

impl Account {
    pub fn can_afford(&self, amount: f64) -> bool {
        amount <= self.balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_afford_within_balance() {
        let account = Account {
            id: 1,
            name: "alice".into(),
            balance: 10000.0,
        };
        assert!(account.can_afford(10000.0));
        assert!(account.can_afford(9999.99));
        assert!(!account.can_afford(10000.01));
    }
}
