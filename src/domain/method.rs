//! Accounting method selection for lot consumption.

use serde::{Deserialize, Serialize};

/// Which open lots a sell consumes, and in what order.
///
/// Selected per account (configuration default) or per sell at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountingMethod {
    /// First lot acquired, first consumed.
    Fifo,
    /// Last lot acquired, first consumed.
    Lifo,
    /// Caller designates exact (lot, quantity) pairs on the sell.
    #[serde(rename = "specific")]
    SpecificId,
}

impl AccountingMethod {
    /// Parse from the lowercase configuration representation.
    pub fn parse(s: &str) -> Option<AccountingMethod> {
        match s {
            "fifo" => Some(AccountingMethod::Fifo),
            "lifo" => Some(AccountingMethod::Lifo),
            "specific" => Some(AccountingMethod::SpecificId),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountingMethod::Fifo => write!(f, "fifo"),
            AccountingMethod::Lifo => write!(f, "lifo"),
            AccountingMethod::SpecificId => write!(f, "specific"),
        }
    }
}
