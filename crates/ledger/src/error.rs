//! Ledger error taxonomy.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use tally_core::DomainError;

use crate::journal::EntryStatus;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors surfaced by ledger operations.
///
/// None of these are transient: a caller that receives one must fix its input
/// (or its draft) before trying again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed draft or account input; rejected before any write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Base-currency debits and credits differ at post time. The entry stays DRAFT.
    #[error("entry is unbalanced: base debits {debits} != base credits {credits}")]
    Unbalanced { debits: Decimal, credits: Decimal },

    #[error("cannot {action} an entry in status {from}")]
    InvalidTransition {
        from: EntryStatus,
        action: &'static str,
    },

    #[error("entry is already posted")]
    AlreadyPosted,

    #[error("entry is not posted")]
    NotPosted,

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("account is inactive: {0}")]
    AccountInactive(String),

    #[error("account is in use: {0}")]
    AccountInUse(String),

    #[error("journal entry not found")]
    EntryNotFound,

    #[error("period is closed: {date} is on or before {closed_through}")]
    PeriodClosed {
        date: NaiveDate,
        closed_through: NaiveDate,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Domain(DomainError),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Cancelled => Self::Cancelled,
            DomainError::Validation(msg) => Self::Validation(msg),
            other => Self::Domain(other),
        }
    }
}
