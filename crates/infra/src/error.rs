//! Infrastructure error types.
//!
//! `StoreError` covers storage failures (database, concurrency, isolation). Ledger
//! rule violations stay in `LedgerError`; `ServiceError` is what the services return.

use thiserror::Error;

use tally_core::AccountId;
use tally_ledger::LedgerError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    /// Stale version or a concurrent writer won the row.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Unique constraint (duplicate code, duplicate entry number).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A posting references an account deactivated since the caller checked it.
    #[error("account {0} is inactive")]
    AccountInactive(AccountId),

    /// Posted lines in an open period still reference the account being deactivated.
    #[error("account {account} has {lines} posted line(s) in an open period")]
    AccountInUse { account: AccountId, lines: u64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(StoreError),
}

/// Rule violations the store detects inside its own transaction surface as
/// ledger errors, the same as when the service catches them first.
impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::AccountInactive(id) => {
                ServiceError::Ledger(LedgerError::AccountInactive(id.to_string()))
            }
            in_use @ StoreError::AccountInUse { .. } => {
                ServiceError::Ledger(LedgerError::AccountInUse(in_use.to_string()))
            }
            other => ServiceError::Store(other),
        }
    }
}

impl ServiceError {
    /// The ledger error, if this is one. Handy in tests and HTTP mappers.
    pub fn as_ledger(&self) -> Option<&LedgerError> {
        match self {
            ServiceError::Ledger(e) => Some(e),
            ServiceError::Store(_) => None,
        }
    }
}

impl From<tally_core::DomainError> for ServiceError {
    fn from(value: tally_core::DomainError) -> Self {
        ServiceError::Ledger(value.into())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Map SQLx errors to `StoreError` by SQLSTATE.
pub fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => StoreError::Conflict(msg),
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Database(format!("connection pool timed out in {}", operation))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_rule_violations_become_ledger_errors() {
        let id = AccountId::new();
        let inactive: ServiceError = StoreError::AccountInactive(id).into();
        assert!(matches!(inactive.as_ledger(), Some(LedgerError::AccountInactive(_))));

        let in_use: ServiceError = StoreError::AccountInUse { account: id, lines: 2 }.into();
        assert!(matches!(in_use.as_ledger(), Some(LedgerError::AccountInUse(m)) if m.contains("2 posted")));

        let db: ServiceError = StoreError::Database("down".into()).into();
        assert!(db.as_ledger().is_none());
    }
}
