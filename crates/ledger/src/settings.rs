//! Per-tenant ledger settings.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use tally_core::TenantId;

use crate::currency::CurrencyCode;
use crate::error::{LedgerError, LedgerResult};

/// Base currency plus the period lock.
///
/// A date is in an *open period* when it falls after `books_closed_through`
/// (or always, when the books have never been closed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub tenant_id: TenantId,
    pub base_currency: CurrencyCode,
    #[serde(default)]
    pub books_closed_through: Option<NaiveDate>,
}

impl TenantSettings {
    pub fn new(tenant_id: TenantId, base_currency: CurrencyCode) -> Self {
        Self {
            tenant_id,
            base_currency,
            books_closed_through: None,
        }
    }

    pub fn is_open(&self, date: NaiveDate) -> bool {
        match self.books_closed_through {
            Some(closed) => date > closed,
            None => true,
        }
    }

    pub fn ensure_open(&self, date: NaiveDate) -> LedgerResult<()> {
        match self.books_closed_through {
            Some(closed_through) if date <= closed_through => Err(LedgerError::PeriodClosed {
                date,
                closed_through,
            }),
            _ => Ok(()),
        }
    }

    /// Moving the lock backwards would reopen history that reports already relied on.
    pub fn close_books_through(&mut self, date: NaiveDate) -> LedgerResult<()> {
        if let Some(current) = self.books_closed_through {
            if date < current {
                return Err(LedgerError::validation(format!(
                    "books are already closed through {current}"
                )));
            }
        }
        self.books_closed_through = Some(date);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn closed_period_is_inclusive_of_close_date() {
        let mut s = TenantSettings::new(TenantId::new(), CurrencyCode::parse("EUR").unwrap());
        assert!(s.is_open(d(2020, 1, 1)));

        s.close_books_through(d(2023, 12, 31)).unwrap();
        assert!(!s.is_open(d(2023, 12, 31)));
        assert!(s.is_open(d(2024, 1, 1)));
        assert!(matches!(s.ensure_open(d(2023, 6, 1)), Err(LedgerError::PeriodClosed { .. })));
    }

    #[test]
    fn close_date_cannot_move_backwards() {
        let mut s = TenantSettings::new(TenantId::new(), CurrencyCode::parse("EUR").unwrap());
        s.close_books_through(d(2023, 12, 31)).unwrap();
        assert!(s.close_books_through(d(2023, 6, 30)).is_err());
        s.close_books_through(d(2024, 6, 30)).unwrap();
    }
}
