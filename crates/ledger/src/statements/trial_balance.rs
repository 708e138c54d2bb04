//! Trial balance.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::Cancellation;

use crate::account::ChartOfAccounts;
use crate::balance::{AccountBalance, PostedLine, balances_as_of};
use crate::error::LedgerResult;

use super::is_reportable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub as_of: NaiveDate,
    /// Grouped by type (asset, liability, equity, revenue, expense), then by code.
    pub rows: Vec<AccountBalance>,
    pub total_debits: Decimal,
    pub total_credits: Decimal,
    pub is_balanced: bool,
}

pub fn trial_balance(
    chart: &ChartOfAccounts,
    lines: &[PostedLine],
    as_of: NaiveDate,
    cancel: &Cancellation,
) -> LedgerResult<TrialBalance> {
    let mut rows: Vec<AccountBalance> = balances_as_of(chart, lines, as_of, cancel)?
        .into_iter()
        .filter(|b| is_reportable(chart, b))
        .collect();
    // Stable sort keeps code order inside each type.
    rows.sort_by_key(|r| r.account_type);

    let total_debits: Decimal = rows.iter().map(|r| r.debit_total).sum();
    let total_credits: Decimal = rows.iter().map(|r| r.credit_total).sum();

    Ok(TrialBalance {
        as_of,
        rows,
        total_debits,
        total_credits,
        is_balanced: total_debits == total_credits,
    })
}
