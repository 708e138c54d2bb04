//! Balance aggregator: per-account debit/credit/net balances derived from posted lines.
//!
//! Nothing here is stored. Every figure is recomputed from POSTED lines at the
//! query boundary; voided and draft entries never reach these functions because
//! stores only hand out posted lines.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{AccountId, Cancellation, JournalEntryId};

use crate::account::{Account, AccountType, ChartOfAccounts};
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{EntryStatus, JournalEntry};

/// Poll the cancellation token once per this many lines.
pub const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Flattened view of one line of a POSTED entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedLine {
    pub entry_id: JournalEntryId,
    pub entry_number: u64,
    pub entry_date: NaiveDate,
    pub line_no: u32,
    pub account_id: AccountId,
    /// Line description, falling back to the entry description.
    pub description: String,
    pub base_debit: Decimal,
    pub base_credit: Decimal,
}

impl PostedLine {
    /// Lines of `entry` as seen by aggregation. Draft and voided entries yield nothing.
    pub fn of_entry(entry: &JournalEntry) -> Vec<PostedLine> {
        if entry.status != EntryStatus::Posted {
            return Vec::new();
        }
        entry
            .lines
            .iter()
            .map(|line| PostedLine {
                entry_id: entry.id,
                entry_number: entry.entry_number,
                entry_date: entry.entry_date,
                line_no: line.line_no,
                account_id: line.account_id,
                description: line
                    .description
                    .clone()
                    .unwrap_or_else(|| entry.description.clone()),
                base_debit: line.base_debit,
                base_credit: line.base_credit,
            })
            .collect()
    }
}

/// Query boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateWindow {
    /// Everything since inception up to and including the date.
    AsOf(NaiveDate),
    /// Inclusive range.
    Range { start: NaiveDate, end: NaiveDate },
}

impl DateWindow {
    pub fn range(start: NaiveDate, end: NaiveDate) -> LedgerResult<Self> {
        if start > end {
            return Err(LedgerError::validation(format!(
                "range start {start} is after end {end}"
            )));
        }
        Ok(Self::Range { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            DateWindow::AsOf(as_of) => date <= as_of,
            DateWindow::Range { start, end } => start <= date && date <= end,
        }
    }

    pub fn end(&self) -> NaiveDate {
        match *self {
            DateWindow::AsOf(as_of) => as_of,
            DateWindow::Range { end, .. } => end,
        }
    }

    pub fn start(&self) -> Option<NaiveDate> {
        match *self {
            DateWindow::AsOf(_) => None,
            DateWindow::Range { start, .. } => Some(start),
        }
    }
}

/// Raw (not netted) debit and credit sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalanceTotals {
    pub debit_total: Decimal,
    pub credit_total: Decimal,
}

impl BalanceTotals {
    pub fn add(&mut self, line: &PostedLine) {
        self.debit_total += line.base_debit;
        self.credit_total += line.base_credit;
    }

    pub fn is_zero(&self) -> bool {
        self.debit_total.is_zero() && self.credit_total.is_zero()
    }
}

/// Balance of a single account at a query boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub debit_total: Decimal,
    pub credit_total: Decimal,
    /// Positive means the account sits on its normal side.
    pub net_balance: Decimal,
}

impl AccountBalance {
    pub fn from_totals(account: &Account, totals: BalanceTotals) -> Self {
        Self {
            account_id: account.id,
            code: account.code.clone(),
            name: account.name.clone(),
            account_type: account.account_type,
            debit_total: totals.debit_total,
            credit_total: totals.credit_total,
            net_balance: account
                .normal_side()
                .net(totals.debit_total, totals.credit_total),
        }
    }

    pub fn has_activity(&self) -> bool {
        !(self.debit_total.is_zero() && self.credit_total.is_zero())
    }
}

/// Sum posted lines inside `window`, keyed by account.
pub fn aggregate(
    lines: &[PostedLine],
    window: DateWindow,
    cancel: &Cancellation,
) -> LedgerResult<BTreeMap<AccountId, BalanceTotals>> {
    let mut totals: BTreeMap<AccountId, BalanceTotals> = BTreeMap::new();
    for (idx, line) in lines.iter().enumerate() {
        if idx % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }
        if window.contains(line.entry_date) {
            totals.entry(line.account_id).or_default().add(line);
        }
    }
    Ok(totals)
}

/// `AccountBalance(account_id, asOfDate)`.
pub fn account_balance(
    account: &Account,
    lines: &[PostedLine],
    as_of: NaiveDate,
    cancel: &Cancellation,
) -> LedgerResult<AccountBalance> {
    single(account, lines, DateWindow::AsOf(as_of), cancel)
}

/// `RangeBalance(account_id, start, end)`.
pub fn range_balance(
    account: &Account,
    lines: &[PostedLine],
    start: NaiveDate,
    end: NaiveDate,
    cancel: &Cancellation,
) -> LedgerResult<AccountBalance> {
    single(account, lines, DateWindow::range(start, end)?, cancel)
}

fn single(
    account: &Account,
    lines: &[PostedLine],
    window: DateWindow,
    cancel: &Cancellation,
) -> LedgerResult<AccountBalance> {
    let mut totals = BalanceTotals::default();
    for (idx, line) in lines.iter().enumerate() {
        if idx % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }
        if line.account_id == account.id && window.contains(line.entry_date) {
            totals.add(line);
        }
    }
    Ok(AccountBalance::from_totals(account, totals))
}

/// Balance of every account in the chart, ordered by account code.
pub fn balances(
    chart: &ChartOfAccounts,
    lines: &[PostedLine],
    window: DateWindow,
    cancel: &Cancellation,
) -> LedgerResult<Vec<AccountBalance>> {
    let mut totals = aggregate(lines, window, cancel)?;
    if let Some(unknown) = totals.keys().find(|id| chart.get(**id).is_none()) {
        return Err(LedgerError::AccountNotFound(unknown.to_string()));
    }
    Ok(chart
        .iter()
        .map(|account| {
            AccountBalance::from_totals(account, totals.remove(&account.id).unwrap_or_default())
        })
        .collect())
}

pub fn balances_as_of(
    chart: &ChartOfAccounts,
    lines: &[PostedLine],
    as_of: NaiveDate,
    cancel: &Cancellation,
) -> LedgerResult<Vec<AccountBalance>> {
    balances(chart, lines, DateWindow::AsOf(as_of), cancel)
}

pub fn balances_in_range(
    chart: &ChartOfAccounts,
    lines: &[PostedLine],
    start: NaiveDate,
    end: NaiveDate,
    cancel: &Cancellation,
) -> LedgerResult<Vec<AccountBalance>> {
    balances(chart, lines, DateWindow::range(start, end)?, cancel)
}

/// Sum of net balances of the given type.
pub fn total_net(balances: &[AccountBalance], account_type: AccountType) -> Decimal {
    balances
        .iter()
        .filter(|b| b.account_type == account_type)
        .map(|b| b.net_balance)
        .sum()
}
