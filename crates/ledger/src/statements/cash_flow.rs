//! Cash-flow statement (direct classification of cash-touching entries).
//!
//! For every posted entry in range that moves a cash account, each non-cash
//! counterpart line contributes `credit - debit` to the category its account code
//! maps to. Because entries balance, the category totals add up to the change in
//! cash, which is then cross-checked against the aggregator.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{AccountId, Cancellation, JournalEntryId};

use crate::account::ChartOfAccounts;
use crate::balance::{CANCEL_CHECK_INTERVAL, DateWindow, PostedLine};
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashFlowCategory {
    Operating,
    Investing,
    Financing,
}

/// Inclusive, lexically compared range of account codes.
///
/// A code also matches when `end` is one of its prefixes, so `1000..=1099` covers
/// sub-account codes such as `1099-01`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRange {
    pub start: String,
    pub end: String,
}

impl CodeRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.start.as_str() <= code && (code <= self.end.as_str() || code.starts_with(&self.end))
    }
}

/// Classification table: which codes are cash, and which category every other code feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlowMap {
    pub cash: Vec<CodeRange>,
    /// First matching rule wins.
    pub rules: Vec<(CodeRange, CashFlowCategory)>,
    pub default_category: CashFlowCategory,
}

impl CashFlowMap {
    /// Default template for a conventional numeric chart.
    pub fn standard() -> Self {
        Self {
            cash: vec![CodeRange::new("1000", "1099")],
            rules: vec![
                (CodeRange::new("1100", "1499"), CashFlowCategory::Operating),
                (CodeRange::new("1500", "1999"), CashFlowCategory::Investing),
                (CodeRange::new("2000", "2499"), CashFlowCategory::Operating),
                (CodeRange::new("2500", "2999"), CashFlowCategory::Financing),
                (CodeRange::new("3000", "3999"), CashFlowCategory::Financing),
            ],
            default_category: CashFlowCategory::Operating,
        }
    }

    pub fn is_cash(&self, code: &str) -> bool {
        self.cash.iter().any(|r| r.contains(code))
    }

    pub fn classify(&self, code: &str) -> CashFlowCategory {
        self.rules
            .iter()
            .find(|(range, _)| range.contains(code))
            .map(|(_, category)| *category)
            .unwrap_or(self.default_category)
    }
}

impl Default for CashFlowMap {
    fn default() -> Self {
        Self::standard()
    }
}

/// Cash effect attributed to one counterpart account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlowItem {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    /// Positive is an inflow.
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlowSection {
    pub category: CashFlowCategory,
    /// Ordered by account code.
    pub items: Vec<CashFlowItem>,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlowStatement {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub operating: CashFlowSection,
    pub investing: CashFlowSection,
    pub financing: CashFlowSection,
    pub net_cash_change: Decimal,
    pub opening_cash: Decimal,
    pub closing_cash: Decimal,
    /// Cash balance at `end` straight from the aggregator.
    pub aggregated_closing_cash: Decimal,
    pub reconciles: bool,
}

pub fn cash_flow_statement(
    chart: &ChartOfAccounts,
    map: &CashFlowMap,
    lines: &[PostedLine],
    start: NaiveDate,
    end: NaiveDate,
    cancel: &Cancellation,
) -> LedgerResult<CashFlowStatement> {
    let window = DateWindow::range(start, end)?;

    let mut opening_cash = Decimal::ZERO;
    let mut aggregated_closing_cash = Decimal::ZERO;
    let mut by_entry: BTreeMap<(u64, JournalEntryId), Vec<&PostedLine>> = BTreeMap::new();

    for (idx, line) in lines.iter().enumerate() {
        if idx % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }
        let account = chart
            .get(line.account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(line.account_id.to_string()))?;
        if map.is_cash(&account.code) {
            let movement = line.base_debit - line.base_credit;
            if line.entry_date < start {
                opening_cash += movement;
            }
            if line.entry_date <= end {
                aggregated_closing_cash += movement;
            }
        }
        if window.contains(line.entry_date) {
            by_entry
                .entry((line.entry_number, line.entry_id))
                .or_default()
                .push(line);
        }
    }

    let mut items: BTreeMap<(CashFlowCategory, String), CashFlowItem> = BTreeMap::new();
    for entry_lines in by_entry.values() {
        let touches_cash = entry_lines.iter().any(|l| {
            chart
                .get(l.account_id)
                .map(|a| map.is_cash(&a.code))
                .unwrap_or(false)
        });
        if !touches_cash {
            continue;
        }
        for line in entry_lines {
            let Some(account) = chart.get(line.account_id) else {
                continue;
            };
            if map.is_cash(&account.code) {
                continue;
            }
            let category = map.classify(&account.code);
            let item = items
                .entry((category, account.code.clone()))
                .or_insert_with(|| CashFlowItem {
                    account_id: account.id,
                    code: account.code.clone(),
                    name: account.name.clone(),
                    amount: Decimal::ZERO,
                });
            item.amount += line.base_credit - line.base_debit;
        }
    }

    let section = |category: CashFlowCategory| {
        let items: Vec<CashFlowItem> = items
            .iter()
            .filter(|((c, _), _)| *c == category)
            .map(|(_, item)| item.clone())
            .collect();
        let subtotal = items.iter().map(|i| i.amount).sum();
        CashFlowSection {
            category,
            items,
            subtotal,
        }
    };
    let operating = section(CashFlowCategory::Operating);
    let investing = section(CashFlowCategory::Investing);
    let financing = section(CashFlowCategory::Financing);

    let net_cash_change = operating.subtotal + investing.subtotal + financing.subtotal;
    let closing_cash = opening_cash + net_cash_change;

    Ok(CashFlowStatement {
        start,
        end,
        operating,
        investing,
        financing,
        net_cash_change,
        opening_cash,
        closing_cash,
        aggregated_closing_cash,
        reconciles: closing_cash == aggregated_closing_cash,
    })
}
