//! Income statement over an inclusive date range.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::Cancellation;

use crate::account::{AccountType, ChartOfAccounts};
use crate::balance::{PostedLine, balances_in_range};
use crate::error::LedgerResult;

use super::StatementSection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub revenue: StatementSection,
    pub expenses: StatementSection,
    pub total_revenue: Decimal,
    pub total_expenses: Decimal,
    pub net_income: Decimal,
}

pub fn income_statement(
    chart: &ChartOfAccounts,
    lines: &[PostedLine],
    start: NaiveDate,
    end: NaiveDate,
    cancel: &Cancellation,
) -> LedgerResult<IncomeStatement> {
    let balances = balances_in_range(chart, lines, start, end, cancel)?;

    let revenue = StatementSection::collect(chart, &balances, AccountType::Revenue);
    let expenses = StatementSection::collect(chart, &balances, AccountType::Expense);
    let total_revenue = revenue.total;
    let total_expenses = expenses.total;

    Ok(IncomeStatement {
        start,
        end,
        revenue,
        expenses,
        total_revenue,
        total_expenses,
        net_income: total_revenue - total_expenses,
    })
}
