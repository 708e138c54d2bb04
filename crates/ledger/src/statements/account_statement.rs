//! General-ledger view of one account: opening balance, posted lines, running balance.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{AccountId, Cancellation, JournalEntryId};

use crate::account::{Account, AccountType};
use crate::balance::{CANCEL_CHECK_INTERVAL, DateWindow, PostedLine};
use crate::error::LedgerResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatementLine {
    pub entry_id: JournalEntryId,
    pub entry_number: u64,
    pub entry_date: NaiveDate,
    pub line_no: u32,
    pub description: String,
    pub debit: Decimal,
    pub credit: Decimal,
    /// Normal-side balance after this line.
    pub running_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatement {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub opening_balance: Decimal,
    pub lines: Vec<AccountStatementLine>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub closing_balance: Decimal,
}

pub fn account_statement(
    account: &Account,
    lines: &[PostedLine],
    start: NaiveDate,
    end: NaiveDate,
    cancel: &Cancellation,
) -> LedgerResult<AccountStatement> {
    let window = DateWindow::range(start, end)?;
    let side = account.normal_side();

    let mut opening_balance = Decimal::ZERO;
    let mut in_range: Vec<&PostedLine> = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if idx % CANCEL_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }
        if line.account_id != account.id {
            continue;
        }
        if line.entry_date < start {
            opening_balance += side.net(line.base_debit, line.base_credit);
        } else if window.contains(line.entry_date) {
            in_range.push(line);
        }
    }
    in_range.sort_by_key(|l| (l.entry_date, l.entry_number, l.line_no));

    let mut running = opening_balance;
    let mut total_debit = Decimal::ZERO;
    let mut total_credit = Decimal::ZERO;
    let statement_lines = in_range
        .into_iter()
        .map(|line| {
            running += side.net(line.base_debit, line.base_credit);
            total_debit += line.base_debit;
            total_credit += line.base_credit;
            AccountStatementLine {
                entry_id: line.entry_id,
                entry_number: line.entry_number,
                entry_date: line.entry_date,
                line_no: line.line_no,
                description: line.description.clone(),
                debit: line.base_debit,
                credit: line.base_credit,
                running_balance: running,
            }
        })
        .collect();

    Ok(AccountStatement {
        account_id: account.id,
        code: account.code.clone(),
        name: account.name.clone(),
        account_type: account.account_type,
        start,
        end,
        opening_balance,
        lines: statement_lines,
        total_debit,
        total_credit,
        closing_balance: running,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::fixtures::*;
    use rust_decimal_macros::dec;

    #[test]
    fn running_balance_starts_from_opening() {
        let chart = chart();
        let mut j = Journal::new(&chart);
        j.post(d(2023, 12, 20), "1000", "3000", dec!(1000.00))
            .post(d(2024, 1, 9), "6000", "1000", dec!(120.00))
            .post(d(2024, 1, 3), "1000", "4000", dec!(300.00))
            .post(d(2024, 2, 1), "1000", "4000", dec!(5.00));

        let cash = chart.by_code("1000").unwrap();
        let st = account_statement(cash, &j.lines, d(2024, 1, 1), d(2024, 1, 31), &Cancellation::none()).unwrap();

        assert_eq!(st.opening_balance, dec!(1000.00));
        let running: Vec<Decimal> = st.lines.iter().map(|l| l.running_balance).collect();
        assert_eq!(running, vec![dec!(1300.00), dec!(1180.00)]);
        assert_eq!(st.total_debit, dec!(300.00));
        assert_eq!(st.total_credit, dec!(120.00));
        assert_eq!(st.closing_balance, dec!(1180.00));
    }

    #[test]
    fn credit_normal_accounts_run_positive_on_credits() {
        let chart = chart();
        let mut j = Journal::new(&chart);
        j.post(d(2024, 1, 3), "1000", "4000", dec!(300.00))
            .post(d(2024, 1, 4), "4000", "1000", dec!(20.00));

        let sales = chart.by_code("4000").unwrap();
        let st = account_statement(sales, &j.lines, d(2024, 1, 1), d(2024, 1, 31), &Cancellation::none()).unwrap();
        assert_eq!(st.closing_balance, dec!(280.00));
        assert_eq!(st.lines[0].running_balance, dec!(300.00));
    }
}
