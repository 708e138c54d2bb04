//! Balance sheet with derived retained earnings.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::Cancellation;

use crate::account::{AccountType, ChartOfAccounts};
use crate::balance::{PostedLine, balances_as_of, total_net};
use crate::error::LedgerResult;

use super::StatementSection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub as_of: NaiveDate,
    pub assets: StatementSection,
    pub liabilities: StatementSection,
    pub equity: StatementSection,
    /// Revenue minus expenses from inception through `as_of`. Never stored.
    pub retained_earnings: Decimal,
    pub total_assets: Decimal,
    pub total_liabilities: Decimal,
    /// Equity accounts plus retained earnings.
    pub total_equity: Decimal,
    pub is_balanced: bool,
}

pub fn balance_sheet(
    chart: &ChartOfAccounts,
    lines: &[PostedLine],
    as_of: NaiveDate,
    cancel: &Cancellation,
) -> LedgerResult<BalanceSheet> {
    let balances = balances_as_of(chart, lines, as_of, cancel)?;

    let assets = StatementSection::collect(chart, &balances, AccountType::Asset);
    let liabilities = StatementSection::collect(chart, &balances, AccountType::Liability);
    let equity = StatementSection::collect(chart, &balances, AccountType::Equity);

    let retained_earnings = total_net(&balances, AccountType::Revenue)
        - total_net(&balances, AccountType::Expense);

    let total_assets = assets.total;
    let total_liabilities = liabilities.total;
    let total_equity = equity.total + retained_earnings;

    Ok(BalanceSheet {
        as_of,
        assets,
        liabilities,
        equity,
        retained_earnings,
        total_assets,
        total_liabilities,
        total_equity,
        is_balanced: total_assets == total_liabilities + total_equity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::fixtures::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sale_on_account_flows_into_retained_earnings() {
        let chart = chart();
        let mut j = Journal::new(&chart);
        // Receivable 1190, revenue 1000, output tax 190.
        j.post_split(
            d(2024, 1, 15),
            &[("1200", dec!(1190.00))],
            &[("4000", dec!(1000.00)), ("2000", dec!(190.00))],
        );

        let bs = balance_sheet(&chart, &j.lines, d(2024, 1, 31), &Cancellation::none()).unwrap();
        assert_eq!(bs.total_assets, dec!(1190.00));
        assert_eq!(bs.total_liabilities, dec!(190.00));
        assert_eq!(bs.retained_earnings, dec!(1000.00));
        assert_eq!(bs.total_equity, dec!(1000.00));
        assert!(bs.is_balanced);
    }

    #[test]
    fn capital_loan_and_expenses_tie_out() {
        let chart = chart();
        let mut j = Journal::new(&chart);
        j.post(d(2024, 1, 1), "1000", "3000", dec!(10000.00))
            .post(d(2024, 1, 2), "1000", "2500", dec!(5000.00))
            .post(d(2024, 1, 3), "1500", "1000", dec!(7000.00))
            .post(d(2024, 1, 4), "6000", "1000", dec!(1200.00))
            .post(d(2024, 2, 1), "1000", "4000", dec!(999.00));

        let bs = balance_sheet(&chart, &j.lines, d(2024, 1, 31), &Cancellation::none()).unwrap();
        assert_eq!(bs.total_assets, dec!(13800.00));
        assert_eq!(bs.total_liabilities, dec!(5000.00));
        assert_eq!(bs.retained_earnings, dec!(-1200.00));
        assert_eq!(bs.equity.total, dec!(10000.00));
        assert_eq!(bs.total_equity, dec!(8800.00));
        assert!(bs.is_balanced);
    }
}
