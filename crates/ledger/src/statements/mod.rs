//! Financial statements composed from the balance aggregator.
//!
//! Every generator takes the tenant's chart plus the posted lines a store handed
//! out and returns a plain serializable report. Imbalances are surfaced through
//! `is_balanced` / `reconciles` flags, never corrected or thrown.

pub mod account_statement;
pub mod balance_sheet;
pub mod cash_flow;
pub mod confirmation;
pub mod income_statement;
pub mod trial_balance;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::{AccountType, ChartOfAccounts};
use crate::balance::AccountBalance;

pub use account_statement::{AccountStatement, AccountStatementLine, account_statement};
pub use balance_sheet::{BalanceSheet, balance_sheet};
pub use cash_flow::{
    CashFlowCategory, CashFlowItem, CashFlowMap, CashFlowSection, CashFlowStatement, CodeRange,
    cash_flow_statement,
};
pub use confirmation::{
    BalanceConfirmation, ConfirmationLine, ContactConfirmation, InvoiceKind, InvoiceRecord,
    InvoiceStatus, balance_confirmation,
};
pub use income_statement::{IncomeStatement, income_statement};
pub use trial_balance::{TrialBalance, trial_balance};

/// Accounts of one type with their subtotal (sum of normal-side net balances).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementSection {
    pub account_type: AccountType,
    pub rows: Vec<AccountBalance>,
    pub total: Decimal,
}

impl StatementSection {
    pub(crate) fn collect(
        chart: &ChartOfAccounts,
        balances: &[AccountBalance],
        account_type: AccountType,
    ) -> Self {
        let rows: Vec<AccountBalance> = balances
            .iter()
            .filter(|b| b.account_type == account_type && is_reportable(chart, b))
            .cloned()
            .collect();
        let total = rows.iter().map(|r| r.net_balance).sum();
        Self {
            account_type,
            rows,
            total,
        }
    }
}

/// Active accounts always show; inactive ones only while they still carry activity.
pub(crate) fn is_reportable(chart: &ChartOfAccounts, balance: &AccountBalance) -> bool {
    let active = chart
        .get(balance.account_id)
        .map(|a| a.is_active)
        .unwrap_or(false);
    active || balance.has_activity()
}
