//! Read path: statements and balances over POSTED lines.
//!
//! Every report loads the tenant's chart and the posted lines for its window,
//! then hands both to the pure generators in `tally_ledger::statements`.
//! Calls take a `Cancellation`; `ReportService::cancellation` builds one from the
//! configured deadline for callers that have none of their own.

use std::time::Duration;

use chrono::NaiveDate;
use tracing::{instrument, warn};

use tally_core::{AccountId, Cancellation, ContactId, TenantId};
use tally_ledger::balance::{self, AccountBalance, DateWindow, PostedLine};
use tally_ledger::statements::{
    self, AccountStatement, BalanceConfirmation, BalanceSheet, CashFlowMap, CashFlowStatement,
    IncomeStatement, InvoiceKind, TrialBalance,
};
use tally_ledger::{Account, ChartOfAccounts};

use crate::config::LedgerConfig;
use crate::error::ServiceResult;
use crate::store::LedgerStores;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

pub struct ReportService {
    stores: LedgerStores,
    cash_flow_map: CashFlowMap,
    deadline: Duration,
}

impl ReportService {
    pub fn new(stores: LedgerStores) -> Self {
        Self {
            stores,
            cash_flow_map: CashFlowMap::standard(),
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn from_config(stores: LedgerStores, config: &LedgerConfig) -> Self {
        Self::new(stores).with_deadline(config.report_deadline())
    }

    pub fn with_cash_flow_map(mut self, map: CashFlowMap) -> Self {
        self.cash_flow_map = map;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// A fresh cancellation that fires after the configured deadline.
    pub fn cancellation(&self) -> Cancellation {
        Cancellation::with_timeout(self.deadline)
    }

    async fn chart(&self, tenant_id: TenantId) -> ServiceResult<ChartOfAccounts> {
        Ok(ChartOfAccounts::new(self.stores.accounts.list(tenant_id).await?))
    }

    async fn account(&self, tenant_id: TenantId, id: AccountId) -> ServiceResult<Account> {
        Ok(self.chart(tenant_id).await?.require(id)?.clone())
    }

    async fn lines(
        &self,
        tenant_id: TenantId,
        window: DateWindow,
        cancel: &Cancellation,
    ) -> ServiceResult<Vec<PostedLine>> {
        cancel.check()?;
        let lines = self.stores.journal.posted_lines(tenant_id, window).await?;
        cancel.check()?;
        Ok(lines)
    }

    #[instrument(skip(self, cancel), fields(tenant_id = %tenant_id), err)]
    pub async fn trial_balance(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        cancel: &Cancellation,
    ) -> ServiceResult<TrialBalance> {
        let chart = self.chart(tenant_id).await?;
        let lines = self.lines(tenant_id, DateWindow::AsOf(as_of), cancel).await?;
        let report = statements::trial_balance(&chart, &lines, as_of, cancel)?;
        if !report.is_balanced {
            warn!(
                total_debits = %report.total_debits,
                total_credits = %report.total_credits,
                "trial balance does not balance"
            );
        }
        Ok(report)
    }

    #[instrument(skip(self, cancel), fields(tenant_id = %tenant_id), err)]
    pub async fn balance_sheet(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        cancel: &Cancellation,
    ) -> ServiceResult<BalanceSheet> {
        let chart = self.chart(tenant_id).await?;
        let lines = self.lines(tenant_id, DateWindow::AsOf(as_of), cancel).await?;
        let report = statements::balance_sheet(&chart, &lines, as_of, cancel)?;
        if !report.is_balanced {
            warn!(
                total_assets = %report.total_assets,
                total_liabilities = %report.total_liabilities,
                total_equity = %report.total_equity,
                "balance sheet does not balance"
            );
        }
        Ok(report)
    }

    #[instrument(skip(self, cancel), fields(tenant_id = %tenant_id), err)]
    pub async fn income_statement(
        &self,
        tenant_id: TenantId,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &Cancellation,
    ) -> ServiceResult<IncomeStatement> {
        let window = DateWindow::range(start, end)?;
        let chart = self.chart(tenant_id).await?;
        let lines = self.lines(tenant_id, window, cancel).await?;
        Ok(statements::income_statement(&chart, &lines, start, end, cancel)?)
    }

    #[instrument(skip(self, cancel), fields(tenant_id = %tenant_id), err)]
    pub async fn cash_flow_statement(
        &self,
        tenant_id: TenantId,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &Cancellation,
    ) -> ServiceResult<CashFlowStatement> {
        DateWindow::range(start, end)?;
        let chart = self.chart(tenant_id).await?;
        // Opening cash needs everything before `start`, so load the whole history.
        let lines = self.lines(tenant_id, DateWindow::AsOf(end), cancel).await?;
        let report =
            statements::cash_flow_statement(&chart, &self.cash_flow_map, &lines, start, end, cancel)?;
        if !report.reconciles {
            warn!(
                closing_cash = %report.closing_cash,
                aggregated_closing_cash = %report.aggregated_closing_cash,
                "cash flow statement does not reconcile"
            );
        }
        Ok(report)
    }

    /// Open receivables (`Sales`) or payables (`Purchase`) per contact.
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub async fn balance_confirmation(
        &self,
        tenant_id: TenantId,
        contact: Option<ContactId>,
        kind: InvoiceKind,
        as_of: NaiveDate,
    ) -> ServiceResult<BalanceConfirmation> {
        let invoices = self
            .stores
            .invoices
            .open_invoices(tenant_id, kind, as_of)
            .await?;
        Ok(statements::balance_confirmation(&invoices, contact, kind, as_of))
    }

    #[instrument(skip(self, cancel), fields(tenant_id = %tenant_id, account_id = %account_id), err)]
    pub async fn account_statement(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &Cancellation,
    ) -> ServiceResult<AccountStatement> {
        DateWindow::range(start, end)?;
        let account = self.account(tenant_id, account_id).await?;
        let lines = self.lines(tenant_id, DateWindow::AsOf(end), cancel).await?;
        Ok(statements::account_statement(&account, &lines, start, end, cancel)?)
    }

    pub async fn account_balance(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        as_of: NaiveDate,
        cancel: &Cancellation,
    ) -> ServiceResult<AccountBalance> {
        let account = self.account(tenant_id, account_id).await?;
        let lines = self.lines(tenant_id, DateWindow::AsOf(as_of), cancel).await?;
        Ok(balance::account_balance(&account, &lines, as_of, cancel)?)
    }

    pub async fn range_balance(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &Cancellation,
    ) -> ServiceResult<AccountBalance> {
        let window = DateWindow::range(start, end)?;
        let account = self.account(tenant_id, account_id).await?;
        let lines = self.lines(tenant_id, window, cancel).await?;
        Ok(balance::range_balance(&account, &lines, start, end, cancel)?)
    }
}
