//! Account registry: chart-of-accounts tree and its invariants.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{AccountId, Entity, TenantId};

use crate::error::{LedgerError, LedgerResult};

/// High-level account type (determines normal balance side).
///
/// Declaration order is the presentation order used by every statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub const ALL: [AccountType; 5] = [
        AccountType::Asset,
        AccountType::Liability,
        AccountType::Equity,
        AccountType::Revenue,
        AccountType::Expense,
    ];

    pub fn normal_side(self) -> NormalSide {
        normal_side(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Revenue => "REVENUE",
            AccountType::Expense => "EXPENSE",
        }
    }
}

impl core::fmt::Display for AccountType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AccountType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASSET" => Ok(AccountType::Asset),
            "LIABILITY" => Ok(AccountType::Liability),
            "EQUITY" => Ok(AccountType::Equity),
            "REVENUE" => Ok(AccountType::Revenue),
            "EXPENSE" => Ok(AccountType::Expense),
            _ => Err(LedgerError::validation(format!(
                "account type must be one of: asset, liability, equity, revenue, expense (got '{s}')"
            ))),
        }
    }
}

/// Side on which an account type normally carries its balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalSide {
    Debit,
    Credit,
}

impl NormalSide {
    /// Net balance oriented so that a positive value sits on the normal side.
    pub fn net(self, debit: Decimal, credit: Decimal) -> Decimal {
        match self {
            NormalSide::Debit => debit - credit,
            NormalSide::Credit => credit - debit,
        }
    }
}

/// Sign convention by account type.
pub fn normal_side(account_type: AccountType) -> NormalSide {
    match account_type {
        AccountType::Asset | AccountType::Expense => NormalSide::Debit,
        AccountType::Liability | AccountType::Equity | AccountType::Revenue => NormalSide::Credit,
    }
}

/// Chart-of-accounts entry.
///
/// `account_type` is fixed at creation: `AccountUpdate` has no way to change it and
/// stores never rewrite the column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub tenant_id: TenantId,
    pub code: String, // e.g. "1000"
    pub name: String, // e.g. "Cash"
    pub account_type: AccountType,
    pub parent_id: Option<AccountId>,
    pub is_active: bool,
    pub is_system: bool,
}

impl Account {
    pub fn normal_side(&self) -> NormalSide {
        self.account_type.normal_side()
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for `CreateAccount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    #[serde(default)]
    pub parent_id: Option<AccountId>,
    #[serde(default)]
    pub is_system: bool,
}

impl NewAccount {
    pub fn new(code: impl Into<String>, name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            account_type,
            parent_id: None,
            is_system: false,
        }
    }

    pub fn with_parent(mut self, parent_id: AccountId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

/// Mutable account attributes. `parent_id: Some(None)` detaches from the parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Option<AccountId>>,
}

/// Read-only view over one tenant's accounts, indexed by id and code.
#[derive(Debug, Clone, Default)]
pub struct ChartOfAccounts {
    by_id: HashMap<AccountId, Account>,
    by_code: BTreeMap<String, AccountId>,
}

impl ChartOfAccounts {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        let mut chart = Self::default();
        for account in accounts {
            chart.by_code.insert(account.code.clone(), account.id);
            chart.by_id.insert(account.id, account);
        }
        chart
    }

    pub fn get(&self, id: AccountId) -> Option<&Account> {
        self.by_id.get(&id)
    }

    pub fn by_code(&self, code: &str) -> Option<&Account> {
        self.by_code.get(code).and_then(|id| self.by_id.get(id))
    }

    pub fn require(&self, id: AccountId) -> LedgerResult<&Account> {
        self.get(id)
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))
    }

    /// Accounts ordered by code.
    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.by_code.values().filter_map(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn children_of(&self, id: AccountId) -> impl Iterator<Item = &Account> {
        self.iter().filter(move |a| a.parent_id == Some(id))
    }

    /// Validate a new account against the tenant's existing chart and build it.
    pub fn prepare_new(&self, tenant_id: TenantId, new: NewAccount) -> LedgerResult<Account> {
        let code = new.code.trim().to_string();
        let name = new.name.trim().to_string();
        if code.is_empty() {
            return Err(LedgerError::validation("account code must not be empty"));
        }
        if name.is_empty() {
            return Err(LedgerError::validation("account name must not be empty"));
        }
        if self.by_code(&code).is_some() {
            return Err(LedgerError::validation(format!(
                "account code '{code}' already exists"
            )));
        }
        if let Some(parent_id) = new.parent_id {
            self.require(parent_id)?;
        }

        Ok(Account {
            id: AccountId::new(),
            tenant_id,
            code,
            name,
            account_type: new.account_type,
            parent_id: new.parent_id,
            is_active: true,
            is_system: new.is_system,
        })
    }

    /// Apply an update to an existing account, enforcing the tree invariant.
    pub fn apply_update(&self, id: AccountId, update: AccountUpdate) -> LedgerResult<Account> {
        let mut account = self.require(id)?.clone();

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(LedgerError::validation("account name must not be empty"));
            }
            account.name = name;
        }

        if let Some(parent_id) = update.parent_id {
            if let Some(parent_id) = parent_id {
                self.require(parent_id)?;
                self.ensure_no_cycle(id, parent_id)?;
            }
            account.parent_id = parent_id;
        }

        Ok(account)
    }

    /// Reject re-parenting `id` under `new_parent` if that would close a loop.
    pub fn ensure_no_cycle(&self, id: AccountId, new_parent: AccountId) -> LedgerResult<()> {
        let mut cursor = Some(new_parent);
        let mut steps = 0usize;
        while let Some(current) = cursor {
            if current == id {
                return Err(LedgerError::validation(
                    "account parent would create a cycle",
                ));
            }
            steps += 1;
            if steps > self.by_id.len() {
                return Err(LedgerError::validation(
                    "account hierarchy already contains a cycle",
                ));
            }
            cursor = self.get(current).and_then(|a| a.parent_id);
        }
        Ok(())
    }

    /// Accounts referenced by a posting must exist, belong to the tenant and be active.
    pub fn ensure_postable(&self, tenant_id: TenantId, id: AccountId) -> LedgerResult<&Account> {
        let account = self.require(id)?;
        if account.tenant_id != tenant_id {
            return Err(LedgerError::AccountNotFound(id.to_string()));
        }
        if !account.is_active {
            return Err(LedgerError::AccountInactive(account.code.clone()));
        }
        Ok(account)
    }
}

/// Deactivation is refused while the account still carries postings in an open period.
pub fn ensure_can_deactivate(account: &Account, posted_lines_in_open_period: u64) -> LedgerResult<()> {
    if account.is_system {
        return Err(LedgerError::validation(format!(
            "system account {} cannot be deactivated",
            account.code
        )));
    }
    if posted_lines_in_open_period > 0 {
        return Err(LedgerError::AccountInUse(format!(
            "{} has {posted_lines_in_open_period} posted line(s) in an open period",
            account.code
        )));
    }
    Ok(())
}

/// Deletion is refused once any journal line (of any status) or child account references it.
pub fn ensure_can_delete(account: &Account, line_count: u64, child_count: usize) -> LedgerResult<()> {
    if account.is_system {
        return Err(LedgerError::validation(format!(
            "system account {} cannot be deleted",
            account.code
        )));
    }
    if line_count > 0 {
        return Err(LedgerError::AccountInUse(format!(
            "{} is referenced by {line_count} journal line(s)",
            account.code
        )));
    }
    if child_count > 0 {
        return Err(LedgerError::AccountInUse(format!(
            "{} has {child_count} child account(s)",
            account.code
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn chart_with(tenant_id: TenantId, specs: &[(&str, AccountType)]) -> ChartOfAccounts {
        let mut chart = ChartOfAccounts::default();
        for (code, ty) in specs {
            let account = chart
                .prepare_new(tenant_id, NewAccount::new(*code, *code, *ty))
                .unwrap();
            chart = ChartOfAccounts::new(chart.iter().cloned().chain([account]));
        }
        chart
    }

    #[test]
    fn normal_side_follows_account_type() {
        assert_eq!(normal_side(AccountType::Asset), NormalSide::Debit);
        assert_eq!(normal_side(AccountType::Expense), NormalSide::Debit);
        assert_eq!(normal_side(AccountType::Liability), NormalSide::Credit);
        assert_eq!(normal_side(AccountType::Equity), NormalSide::Credit);
        assert_eq!(normal_side(AccountType::Revenue), NormalSide::Credit);

        assert_eq!(NormalSide::Debit.net(dec!(100), dec!(30)), dec!(70));
        assert_eq!(NormalSide::Credit.net(dec!(100), dec!(30)), dec!(-70));
    }

    #[test]
    fn duplicate_code_is_rejected() {
        let tenant_id = TenantId::new();
        let chart = chart_with(tenant_id, &[("1000", AccountType::Asset)]);
        let err = chart
            .prepare_new(tenant_id, NewAccount::new("1000", "Cash again", AccountType::Asset))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(msg) if msg.contains("already exists")));
    }

    #[test]
    fn missing_parent_is_account_not_found() {
        let chart = ChartOfAccounts::default();
        let err = chart
            .prepare_new(
                TenantId::new(),
                NewAccount::new("1010", "Bank", AccountType::Asset).with_parent(AccountId::new()),
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[test]
    fn reparenting_under_own_descendant_is_a_cycle() {
        let tenant_id = TenantId::new();
        let mut chart = chart_with(tenant_id, &[("1000", AccountType::Asset)]);
        let root = chart.by_code("1000").unwrap().id;
        let child = chart
            .prepare_new(tenant_id, NewAccount::new("1010", "Bank", AccountType::Asset).with_parent(root))
            .unwrap();
        let child_id = child.id;
        chart = ChartOfAccounts::new(chart.iter().cloned().chain([child]));

        let err = chart
            .apply_update(
                root,
                AccountUpdate {
                    name: None,
                    parent_id: Some(Some(child_id)),
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(msg) if msg.contains("cycle")));

        let self_parent = chart
            .apply_update(
                root,
                AccountUpdate {
                    name: None,
                    parent_id: Some(Some(root)),
                },
            )
            .unwrap_err();
        assert!(matches!(self_parent, LedgerError::Validation(_)));
    }

    #[test]
    fn inactive_or_foreign_accounts_are_not_postable() {
        let tenant_id = TenantId::new();
        let chart = chart_with(tenant_id, &[("1000", AccountType::Asset)]);
        let mut cash = chart.by_code("1000").unwrap().clone();

        assert!(chart.ensure_postable(tenant_id, cash.id).is_ok());
        assert!(matches!(
            chart.ensure_postable(TenantId::new(), cash.id),
            Err(LedgerError::AccountNotFound(_))
        ));

        cash.is_active = false;
        let chart = ChartOfAccounts::new([cash.clone()]);
        assert!(matches!(
            chart.ensure_postable(tenant_id, cash.id),
            Err(LedgerError::AccountInactive(code)) if code == "1000"
        ));
    }

    #[test]
    fn usage_guards() {
        let tenant_id = TenantId::new();
        let chart = chart_with(tenant_id, &[("4000", AccountType::Revenue)]);
        let revenue = chart.by_code("4000").unwrap();

        assert!(ensure_can_deactivate(revenue, 0).is_ok());
        assert!(matches!(ensure_can_deactivate(revenue, 2), Err(LedgerError::AccountInUse(_))));
        assert!(ensure_can_delete(revenue, 0, 0).is_ok());
        assert!(matches!(ensure_can_delete(revenue, 1, 0), Err(LedgerError::AccountInUse(_))));
        assert!(matches!(ensure_can_delete(revenue, 0, 1), Err(LedgerError::AccountInUse(_))));
    }

    #[test]
    fn account_type_parses_case_insensitively() {
        assert_eq!("revenue".parse::<AccountType>().unwrap(), AccountType::Revenue);
        assert!("income".parse::<AccountType>().is_err());
    }
}
