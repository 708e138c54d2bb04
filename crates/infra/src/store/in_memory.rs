//! In-memory stores for tests/dev.
//!
//! Each store keeps one `RwLock` over its whole map. Accounts, the journal
//! counter and the entry rows share the same write lock, so numbering is
//! gap-free under concurrent `insert_draft` calls and a post never lands on an
//! account deactivated in between.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::NaiveDate;

use tally_core::{AccountId, ExpectedVersion, JournalEntryId, TenantId};
use tally_ledger::statements::{InvoiceKind, InvoiceRecord, InvoiceStatus};
use tally_ledger::{Account, DateWindow, EntryStatus, JournalEntry, PostedLine, TenantSettings};

use super::{AccountStore, EntryFilter, InvoiceSource, JournalStore, SettingsStore};
use crate::error::{StoreError, StoreResult};

fn poisoned() -> StoreError {
    StoreError::Database("lock poisoned".to_string())
}

#[derive(Debug, Default)]
struct TenantBook {
    accounts: HashMap<AccountId, Account>,
    last_number: u64,
    entries: HashMap<JournalEntryId, JournalEntry>,
}

impl TenantBook {
    fn posted_lines_after(&self, account_id: AccountId, after: Option<NaiveDate>) -> u64 {
        self.entries
            .values()
            .filter(|e| e.status == EntryStatus::Posted)
            .filter(|e| after.is_none_or(|d| e.entry_date > d))
            .flat_map(|e| e.lines.iter())
            .filter(|l| l.account_id == account_id)
            .count() as u64
    }

    fn first_inactive_account(&self, entry: &JournalEntry) -> Option<AccountId> {
        entry
            .lines
            .iter()
            .map(|l| l.account_id)
            .find(|id| self.accounts.get(id).is_some_and(|a| !a.is_active))
    }
}

/// Accounts and journal entries of every tenant.
///
/// Implements both `AccountStore` and `JournalStore` so that posting and
/// deactivation run under the same write lock.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tenants: RwLock<HashMap<TenantId, TenantBook>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, tenant_id: TenantId, f: impl FnOnce(&TenantBook) -> T) -> StoreResult<Option<T>> {
        let tenants = self.tenants.read().map_err(|_| poisoned())?;
        Ok(tenants.get(&tenant_id).map(f))
    }
}

#[async_trait]
impl AccountStore for InMemoryLedgerStore {
    async fn insert(&self, account: &Account) -> StoreResult<()> {
        let mut tenants = self.tenants.write().map_err(|_| poisoned())?;
        let book = tenants.entry(account.tenant_id).or_default();
        if book.accounts.values().any(|a| a.code == account.code) {
            return Err(StoreError::Conflict(format!(
                "account code '{}' already exists",
                account.code
            )));
        }
        book.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn update(&self, account: &Account) -> StoreResult<()> {
        let mut tenants = self.tenants.write().map_err(|_| poisoned())?;
        match tenants
            .get_mut(&account.tenant_id)
            .and_then(|b| b.accounts.get_mut(&account.id))
        {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(StoreError::Concurrency(format!(
                "account {} no longer exists",
                account.id
            ))),
        }
    }

    async fn deactivate(
        &self,
        tenant_id: TenantId,
        id: AccountId,
        closed_through: Option<NaiveDate>,
    ) -> StoreResult<()> {
        let mut tenants = self.tenants.write().map_err(|_| poisoned())?;
        let book = tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| StoreError::Concurrency(format!("account {id} no longer exists")))?;
        let lines = book.posted_lines_after(id, closed_through);
        if lines > 0 {
            return Err(StoreError::AccountInUse { account: id, lines });
        }
        let account = book
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::Concurrency(format!("account {id} no longer exists")))?;
        account.is_active = false;
        Ok(())
    }

    async fn delete(&self, tenant_id: TenantId, id: AccountId) -> StoreResult<bool> {
        let mut tenants = self.tenants.write().map_err(|_| poisoned())?;
        Ok(tenants
            .get_mut(&tenant_id)
            .is_some_and(|b| b.accounts.remove(&id).is_some()))
    }

    async fn list(&self, tenant_id: TenantId) -> StoreResult<Vec<Account>> {
        let mut accounts = self
            .read(tenant_id, |b| b.accounts.values().cloned().collect::<Vec<_>>())?
            .unwrap_or_default();
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts)
    }
}

#[async_trait]
impl JournalStore for InMemoryLedgerStore {
    async fn insert_draft(&self, mut entry: JournalEntry) -> StoreResult<JournalEntry> {
        let mut tenants = self.tenants.write().map_err(|_| poisoned())?;
        let book = tenants.entry(entry.tenant_id).or_default();
        if book.entries.contains_key(&entry.id) {
            return Err(StoreError::Conflict(format!("entry {} already exists", entry.id)));
        }
        book.last_number += 1;
        entry.entry_number = book.last_number;
        book.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get(&self, tenant_id: TenantId, id: JournalEntryId) -> StoreResult<Option<JournalEntry>> {
        Ok(self
            .read(tenant_id, |b| b.entries.get(&id).cloned())?
            .flatten())
    }

    async fn save(&self, entry: &JournalEntry, expected: ExpectedVersion) -> StoreResult<()> {
        let mut tenants = self.tenants.write().map_err(|_| poisoned())?;
        let book = tenants
            .get_mut(&entry.tenant_id)
            .ok_or_else(|| StoreError::Concurrency(format!("entry {} no longer exists", entry.id)))?;
        let inactive = match entry.status {
            EntryStatus::Posted => book.first_inactive_account(entry),
            _ => None,
        };
        let stored = book
            .entries
            .get_mut(&entry.id)
            .ok_or_else(|| StoreError::Concurrency(format!("entry {} no longer exists", entry.id)))?;

        expected
            .check(stored.version)
            .map_err(|e| StoreError::Concurrency(e.to_string()))?;

        match stored.status {
            EntryStatus::Draft => {
                if let Some(account) = inactive {
                    return Err(StoreError::AccountInactive(account));
                }
                *stored = entry.clone();
            }
            EntryStatus::Posted if entry.status == EntryStatus::Voided => {
                stored.status = entry.status;
                stored.voided_at = entry.voided_at;
                stored.voided_by = entry.voided_by;
                stored.void_reason = entry.void_reason.clone();
                stored.version = entry.version;
            }
            status => {
                return Err(StoreError::Conflict(format!(
                    "entry {} is {status} and cannot change to {}",
                    entry.id, entry.status
                )));
            }
        }
        Ok(())
    }

    async fn delete_draft(&self, tenant_id: TenantId, id: JournalEntryId) -> StoreResult<bool> {
        let mut tenants = self.tenants.write().map_err(|_| poisoned())?;
        let Some(book) = tenants.get_mut(&tenant_id) else {
            return Ok(false);
        };
        match book.entries.get(&id) {
            Some(e) if e.status == EntryStatus::Draft => {
                book.entries.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, tenant_id: TenantId, filter: &EntryFilter) -> StoreResult<Vec<JournalEntry>> {
        Ok(self
            .read(tenant_id, |b| {
                let mut entries: Vec<&JournalEntry> =
                    b.entries.values().filter(|e| filter.matches(e)).collect();
                entries.sort_by_key(|e| e.entry_number);
                entries
                    .into_iter()
                    .skip(filter.pagination.offset as usize)
                    .take(filter.pagination.limit as usize)
                    .cloned()
                    .collect()
            })?
            .unwrap_or_default())
    }

    async fn posted_lines(&self, tenant_id: TenantId, window: DateWindow) -> StoreResult<Vec<PostedLine>> {
        let mut lines = self
            .read(tenant_id, |b| {
                b.entries
                    .values()
                    .filter(|e| window.contains(e.entry_date))
                    .flat_map(PostedLine::of_entry)
                    .collect::<Vec<_>>()
            })?
            .unwrap_or_default();
        lines.sort_by_key(|l| (l.entry_number, l.line_no));
        Ok(lines)
    }

    async fn count_lines(&self, tenant_id: TenantId, account_id: AccountId) -> StoreResult<u64> {
        Ok(self
            .read(tenant_id, |b| {
                b.entries
                    .values()
                    .flat_map(|e| e.lines.iter())
                    .filter(|l| l.account_id == account_id)
                    .count() as u64
            })?
            .unwrap_or(0))
    }

    async fn count_posted_lines_after(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        after: Option<NaiveDate>,
    ) -> StoreResult<u64> {
        Ok(self
            .read(tenant_id, |b| b.posted_lines_after(account_id, after))?
            .unwrap_or(0))
    }

    async fn has_entries(&self, tenant_id: TenantId) -> StoreResult<bool> {
        Ok(self
            .read(tenant_id, |b| !b.entries.is_empty())?
            .unwrap_or(false))
    }
}

#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    settings: RwLock<HashMap<TenantId, TenantSettings>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self, tenant_id: TenantId) -> StoreResult<Option<TenantSettings>> {
        let map = self.settings.read().map_err(|_| poisoned())?;
        Ok(map.get(&tenant_id).cloned())
    }

    async fn upsert(&self, settings: &TenantSettings) -> StoreResult<()> {
        let mut map = self.settings.write().map_err(|_| poisoned())?;
        map.insert(settings.tenant_id, settings.clone());
        Ok(())
    }
}

/// Invoice mirror fed by tests (or by an invoicing consumer in dev).
#[derive(Debug, Default)]
pub struct InMemoryInvoiceSource {
    invoices: RwLock<Vec<InvoiceRecord>>,
}

impl InMemoryInvoiceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an invoice (keyed by tenant and id).
    pub fn upsert(&self, invoice: InvoiceRecord) -> StoreResult<()> {
        let mut invoices = self.invoices.write().map_err(|_| poisoned())?;
        invoices.retain(|i| !(i.tenant_id == invoice.tenant_id && i.id == invoice.id));
        invoices.push(invoice);
        Ok(())
    }
}

#[async_trait]
impl InvoiceSource for InMemoryInvoiceSource {
    async fn open_invoices(
        &self,
        tenant_id: TenantId,
        kind: InvoiceKind,
        as_of: NaiveDate,
    ) -> StoreResult<Vec<InvoiceRecord>> {
        let invoices = self.invoices.read().map_err(|_| poisoned())?;
        Ok(invoices
            .iter()
            .filter(|i| {
                i.tenant_id == tenant_id
                    && i.kind == kind
                    && i.status == InvoiceStatus::Open
                    && i.issue_date <= as_of
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tally_core::UserId;
    use tally_ledger::{CurrencyCode, NewJournalEntry, NewJournalLine};

    fn draft(tenant_id: TenantId) -> JournalEntry {
        JournalEntry::draft(
            tenant_id,
            UserId::new(),
            Utc::now(),
            NewJournalEntry::new(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                "Opening",
                vec![
                    NewJournalLine::debit(AccountId::new(), dec!(10), "EUR"),
                    NewJournalLine::credit(AccountId::new(), dec!(10), "EUR"),
                ],
            ),
            &CurrencyCode::parse("EUR").unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn numbering_is_per_tenant() {
        let store = InMemoryLedgerStore::new();
        let a = TenantId::new();
        let b = TenantId::new();

        assert_eq!(store.insert_draft(draft(a)).await.unwrap().entry_number, 1);
        assert_eq!(store.insert_draft(draft(a)).await.unwrap().entry_number, 2);
        assert_eq!(store.insert_draft(draft(b)).await.unwrap().entry_number, 1);
    }

    #[tokio::test]
    async fn other_tenants_cannot_see_entries() {
        let store = InMemoryLedgerStore::new();
        let owner = TenantId::new();
        let entry = store.insert_draft(draft(owner)).await.unwrap();

        assert!(store.get(owner, entry.id).await.unwrap().is_some());
        assert!(store.get(TenantId::new(), entry.id).await.unwrap().is_none());
        assert!(!store.delete_draft(TenantId::new(), entry.id).await.unwrap());
    }

    #[tokio::test]
    async fn stale_version_is_a_concurrency_error() {
        let store = InMemoryLedgerStore::new();
        let tenant_id = TenantId::new();
        let mut entry = store.insert_draft(draft(tenant_id)).await.unwrap();
        entry.description = "Edited".into();
        entry.version += 1;

        store.save(&entry, ExpectedVersion::exact(0)).await.unwrap();
        let err = store.save(&entry, ExpectedVersion::exact(0)).await.unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));
    }

    #[tokio::test]
    async fn duplicate_account_code_conflicts() {
        let store = InMemoryLedgerStore::new();
        let tenant_id = TenantId::new();
        let chart = tally_ledger::ChartOfAccounts::default();
        let cash = chart
            .prepare_new(tenant_id, tally_ledger::NewAccount::new("1000", "Cash", tally_ledger::AccountType::Asset))
            .unwrap();
        let mut again = cash.clone();
        again.id = AccountId::new();

        store.insert(&cash).await.unwrap();
        assert!(matches!(store.insert(&again).await, Err(StoreError::Conflict(_))));
    }

    async fn opened(store: &InMemoryLedgerStore, tenant_id: TenantId) -> (Account, Account) {
        let chart = tally_ledger::ChartOfAccounts::default();
        let cash = chart
            .prepare_new(tenant_id, tally_ledger::NewAccount::new("1000", "Cash", tally_ledger::AccountType::Asset))
            .unwrap();
        store.insert(&cash).await.unwrap();
        let chart = tally_ledger::ChartOfAccounts::new(AccountStore::list(store, tenant_id).await.unwrap());
        let sales = chart
            .prepare_new(tenant_id, tally_ledger::NewAccount::new("4000", "Sales", tally_ledger::AccountType::Revenue))
            .unwrap();
        store.insert(&sales).await.unwrap();
        (cash, sales)
    }

    fn posted(mut entry: JournalEntry) -> JournalEntry {
        entry.status = EntryStatus::Posted;
        entry.posted_at = Some(Utc::now());
        entry.version += 1;
        entry
    }

    #[tokio::test]
    async fn posting_onto_a_deactivated_account_is_refused() {
        let store = InMemoryLedgerStore::new();
        let tenant_id = TenantId::new();
        let (cash, sales) = opened(&store, tenant_id).await;
        let entry = store
            .insert_draft(
                JournalEntry::draft(
                    tenant_id,
                    UserId::new(),
                    Utc::now(),
                    NewJournalEntry::new(
                        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                        "Sale",
                        vec![
                            NewJournalLine::debit(cash.id, dec!(10), "EUR"),
                            NewJournalLine::credit(sales.id, dec!(10), "EUR"),
                        ],
                    ),
                    &CurrencyCode::parse("EUR").unwrap(),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        store.deactivate(tenant_id, sales.id, None).await.unwrap();

        let err = store
            .save(&posted(entry.clone()), ExpectedVersion::exact(0))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::AccountInactive(sales.id));
        let stored = store.get(tenant_id, entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EntryStatus::Draft);
    }

    #[tokio::test]
    async fn deactivation_recounts_open_postings() {
        let store = InMemoryLedgerStore::new();
        let tenant_id = TenantId::new();
        let (cash, sales) = opened(&store, tenant_id).await;
        let entry = store
            .insert_draft(
                JournalEntry::draft(
                    tenant_id,
                    UserId::new(),
                    Utc::now(),
                    NewJournalEntry::new(
                        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                        "Sale",
                        vec![
                            NewJournalLine::debit(cash.id, dec!(10), "EUR"),
                            NewJournalLine::credit(sales.id, dec!(10), "EUR"),
                        ],
                    ),
                    &CurrencyCode::parse("EUR").unwrap(),
                )
                .unwrap(),
            )
            .await
            .unwrap();
        store.save(&posted(entry), ExpectedVersion::exact(0)).await.unwrap();

        let err = store.deactivate(tenant_id, sales.id, None).await.unwrap_err();
        assert_eq!(err, StoreError::AccountInUse { account: sales.id, lines: 1 });

        let closed = NaiveDate::from_ymd_opt(2024, 1, 31);
        store.deactivate(tenant_id, sales.id, closed).await.unwrap();
        let accounts = AccountStore::list(&store, tenant_id).await.unwrap();
        assert!(!accounts.iter().any(|a| a.id == sales.id && a.is_active));
    }
}
