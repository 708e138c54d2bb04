//! Tenant-scoped persistence for the ledger.
//!
//! Every method takes the tenant explicitly; implementations must never return
//! or touch rows of another tenant. Two backends exist: in-memory (tests/dev) and
//! Postgres.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use tally_core::{AccountId, ExpectedVersion, JournalEntryId, TenantId};
use tally_ledger::statements::{InvoiceKind, InvoiceRecord};
use tally_ledger::{Account, DateWindow, EntryStatus, JournalEntry, PostedLine, TenantSettings};

use crate::error::StoreResult;

pub use in_memory::{InMemoryInvoiceSource, InMemoryLedgerStore, InMemorySettingsStore};
pub use postgres::{PostgresAccountStore, PostgresInvoiceSource, PostgresJournalStore, PostgresSettingsStore};

/// Pagination parameters for entry listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Filter for `ListEntries`. All criteria are optional and combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<EntryStatus>,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    #[serde(default)]
    pub pagination: Pagination,
}

impl EntryFilter {
    pub fn by_source(source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source_type: Some(source_type.into()),
            source_id: Some(source_id.into()),
            pagination: Pagination::new(Some(Pagination::MAX_LIMIT), None),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &JournalEntry) -> bool {
        self.from.is_none_or(|d| entry.entry_date >= d)
            && self.to.is_none_or(|d| entry.entry_date <= d)
            && self.status.is_none_or(|s| entry.status == s)
            && self
                .source_type
                .as_ref()
                .is_none_or(|s| entry.source_type.as_ref() == Some(s))
            && self
                .source_id
                .as_ref()
                .is_none_or(|s| entry.source_id.as_ref() == Some(s))
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with `Conflict` when the code is already taken in the tenant.
    async fn insert(&self, account: &Account) -> StoreResult<()>;

    async fn update(&self, account: &Account) -> StoreResult<()>;

    /// Mark the account inactive.
    ///
    /// Re-counts POSTED lines on the account dated after `closed_through` under the
    /// same tenant lock `JournalStore::save` takes for posting, and fails with
    /// `AccountInUse` if any exist.
    async fn deactivate(
        &self,
        tenant_id: TenantId,
        id: AccountId,
        closed_through: Option<NaiveDate>,
    ) -> StoreResult<()>;

    async fn delete(&self, tenant_id: TenantId, id: AccountId) -> StoreResult<bool>;

    /// Every account of the tenant (active or not), ordered by code.
    async fn list(&self, tenant_id: TenantId) -> StoreResult<Vec<Account>>;
}

#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Persist a new DRAFT, assigning the tenant's next `entry_number` in the same
    /// transaction. Returns the entry as stored.
    async fn insert_draft(&self, entry: JournalEntry) -> StoreResult<JournalEntry>;

    async fn get(&self, tenant_id: TenantId, id: JournalEntryId) -> StoreResult<Option<JournalEntry>>;

    /// Overwrite a stored entry if its version still matches `expected`.
    ///
    /// Lines are only rewritten while the stored row is a DRAFT; posted lines are
    /// immutable and a VOIDED row never changes again. A DRAFT saved as POSTED
    /// takes the tenant lock and fails with `AccountInactive` if any line's
    /// account has been deactivated meanwhile.
    async fn save(&self, entry: &JournalEntry, expected: ExpectedVersion) -> StoreResult<()>;

    /// Remove a DRAFT. Returns `false` when no draft with that id exists.
    async fn delete_draft(&self, tenant_id: TenantId, id: JournalEntryId) -> StoreResult<bool>;

    /// Entries matching `filter`, ordered by `entry_number`.
    async fn list(&self, tenant_id: TenantId, filter: &EntryFilter) -> StoreResult<Vec<JournalEntry>>;

    /// Lines of POSTED entries inside `window`, ordered by entry number and line.
    async fn posted_lines(&self, tenant_id: TenantId, window: DateWindow) -> StoreResult<Vec<PostedLine>>;

    /// Lines of any status that reference the account.
    async fn count_lines(&self, tenant_id: TenantId, account_id: AccountId) -> StoreResult<u64>;

    /// POSTED lines on the account dated after `after` (all of them when `None`).
    async fn count_posted_lines_after(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        after: Option<NaiveDate>,
    ) -> StoreResult<u64>;

    /// Whether the tenant has any entry at all.
    async fn has_entries(&self, tenant_id: TenantId) -> StoreResult<bool>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, tenant_id: TenantId) -> StoreResult<Option<TenantSettings>>;

    async fn upsert(&self, settings: &TenantSettings) -> StoreResult<()>;
}

/// Read-only view of invoice state owned by the invoicing module.
#[async_trait]
pub trait InvoiceSource: Send + Sync {
    /// OPEN invoices of `kind` issued on or before `as_of`.
    async fn open_invoices(
        &self,
        tenant_id: TenantId,
        kind: InvoiceKind,
        as_of: NaiveDate,
    ) -> StoreResult<Vec<InvoiceRecord>>;
}

/// The set of stores the services run against.
#[derive(Clone)]
pub struct LedgerStores {
    pub accounts: Arc<dyn AccountStore>,
    pub journal: Arc<dyn JournalStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub invoices: Arc<dyn InvoiceSource>,
}

impl LedgerStores {
    pub fn in_memory() -> Self {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        Self {
            accounts: ledger.clone(),
            journal: ledger,
            settings: Arc::new(InMemorySettingsStore::new()),
            invoices: Arc::new(InMemoryInvoiceSource::new()),
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            accounts: Arc::new(PostgresAccountStore::new(pool.clone())),
            journal: Arc::new(PostgresJournalStore::new(pool.clone())),
            settings: Arc::new(PostgresSettingsStore::new(pool.clone())),
            invoices: Arc::new(PostgresInvoiceSource::new(pool)),
        }
    }
}
