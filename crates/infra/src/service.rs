//! Write path: account registry, draft lifecycle, post/void/reverse.
//!
//! All mutations of one tenant are serialized through a per-tenant async lock
//! (on top of whatever row locks the store takes). Reads never take it.
//!
//! After a successful post or void the resulting event is published on the bus.
//! Publication is best-effort: a failure is logged and the committed write stands.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument, warn};

use tally_core::{
    AccountId, Aggregate, AggregateRoot, ExpectedVersion, JournalEntryId, TenantId, Transition,
    UserId,
};
use tally_events::{EventBus, EventEnvelope};
use tally_ledger::account::{ensure_can_deactivate, ensure_can_delete};
use tally_ledger::journal::AGGREGATE_TYPE;
use tally_ledger::{
    Account, AccountUpdate, ChartOfAccounts, CurrencyCode, DraftUpdate, JournalCommand,
    JournalEntry, JournalEvent, LedgerError, NewAccount, NewJournalEntry, PostEntry,
    TenantSettings, VoidEntry,
};

use crate::error::{ServiceResult, StoreError};
use crate::store::{EntryFilter, LedgerStores};

/// Envelope type published by the ledger.
pub type LedgerEnvelope = EventEnvelope<JsonValue>;

/// Partial update of tenant settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    /// Only accepted while the tenant has no journal entries.
    #[serde(default)]
    pub base_currency: Option<String>,
    #[serde(default)]
    pub books_closed_through: Option<NaiveDate>,
}

#[derive(Debug, Default)]
struct TenantLocks {
    locks: Mutex<HashMap<TenantId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TenantLocks {
    async fn acquire(&self, tenant_id: TenantId) -> ServiceResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| StoreError::Database("tenant lock table poisoned".to_string()))?;
            // Entries only the table still references are idle.
            locks.retain(|id, lock| *id == tenant_id || Arc::strong_count(lock) > 1);
            locks.entry(tenant_id).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }
}

pub struct LedgerService<B> {
    stores: LedgerStores,
    bus: B,
    default_base_currency: CurrencyCode,
    locks: TenantLocks,
}

impl<B> LedgerService<B>
where
    B: EventBus<LedgerEnvelope>,
{
    pub fn new(stores: LedgerStores, bus: B, default_base_currency: CurrencyCode) -> Self {
        Self {
            stores,
            bus,
            default_base_currency,
            locks: TenantLocks::default(),
        }
    }

    pub fn stores(&self) -> &LedgerStores {
        &self.stores
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Stored settings, or defaults (configured base currency, books open) if none.
    pub async fn get_settings(&self, tenant_id: TenantId) -> ServiceResult<TenantSettings> {
        Ok(self
            .stores
            .settings
            .get(tenant_id)
            .await?
            .unwrap_or_else(|| TenantSettings::new(tenant_id, self.default_base_currency.clone())))
    }

    #[instrument(skip(self, update), fields(tenant_id = %tenant_id), err)]
    pub async fn update_settings(
        &self,
        tenant_id: TenantId,
        update: SettingsUpdate,
    ) -> ServiceResult<TenantSettings> {
        let _guard = self.locks.acquire(tenant_id).await?;
        let mut settings = self.get_settings(tenant_id).await?;

        if let Some(code) = update.base_currency {
            let code = CurrencyCode::parse(&code)?;
            if code != settings.base_currency && self.stores.journal.has_entries(tenant_id).await? {
                return Err(LedgerError::validation(
                    "base currency cannot change once journal entries exist",
                )
                .into());
            }
            settings.base_currency = code;
        }
        if let Some(date) = update.books_closed_through {
            settings.close_books_through(date)?;
            info!(closed_through = %date, "books closed");
        }

        self.stores.settings.upsert(&settings).await?;
        Ok(settings)
    }

    // -----------------------------------------------------------------------
    // Account registry
    // -----------------------------------------------------------------------

    async fn chart(&self, tenant_id: TenantId) -> ServiceResult<ChartOfAccounts> {
        Ok(ChartOfAccounts::new(self.stores.accounts.list(tenant_id).await?))
    }

    #[instrument(skip(self, new), fields(tenant_id = %tenant_id, code = %new.code), err)]
    pub async fn create_account(&self, tenant_id: TenantId, new: NewAccount) -> ServiceResult<Account> {
        let _guard = self.locks.acquire(tenant_id).await?;
        let chart = self.chart(tenant_id).await?;
        let account = chart.prepare_new(tenant_id, new)?;
        self.stores.accounts.insert(&account).await?;
        info!(account_id = %account.id, code = %account.code, "account created");
        Ok(account)
    }

    #[instrument(skip(self, update), fields(tenant_id = %tenant_id, account_id = %id), err)]
    pub async fn update_account(
        &self,
        tenant_id: TenantId,
        id: AccountId,
        update: AccountUpdate,
    ) -> ServiceResult<Account> {
        let _guard = self.locks.acquire(tenant_id).await?;
        let chart = self.chart(tenant_id).await?;
        let account = chart.apply_update(id, update)?;
        self.stores.accounts.update(&account).await?;
        Ok(account)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %id), err)]
    pub async fn deactivate_account(&self, tenant_id: TenantId, id: AccountId) -> ServiceResult<Account> {
        let _guard = self.locks.acquire(tenant_id).await?;
        let chart = self.chart(tenant_id).await?;
        let mut account = chart.require(id)?.clone();
        let settings = self.get_settings(tenant_id).await?;

        let open_lines = self
            .stores
            .journal
            .count_posted_lines_after(tenant_id, id, settings.books_closed_through)
            .await?;
        ensure_can_deactivate(&account, open_lines)?;

        // The store repeats the count under the lock posting takes.
        self.stores
            .accounts
            .deactivate(tenant_id, id, settings.books_closed_through)
            .await?;
        account.is_active = false;
        info!(code = %account.code, "account deactivated");
        Ok(account)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %id), err)]
    pub async fn reactivate_account(&self, tenant_id: TenantId, id: AccountId) -> ServiceResult<Account> {
        let _guard = self.locks.acquire(tenant_id).await?;
        let chart = self.chart(tenant_id).await?;
        let mut account = chart.require(id)?.clone();
        account.is_active = true;
        self.stores.accounts.update(&account).await?;
        info!(code = %account.code, "account reactivated");
        Ok(account)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %id), err)]
    pub async fn delete_account(&self, tenant_id: TenantId, id: AccountId) -> ServiceResult<()> {
        let _guard = self.locks.acquire(tenant_id).await?;
        let chart = self.chart(tenant_id).await?;
        let account = chart.require(id)?;
        let lines = self.stores.journal.count_lines(tenant_id, id).await?;
        ensure_can_delete(account, lines, chart.children_of(id).count())?;

        if !self.stores.accounts.delete(tenant_id, id).await? {
            return Err(LedgerError::AccountNotFound(id.to_string()).into());
        }
        info!(code = %account.code, "account deleted");
        Ok(())
    }

    pub async fn get_account(&self, tenant_id: TenantId, id: AccountId) -> ServiceResult<Account> {
        Ok(self.chart(tenant_id).await?.require(id)?.clone())
    }

    pub async fn get_account_by_code(&self, tenant_id: TenantId, code: &str) -> ServiceResult<Account> {
        self.chart(tenant_id)
            .await?
            .by_code(code.trim())
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()).into())
    }

    /// Accounts ordered by code.
    pub async fn list_accounts(
        &self,
        tenant_id: TenantId,
        include_inactive: bool,
    ) -> ServiceResult<Vec<Account>> {
        let accounts = self.stores.accounts.list(tenant_id).await?;
        Ok(accounts
            .into_iter()
            .filter(|a| include_inactive || a.is_active)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Drafts
    // -----------------------------------------------------------------------

    #[instrument(skip(self, input), fields(tenant_id = %tenant_id), err)]
    pub async fn create_draft(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        input: NewJournalEntry,
    ) -> ServiceResult<JournalEntry> {
        let _guard = self.locks.acquire(tenant_id).await?;
        self.create_draft_locked(tenant_id, actor, input).await
    }

    async fn create_draft_locked(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        input: NewJournalEntry,
    ) -> ServiceResult<JournalEntry> {
        let settings = self.get_settings(tenant_id).await?;
        let chart = self.chart(tenant_id).await?;
        for line in &input.lines {
            chart.require(line.account_id)?;
        }

        let draft = JournalEntry::draft(tenant_id, actor, Utc::now(), input, &settings.base_currency)?;
        let entry = self.stores.journal.insert_draft(draft).await?;
        info!(entry_id = %entry.id, entry_number = entry.entry_number, "draft created");
        Ok(entry)
    }

    #[instrument(skip(self, update), fields(tenant_id = %tenant_id, entry_id = %id), err)]
    pub async fn update_draft(
        &self,
        tenant_id: TenantId,
        id: JournalEntryId,
        update: DraftUpdate,
    ) -> ServiceResult<JournalEntry> {
        let _guard = self.locks.acquire(tenant_id).await?;
        let settings = self.get_settings(tenant_id).await?;
        let mut entry = self.load(tenant_id, id).await?;
        let expected = ExpectedVersion::exact(entry.version());

        entry.update_draft(update, &settings.base_currency)?;
        self.stores.journal.save(&entry, expected).await?;
        Ok(entry)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, entry_id = %id), err)]
    pub async fn delete_draft(&self, tenant_id: TenantId, id: JournalEntryId) -> ServiceResult<()> {
        let _guard = self.locks.acquire(tenant_id).await?;
        let entry = self.load(tenant_id, id).await?;
        entry.ensure_deletable()?;
        self.get_settings(tenant_id).await?.ensure_open(entry.entry_date)?;

        if !self.stores.journal.delete_draft(tenant_id, id).await? {
            return Err(LedgerError::EntryNotFound.into());
        }
        info!(entry_number = entry.entry_number, "draft deleted");
        Ok(())
    }

    pub async fn get_entry(&self, tenant_id: TenantId, id: JournalEntryId) -> ServiceResult<JournalEntry> {
        self.load(tenant_id, id).await
    }

    pub async fn list_entries(
        &self,
        tenant_id: TenantId,
        filter: &EntryFilter,
    ) -> ServiceResult<Vec<JournalEntry>> {
        Ok(self.stores.journal.list(tenant_id, filter).await?)
    }

    /// Entries produced for one source document (e.g. an invoice), any status.
    pub async fn find_by_source(
        &self,
        tenant_id: TenantId,
        source_type: &str,
        source_id: &str,
    ) -> ServiceResult<Vec<JournalEntry>> {
        self.list_entries(tenant_id, &EntryFilter::by_source(source_type, source_id))
            .await
    }

    async fn load(&self, tenant_id: TenantId, id: JournalEntryId) -> ServiceResult<JournalEntry> {
        self.stores
            .journal
            .get(tenant_id, id)
            .await?
            .ok_or_else(|| LedgerError::EntryNotFound.into())
    }

    // -----------------------------------------------------------------------
    // Posting state machine
    // -----------------------------------------------------------------------

    #[instrument(skip(self), fields(tenant_id = %tenant_id, entry_id = %id), err)]
    pub async fn post(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        id: JournalEntryId,
    ) -> ServiceResult<JournalEntry> {
        let _guard = self.locks.acquire(tenant_id).await?;
        let settings = self.get_settings(tenant_id).await?;
        let mut entry = self.load(tenant_id, id).await?;

        let command = JournalCommand::Post(PostEntry {
            posted_by: actor,
            posted_at: Utc::now(),
            settings,
        });
        let transition = entry.execute(&command)?;
        entry.check_accounts(&self.chart(tenant_id).await?)?;

        let entry = self.commit(entry, transition).await?;
        info!(
            entry_number = entry.entry_number,
            base_total = %entry.totals().base_debit,
            "journal entry posted"
        );
        Ok(entry)
    }

    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, entry_id = %id), err)]
    pub async fn void(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        id: JournalEntryId,
        reason: &str,
    ) -> ServiceResult<JournalEntry> {
        let _guard = self.locks.acquire(tenant_id).await?;
        let settings = self.get_settings(tenant_id).await?;
        let mut entry = self.load(tenant_id, id).await?;

        let command = JournalCommand::Void(VoidEntry {
            voided_by: actor,
            voided_at: Utc::now(),
            reason: reason.to_string(),
            settings,
        });
        let transition = entry.execute(&command)?;

        let entry = self.commit(entry, transition).await?;
        info!(entry_number = entry.entry_number, reason = %reason.trim(), "journal entry voided");
        Ok(entry)
    }

    /// Create (not post) a DRAFT that mirrors a POSTED entry with sides swapped.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, entry_id = %id), err)]
    pub async fn reverse(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        id: JournalEntryId,
        reversal_date: NaiveDate,
    ) -> ServiceResult<JournalEntry> {
        let _guard = self.locks.acquire(tenant_id).await?;
        let original = self.load(tenant_id, id).await?;
        let input = original.reversal_draft(reversal_date)?;
        let reversal = self.create_draft_locked(tenant_id, actor, input).await?;
        info!(
            original_number = original.entry_number,
            reversal_number = reversal.entry_number,
            "reversal drafted"
        );
        Ok(reversal)
    }

    /// Persist an executed transition with its version check, then publish.
    async fn commit(
        &self,
        entry: JournalEntry,
        transition: Transition<JournalEvent>,
    ) -> ServiceResult<JournalEntry> {
        self.stores.journal.save(&entry, transition.expected).await?;

        for event in &transition.events {
            self.publish(&entry, event);
        }
        Ok(entry)
    }

    fn publish(&self, entry: &JournalEntry, event: &JournalEvent) {
        let envelope = match LedgerEnvelope::from_typed(
            entry.tenant_id,
            *entry.id.as_uuid(),
            AGGREGATE_TYPE,
            entry.version(),
            event,
        ) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, entry_id = %entry.id, "failed to serialize ledger event");
                return;
            }
        };
        if let Err(e) = self.bus.publish(envelope) {
            warn!(error = ?e, entry_id = %entry.id, "failed to publish ledger event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(locks: &TenantLocks) -> usize {
        locks.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn idle_tenant_locks_are_dropped() {
        let locks = TenantLocks::default();
        let a = TenantId::new();
        let b = TenantId::new();

        let guard = locks.acquire(a).await.unwrap();
        drop(locks.acquire(b).await.unwrap());
        assert_eq!(held(&locks), 2);

        // `a` is still held, `b` is idle.
        drop(locks.acquire(TenantId::new()).await.unwrap());
        assert_eq!(held(&locks), 2);

        drop(guard);
        drop(locks.acquire(b).await.unwrap());
        assert_eq!(held(&locks), 1);
    }
}
