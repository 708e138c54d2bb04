//! Postgres-backed ledger stores.
//!
//! ## Tenant Isolation
//!
//! Every query includes `tenant_id` in the WHERE clause and every table is keyed
//! by `(tenant_id, id)`, so cross-tenant reads are impossible by construction.
//!
//! ## Serialization
//!
//! - `insert_draft` bumps the tenant's `entry_sequences` row with
//!   `INSERT .. ON CONFLICT DO UPDATE .. RETURNING` inside the insert transaction.
//!   The row lock serializes concurrent drafts and a rollback releases the number.
//! - `save` takes `SELECT .. FOR UPDATE` on the entry row before comparing the
//!   stored version.
//! - Posting (a DRAFT saved as POSTED) and `deactivate` both lock the tenant's
//!   `entry_sequences` row (see `lock_tenant_ledger`) and re-check account state
//!   inside that transaction, so instances sharing the database cannot post onto
//!   an account another instance is deactivating.
//!
//! ## Error Mapping
//!
//! See `map_sqlx_error`: `23505` becomes `Conflict`, `40001`/`40P01` become
//! `Concurrency`, everything else `Database`.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use tally_core::{
    AccountId, ContactId, ExpectedVersion, InvoiceId, JournalEntryId, JournalLineId, TenantId,
    UserId,
};
use tally_ledger::statements::{InvoiceKind, InvoiceRecord};
use tally_ledger::{
    Account, AccountType, CurrencyCode, DateWindow, EntryStatus, JournalEntry, JournalEntryLine,
    PostedLine, TenantSettings,
};

use super::{AccountStore, EntryFilter, InvoiceSource, JournalStore, SettingsStore};
use crate::error::{StoreError, StoreResult, map_sqlx_error};

/// Apply the SQL migrations found in `dir` (normally the workspace `migrations/`).
pub async fn run_migrations(pool: &PgPool, dir: &Path) -> StoreResult<()> {
    let migrator = sqlx::migrate::Migrator::new(dir)
        .await
        .map_err(|e| StoreError::Database(format!("failed to load migrations: {e}")))?;
    migrator
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("failed to run migrations: {e}")))
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Database(format!("failed to read column {name}: {e}")))
}

fn parse<T>(value: &str, what: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Database(format!("invalid {what} '{value}': {e}")))
}

fn to_db_number(n: u64, what: &str) -> StoreResult<i64> {
    i64::try_from(n).map_err(|_| StoreError::Database(format!("{what} {n} out of range")))
}

fn from_db_number(n: i64, what: &str) -> StoreResult<u64> {
    u64::try_from(n).map_err(|_| StoreError::Database(format!("{what} {n} out of range")))
}

/// Lock the tenant's counter row, creating it at zero when the tenant has no
/// entries yet. Held until the transaction ends.
async fn lock_tenant_ledger(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO entry_sequences (tenant_id, last_number) VALUES ($1, 0) ON CONFLICT (tenant_id) DO NOTHING",
    )
    .bind(tenant_id.as_uuid())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("ensure_entry_sequence", e))?;

    sqlx::query("SELECT last_number FROM entry_sequences WHERE tenant_id = $1 FOR UPDATE")
        .bind(tenant_id.as_uuid())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_tenant_ledger", e))?;
    Ok(())
}

async fn count_open_lines<'e, E>(
    executor: E,
    tenant_id: TenantId,
    account_id: AccountId,
    after: Option<NaiveDate>,
) -> StoreResult<u64>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n
        FROM journal_entry_lines l
        JOIN journal_entries e ON e.tenant_id = l.tenant_id AND e.id = l.entry_id
        WHERE l.tenant_id = $1
          AND l.account_id = $2
          AND e.status = 'POSTED'
          AND ($3::date IS NULL OR e.entry_date > $3)
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(account_id.as_uuid())
    .bind(after)
    .fetch_one(executor)
    .await
    .map_err(|e| map_sqlx_error("count_posted_lines_after", e))?;
    from_db_number(col(&row, "n")?, "count")
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PostgresAccountStore {
    pool: Arc<PgPool>,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    let account_type: String = col(row, "account_type")?;
    let parent_id: Option<Uuid> = col(row, "parent_id")?;
    Ok(Account {
        id: AccountId::from_uuid(col(row, "id")?),
        tenant_id: TenantId::from_uuid(col(row, "tenant_id")?),
        code: col(row, "code")?,
        name: col(row, "name")?,
        account_type: parse::<AccountType>(&account_type, "account type")?,
        parent_id: parent_id.map(AccountId::from_uuid),
        is_active: col(row, "is_active")?,
        is_system: col(row, "is_system")?,
    })
}

#[async_trait]
impl AccountStore for PostgresAccountStore {
    #[instrument(skip(self, account), fields(tenant_id = %account.tenant_id, code = %account.code), err)]
    async fn insert(&self, account: &Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (tenant_id, id, code, name, account_type, parent_id, is_active, is_system)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(account.tenant_id.as_uuid())
        .bind(account.id.as_uuid())
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.account_type.as_str())
        .bind(account.parent_id.map(|p| *p.as_uuid()))
        .bind(account.is_active)
        .bind(account.is_system)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_account", e))?;
        Ok(())
    }

    #[instrument(skip(self, account), fields(tenant_id = %account.tenant_id, account_id = %account.id), err)]
    async fn update(&self, account: &Account) -> StoreResult<()> {
        // account_type and code are never rewritten.
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET name = $3, parent_id = $4, is_active = $5
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(account.tenant_id.as_uuid())
        .bind(account.id.as_uuid())
        .bind(&account.name)
        .bind(account.parent_id.map(|p| *p.as_uuid()))
        .bind(account.is_active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_account", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Concurrency(format!(
                "account {} no longer exists",
                account.id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, account_id = %id), err)]
    async fn deactivate(
        &self,
        tenant_id: TenantId,
        id: AccountId,
        closed_through: Option<NaiveDate>,
    ) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        lock_tenant_ledger(&mut tx, tenant_id).await?;

        let lines = count_open_lines(&mut *tx, tenant_id, id, closed_through).await?;
        if lines > 0 {
            return Err(StoreError::AccountInUse { account: id, lines });
        }

        let result = sqlx::query(
            "UPDATE accounts SET is_active = FALSE WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("deactivate_account", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Concurrency(format!("account {id} no longer exists")));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn delete(&self, tenant_id: TenantId, id: AccountId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_account", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list(&self, tenant_id: TenantId) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, id, code, name, account_type, parent_id, is_active, is_system
            FROM accounts
            WHERE tenant_id = $1
            ORDER BY code ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_accounts", e))?;

        rows.iter().map(account_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PostgresJournalStore {
    pool: Arc<PgPool>,
}

impl PostgresJournalStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn load_lines(
        &self,
        tenant_id: TenantId,
        entry_ids: &[Uuid],
    ) -> StoreResult<Vec<JournalEntryLine>> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT id, entry_id, line_no, account_id, description, debit_amount, credit_amount,
                   currency, exchange_rate, base_debit, base_credit
            FROM journal_entry_lines
            WHERE tenant_id = $1 AND entry_id = ANY($2)
            ORDER BY entry_id, line_no ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(entry_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_lines", e))?;

        rows.iter().map(line_from_row).collect()
    }

    async fn attach_lines(
        &self,
        tenant_id: TenantId,
        mut entries: Vec<JournalEntry>,
    ) -> StoreResult<Vec<JournalEntry>> {
        let ids: Vec<Uuid> = entries.iter().map(|e| *e.id.as_uuid()).collect();
        let lines = self.load_lines(tenant_id, &ids).await?;
        distribute_lines(&mut entries, lines);
        Ok(entries)
    }
}

/// Hand each line to its entry, keeping the order lines arrive in.
fn distribute_lines(entries: &mut [JournalEntry], lines: Vec<JournalEntryLine>) {
    let index: HashMap<JournalEntryId, usize> =
        entries.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
    for line in lines {
        if let Some(&i) = index.get(&line.entry_id) {
            entries[i].lines.push(line);
        }
    }
}

const ENTRY_COLUMNS: &str = r#"
    tenant_id, id, entry_number, entry_date, description, reference, source_type, source_id,
    reverses_entry_id, status, created_at, created_by, posted_at, posted_by, voided_at,
    voided_by, void_reason, version
"#;

fn entry_from_row(row: &PgRow) -> StoreResult<JournalEntry> {
    let status: String = col(row, "status")?;
    let reverses: Option<Uuid> = col(row, "reverses_entry_id")?;
    let posted_by: Option<Uuid> = col(row, "posted_by")?;
    let voided_by: Option<Uuid> = col(row, "voided_by")?;
    Ok(JournalEntry {
        id: JournalEntryId::from_uuid(col(row, "id")?),
        tenant_id: TenantId::from_uuid(col(row, "tenant_id")?),
        entry_number: from_db_number(col(row, "entry_number")?, "entry_number")?,
        entry_date: col(row, "entry_date")?,
        description: col(row, "description")?,
        reference: col(row, "reference")?,
        source_type: col(row, "source_type")?,
        source_id: col(row, "source_id")?,
        reverses_entry_id: reverses.map(JournalEntryId::from_uuid),
        status: parse::<EntryStatus>(&status, "entry status")?,
        lines: Vec::new(),
        created_at: col(row, "created_at")?,
        created_by: UserId::from_uuid(col(row, "created_by")?),
        posted_at: col::<Option<DateTime<Utc>>>(row, "posted_at")?,
        posted_by: posted_by.map(UserId::from_uuid),
        voided_at: col::<Option<DateTime<Utc>>>(row, "voided_at")?,
        voided_by: voided_by.map(UserId::from_uuid),
        void_reason: col(row, "void_reason")?,
        version: from_db_number(col(row, "version")?, "version")?,
    })
}

fn line_from_row(row: &PgRow) -> StoreResult<JournalEntryLine> {
    let currency: String = col(row, "currency")?;
    let line_no: i32 = col(row, "line_no")?;
    Ok(JournalEntryLine {
        id: JournalLineId::from_uuid(col(row, "id")?),
        entry_id: JournalEntryId::from_uuid(col(row, "entry_id")?),
        line_no: u32::try_from(line_no)
            .map_err(|_| StoreError::Database(format!("line_no {line_no} out of range")))?,
        account_id: AccountId::from_uuid(col(row, "account_id")?),
        description: col(row, "description")?,
        debit_amount: col(row, "debit_amount")?,
        credit_amount: col(row, "credit_amount")?,
        currency: parse::<CurrencyCode>(currency.trim(), "currency")?,
        exchange_rate: col(row, "exchange_rate")?,
        base_debit: col(row, "base_debit")?,
        base_credit: col(row, "base_credit")?,
    })
}

async fn insert_lines(
    tx: &mut Transaction<'_, Postgres>,
    entry: &JournalEntry,
) -> StoreResult<()> {
    for line in &entry.lines {
        sqlx::query(
            r#"
            INSERT INTO journal_entry_lines (
                tenant_id, id, entry_id, line_no, account_id, description,
                debit_amount, credit_amount, currency, exchange_rate, base_debit, base_credit
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.tenant_id.as_uuid())
        .bind(line.id.as_uuid())
        .bind(entry.id.as_uuid())
        .bind(line.line_no as i32)
        .bind(line.account_id.as_uuid())
        .bind(&line.description)
        .bind(line.debit_amount)
        .bind(line.credit_amount)
        .bind(line.currency.as_str())
        .bind(line.exchange_rate)
        .bind(line.base_debit)
        .bind(line.base_credit)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_line", e))?;
    }
    Ok(())
}

#[async_trait]
impl JournalStore for PostgresJournalStore {
    #[instrument(skip(self, entry), fields(tenant_id = %entry.tenant_id, entry_id = %entry.id), err)]
    async fn insert_draft(&self, mut entry: JournalEntry) -> StoreResult<JournalEntry> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            r#"
            INSERT INTO entry_sequences (tenant_id, last_number)
            VALUES ($1, 1)
            ON CONFLICT (tenant_id)
            DO UPDATE SET last_number = entry_sequences.last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(entry.tenant_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("next_entry_number", e))?;
        entry.entry_number = from_db_number(col(&row, "last_number")?, "entry_number")?;

        sqlx::query(
            r#"
            INSERT INTO journal_entries (
                tenant_id, id, entry_number, entry_date, description, reference, source_type,
                source_id, reverses_entry_id, status, created_at, created_by, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.tenant_id.as_uuid())
        .bind(entry.id.as_uuid())
        .bind(to_db_number(entry.entry_number, "entry_number")?)
        .bind(entry.entry_date)
        .bind(&entry.description)
        .bind(&entry.reference)
        .bind(&entry.source_type)
        .bind(&entry.source_id)
        .bind(entry.reverses_entry_id.map(|id| *id.as_uuid()))
        .bind(entry.status.as_str())
        .bind(entry.created_at)
        .bind(entry.created_by.as_uuid())
        .bind(to_db_number(entry.version, "version")?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_entry", e))?;

        insert_lines(&mut tx, &entry).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(entry)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get(&self, tenant_id: TenantId, id: JournalEntryId) -> StoreResult<Option<JournalEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_entry", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let entry = entry_from_row(&row)?;
        Ok(self.attach_lines(tenant_id, vec![entry]).await?.pop())
    }

    #[instrument(skip(self, entry), fields(tenant_id = %entry.tenant_id, entry_id = %entry.id), err)]
    async fn save(&self, entry: &JournalEntry, expected: ExpectedVersion) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            "SELECT status, version FROM journal_entries WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(entry.tenant_id.as_uuid())
        .bind(entry.id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_entry", e))?
        .ok_or_else(|| StoreError::Concurrency(format!("entry {} no longer exists", entry.id)))?;

        let stored_status: String = col(&row, "status")?;
        let stored_status = parse::<EntryStatus>(&stored_status, "entry status")?;
        let stored_version = from_db_number(col(&row, "version")?, "version")?;
        expected
            .check(stored_version)
            .map_err(|e| StoreError::Concurrency(e.to_string()))?;

        match stored_status {
            EntryStatus::Draft => {
                if entry.status == EntryStatus::Posted {
                    lock_tenant_ledger(&mut tx, entry.tenant_id).await?;
                    let account_ids: Vec<Uuid> =
                        entry.lines.iter().map(|l| *l.account_id.as_uuid()).collect();
                    let inactive = sqlx::query(
                        "SELECT id FROM accounts WHERE tenant_id = $1 AND id = ANY($2) AND NOT is_active LIMIT 1",
                    )
                    .bind(entry.tenant_id.as_uuid())
                    .bind(&account_ids)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("check_active_accounts", e))?;
                    if let Some(row) = inactive {
                        return Err(StoreError::AccountInactive(AccountId::from_uuid(col(&row, "id")?)));
                    }
                }

                sqlx::query(
                    r#"
                    UPDATE journal_entries
                    SET entry_date = $3, description = $4, reference = $5, status = $6,
                        posted_at = $7, posted_by = $8, version = $9
                    WHERE tenant_id = $1 AND id = $2
                    "#,
                )
                .bind(entry.tenant_id.as_uuid())
                .bind(entry.id.as_uuid())
                .bind(entry.entry_date)
                .bind(&entry.description)
                .bind(&entry.reference)
                .bind(entry.status.as_str())
                .bind(entry.posted_at)
                .bind(entry.posted_by.map(|u| *u.as_uuid()))
                .bind(to_db_number(entry.version, "version")?)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_entry", e))?;

                sqlx::query("DELETE FROM journal_entry_lines WHERE tenant_id = $1 AND entry_id = $2")
                    .bind(entry.tenant_id.as_uuid())
                    .bind(entry.id.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("replace_lines", e))?;
                insert_lines(&mut tx, entry).await?;
            }
            EntryStatus::Posted if entry.status == EntryStatus::Voided => {
                sqlx::query(
                    r#"
                    UPDATE journal_entries
                    SET status = $3, voided_at = $4, voided_by = $5, void_reason = $6, version = $7
                    WHERE tenant_id = $1 AND id = $2
                    "#,
                )
                .bind(entry.tenant_id.as_uuid())
                .bind(entry.id.as_uuid())
                .bind(entry.status.as_str())
                .bind(entry.voided_at)
                .bind(entry.voided_by.map(|u| *u.as_uuid()))
                .bind(&entry.void_reason)
                .bind(to_db_number(entry.version, "version")?)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("void_entry", e))?;
            }
            status => {
                return Err(StoreError::Conflict(format!(
                    "entry {} is {status} and cannot change to {}",
                    entry.id, entry.status
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn delete_draft(&self, tenant_id: TenantId, id: JournalEntryId) -> StoreResult<bool> {
        // Lines go with the entry (ON DELETE CASCADE).
        let result = sqlx::query(
            "DELETE FROM journal_entries WHERE tenant_id = $1 AND id = $2 AND status = 'DRAFT'",
        )
        .bind(tenant_id.as_uuid())
        .bind(id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_draft", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
    async fn list(&self, tenant_id: TenantId, filter: &EntryFilter) -> StoreResult<Vec<JournalEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM journal_entries
            WHERE tenant_id = $1
              AND ($2::date IS NULL OR entry_date >= $2)
              AND ($3::date IS NULL OR entry_date <= $3)
              AND ($4::text IS NULL OR status = $4)
              AND ($5::text IS NULL OR source_type = $5)
              AND ($6::text IS NULL OR source_id = $6)
            ORDER BY entry_number ASC
            LIMIT $7 OFFSET $8
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(&filter.source_type)
        .bind(&filter.source_id)
        .bind(i64::from(filter.pagination.limit))
        .bind(i64::from(filter.pagination.offset))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_entries", e))?;

        let entries = rows.iter().map(entry_from_row).collect::<StoreResult<Vec<_>>>()?;
        self.attach_lines(tenant_id, entries).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn posted_lines(&self, tenant_id: TenantId, window: DateWindow) -> StoreResult<Vec<PostedLine>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id AS entry_id, e.entry_number, e.entry_date, l.line_no, l.account_id,
                   COALESCE(NULLIF(l.description, ''), e.description) AS description,
                   l.base_debit, l.base_credit
            FROM journal_entry_lines l
            JOIN journal_entries e ON e.tenant_id = l.tenant_id AND e.id = l.entry_id
            WHERE l.tenant_id = $1
              AND e.status = 'POSTED'
              AND ($2::date IS NULL OR e.entry_date >= $2)
              AND e.entry_date <= $3
            ORDER BY e.entry_number ASC, l.line_no ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(window.start())
        .bind(window.end())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("posted_lines", e))?;

        rows.iter()
            .map(|row| {
                let line_no: i32 = col(row, "line_no")?;
                Ok(PostedLine {
                    entry_id: JournalEntryId::from_uuid(col(row, "entry_id")?),
                    entry_number: from_db_number(col(row, "entry_number")?, "entry_number")?,
                    entry_date: col(row, "entry_date")?,
                    line_no: u32::try_from(line_no).map_err(|_| {
                        StoreError::Database(format!("line_no {line_no} out of range"))
                    })?,
                    account_id: AccountId::from_uuid(col(row, "account_id")?),
                    description: col(row, "description")?,
                    base_debit: col::<Decimal>(row, "base_debit")?,
                    base_credit: col::<Decimal>(row, "base_credit")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn count_lines(&self, tenant_id: TenantId, account_id: AccountId) -> StoreResult<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM journal_entry_lines WHERE tenant_id = $1 AND account_id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(account_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_lines", e))?;
        from_db_number(col(&row, "n")?, "count")
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn count_posted_lines_after(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
        after: Option<NaiveDate>,
    ) -> StoreResult<u64> {
        count_open_lines(&*self.pool, tenant_id, account_id, after).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn has_entries(&self, tenant_id: TenantId) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM journal_entries WHERE tenant_id = $1) AS present",
        )
        .bind(tenant_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_entries", e))?;
        col(&row, "present")
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PostgresSettingsStore {
    pool: Arc<PgPool>,
}

impl PostgresSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl SettingsStore for PostgresSettingsStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get(&self, tenant_id: TenantId) -> StoreResult<Option<TenantSettings>> {
        let row = sqlx::query(
            "SELECT base_currency, books_closed_through FROM tenant_settings WHERE tenant_id = $1",
        )
        .bind(tenant_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_settings", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let base: String = col(&row, "base_currency")?;
        Ok(Some(TenantSettings {
            tenant_id,
            base_currency: parse::<CurrencyCode>(base.trim(), "base currency")?,
            books_closed_through: col(&row, "books_closed_through")?,
        }))
    }

    #[instrument(skip(self, settings), fields(tenant_id = %settings.tenant_id), err)]
    async fn upsert(&self, settings: &TenantSettings) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_settings (tenant_id, base_currency, books_closed_through)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id)
            DO UPDATE SET
                base_currency = EXCLUDED.base_currency,
                books_closed_through = EXCLUDED.books_closed_through,
                updated_at = NOW()
            "#,
        )
        .bind(settings.tenant_id.as_uuid())
        .bind(settings.base_currency.as_str())
        .bind(settings.books_closed_through)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_settings", e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Invoices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PostgresInvoiceSource {
    pool: Arc<PgPool>,
}

impl PostgresInvoiceSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn invoice_kind_str(kind: InvoiceKind) -> &'static str {
    match kind {
        InvoiceKind::Sales => "SALES",
        InvoiceKind::Purchase => "PURCHASE",
    }
}

#[async_trait]
impl InvoiceSource for PostgresInvoiceSource {
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn open_invoices(
        &self,
        tenant_id: TenantId,
        kind: InvoiceKind,
        as_of: NaiveDate,
    ) -> StoreResult<Vec<InvoiceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, invoice_number, contact_id, contact_name, issue_date, due_date,
                   currency, total, amount_paid
            FROM invoices
            WHERE tenant_id = $1 AND kind = $2 AND status = 'OPEN' AND issue_date <= $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(invoice_kind_str(kind))
        .bind(as_of)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("open_invoices", e))?;

        rows.iter()
            .map(|row| {
                let currency: String = col(row, "currency")?;
                Ok(InvoiceRecord {
                    id: InvoiceId::from_uuid(col(row, "id")?),
                    tenant_id,
                    invoice_number: col(row, "invoice_number")?,
                    contact_id: ContactId::from_uuid(col(row, "contact_id")?),
                    contact_name: col(row, "contact_name")?,
                    kind,
                    issue_date: col(row, "issue_date")?,
                    due_date: col(row, "due_date")?,
                    currency: parse::<CurrencyCode>(currency.trim(), "currency")?,
                    total: col(row, "total")?,
                    amount_paid: col(row, "amount_paid")?,
                    status: tally_ledger::statements::InvoiceStatus::Open,
                })
            })
            .collect()
    }
}
