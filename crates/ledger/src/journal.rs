//! Journal entries, their lines, and the DRAFT → POSTED → VOIDED state machine.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::{
    AccountId, Aggregate, AggregateRoot, JournalEntryId, JournalLineId, TenantId, UserId,
};
use tally_events::Event;

use crate::account::ChartOfAccounts;
use crate::currency::{AMOUNT_SCALE, CurrencyCode, RATE_SCALE, significant_scale, to_base};
use crate::error::{LedgerError, LedgerResult};
use crate::settings::TenantSettings;

/// Aggregate type tag used on published envelopes.
pub const AGGREGATE_TYPE: &str = "ledger.journal_entry";

/// `source_type` stamped on entries produced by `reversal_draft`.
pub const REVERSAL_SOURCE: &str = "reversal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Draft,
    Posted,
    Voided,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Draft => "DRAFT",
            EntryStatus::Posted => "POSTED",
            EntryStatus::Voided => "VOIDED",
        }
    }
}

impl core::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for EntryStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(EntryStatus::Draft),
            "POSTED" => Ok(EntryStatus::Posted),
            "VOIDED" => Ok(EntryStatus::Voided),
            other => Err(LedgerError::validation(format!("unknown entry status '{other}'"))),
        }
    }
}

/// Line as submitted by a producing module.
///
/// Exactly one of `debit`/`credit` must be non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournalLine {
    pub account_id: AccountId,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub debit: Decimal,
    #[serde(default)]
    pub credit: Decimal,
    pub currency: String,
    #[serde(default = "one")]
    pub exchange_rate: Decimal,
}

fn one() -> Decimal {
    Decimal::ONE
}

impl NewJournalLine {
    pub fn debit(account_id: AccountId, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            account_id,
            description: None,
            debit: amount,
            credit: Decimal::ZERO,
            currency: currency.into(),
            exchange_rate: Decimal::ONE,
        }
    }

    pub fn credit(account_id: AccountId, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            account_id,
            description: None,
            debit: Decimal::ZERO,
            credit: amount,
            currency: currency.into(),
            exchange_rate: Decimal::ONE,
        }
    }

    pub fn at_rate(mut self, exchange_rate: Decimal) -> Self {
        self.exchange_rate = exchange_rate;
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Input for `CreateDraftEntry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub entry_date: NaiveDate,
    pub description: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub reverses_entry_id: Option<JournalEntryId>,
    pub lines: Vec<NewJournalLine>,
}

impl NewJournalEntry {
    pub fn new(entry_date: NaiveDate, description: impl Into<String>, lines: Vec<NewJournalLine>) -> Self {
        Self {
            entry_date,
            description: description.into(),
            reference: None,
            source_type: None,
            source_id: None,
            reverses_entry_id: None,
            lines,
        }
    }

    pub fn with_source(mut self, source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Draft edit. `lines`, when present, must keep the same account set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftUpdate {
    #[serde(default)]
    pub entry_date: Option<NaiveDate>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reference: Option<Option<String>>,
    #[serde(default)]
    pub lines: Option<Vec<NewJournalLine>>,
}

/// One side of a journal entry. Immutable once the entry is posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryLine {
    pub id: JournalLineId,
    pub entry_id: JournalEntryId,
    pub line_no: u32,
    pub account_id: AccountId,
    pub description: Option<String>,
    pub debit_amount: Decimal,
    pub credit_amount: Decimal,
    pub currency: CurrencyCode,
    pub exchange_rate: Decimal,
    pub base_debit: Decimal,
    pub base_credit: Decimal,
}

impl JournalEntryLine {
    pub fn is_debit(&self) -> bool {
        self.debit_amount > Decimal::ZERO
    }

    /// Base amounts recomputed from the captured rate.
    fn recomputed(&self) -> LedgerResult<Self> {
        Ok(Self {
            base_debit: to_base(self.debit_amount, self.exchange_rate)?,
            base_credit: to_base(self.credit_amount, self.exchange_rate)?,
            ..self.clone()
        })
    }
}

/// Validate the structural shape of a submitted line and price it in base currency.
fn build_line(
    entry_id: JournalEntryId,
    line_no: u32,
    line: NewJournalLine,
    base_currency: &CurrencyCode,
) -> LedgerResult<JournalEntryLine> {
    if line.debit < Decimal::ZERO || line.credit < Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "line {line_no}: amounts must not be negative"
        )));
    }
    match (line.debit > Decimal::ZERO, line.credit > Decimal::ZERO) {
        (true, true) => {
            return Err(LedgerError::validation(format!(
                "line {line_no}: a line carries either a debit or a credit, not both"
            )));
        }
        (false, false) => {
            return Err(LedgerError::validation(format!(
                "line {line_no}: amount must be positive"
            )));
        }
        _ => {}
    }
    if line.exchange_rate <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "line {line_no}: exchange rate must be positive"
        )));
    }
    let amount = line.debit.max(line.credit);
    if significant_scale(amount) > AMOUNT_SCALE {
        return Err(LedgerError::validation(format!(
            "line {line_no}: amount {amount} has more than {AMOUNT_SCALE} decimal places"
        )));
    }
    if significant_scale(line.exchange_rate) > RATE_SCALE {
        return Err(LedgerError::validation(format!(
            "line {line_no}: exchange rate {} has more than {RATE_SCALE} decimal places",
            line.exchange_rate
        )));
    }
    let currency = CurrencyCode::parse(&line.currency)
        .map_err(|e| LedgerError::validation(format!("line {line_no}: {e}")))?;
    if &currency == base_currency && line.exchange_rate != Decimal::ONE {
        return Err(LedgerError::validation(format!(
            "line {line_no}: base-currency lines must use exchange rate 1"
        )));
    }

    Ok(JournalEntryLine {
        id: JournalLineId::new(),
        entry_id,
        line_no,
        account_id: line.account_id,
        description: line.description.filter(|d| !d.trim().is_empty()),
        base_debit: to_base(line.debit, line.exchange_rate)?,
        base_credit: to_base(line.credit, line.exchange_rate)?,
        debit_amount: line.debit,
        credit_amount: line.credit,
        currency,
        exchange_rate: line.exchange_rate,
    })
}

fn build_lines(
    entry_id: JournalEntryId,
    lines: Vec<NewJournalLine>,
    base_currency: &CurrencyCode,
) -> LedgerResult<Vec<JournalEntryLine>> {
    if lines.is_empty() {
        return Err(LedgerError::validation("journal entry must have lines"));
    }
    lines
        .into_iter()
        .enumerate()
        .map(|(idx, line)| build_line(entry_id, idx as u32 + 1, line, base_currency))
        .collect()
}

/// Base-currency totals of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryTotals {
    pub base_debit: Decimal,
    pub base_credit: Decimal,
}

impl EntryTotals {
    pub fn of(lines: &[JournalEntryLine]) -> Self {
        lines.iter().fold(Self::default(), |acc, l| Self {
            base_debit: acc.base_debit + l.base_debit,
            base_credit: acc.base_credit + l.base_credit,
        })
    }

    pub fn is_balanced(&self) -> bool {
        self.base_debit == self.base_credit
    }
}

/// Aggregate root: a single journal entry and its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: JournalEntryId,
    pub tenant_id: TenantId,
    /// Tenant-scoped sequence; 0 until the store assigns it.
    pub entry_number: u64,
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub reverses_entry_id: Option<JournalEntryId>,
    pub status: EntryStatus,
    pub lines: Vec<JournalEntryLine>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub posted_at: Option<DateTime<Utc>>,
    pub posted_by: Option<UserId>,
    pub voided_at: Option<DateTime<Utc>>,
    pub voided_by: Option<UserId>,
    pub void_reason: Option<String>,
    pub version: u64,
}

impl JournalEntry {
    /// Build a DRAFT from producer input. Structural validation only; account
    /// existence and balance are checked by the caller and at post time.
    pub fn draft(
        tenant_id: TenantId,
        created_by: UserId,
        created_at: DateTime<Utc>,
        input: NewJournalEntry,
        base_currency: &CurrencyCode,
    ) -> LedgerResult<Self> {
        let description = input.description.trim().to_string();
        if description.is_empty() {
            return Err(LedgerError::validation("journal entry description must not be empty"));
        }
        let id = JournalEntryId::new();
        let lines = build_lines(id, input.lines, base_currency)?;

        Ok(Self {
            id,
            tenant_id,
            entry_number: 0,
            entry_date: input.entry_date,
            description,
            reference: input.reference,
            source_type: input.source_type,
            source_id: input.source_id,
            reverses_entry_id: input.reverses_entry_id,
            status: EntryStatus::Draft,
            lines,
            created_at,
            created_by,
            posted_at: None,
            posted_by: None,
            voided_at: None,
            voided_by: None,
            void_reason: None,
            version: 0,
        })
    }

    pub fn totals(&self) -> EntryTotals {
        EntryTotals::of(&self.lines)
    }

    pub fn account_ids(&self) -> BTreeSet<AccountId> {
        self.lines.iter().map(|l| l.account_id).collect()
    }

    /// Edit a DRAFT in place. Replacing lines is only allowed when the set of
    /// referenced accounts stays the same; otherwise the producer must delete
    /// and recreate the draft.
    pub fn update_draft(&mut self, update: DraftUpdate, base_currency: &CurrencyCode) -> LedgerResult<()> {
        if self.status != EntryStatus::Draft {
            return Err(LedgerError::InvalidTransition {
                from: self.status,
                action: "edit",
            });
        }

        let lines = match update.lines {
            Some(lines) => {
                let rebuilt = build_lines(self.id, lines, base_currency)?;
                let accounts: BTreeSet<AccountId> = rebuilt.iter().map(|l| l.account_id).collect();
                if accounts != self.account_ids() {
                    return Err(LedgerError::validation(
                        "draft lines reference a different account set; delete and recreate the draft",
                    ));
                }
                Some(rebuilt)
            }
            None => None,
        };

        let description = match update.description {
            Some(d) if d.trim().is_empty() => {
                return Err(LedgerError::validation("journal entry description must not be empty"));
            }
            Some(d) => Some(d.trim().to_string()),
            None => None,
        };

        if let Some(date) = update.entry_date {
            self.entry_date = date;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(reference) = update.reference {
            self.reference = reference;
        }
        if let Some(lines) = lines {
            self.lines = lines;
        }
        self.version += 1;
        Ok(())
    }

    /// Deletion guard: only drafts may disappear.
    pub fn ensure_deletable(&self) -> LedgerResult<()> {
        if self.status != EntryStatus::Draft {
            return Err(LedgerError::InvalidTransition {
                from: self.status,
                action: "delete",
            });
        }
        Ok(())
    }

    /// Every referenced account exists, belongs to the tenant and is active.
    pub fn check_accounts(&self, chart: &ChartOfAccounts) -> LedgerResult<()> {
        for line in &self.lines {
            chart.ensure_postable(self.tenant_id, line.account_id)?;
        }
        Ok(())
    }

    /// Producer input for an entry that cancels this one out.
    pub fn reversal_draft(&self, entry_date: NaiveDate) -> LedgerResult<NewJournalEntry> {
        if self.status != EntryStatus::Posted {
            return Err(LedgerError::NotPosted);
        }
        let lines = self
            .lines
            .iter()
            .map(|l| NewJournalLine {
                account_id: l.account_id,
                description: l.description.clone(),
                debit: l.credit_amount,
                credit: l.debit_amount,
                currency: l.currency.to_string(),
                exchange_rate: l.exchange_rate,
            })
            .collect();

        Ok(NewJournalEntry {
            entry_date,
            description: format!("Reversal of entry #{}: {}", self.entry_number, self.description),
            reference: self.reference.clone(),
            source_type: Some(REVERSAL_SOURCE.to_string()),
            source_id: Some(self.id.to_string()),
            reverses_entry_id: Some(self.id),
            lines,
        })
    }
}

impl AggregateRoot for JournalEntry {
    type Id = JournalEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: post a DRAFT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEntry {
    pub posted_by: UserId,
    pub posted_at: DateTime<Utc>,
    pub settings: TenantSettings,
}

/// Command: void a POSTED entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidEntry {
    pub voided_by: UserId,
    pub voided_at: DateTime<Utc>,
    pub reason: String,
    pub settings: TenantSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalCommand {
    Post(PostEntry),
    Void(VoidEntry),
}

/// Event: JournalEntryPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryPosted {
    pub tenant_id: TenantId,
    pub entry_id: JournalEntryId,
    pub entry_number: u64,
    pub entry_date: NaiveDate,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub base_total: Decimal,
    /// Lines with base amounts recomputed at post time.
    pub lines: Vec<JournalEntryLine>,
    pub posted_by: UserId,
    pub posted_at: DateTime<Utc>,
}

/// Event: JournalEntryVoided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryVoided {
    pub tenant_id: TenantId,
    pub entry_id: JournalEntryId,
    pub entry_number: u64,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub voided_by: UserId,
    pub voided_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEvent {
    Posted(JournalEntryPosted),
    Voided(JournalEntryVoided),
}

impl Event for JournalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            JournalEvent::Posted(_) => "ledger.journal_entry.posted",
            JournalEvent::Voided(_) => "ledger.journal_entry.voided",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            JournalEvent::Posted(e) => e.posted_at,
            JournalEvent::Voided(e) => e.voided_at,
        }
    }
}

impl Aggregate for JournalEntry {
    type Command = JournalCommand;
    type Event = JournalEvent;
    type Error = LedgerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            JournalEvent::Posted(e) => {
                self.lines = e.lines.clone();
                self.status = EntryStatus::Posted;
                self.posted_at = Some(e.posted_at);
                self.posted_by = Some(e.posted_by);
            }
            JournalEvent::Voided(e) => {
                self.status = EntryStatus::Voided;
                self.voided_at = Some(e.voided_at);
                self.voided_by = Some(e.voided_by);
                self.void_reason = Some(e.reason.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            JournalCommand::Post(cmd) => self.handle_post(cmd),
            JournalCommand::Void(cmd) => self.handle_void(cmd),
        }
    }
}

impl JournalEntry {
    fn ensure_tenant(&self, settings: &TenantSettings) -> LedgerResult<()> {
        if settings.tenant_id != self.tenant_id {
            return Err(LedgerError::Domain(tally_core::DomainError::invariant(
                "tenant mismatch",
            )));
        }
        Ok(())
    }

    fn handle_post(&self, cmd: &PostEntry) -> LedgerResult<Vec<JournalEvent>> {
        self.ensure_tenant(&cmd.settings)?;

        match self.status {
            EntryStatus::Draft => {}
            EntryStatus::Posted => return Err(LedgerError::AlreadyPosted),
            EntryStatus::Voided => {
                return Err(LedgerError::InvalidTransition {
                    from: self.status,
                    action: "post",
                });
            }
        }

        if self.lines.is_empty() {
            return Err(LedgerError::validation("journal entry must have lines"));
        }

        let lines = self
            .lines
            .iter()
            .map(JournalEntryLine::recomputed)
            .collect::<LedgerResult<Vec<_>>>()?;

        let totals = EntryTotals::of(&lines);
        if !totals.is_balanced() {
            return Err(LedgerError::Unbalanced {
                debits: totals.base_debit,
                credits: totals.base_credit,
            });
        }

        cmd.settings.ensure_open(self.entry_date)?;

        Ok(vec![JournalEvent::Posted(JournalEntryPosted {
            tenant_id: self.tenant_id,
            entry_id: self.id,
            entry_number: self.entry_number,
            entry_date: self.entry_date,
            source_type: self.source_type.clone(),
            source_id: self.source_id.clone(),
            base_total: totals.base_debit,
            lines,
            posted_by: cmd.posted_by,
            posted_at: cmd.posted_at,
        })])
    }

    fn handle_void(&self, cmd: &VoidEntry) -> LedgerResult<Vec<JournalEvent>> {
        self.ensure_tenant(&cmd.settings)?;

        match self.status {
            EntryStatus::Posted => {}
            EntryStatus::Draft => return Err(LedgerError::NotPosted),
            EntryStatus::Voided => {
                return Err(LedgerError::InvalidTransition {
                    from: self.status,
                    action: "void",
                });
            }
        }

        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::validation("void reason must not be empty"));
        }

        cmd.settings.ensure_open(self.entry_date)?;

        Ok(vec![JournalEvent::Voided(JournalEntryVoided {
            tenant_id: self.tenant_id,
            entry_id: self.id,
            entry_number: self.entry_number,
            source_type: self.source_type.clone(),
            source_id: self.source_id.clone(),
            voided_by: cmd.voided_by,
            voided_at: cmd.voided_at,
            reason: reason.to_string(),
        })])
    }
}
