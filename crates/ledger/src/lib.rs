//! `tally-ledger`: double-entry ledger domain.
//!
//! Pure domain logic, no IO: the chart of accounts, the journal entry aggregate and
//! its posting state machine, currency conversion, balance aggregation and the
//! statements derived from posted lines. Persistence and orchestration live in
//! `tally-infra`.

pub mod account;
pub mod balance;
pub mod currency;
pub mod error;
pub mod journal;
pub mod settings;
pub mod statements;

pub use account::{
    Account, AccountType, AccountUpdate, ChartOfAccounts, NewAccount, NormalSide, normal_side,
};
pub use balance::{AccountBalance, BalanceTotals, DateWindow, PostedLine};
pub use currency::{CurrencyCode, to_base};
pub use error::{LedgerError, LedgerResult};
pub use journal::{
    DraftUpdate, EntryStatus, JournalCommand, JournalEntry, JournalEntryLine, JournalEntryPosted,
    JournalEntryVoided, JournalEvent, NewJournalEntry, NewJournalLine, PostEntry, VoidEntry,
};
pub use settings::TenantSettings;
