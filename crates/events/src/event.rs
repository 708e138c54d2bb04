use chrono::{DateTime, Utc};

/// A fact emitted by an aggregate transition.
///
/// Ledger events are never edited once stored; a correction is a new event
/// (a void, or a reversing entry). `version` tracks payload schema changes so
/// subscribers can keep decoding older envelopes.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted type name, e.g. `ledger.journal_entry.posted`.
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Wall-clock time of the transition.
    fn occurred_at(&self) -> DateTime<Utc>;
}
