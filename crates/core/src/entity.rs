//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Accounts and journal entries are entities: two accounts with the same code in
/// different tenants are still different accounts.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
