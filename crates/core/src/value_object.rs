//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. Currency codes,
/// account-code ranges and base-currency amounts are value objects in the ledger: a
/// `CurrencyCode("EUR")` is interchangeable with any other `CurrencyCode("EUR")`.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct CurrencyCode(String);
///
/// impl ValueObject for CurrencyCode {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
