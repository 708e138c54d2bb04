//! `tally-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod cancel;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion, Transition};
pub use cancel::Cancellation;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, ContactId, InvoiceId, JournalEntryId, JournalLineId, TenantId, UserId};
pub use value_object::ValueObject;
