//! Aggregate traits: decide events from commands, fold them into state, and carry
//! the version a store must still hold when the new state is written back.

use core::fmt;

use crate::error::{DomainError, DomainResult};

pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied since the aggregate was first stored.
    fn version(&self) -> u64;
}

/// The stored version a write was decided against.
///
/// Writers load, decide, then save; if the row moved on in between the save is
/// refused instead of overwriting a concurrent transition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExpectedVersion(u64);

impl ExpectedVersion {
    pub fn exact(version: u64) -> Self {
        Self(version)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn matches(self, stored: u64) -> bool {
        self.0 == stored
    }

    pub fn check(self, stored: u64) -> DomainResult<()> {
        if self.matches(stored) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "expected version {}, found {stored}",
                self.0
            )))
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "version {}", self.0)
    }
}

/// Events decided and applied by `Aggregate::execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<E> {
    /// Version before the events; pass to the store's save.
    pub expected: ExpectedVersion,
    pub events: Vec<E>,
}

/// Pure state machine: no IO.
///
/// `handle` decides, `apply` evolves (one version per event).
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    /// Must not mutate state.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// `handle` then `apply` every resulting event. On error the state is untouched.
    fn execute(&mut self, command: &Self::Command) -> Result<Transition<Self::Event>, Self::Error> {
        let expected = ExpectedVersion::exact(self.version());
        let events = self.handle(command)?;
        for event in &events {
            self.apply(event);
        }
        Ok(Transition { expected, events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        id: u32,
        total: i64,
        version: u64,
    }

    impl AggregateRoot for Counter {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }

        fn version(&self) -> u64 {
            self.version
        }
    }

    impl Aggregate for Counter {
        type Command = i64;
        type Event = i64;
        type Error = DomainError;

        fn apply(&mut self, event: &i64) {
            self.total += event;
            self.version += 1;
        }

        fn handle(&self, command: &i64) -> Result<Vec<i64>, DomainError> {
            if *command == 0 {
                return Err(DomainError::validation("nothing to add"));
            }
            Ok(vec![*command])
        }
    }

    #[test]
    fn stale_version_is_a_conflict() {
        assert!(ExpectedVersion::exact(3).check(3).is_ok());
        let err = ExpectedVersion::exact(2).check(3).unwrap_err();
        assert_eq!(err, DomainError::conflict("expected version 2, found 3"));
    }

    #[test]
    fn execute_records_the_version_it_started_from() {
        let mut counter = Counter::default();
        counter.execute(&5).unwrap();

        let transition = counter.execute(&-2).unwrap();
        assert_eq!(transition.expected, ExpectedVersion::exact(1));
        assert_eq!(transition.events, vec![-2]);
        assert_eq!((counter.total, counter.version), (3, 2));

        assert!(counter.execute(&0).is_err());
        assert_eq!(counter.version, 2);
    }
}
