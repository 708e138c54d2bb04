//! In-memory event bus for tests/dev.

use std::sync::{Mutex, MutexGuard, PoisonError, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InMemoryBusError {
    /// Every subscriber has hung up; nothing received the message.
    #[error("no live subscribers")]
    NoSubscribers,
}

type Filter<M> = Box<dyn Fn(&M) -> bool + Send + Sync>;

struct Subscriber<M> {
    sender: mpsc::Sender<M>,
    filter: Option<Filter<M>>,
}

impl<M: Clone> Subscriber<M> {
    /// Delivers if the filter accepts; `false` once the receiver is gone.
    fn offer(&self, message: &M) -> bool {
        if self.filter.as_ref().is_some_and(|accept| !accept(message)) {
            return true;
        }
        self.sender.send(message.clone()).is_ok()
    }
}

/// Broadcast bus over std channels.
///
/// Each subscription gets every message published after it was created, or
/// only those its filter accepts (`subscribe_where`). Hung-up subscribers are
/// pruned on the next publish.
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    // The list is valid after any panic (push and retain only), so a poisoned
    // lock is taken over rather than reported.
    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber<M>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to the messages `accept` returns `true` for, e.g. one tenant's
    /// envelopes or one event type.
    pub fn subscribe_where(&self, accept: impl Fn(&M) -> bool + Send + Sync + 'static) -> Subscription<M> {
        let filter: Filter<M> = Box::new(accept);
        self.attach(Some(filter))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn attach(&self, filter: Option<Filter<M>>) -> Subscription<M> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers().push(Subscriber { sender, filter });
        Subscription::new(receiver)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    /// Publishing with nobody listening is fine; publishing after every
    /// subscriber hung up is reported so the caller can log it.
    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers();
        if subs.is_empty() {
            return Ok(());
        }
        subs.retain(|s| s.offer(&message));
        if subs.is_empty() {
            return Err(InMemoryBusError::NoSubscribers);
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        self.attach(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_each_message() {
        let bus = InMemoryEventBus::<u32>::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(7).unwrap();

        assert_eq!(a.try_recv().unwrap(), 7);
        assert_eq!(b.try_recv().unwrap(), 7);
    }

    #[test]
    fn filtered_subscriptions_skip_other_messages() {
        let bus = InMemoryEventBus::<u32>::new();
        let even = bus.subscribe_where(|n| n % 2 == 0);

        for n in 1..=4 {
            bus.publish(n).unwrap();
        }

        assert_eq!(even.try_recv().unwrap(), 2);
        assert_eq!(even.try_recv().unwrap(), 4);
        assert!(even.try_recv().is_err());
    }

    #[test]
    fn hung_up_subscribers_are_pruned() {
        let bus = InMemoryEventBus::<u32>::new();
        drop(bus.subscribe());
        let live = bus.subscribe();

        bus.publish(1).unwrap();
        assert_eq!(live.try_recv().unwrap(), 1);
        assert_eq!(bus.subscriber_count(), 1);

        drop(live);
        assert_eq!(bus.publish(2), Err(InMemoryBusError::NoSubscribers));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(3), Ok(()));
    }
}
