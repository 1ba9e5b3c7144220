//! Channel-backed bus for the in-process deployment and for tests.

use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Subscription};

/// The subscriber list is unusable because a publisher panicked while
/// holding the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InMemoryBusError;

/// Broadcast bus over unbounded std channels.
///
/// Each subscriber owns its receiver; publishing clones the message once per
/// subscriber and never blocks. Subscribers whose receiver has been dropped
/// are removed on the next publish.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    senders: Mutex<Vec<mpsc::Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut senders = self.senders.lock().map_err(|_| InMemoryBusError)?;
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        // Recover from a poisoned list rather than losing the subscription;
        // the list itself is still structurally valid.
        let mut senders = self
            .senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        senders.push(tx);
        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_fans_out_to_all_subscribers() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(7).unwrap();

        assert_eq!(a.try_recv().unwrap(), 7);
        assert_eq!(b.try_recv().unwrap(), 7);
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let a = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(1).unwrap();
        bus.publish(2).unwrap();

        assert_eq!(a.try_recv().unwrap(), 1);
        assert_eq!(a.try_recv().unwrap(), 2);
    }
}
