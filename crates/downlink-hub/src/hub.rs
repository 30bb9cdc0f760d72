use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::message::Payload;

/// Default number of messages queued per subscriber before it counts as
/// lagging.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Fan-out of serialized updates to live subscribers.
///
/// Each subscriber owns a bounded queue. Publishing never waits: a
/// subscriber whose queue is closed or full is dropped from the registry
/// and the others still receive the message. The registry lock is held
/// only to enqueue, never to serialize.
#[derive(Debug)]
pub struct BroadcastHub {
    registry: Mutex<Registry>,
    buffer: usize,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<(u64, mpsc::Sender<Payload>)>,
}

/// Receiving end of one subscription.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Payload>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next message. `None` once the hub has dropped us.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Payload> {
        self.rx.try_recv().ok()
    }
}

/// Outcome of one [`BroadcastHub::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

impl BroadcastHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            buffer: buffer.max(1),
        }
    }

    /// Register a subscriber whose queue starts with `initial`.
    ///
    /// The initial message is enqueued under the registry lock, so no
    /// concurrent publish can reach the subscriber ahead of it.
    pub fn subscribe(&self, initial: Payload) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;

        // A fresh queue always has room for its first message.
        if tx.try_send(initial).is_ok() {
            registry.subscribers.push((id, tx));
            debug!(subscriber = id, total = registry.subscribers.len(), "subscriber joined");
        }
        Subscription { id, rx }
    }

    /// Send `payload` to every subscriber, removing those that fail.
    pub fn publish(&self, payload: &Payload) -> PublishReport {
        let mut report = PublishReport::default();
        let mut registry = self.lock();

        registry.subscribers.retain(|(id, tx)| match tx.try_send(payload.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = id, "subscriber lagging, disconnecting");
                report.dropped += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = id, "subscriber gone");
                report.dropped += 1;
                false
            }
        });

        report
    }

    /// Remove a subscriber explicitly. Returns whether it was registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut registry = self.lock();
        let before = registry.subscribers.len();
        registry.subscribers.retain(|(sub, _)| *sub != id);
        registry.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // The registry stays consistent even if a holder panicked.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> Payload {
        Payload::from(text)
    }

    #[test]
    fn initial_message_comes_first() {
        let hub = BroadcastHub::new(4);
        let mut sub = hub.subscribe(payload("hello"));
        hub.publish(&payload("one"));

        assert_eq!(sub.try_recv().as_deref(), Some("hello"));
        assert_eq!(sub.try_recv().as_deref(), Some("one"));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn closed_subscriber_is_isolated_and_removed() {
        let hub = BroadcastHub::new(4);
        let mut first = hub.subscribe(payload("init"));
        let second = hub.subscribe(payload("init"));
        let mut third = hub.subscribe(payload("init"));
        drop(second);

        let report = hub.publish(&payload("update"));
        assert_eq!(
            report,
            PublishReport {
                delivered: 2,
                dropped: 1
            }
        );
        assert_eq!(hub.subscriber_count(), 2);

        for sub in [&mut first, &mut third] {
            assert_eq!(sub.try_recv().as_deref(), Some("init"));
            assert_eq!(sub.try_recv().as_deref(), Some("update"));
        }
    }

    #[test]
    fn lagging_subscriber_is_dropped() {
        let hub = BroadcastHub::new(2);
        let mut slow = hub.subscribe(payload("init"));
        let mut fast = hub.subscribe(payload("init"));
        fast.try_recv();

        assert_eq!(hub.publish(&payload("a")).delivered, 2);
        fast.try_recv();
        // `slow` still holds init + a; its queue is full.
        let report = hub.publish(&payload("b"));
        assert_eq!(report.dropped, 1);
        assert_eq!(hub.subscriber_count(), 1);

        assert_eq!(slow.try_recv().as_deref(), Some("init"));
        assert_eq!(slow.try_recv().as_deref(), Some("a"));
        assert_eq!(fast.try_recv().as_deref(), Some("b"));
    }

    #[test]
    fn every_subscriber_sees_the_same_order() {
        let hub = BroadcastHub::new(16);
        let mut subs: Vec<_> = (0..3).map(|_| hub.subscribe(payload("init"))).collect();
        for i in 0..10 {
            hub.publish(&payload(&i.to_string()));
        }

        for sub in &mut subs {
            let mut seen = Vec::new();
            while let Some(msg) = sub.try_recv() {
                seen.push(msg.to_string());
            }
            let expected: Vec<String> = std::iter::once("init".to_string())
                .chain((0..10).map(|i| i.to_string()))
                .collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn unsubscribe_removes_once() {
        let hub = BroadcastHub::default();
        let sub = hub.subscribe(payload("init"));
        assert!(hub.unsubscribe(sub.id()));
        assert!(!hub.unsubscribe(sub.id()));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
