//! Broadcast brokers for block and event notifications.
use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        RwLock,
    },
    task::{Context, Poll},
};

use tokio::sync::mpsc;
use tokio_stream::Stream;

/// A non-replaying broadcast broker.
///
/// New subscribers only observe messages broadcast after they subscribed.
/// Each subscriber gets its own unbounded buffer, so a slow subscriber can
/// never stall the broadcaster; subscribers that went away are purged on
/// the next broadcast.
pub struct Broker<T> {
    subscribers: RwLock<HashMap<usize, mpsc::UnboundedSender<T>>>,
    last_id: AtomicUsize,
}

impl<T> Broker<T>
where
    T: Clone + Send + 'static,
{
    /// Create a new broker with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            last_id: AtomicUsize::new(0),
        }
    }

    /// Send the given value to all current subscribers.
    pub fn broadcast(&self, value: T) {
        // Send notifications and collect channels which have been closed.
        let closed_ids: Vec<usize> = {
            let subscribers = self.subscribers.read().unwrap();
            subscribers
                .iter()
                .filter(|&(_, subscriber)| subscriber.send(value.clone()).is_err())
                .map(|(&id, _)| id)
                .collect()
        };

        // Cleanup any closed subscribers.
        if !closed_ids.is_empty() {
            let mut subscribers = self.subscribers.write().unwrap();
            for id in closed_ids {
                subscribers.remove(&id);
            }
        }
    }

    /// Create a new subscription.
    pub fn subscribe(&self) -> Subscription<T> {
        self.subscribe_ex(|_| {})
    }

    /// Create a new subscription, seeding its channel from the passed
    /// callback.
    ///
    /// The callback runs under the broker lock, so any messages it sends
    /// are guaranteed to precede all live broadcasts.
    pub fn subscribe_ex<F>(&self, seed: F) -> Subscription<T>
    where
        F: FnOnce(&mpsc::UnboundedSender<T>),
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.last_id.fetch_add(1, Ordering::SeqCst);

        let mut subscribers = self.subscribers.write().unwrap();
        seed(&sender);
        subscribers.insert(id, sender);

        Subscription { receiver }
    }
}

impl<T> Default for Broker<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A handle to a single broker subscription.
///
/// Dropping the subscription releases its buffer; the broker forgets the
/// subscriber on its next broadcast.
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Receive the next message, or `None` once the broker has gone away.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Explicitly stop receiving messages.
    ///
    /// Messages already buffered can still be received; new broadcasts
    /// will no longer be delivered.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast() {
        let broker: Broker<u64> = Broker::new();
        let mut first = broker.subscribe();
        let mut second = broker.subscribe();

        broker.broadcast(42);

        assert_eq!(first.recv().await, Some(42));
        assert_eq!(second.recv().await, Some(42));
    }

    #[tokio::test]
    async fn test_non_replaying() {
        let broker: Broker<u64> = Broker::new();
        broker.broadcast(1);

        let mut sub = broker.subscribe();
        broker.broadcast(2);

        assert_eq!(sub.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_subscribe_ex_seeds_before_live() {
        let broker: Broker<u64> = Broker::new();
        let mut sub = broker.subscribe_ex(|sender| {
            let _ = sender.send(1);
            let _ = sender.send(2);
        });
        broker.broadcast(3);

        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, Some(2));
        assert_eq!(sub.recv().await, Some(3));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_purged() {
        let broker: Broker<u64> = Broker::new();
        let sub = broker.subscribe();
        drop(sub);

        // Must not panic or grow the subscriber table.
        broker.broadcast(1);
        assert!(broker.subscribers.read().unwrap().is_empty());
    }
}
