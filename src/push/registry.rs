//! Hash keyed registry of transaction response observers
//!
//! One live subscription per transaction hash. Registration, delivery and
//! removal share a single lock, so a response can never slip in between the
//! steps of a registration. Dropping a subscription removes its entry before
//! `drop` returns.

use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

use crate::push::TransactionResponse;

struct Slot {
    id: u64,
    sender: mpsc::UnboundedSender<TransactionResponse>,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry of observers waiting for a confirmation or rejection
#[derive(Default)]
pub struct ResponseRegistry {
    slots: Slots,
    next_id: AtomicU64,
}

impl ResponseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start observing responses for `hash`.
    ///
    /// A previous subscription for the same hash is replaced; its stream ends.
    pub fn observe(&self, hash: &str) -> ResponseSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        let replaced = lock(&self.slots).insert(hash.to_string(), Slot { id, sender });
        if replaced.is_some() {
            debug!("Replaced response observer for {}", hash);
        }

        ResponseSubscription {
            hash: hash.to_string(),
            id,
            receiver,
            slots: self.slots.clone(),
        }
    }

    /// Deliver a response to the observer of `hash`.
    ///
    /// Returns false when nobody is observing; the response is not buffered.
    pub fn publish(&self, hash: &str, response: TransactionResponse) -> bool {
        let mut slots = lock(&self.slots);
        let Some(slot) = slots.get(hash) else {
            return false;
        };
        if slot.sender.send(response).is_err() {
            slots.remove(hash);
            return false;
        }
        true
    }

    /// Check if someone is observing `hash`
    pub fn is_observed(&self, hash: &str) -> bool {
        lock(&self.slots).contains_key(hash)
    }

    /// Number of live observers
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stream of responses for one transaction hash.
///
/// Deregisters itself on drop.
pub struct ResponseSubscription {
    hash: String,
    id: u64,
    receiver: mpsc::UnboundedReceiver<TransactionResponse>,
    slots: Slots,
}

impl ResponseSubscription {
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Wait for the next response
    pub async fn recv(&mut self) -> Option<TransactionResponse> {
        self.receiver.recv().await
    }

    /// Return an already delivered response without waiting
    pub fn try_recv(&mut self) -> Option<TransactionResponse> {
        self.receiver.try_recv().ok()
    }

    /// Stop observing; same as dropping the subscription
    pub fn dispose(self) {}
}

impl Stream for ResponseSubscription {
    type Item = TransactionResponse;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ResponseSubscription {
    fn drop(&mut self) {
        let mut slots = lock(&self.slots);
        // A newer observer may own the slot by now
        if slots.get(&self.hash).map(|slot| slot.id) == Some(self.id) {
            slots.remove(&self.hash);
            debug!("Removed response observer for {}", self.hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Signature;
    use alloy_primitives::U256;
    use futures::StreamExt;

    fn signature() -> Signature {
        Signature::new(U256::from(12), U256::from(12), 27)
    }

    #[tokio::test]
    async fn test_publish_reaches_observer() {
        let registry = ResponseRegistry::new();
        let mut subscription = registry.observe("0x42");

        assert!(registry.publish("0x42", TransactionResponse::Confirmed(signature())));
        assert_eq!(
            subscription.next().await,
            Some(TransactionResponse::Confirmed(signature()))
        );
    }

    #[test]
    fn test_subscription_pending_until_publish() {
        use tokio_test::{assert_pending, assert_ready_eq, task};

        let registry = ResponseRegistry::new();
        let mut subscription = task::spawn(registry.observe("0x42"));

        assert_pending!(subscription.poll_next());
        registry.publish("0x42", TransactionResponse::Confirmed(signature()));
        assert!(subscription.is_woken());
        assert_ready_eq!(
            subscription.poll_next(),
            Some(TransactionResponse::Confirmed(signature()))
        );
    }

    #[test]
    fn test_publish_without_observer_is_dropped() {
        let registry = ResponseRegistry::new();
        assert!(!registry.publish("0x42", TransactionResponse::Rejected(signature())));

        // Not buffered for late observers
        let mut subscription = registry.observe("0x42");
        assert_eq!(subscription.try_recv(), None);
    }

    #[test]
    fn test_drop_deregisters_immediately() {
        let registry = ResponseRegistry::new();
        let subscription = registry.observe("0x42");
        assert!(registry.is_observed("0x42"));

        subscription.dispose();
        assert!(!registry.is_observed("0x42"));
        assert!(!registry.publish("0x42", TransactionResponse::Confirmed(signature())));
    }

    #[tokio::test]
    async fn test_newer_observer_replaces_older() {
        let registry = ResponseRegistry::new();
        let mut first = registry.observe("0x42");
        let mut second = registry.observe("0x42");

        // Old stream ends once its sender is gone
        assert_eq!(first.next().await, None);

        // Dropping the replaced subscription must not remove the new slot
        drop(first);
        assert!(registry.is_observed("0x42"));

        registry.publish("0x42", TransactionResponse::Rejected(signature()));
        assert_eq!(second.try_recv(), Some(TransactionResponse::Rejected(signature())));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_register_and_publish() {
        let registry = Arc::new(ResponseRegistry::new());
        let mut handles = Vec::new();

        for i in 0..8 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                let hash = format!("0x{}", i);
                let mut subscription = registry.observe(&hash);
                assert!(registry.publish(&hash, TransactionResponse::Confirmed(signature())));
                subscription.try_recv()
            }));
        }

        for handle in handles {
            assert!(handle.join().unwrap().is_some());
        }
        assert!(registry.is_empty());
    }
}
