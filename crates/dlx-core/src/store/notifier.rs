//! Per-subscriber change-event fan-out with drop-oldest-on-full semantics.
//!
//! Each subscriber owns a bounded ring buffer guarded by its own lock, so a
//! slow subscriber only ever drops its own oldest events and never blocks
//! the store's committing caller.

use super::sqlite::DownloadRecord;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Upsert(Box<DownloadRecord>),
    Delete(i64),
}

struct Subscriber {
    queue: Mutex<VecDeque<ChangeEvent>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

#[derive(Default)]
pub struct Notifier {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Arc<Subscriber>>>,
}

impl Notifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(self: &Arc<Self>, buffer: usize) -> (ChangeReceiver, Unsubscribe) {
        let subscriber = Arc::new(Subscriber {
            queue: Mutex::new(VecDeque::with_capacity(buffer.max(1))),
            notify: Notify::new(),
            capacity: buffer.max(1),
            closed: AtomicBool::new(false),
        });
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().insert(id, subscriber.clone());
        let receiver = ChangeReceiver {
            subscriber: subscriber.clone(),
        };
        let unsubscribe = Unsubscribe {
            notifier: self.clone(),
            id,
        };
        (receiver, unsubscribe)
    }

    /// Delivers `event` to every live subscriber, dropping each subscriber's
    /// oldest buffered event if it hasn't kept up.
    pub fn emit(&self, event: ChangeEvent) {
        let subscribers = self.subscribers.lock().unwrap();
        for sub in subscribers.values() {
            if sub.closed.load(Ordering::Acquire) {
                continue;
            }
            {
                let mut queue = sub.queue.lock().unwrap();
                if queue.len() >= sub.capacity {
                    queue.pop_front();
                }
                queue.push_back(event.clone());
            }
            sub.notify.notify_one();
        }
    }

    fn remove(&self, id: u64) {
        self.subscribers.lock().unwrap().remove(&id);
    }
}

pub struct ChangeReceiver {
    subscriber: Arc<Subscriber>,
}

impl ChangeReceiver {
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            if let Some(event) = self.subscriber.queue.lock().unwrap().pop_front() {
                return Some(event);
            }
            if self.subscriber.closed.load(Ordering::Acquire) {
                return None;
            }
            self.subscriber.notify.notified().await;
        }
    }
}

pub struct Unsubscribe {
    notifier: Arc<Notifier>,
    id: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        self.notifier.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_in_order() {
        let notifier = Notifier::new();
        let (mut rx, _unsub) = notifier.subscribe(8);
        notifier.emit(ChangeEvent::Delete(1));
        notifier.emit(ChangeEvent::Delete(2));
        assert!(matches!(rx.recv().await, Some(ChangeEvent::Delete(1))));
        assert!(matches!(rx.recv().await, Some(ChangeEvent::Delete(2))));
    }

    #[tokio::test]
    async fn drops_oldest_when_buffer_full() {
        let notifier = Notifier::new();
        let (mut rx, _unsub) = notifier.subscribe(2);
        notifier.emit(ChangeEvent::Delete(1));
        notifier.emit(ChangeEvent::Delete(2));
        notifier.emit(ChangeEvent::Delete(3)); // should evict 1
        assert!(matches!(rx.recv().await, Some(ChangeEvent::Delete(2))));
        assert!(matches!(rx.recv().await, Some(ChangeEvent::Delete(3))));
    }

    #[tokio::test]
    async fn unsubscribe_concurrent_with_emit_does_not_panic() {
        let notifier = Notifier::new();
        let (_rx, unsub) = notifier.subscribe(4);
        let n2 = notifier.clone();
        let emitter = tokio::spawn(async move {
            for i in 0..200 {
                n2.emit(ChangeEvent::Delete(i));
            }
        });
        unsub.unsubscribe();
        emitter.await.unwrap();
    }
}
