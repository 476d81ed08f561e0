//! Outbox: per-recipient priority queues of messages awaiting transmission.
//!
//! Ordering within one recipient's queue:
//!   1. higher priority first, regardless of age
//!   2. then earlier `created` first (FIFO within a priority band)
//!   3. then enqueue order, for entries created in the same instant
//!
//! Expired entries are dropped lazily, when `pop` walks past them.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use house_core::{HouseIdentifier, Message};

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A message held by the outbox, stamped with its lifetime.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    message: Message,
    created: Instant,
    expiry: Instant,
    seq: u64,
}

impl PendingMessage {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn expiry(&self) -> Instant {
        self.expiry
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expiry <= now
    }
}

// Max-heap order: the entry that must leave first compares greatest.
impl Ord for PendingMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.message
            .priority()
            .cmp(&other.message.priority())
            .then_with(|| other.created.cmp(&self.created))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PendingMessage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingMessage {}

/// Messages waiting to be delivered, one queue per recipient.
///
/// Every mutation goes through a single lock over the whole map. The lock is
/// synchronous and never held across an await.
pub struct MessageOutbox {
    queues: Mutex<HashMap<HouseIdentifier, BinaryHeap<PendingMessage>>>,
    observer: Mutex<Option<mpsc::UnboundedSender<HouseIdentifier>>>,
    next_seq: AtomicU64,
    default_expiry: Duration,
}

impl MessageOutbox {
    pub fn new(default_expiry: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            observer: Mutex::new(None),
            next_seq: AtomicU64::new(0),
            default_expiry,
        }
    }

    /// Register the observer notified with the recipient of every enqueue.
    /// Replaces any previous observer.
    ///
    /// A notification is a hint: by the time it is handled the message may
    /// already have been popped or expired.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<HouseIdentifier> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.observer.lock() = Some(tx);
        rx
    }

    /// Enqueue with the default expiry. An expiry too far out to represent
    /// is capped at roughly a century.
    pub fn add(&self, message: Message) {
        let now = Instant::now();
        let expires_at = now
            .checked_add(self.default_expiry)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        self.enqueue(message, expires_at);
    }

    pub fn enqueue(&self, message: Message, expires_at: Instant) {
        let recipient = message.recipient();
        let pending = PendingMessage {
            message,
            created: Instant::now(),
            expiry: expires_at,
            seq: self.next_seq.fetch_add(1, AtomicOrdering::Relaxed),
        };
        tracing::trace!(recipient, "message enqueued");
        self.queues.lock().entry(recipient).or_default().push(pending);
        self.notify(recipient);
    }

    /// Highest-ordered unexpired message for `recipient`. Expired entries
    /// met along the way are discarded for good.
    pub fn pop(&self, recipient: HouseIdentifier) -> Option<PendingMessage> {
        let now = Instant::now();
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(&recipient)?;

        let mut found = None;
        while let Some(pending) = queue.pop() {
            if pending.is_expired_at(now) {
                tracing::debug!(recipient, "discarding expired message");
                continue;
            }
            found = Some(pending);
            break;
        }
        if queue.is_empty() {
            queues.remove(&recipient);
        }
        found
    }

    /// Put back a message that was popped but not delivered. Its timestamps
    /// are kept, so it returns to its original place in the order.
    pub fn backlog(&self, pending: PendingMessage) {
        let recipient = pending.message.recipient();
        self.queues.lock().entry(recipient).or_default().push(pending);
    }

    /// Total queued entries across all recipients. Over-counts: entries that
    /// expired in place are included until a pop discards them.
    pub fn upper_bound_count(&self) -> usize {
        self.queues.lock().values().map(BinaryHeap::len).sum()
    }

    fn notify(&self, recipient: HouseIdentifier) {
        let mut observer = self.observer.lock();
        if let Some(tx) = observer.as_ref() {
            if tx.send(recipient).is_err() {
                *observer = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use house_core::{Priority, ServiceBundle};
    use std::sync::Arc;

    fn message(recipient: HouseIdentifier, priority: Priority, tag: u8) -> Message {
        Message::new(recipient, priority, ServiceBundle::new(1, 1, vec![tag]).unwrap())
    }

    fn tag(pending: &PendingMessage) -> u8 {
        pending.message().bundle().data()[0]
    }

    fn outbox() -> MessageOutbox {
        MessageOutbox::new(Duration::from_secs(60))
    }

    #[test]
    fn unrepresentable_default_expiry_never_expires() {
        let outbox = MessageOutbox::new(Duration::MAX);
        outbox.add(message(6, Priority::Normal, 1));
        let pending = outbox.pop(6).unwrap();
        assert!(pending.expiry() > Instant::now() + Duration::from_secs(3600));
    }

    #[test]
    fn safety_critical_leaves_first() {
        let outbox = outbox();
        outbox.add(message(5, Priority::Normal, 1));
        outbox.add(message(5, Priority::SafetyCritical, 2));
        outbox.add(message(5, Priority::Normal, 3));

        assert_eq!(tag(&outbox.pop(5).unwrap()), 2);
        assert_eq!(tag(&outbox.pop(5).unwrap()), 1);
        assert_eq!(tag(&outbox.pop(5).unwrap()), 3);
        assert!(outbox.pop(5).is_none());
    }

    #[test]
    fn relational_operators_agree() {
        let t0 = Instant::now();
        let pending = |priority, offset_ms, seq| PendingMessage {
            message: message(1, priority, 0),
            created: t0 + Duration::from_millis(offset_ms),
            expiry: t0 + Duration::from_secs(60),
            seq,
        };
        let all = [
            pending(Priority::SafetyCritical, 0, 0),
            pending(Priority::SafetyCritical, 5, 1),
            pending(Priority::SafetyCritical, 5, 2),
            pending(Priority::Normal, 0, 3),
            pending(Priority::Normal, 9, 4),
        ];

        for a in &all {
            for b in &all {
                assert_eq!(a > b, b < a);
                assert_eq!(a >= b, !(a < b));
                assert_eq!(a <= b, !(a > b));
                assert_eq!(a == b, a.cmp(b) == Ordering::Equal);
            }
        }
        // Listed from first-out to last-out.
        assert!(all.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn fifo_within_priority_band() {
        let outbox = outbox();
        for i in 0..50 {
            outbox.add(message(9, Priority::Normal, i));
        }
        for i in 0..50 {
            assert_eq!(tag(&outbox.pop(9).unwrap()), i);
        }
    }

    #[test]
    fn recipients_are_independent() {
        let outbox = outbox();
        outbox.add(message(2, Priority::Normal, 1));
        outbox.add(message(3, Priority::SafetyCritical, 2));

        assert_eq!(tag(&outbox.pop(2).unwrap()), 1);
        assert!(outbox.pop(2).is_none());
        assert_eq!(tag(&outbox.pop(3).unwrap()), 2);
        assert!(outbox.pop(4).is_none());
    }

    #[test]
    fn expired_message_is_discarded_on_pop() {
        let outbox = outbox();
        outbox.enqueue(
            message(7, Priority::Normal, 1),
            Instant::now() + Duration::from_millis(500),
        );
        std::thread::sleep(Duration::from_secs(1));

        assert_eq!(outbox.upper_bound_count(), 1);
        assert!(outbox.pop(7).is_none());
        assert_eq!(outbox.upper_bound_count(), 0);
    }

    #[test]
    fn unexpired_message_survives() {
        let outbox = outbox();
        outbox.enqueue(
            message(7, Priority::Normal, 1),
            Instant::now() + Duration::from_secs(2),
        );
        std::thread::sleep(Duration::from_secs(1));

        assert_eq!(tag(&outbox.pop(7).unwrap()), 1);
    }

    #[test]
    fn pop_skips_expired_to_reach_valid_entry() {
        let outbox = outbox();
        outbox.enqueue(message(4, Priority::SafetyCritical, 1), Instant::now());
        outbox.add(message(4, Priority::Normal, 2));

        assert_eq!(tag(&outbox.pop(4).unwrap()), 2);
        assert_eq!(outbox.upper_bound_count(), 0);
    }

    #[test]
    fn backlog_restores_original_position() {
        let outbox = outbox();
        outbox.add(message(6, Priority::Normal, 1));
        outbox.add(message(6, Priority::Normal, 2));

        let first = outbox.pop(6).unwrap();
        let created = first.created();
        outbox.add(message(6, Priority::Normal, 3));
        outbox.backlog(first);

        let again = outbox.pop(6).unwrap();
        assert_eq!(tag(&again), 1);
        assert_eq!(again.created(), created);
        assert_eq!(tag(&outbox.pop(6).unwrap()), 2);
        assert_eq!(tag(&outbox.pop(6).unwrap()), 3);
    }

    #[test]
    fn upper_bound_count_sums_all_queues() {
        let outbox = outbox();
        outbox.add(message(2, Priority::Normal, 0));
        outbox.add(message(2, Priority::Normal, 1));
        outbox.add(message(3, Priority::Normal, 2));
        assert_eq!(outbox.upper_bound_count(), 3);
        outbox.pop(2);
        assert_eq!(outbox.upper_bound_count(), 2);
    }

    #[test]
    fn concurrent_enqueues_are_all_poppable() {
        let outbox = Arc::new(outbox());
        let threads: Vec<_> = (0..460u32)
            .map(|i| {
                let outbox = Arc::clone(&outbox);
                std::thread::spawn(move || {
                    let priority = if i % 2 == 0 {
                        Priority::Normal
                    } else {
                        Priority::SafetyCritical
                    };
                    outbox.add(message(11, priority, (i % 256) as u8));
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(outbox.upper_bound_count(), 460);
        let mut popped = Vec::new();
        for _ in 0..460 {
            popped.push(outbox.pop(11).expect("every enqueued message pops"));
        }
        assert!(outbox.pop(11).is_none());
        assert!(popped
            .windows(2)
            .all(|w| w[0].message().priority() >= w[1].message().priority()));
    }

    #[tokio::test]
    async fn enqueue_notifies_subscriber() {
        let outbox = outbox();
        let mut rx = outbox.subscribe();
        outbox.add(message(12, Priority::Normal, 0));
        outbox.add(message(13, Priority::Normal, 0));
        assert_eq!(rx.recv().await, Some(12));
        assert_eq!(rx.recv().await, Some(13));
    }

    #[test]
    fn enqueue_without_subscriber_still_queues() {
        let outbox = outbox();
        drop(outbox.subscribe());
        outbox.add(message(12, Priority::Normal, 0));
        assert_eq!(outbox.upper_bound_count(), 1);
    }
}
