/// Command ingress & batching.
///
/// An MPSC queue of `(cmd_hash, decision_callback)` pairs, `blk_size`-bounded
/// batching into a final buffer that the pacemaker hands to `beat()`.

use crate::crypto::hash::Hash;
use tokio::sync::mpsc;

/// What a submitted command's callback is eventually invoked with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Finality {
    /// The command was included in a block at `height`, at list position
    /// `idx`, and that block has since been committed.
    Decided { height: u64, idx: usize },
    /// This replica is not the leader; the client should resubmit to the
    /// leader. Non-leader replicas forward an empty-finality acknowledgement
    /// immediately.
    NotLeader,
}

pub type DecisionCallback = Box<dyn FnOnce(Finality) + Send>;

pub struct Entry {
    pub cmd_hash: Hash,
    pub payload: Vec<u8>,
    pub callback: DecisionCallback,
}

/// Producer handle, cloneable across client-facing tasks.
#[derive(Clone)]
pub struct IngressHandle {
    tx: mpsc::UnboundedSender<Entry>,
}

impl IngressHandle {
    pub fn submit(&self, cmd_hash: Hash, payload: Vec<u8>, callback: DecisionCallback) {
        let _ = self.tx.send(Entry {
            cmd_hash,
            payload,
            callback,
        });
    }
}

/// The single-consumer side, owned by the replica's event loop.
pub struct IngressQueue {
    rx: mpsc::UnboundedReceiver<Entry>,
    /// Commands collected so far for the next block, capped at `blk_size`.
    pending: Vec<Entry>,
    blk_size: usize,
}

impl IngressQueue {
    pub fn new(blk_size: usize) -> (IngressHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            IngressHandle { tx },
            IngressQueue {
                rx,
                pending: Vec::new(),
                blk_size: blk_size.max(1),
            },
        )
    }

    /// Waits for at least one command to arrive, for use in the dispatcher's
    /// `tokio::select!`.
    pub async fn recv(&mut self) -> Option<Entry> {
        self.rx.recv().await
    }

    /// Drains everything already queued into `pending`, without blocking.
    pub fn drain_available(&mut self) {
        while self.pending.len() < self.blk_size {
            match self.rx.try_recv() {
                Ok(entry) => self.pending.push(entry),
                Err(_) => break,
            }
        }
    }

    pub fn push(&mut self, entry: Entry) {
        self.pending.push(entry);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.blk_size
    }

    /// Promotes pending commands into a batch ready for `beat()`, up to
    /// `blk_size` commands. Returns `None` if nothing is pending.
    pub fn take_batch(&mut self) -> Option<Vec<Entry>> {
        if self.pending.is_empty() {
            return None;
        }
        let take = self.pending.len().min(self.blk_size);
        Some(self.pending.drain(0..take).collect())
    }
}

/// Immediately acknowledges a submission with `Finality::NotLeader`.
pub fn ack_not_leader(entry: Entry) {
    (entry.callback)(Finality::NotLeader);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn capturing_callback() -> (DecisionCallback, Arc<Mutex<Option<Finality>>>) {
        let slot = Arc::new(Mutex::new(None));
        let slot2 = slot.clone();
        let cb: DecisionCallback = Box::new(move |f| {
            *slot2.lock().unwrap() = Some(f);
        });
        (cb, slot)
    }

    #[tokio::test]
    async fn batches_up_to_blk_size() {
        let (handle, mut queue) = IngressQueue::new(2);
        for i in 0..3u8 {
            let (cb, _) = capturing_callback();
            handle.submit(Hash::new([i; 32]), vec![i], cb);
        }
        queue.drain_available();
        assert!(queue.is_full());
        let batch = queue.take_batch().unwrap();
        assert_eq!(batch.len(), 2);
        // the third command is still pending
        queue.drain_available();
        assert_eq!(queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn not_leader_ack_fires_immediately() {
        let (cb, slot) = capturing_callback();
        let entry = Entry {
            cmd_hash: Hash::new([1u8; 32]),
            payload: vec![1],
            callback: cb,
        };
        ack_not_leader(entry);
        assert_eq!(*slot.lock().unwrap(), Some(Finality::NotLeader));
    }

    #[tokio::test]
    async fn empty_queue_yields_no_batch() {
        let (_handle, mut queue) = IngressQueue::new(4);
        assert!(queue.take_batch().is_none());
    }
}
