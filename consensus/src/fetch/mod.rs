/// On-demand ancestor/QC-referent retrieval.
///
/// The same `Arc<RwLock<...>>`-free, timeout-driven retry idiom as the rest
/// of this crate's off-loop machinery, applied to a per-hash fetch-context
/// model rather than a height-range catch-up protocol. Each missing hash
/// gets a `tokio::sync::oneshot`-backed future, resolved once the block
/// arrives by any path; on timeout (randomized around `fetch_timeout`) the
/// request is broadcast to every peer known to have held the object.

use crate::block::Block;
use crate::ReplicaId;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub struct PendingFetch {
    /// Every peer known to have delivered or referenced this hash — the
    /// candidate set for a broadcast retry.
    holders: HashSet<ReplicaId>,
    waiters: Vec<oneshot::Sender<Block>>,
    generation: u64,
}

/// Tracks in-flight fetches and drives their retry timers.
pub struct FetchEngine {
    base_timeout: Duration,
    pending: HashMap<crate::crypto::hash::Hash, PendingFetch>,
    timeout_tx: mpsc::UnboundedSender<(crate::crypto::hash::Hash, u64)>,
    timeout_rx: mpsc::UnboundedReceiver<(crate::crypto::hash::Hash, u64)>,
}

type Hash = crate::crypto::hash::Hash;

impl FetchEngine {
    pub fn new(base_timeout: Duration) -> Self {
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        FetchEngine {
            base_timeout,
            pending: HashMap::new(),
            timeout_tx,
            timeout_rx,
        }
    }

    /// Randomized jitter around `base_timeout`.
    fn jittered_timeout(&self) -> Duration {
        let base_ms = self.base_timeout.as_millis().max(1) as i64;
        let jitter = rand::thread_rng().gen_range(-(base_ms / 5)..=(base_ms / 5));
        Duration::from_millis((base_ms + jitter).max(1) as u64)
    }

    /// Registers interest in `hash`, first seen from `holder`. Returns a
    /// future that resolves when the block is delivered; if a fetch is
    /// already outstanding for this hash, piggybacks on it instead of
    /// issuing a second request.
    pub fn request(&mut self, hash: Hash, holder: ReplicaId) -> oneshot::Receiver<Block> {
        let (tx, rx) = oneshot::channel();
        if let Some(p) = self.pending.get_mut(&hash) {
            p.holders.insert(holder);
            p.waiters.push(tx);
            return rx;
        }
        let generation = 0;
        let mut holders = HashSet::new();
        holders.insert(holder);
        self.pending.insert(
            hash,
            PendingFetch {
                holders,
                waiters: vec![tx],
                generation,
            },
        );
        self.arm_timer(hash, generation);
        rx
    }

    fn arm_timer(&self, hash: Hash, generation: u64) {
        let timeout = self.jittered_timeout();
        let tx = self.timeout_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send((hash, generation));
        });
    }

    /// Adds an additional known holder without restarting the timer.
    pub fn add_holder(&mut self, hash: Hash, holder: ReplicaId) {
        if let Some(p) = self.pending.get_mut(&hash) {
            p.holders.insert(holder);
        }
    }

    pub fn is_pending(&self, hash: &Hash) -> bool {
        self.pending.contains_key(hash)
    }

    /// Await the next timer firing. Callers drive this from the main
    /// `tokio::select!` dispatch loop alongside network/command events.
    pub async fn next_timeout(&mut self) -> Hash {
        loop {
            match self.timeout_rx.recv().await {
                Some((hash, generation)) => {
                    let still_current = self
                        .pending
                        .get(&hash)
                        .map(|p| p.generation == generation)
                        .unwrap_or(false);
                    if still_current {
                        return hash;
                    }
                    // stale timer for an already-delivered/cancelled fetch
                }
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// On timeout, broadcast to every known holder and rearm the timer.
    /// Returns the broadcast target set.
    pub fn handle_timeout(&mut self, hash: Hash) -> Vec<ReplicaId> {
        let targets = match self.pending.get_mut(&hash) {
            Some(p) => {
                p.generation += 1;
                p.holders.iter().copied().collect::<Vec<_>>()
            }
            None => return Vec::new(),
        };
        warn!(?hash, peers = targets.len(), "fetch timed out, broadcasting retry");
        let generation = self.pending[&hash].generation;
        self.arm_timer(hash, generation);
        targets
    }

    /// Delivers `block`, resolving every waiter and cancelling the fetch.
    /// Fetch futures are cancelled implicitly when a block becomes
    /// delivered by an alternate path.
    pub fn deliver(&mut self, hash: Hash, block: Block) {
        if let Some(p) = self.pending.remove(&hash) {
            debug!(?hash, waiters = p.waiters.len(), "fetch delivered");
            for tx in p.waiters {
                let _ = tx.send(block.clone());
            }
        }
    }

    pub fn holders_of(&self, hash: &Hash) -> Vec<ReplicaId> {
        self.pending
            .get(hash)
            .map(|p| p.holders.iter().copied().collect())
            .unwrap_or_default()
    }
}
