/// The consensus core.
///
/// Block delivery, proposal validation, voting rules, QC formation, the
/// three-chain commit rule, and pipelining — all as a single `&mut self`
/// driven struct with no internal locking: a single-threaded cooperative
/// event loop owns all consensus state mutation. Tree topology (who to vote
/// to, leader identity) and networking are owned by sibling modules; this
/// core only decides *what* to do, not *who to tell*.

use crate::block::Block;
use crate::config::ReplicaConfig;
use crate::crypto::hash::Hash;
use crate::crypto::scheme::{CryptoError, PartialCert, QuorumCert};
use crate::store::{Store, StoreError};
use crate::ReplicaId;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("block {0} references an ancestor not yet delivered")]
    MissingAncestor(Hash),
}

/// Outcome of processing one delivered proposal.
#[derive(Default)]
pub struct ProposalOutcome {
    /// `Some` iff the safety rules permitted a vote; carries the partial
    /// certificate to send upward (or merge locally, if self).
    pub vote: Option<PartialCert>,
    /// Blocks newly committed by this proposal's three-chain check, in
    /// ascending height order: B and all uncommitted ancestors up to
    /// `b_exec`.
    pub committed: Vec<Hash>,
}

/// Outcome of a QC crossing a vote threshold.
pub struct QcOutcome {
    pub sealed: QuorumCert,
    /// Non-empty only when this consensus core is the tree root and the
    /// completed QC belongs to the front of `piped_queue` or unblocks a
    /// chain of deferred `rdy_queue` entries.
    pub piped_resolved: Vec<Hash>,
}

pub struct ConsensusCore {
    pub config: ReplicaConfig,
    pub store: Store,
    b0: Hash,
    b_lock: Hash,
    b_exec: Hash,
    hqc: Hash,
    vheight: u64,
    tails: HashSet<Hash>,
    /// Speculative blocks the leader has proposed ahead of quorum, in
    /// proposal order.
    piped_queue: VecDeque<Hash>,
    /// Blocks whose QC completed out of order, deferred until their
    /// ancestor is released from `piped_queue`.
    rdy_queue: Vec<Hash>,
    qc_waiting: std::collections::HashMap<Hash, Vec<oneshot::Sender<()>>>,
    last_proposal_at: Instant,
}

impl ConsensusCore {
    pub fn new(config: ReplicaConfig) -> Self {
        let store = Store::with_genesis();
        let genesis = Hash::genesis();
        let mut tails = HashSet::new();
        tails.insert(genesis);
        ConsensusCore {
            config,
            store,
            b0: genesis,
            b_lock: genesis,
            b_exec: genesis,
            hqc: genesis,
            vheight: 0,
            tails,
            piped_queue: VecDeque::new(),
            rdy_queue: Vec::new(),
            qc_waiting: std::collections::HashMap::new(),
            last_proposal_at: Instant::now(),
        }
    }

    pub fn genesis(&self) -> Hash {
        self.b0
    }
    pub fn b_lock(&self) -> Hash {
        self.b_lock
    }
    pub fn b_exec(&self) -> Hash {
        self.b_exec
    }
    pub fn hqc(&self) -> Hash {
        self.hqc
    }
    pub fn vheight(&self) -> u64 {
        self.vheight
    }
    pub fn tails(&self) -> &HashSet<Hash> {
        &self.tails
    }
    pub fn piped_queue(&self) -> &VecDeque<Hash> {
        &self.piped_queue
    }

    fn height_of(&self, hash: &Hash) -> Result<u64, ConsensusError> {
        Ok(self.store.require(hash)?.block.height)
    }

    /// Inserts a delivered block (proposal or fetched ancestor) and resolves
    /// its `qc_ref`, the resolved block pointer for `qc`'s target. Idempotent.
    /// Retains the primary-parent edge on first insertion.
    pub fn record_block(&mut self, block: Block) -> Result<(), ConsensusError> {
        let hash = block.hash;
        let already_present = self.store.contains(&hash);
        let primary_parent = block.primary_parent();
        let qc_ref = block.qc.as_ref().map(|q| q.obj_hash);
        let record = self.store.insert(block);
        record.qc_ref = qc_ref;
        record.delivered = true;
        if !already_present {
            if let Some(parent) = primary_parent {
                self.store.retain(&parent);
            }
            self.tails.insert(hash);
            if let Some(parent) = primary_parent {
                self.tails.remove(&parent);
            }
        }
        Ok(())
    }

    /// Processes a delivered proposal: runs the three-chain commit check,
    /// then the per-height safety vote rule.
    pub fn on_receive_proposal(&mut self, block: Block) -> Result<ProposalOutcome, ConsensusError> {
        let hash = block.hash;
        let height = block.height;
        self.record_block(block)?;

        let committed = self.run_three_chain(hash)?;

        let vote = if self.should_vote(hash, height)? {
            self.vheight = height;
            self.store.require_mut(&hash)?.voted.insert(self.config.this_id);
            let part = self.config.keypair.sign_part(hash);
            debug!(?hash, height, "voted for proposal");
            Some(part)
        } else {
            debug!(?hash, height, vheight = self.vheight, "declined to vote");
            None
        };

        Ok(ProposalOutcome { vote, committed })
    }

    /// Safety rule: `height > vheight` AND (liveness rule OR extends the
    /// locked branch).
    fn should_vote(&self, block_hash: Hash, height: u64) -> Result<bool, ConsensusError> {
        if height <= self.vheight {
            return Ok(false);
        }
        let record = self.store.require(&block_hash)?;
        let qc_ref = match record.qc_ref {
            Some(h) => h,
            // No QC at all only ever happens for the first block proposed
            // over genesis (genesis itself is pre-seeded, never routed
            // through here) — nothing to safety-check yet, so vote.
            None => return Ok(record.block.primary_parent() == Some(self.b0)),
        };
        let qc_ref_height = self.height_of(&qc_ref)?;
        let b_lock_height = self.height_of(&self.b_lock)?;
        if qc_ref_height > b_lock_height {
            return Ok(true);
        }
        self.extends_locked(block_hash)
    }

    /// Walks the primary-parent chain from `from` up to `b_lock`'s height
    /// and checks it passes through `b_lock` itself.
    fn extends_locked(&self, from: Hash) -> Result<bool, ConsensusError> {
        let b_lock_height = self.height_of(&self.b_lock)?;
        let mut current = from;
        loop {
            let rec = self.store.require(&current)?;
            if rec.block.height == b_lock_height {
                return Ok(current == self.b_lock);
            }
            if rec.block.height < b_lock_height {
                return Ok(false);
            }
            current = rec
                .block
                .primary_parent()
                .ok_or(ConsensusError::MissingAncestor(current))?;
        }
    }

    /// Three-chain commit rule. `block_hash` is the just received proposal
    /// (`B*`/`nblk`).
    fn run_three_chain(&mut self, block_hash: Hash) -> Result<Vec<Hash>, ConsensusError> {
        let b_double_prime = match self.store.require(&block_hash)?.qc_ref {
            Some(h) => h,
            None => return Ok(Vec::new()),
        };
        let b_prime = match self.store.require(&b_double_prime)?.qc_ref {
            Some(h) => h,
            None => return Ok(Vec::new()),
        };
        let b = match self.store.require(&b_prime)?.qc_ref {
            Some(h) => h,
            None => return Ok(Vec::new()),
        };
        if self.store.require(&b)?.decision {
            return Ok(Vec::new());
        }

        // update_hqc(B'', B*.qc)
        if self.height_of(&b_double_prime)? > self.height_of(&self.hqc)? {
            self.hqc = b_double_prime;
        }

        if self.height_of(&b_prime)? > self.height_of(&self.b_lock)? {
            self.b_lock = b_prime;
        }

        let b_double_prime_primary = self.store.require(&b_double_prime)?.block.primary_parent();
        let b_prime_primary = self.store.require(&b_prime)?.block.primary_parent();
        if b_double_prime_primary == Some(b_prime) && b_prime_primary == Some(b) {
            return self.commit_chain(b);
        }
        Ok(Vec::new())
    }

    /// Commits `target` and every uncommitted ancestor down to `b_exec`, in
    /// ascending height order. Once committed a block is never rolled back.
    /// A walk that cannot reach `b_exec` is a safety violation and indicates
    /// a bug or concurrent safety breach, so this fails stop via panic
    /// rather than limping on with corrupted state.
    fn commit_chain(&mut self, target: Hash) -> Result<Vec<Hash>, ConsensusError> {
        let mut chain = Vec::new();
        let mut current = target;
        loop {
            if current == self.b_exec {
                break;
            }
            let rec = self.store.require(&current)?;
            if rec.decision {
                panic!(
                    "safety violation: {:?} is already decided but lies strictly between b_exec {:?} and commit target {:?}",
                    current, self.b_exec, target
                );
            }
            chain.push(current);
            current = match rec.block.primary_parent() {
                Some(p) => p,
                None => panic!(
                    "safety violation: commit walk from {:?} could not reach b_exec {:?}",
                    target, self.b_exec
                ),
            };
        }
        chain.reverse();
        for &h in &chain {
            self.store.require_mut(&h)?.mark_decided();
        }
        if let Some(&last) = chain.last() {
            self.b_exec = last;
            info!(height = self.height_of(&last)?, "committed block");
        }
        Ok(chain)
    }

    // ---- Vote aggregation ----

    /// Adds a direct vote toward `block_hash`'s QC. Returns the sealed QC
    /// once `threshold` is reached; `compute()` is called at most once and
    /// only after threshold is reached. `threshold` is `nmajority` at the
    /// tree root, or `numberOfChildren + 1` at an internal node — supplied by
    /// the caller, which owns tree topology.
    pub fn add_vote(
        &mut self,
        block_hash: Hash,
        part: PartialCert,
        threshold: usize,
    ) -> Result<Option<QuorumCert>, ConsensusError> {
        self.fold_into_self_qc(block_hash, threshold, |qc| qc.add_part(part))
    }

    /// Merges a relayed partial aggregate.
    pub fn add_relay(
        &mut self,
        block_hash: Hash,
        aggregate: &QuorumCert,
        threshold: usize,
    ) -> Result<Option<QuorumCert>, ConsensusError> {
        self.fold_into_self_qc(block_hash, threshold, |qc| qc.merge(aggregate))
    }

    fn fold_into_self_qc(
        &mut self,
        block_hash: Hash,
        threshold: usize,
        apply: impl FnOnce(&mut QuorumCert) -> Result<(), CryptoError>,
    ) -> Result<Option<QuorumCert>, ConsensusError> {
        let record = self.store.require_mut(&block_hash)?;
        if record.self_qc.is_none() {
            record.self_qc = Some(QuorumCert::new(
                self.config.scheme,
                block_hash,
                self.config.nreplicas,
            ));
        }
        let qc = record.self_qc.as_mut().expect("just initialized");
        let was_below = !qc.has_n(threshold);
        apply(qc)?;
        let crossed = was_below && qc.has_n(threshold);
        if !crossed {
            return Ok(None);
        }
        qc.compute()?;
        Ok(Some(qc.clone()))
    }

    /// Registers interest in `block_hash`'s QC completing.
    pub fn await_qc(&mut self, block_hash: Hash) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.qc_waiting.entry(block_hash).or_default().push(tx);
        rx
    }

    fn resolve_qc_waiting(&mut self, block_hash: Hash) {
        if let Some(waiters) = self.qc_waiting.remove(&block_hash) {
            for tx in waiters {
                let _ = tx.send(());
            }
        }
    }

    /// Leader-side bookkeeping once `block_hash`'s QC has sealed past
    /// threshold at the tree root: updates `hqc` if height exceeds, then
    /// resolves the `qc_waiting` future for that block, preserving
    /// pipelining's ordering guarantee.
    pub fn on_qc_sealed_at_root(&mut self, block_hash: Hash) -> Result<Vec<Hash>, ConsensusError> {
        if self.height_of(&block_hash)? > self.height_of(&self.hqc)? {
            self.hqc = block_hash;
        }
        let resolved = self.on_piped_qc_complete(block_hash);
        for &h in &resolved {
            self.resolve_qc_waiting(h);
        }
        if resolved.is_empty() {
            // Not part of the pipeline (e.g. a non-speculative happy-path
            // proposal) — still resolve its own waiters directly.
            self.resolve_qc_waiting(block_hash);
        }
        Ok(resolved)
    }

    /// Advances `piped_queue`/`rdy_queue`: pops contiguous-from-the-front
    /// completions, deferring out-of-order ones.
    fn on_piped_qc_complete(&mut self, block_hash: Hash) -> Vec<Hash> {
        let mut resolved = Vec::new();
        if self.piped_queue.front() == Some(&block_hash) {
            self.piped_queue.pop_front();
            resolved.push(block_hash);
            loop {
                match self.piped_queue.front().copied() {
                    Some(next) if self.rdy_queue.contains(&next) => {
                        self.rdy_queue.retain(|h| *h != next);
                        self.piped_queue.pop_front();
                        resolved.push(next);
                    }
                    _ => break,
                }
            }
        } else if self.piped_queue.contains(&block_hash) {
            self.rdy_queue.push(block_hash);
        }
        resolved
    }

    // ---- Pipelining proposal policy (leader only) ----

    /// Whether the leader may propose now, per the pipelining policy.
    pub fn can_beat(&self, pipeline_depth: usize, piped_latency: Duration) -> bool {
        if self.piped_queue.len() > pipeline_depth {
            return false;
        }
        if self.piped_queue.is_empty() && self.last_proposal_at.elapsed() < piped_latency {
            return false;
        }
        true
    }

    /// The primary parent for the next speculative proposal: the highest
    /// among `hqc` and every block in `piped_queue`.
    pub fn next_primary_parent(&self) -> Result<Hash, ConsensusError> {
        let mut best = self.hqc;
        let mut best_height = self.height_of(&best)?;
        for h in &self.piped_queue {
            let height = self.height_of(h)?;
            if height > best_height {
                best = *h;
                best_height = height;
            }
        }
        Ok(best)
    }

    /// Records that a new speculative block has been proposed, inserting it
    /// into `piped_queue` and retaining it.
    pub fn begin_piped_proposal(&mut self, block_hash: Hash) {
        self.piped_queue.push_back(block_hash);
        self.store.retain(&block_hash);
        self.last_proposal_at = Instant::now();
    }

    /// The QC a new speculative proposal should carry: a clone of `hqc`'s
    /// QC. Piped blocks carry a cloned `hqc.qc` as their own `qc`; they do
    /// not advance the commit chain until their own QC materializes.
    pub fn hqc_qc_for_piping(&self) -> Option<QuorumCert> {
        self.store.get(&self.hqc).and_then(|r| r.self_qc.clone())
    }

    pub fn is_decided(&self, hash: &Hash) -> bool {
        self.store.get(hash).map(|r| r.decision).unwrap_or(false)
    }

    pub fn is_delivered(&self, hash: &Hash) -> bool {
        self.store.get(hash).map(|r| r.delivered).unwrap_or(false)
    }
}
