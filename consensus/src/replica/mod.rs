/// Top-level replica orchestration: a single cooperative `tokio::select!`
/// dispatcher over five suspension points — inbound wire messages, verified
/// votes, fetch timeouts, fetch deliveries, and the view timer.
///
/// `ConsensusCore`/`Pacemaker`/`FetchEngine`/`IngressQueue` own the protocol
/// bookkeeping; this module only decides which event to react to next and
/// routes primitives between them — no consensus state is mutated outside a
/// call into one of those collaborators.

use crate::block::{qc_to_wire, wire_to_qc, Block};
use crate::config::ReplicaConfig;
use crate::consensus::{ConsensusCore, ConsensusError};
use crate::crypto::hash::Hash;
use crate::crypto::pool::{VerificationPool, VerifyOutcome, VerifyTask};
use crate::crypto::scheme::{PartialCert, QuorumCert};
use crate::fetch::FetchEngine;
use crate::ingress::{ack_not_leader, DecisionCallback, Entry, Finality, IngressHandle, IngressQueue};
use crate::network::wire::{WireMessage, WirePartialCert};
use crate::network::{Inbound, PeerNetwork};
use crate::pacemaker::Pacemaker;
use crate::tree::TreeTopology;
use crate::ReplicaId;
use libp2p::futures::stream::FuturesUnordered;
use libp2p::futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type FetchFuture = Pin<Box<dyn Future<Output = (Hash, Result<Block, oneshot::error::RecvError>)> + Send>>;

/// Drives one replica's consensus participation end to end: wires
/// `ConsensusCore` to a `PeerNetwork`, a `FetchEngine` for missing ancestors,
/// and an `IngressQueue` of client commands. Generic over the network
/// transport so tests can substitute `network::LoopbackNetwork` for
/// `network::P2pNetwork` without touching any protocol logic here.
pub struct Replica<N: PeerNetwork> {
    core: ConsensusCore,
    pacemaker: Pacemaker,
    fetch: FetchEngine,
    ingress: IngressQueue,
    network: N,
    pool: VerificationPool,
    /// Blocks parked on a missing primary parent or QC referent, keyed by
    /// the missing hash.
    pending_on: HashMap<Hash, Vec<Block>>,
    /// `cmd_hash -> decision_callback` for commands this replica accepted
    /// into its own ingress queue as leader. Followers never populate this
    /// map, so a commit on a follower simply finds nothing to fire.
    pending_decisions: HashMap<Hash, DecisionCallback>,
    in_flight_fetches: FuturesUnordered<FetchFuture>,
    view_deadline: Instant,
}

impl<N: PeerNetwork> Replica<N> {
    pub fn new(config: ReplicaConfig, tree: TreeTopology, network: N) -> (Self, IngressHandle) {
        let view_timeout = config.view_timeout;
        let fetch_timeout = config.fetch_timeout;
        let blk_size = config.blk_size;
        let core = ConsensusCore::new(config);
        let pacemaker = Pacemaker::new(tree, view_timeout);
        let fetch = FetchEngine::new(fetch_timeout);
        let (handle, ingress) = IngressQueue::new(blk_size);
        let view_deadline = Instant::now() + pacemaker.next_view_timeout();
        let replica = Replica {
            core,
            pacemaker,
            fetch,
            ingress,
            network,
            pool: VerificationPool::default_sized(),
            pending_on: HashMap::new(),
            pending_decisions: HashMap::new(),
            in_flight_fetches: FuturesUnordered::new(),
            view_deadline,
        };
        (replica, handle)
    }

    fn me(&self) -> ReplicaId {
        self.core.config.this_id
    }

    fn refresh_view_deadline(&mut self) {
        self.view_deadline = Instant::now() + self.pacemaker.next_view_timeout();
    }

    /// Drives the replica forever. Callers typically `tokio::spawn` this
    /// per replica.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                inbound = self.network.recv() => {
                    match inbound {
                        Some(inbound) => self.on_inbound(inbound).await,
                        None => {
                            warn!(replica = self.me(), "network channel closed, stopping replica");
                            return;
                        }
                    }
                }
                entry = self.ingress.recv() => {
                    match entry {
                        Some(entry) => self.on_ingress_entry(entry).await,
                        None => {
                            warn!(replica = self.me(), "ingress channel closed, stopping replica");
                            return;
                        }
                    }
                }
                hash = self.fetch.next_timeout() => {
                    self.on_fetch_timeout(hash).await;
                }
                Some((hash, result)) = self.in_flight_fetches.next(), if !self.in_flight_fetches.is_empty() => {
                    if let Ok(block) = result {
                        // Idempotent: `deliver_and_drain` no-ops on an
                        // already-delivered hash, which is the common case
                        // here since `FetchEngine::deliver` is only called
                        // from inside that function.
                        self.deliver_and_drain(self.me(), block).await;
                    } else {
                        debug!(?hash, "fetch waiter dropped without delivery");
                    }
                }
                _ = tokio::time::sleep_until(self.view_deadline.into()) => {
                    self.on_view_timeout().await;
                }
            }
        }
    }

    // ---- Inbound wire messages ----

    async fn on_inbound(&mut self, inbound: Inbound) {
        let Inbound { from, message } = inbound;
        match message {
            WireMessage::Propose { block } => self.deliver_and_drain(from, block).await,
            WireMessage::Vote {
                proposer_id,
                block_hash,
                partial_cert,
            } => self.handle_vote_msg(proposer_id, block_hash, partial_cert).await,
            WireMessage::ReqBlock { hashes } => self.handle_req_block(from, hashes).await,
            WireMessage::RespBlock { blocks } => {
                for block in blocks {
                    self.deliver_and_drain(from, block).await;
                }
            }
            WireMessage::VoteRelay {
                voter_id,
                block_hash,
                aggregate_qc,
            } => self.handle_vote_relay_msg(voter_id, block_hash, aggregate_qc).await,
        }
    }

    /// `proposer_id` is the Vote payload's wire field name; by position in
    /// the chained-voting protocol (a child signs and sends its own vote to
    /// its tree parent) it actually carries the voter's id, not the block
    /// proposer's — `VoteRelay`'s sibling field is named `voter_id` for the
    /// same payload slot. Treated as the voter here.
    async fn handle_vote_msg(&mut self, voter_id: ReplicaId, block_hash: Hash, partial_cert: WirePartialCert) {
        let part = match PartialCert::from_sig_bytes(block_hash, voter_id, partial_cert.scheme, &partial_cert.bytes)
        {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, voter = voter_id, "dropping malformed vote");
                return;
            }
        };
        let pubkey = match self.core.config.public_key(voter_id) {
            Some(pk) => pk.clone(),
            None => {
                warn!(voter = voter_id, "vote from unknown replica id");
                return;
            }
        };
        match self.pool.submit(VerifyTask::Part { part: part.clone(), pubkey }).await {
            VerifyOutcome::Part(Ok(true)) => {}
            VerifyOutcome::Part(Ok(false)) => {
                warn!(voter = voter_id, ?block_hash, "vote failed signature verification");
                return;
            }
            VerifyOutcome::Part(Err(e)) => {
                warn!(error = %e, voter = voter_id, "vote verification error");
                return;
            }
            VerifyOutcome::Cert(_) => unreachable!("submitted a Part task"),
        }
        if let Err(e) = self.fold_received_vote(block_hash, part).await {
            warn!(error = %e, ?block_hash, "failed to fold received vote");
        }
    }

    async fn handle_vote_relay_msg(
        &mut self,
        voter_id: ReplicaId,
        block_hash: Hash,
        aggregate_qc: crate::block::WireQc,
    ) {
        let qc = match wire_to_qc(&aggregate_qc) {
            Ok(qc) => qc,
            Err(e) => {
                warn!(error = %e, relay_from = voter_id, "dropping malformed vote relay");
                return;
            }
        };
        let pubkeys = self.core.config.public_keys_in_order();
        match self.pool.submit(VerifyTask::Cert { cert: qc.clone(), pubkeys }).await {
            VerifyOutcome::Cert(Ok(true)) => {}
            VerifyOutcome::Cert(Ok(false)) => {
                warn!(relay_from = voter_id, ?block_hash, "vote relay failed verification");
                return;
            }
            VerifyOutcome::Cert(Err(e)) => {
                warn!(error = %e, relay_from = voter_id, "vote relay verification error");
                return;
            }
            VerifyOutcome::Part(_) => unreachable!("submitted a Cert task"),
        }
        if let Err(e) = self.route_relay(block_hash, qc).await {
            warn!(error = %e, ?block_hash, "failed to route vote relay");
        }
    }

    /// Re-verifies the QC a proposal carries for its ancestor before trusting
    /// it to advance `hqc`/`b_lock`/the commit chain. A proposal's embedded
    /// `qc` is exactly the same kind of untrusted aggregate a `VoteRelay`
    /// carries (`handle_vote_relay_msg` above) — just piggybacked on a
    /// different wire message — so it gets the same pool-verified treatment
    /// before anything in `ConsensusCore` acts on it. `None` (genesis) needs
    /// no check.
    async fn verify_proposal_qc(&mut self, block: &Block) -> bool {
        let wire_qc = match &block.qc {
            Some(qc) => qc,
            None => return true,
        };
        let qc = match wire_to_qc(wire_qc) {
            Ok(qc) => qc,
            Err(e) => {
                warn!(error = %e, hash = ?block.hash, "dropping proposal with malformed embedded qc");
                return false;
            }
        };
        let pubkeys = self.core.config.public_keys_in_order();
        match self.pool.submit(VerifyTask::Cert { cert: qc, pubkeys }).await {
            VerifyOutcome::Cert(Ok(true)) => true,
            VerifyOutcome::Cert(Ok(false)) => {
                warn!(hash = ?block.hash, "proposal's embedded qc failed verification");
                false
            }
            VerifyOutcome::Cert(Err(e)) => {
                warn!(error = %e, hash = ?block.hash, "proposal embedded qc verification error");
                false
            }
            VerifyOutcome::Part(_) => unreachable!("submitted a Cert task"),
        }
    }

    async fn handle_req_block(&mut self, from: ReplicaId, hashes: Vec<Hash>) {
        let blocks: Vec<Block> = hashes
            .iter()
            .filter_map(|h| self.core.store.get(h).map(|r| r.block.clone()))
            .collect();
        if !blocks.is_empty() {
            let _ = self.network.send(from, WireMessage::RespBlock { blocks }).await;
        }
    }

    // ---- Vote routing ----
    //
    // Only BLS supports tree vote-relay (`SchemeKind::supports_relay`,
    // scheme.rs): aggregation without signature compaction has no benefit
    // over every replica addressing its vote straight to the root, so
    // Dummy/ECDSA bypass the tree entirely and forward raw votes directly.
    // Under BLS, every non-root replica folds self-plus-children
    // contributions into its own `self_qc` with
    // `threshold = relay_threshold(me)` and relays the sealed aggregate
    // upward once crossed; the root always folds with `threshold =
    // nmajority` and finalizes instead of relaying. A leaf's
    // `relay_threshold` is 1 (no children), so its own vote alone seals
    // immediately via the same call an internal node uses — no separate
    // leaf case needed.

    fn vote_threshold(&self) -> usize {
        if self.pacemaker.is_leader(self.me()) {
            self.core.config.nmajority
        } else {
            self.pacemaker.tree.relay_threshold(self.me())
        }
    }

    /// Dispatches a vote this replica itself just cast. Under BLS this folds
    /// into the tree like any received vote; under a non-relaying scheme a
    /// non-root replica has nothing useful to fold (nobody else's vote will
    /// ever reach it) and instead forwards the raw vote straight to the root.
    async fn dispatch_own_vote(&mut self, block_hash: Hash, part: PartialCert) -> Result<(), ConsensusError> {
        if !self.pacemaker.is_leader(self.me()) && !self.core.config.scheme.supports_relay() {
            self.forward_vote_to_root(block_hash, part).await;
            return Ok(());
        }
        self.fold_received_vote(block_hash, part).await
    }

    /// Folds a `Vote` message addressed to this replica, whether it is this
    /// replica's own vote (relay-capable schemes) or one forwarded by a
    /// non-relay-scheme child.
    async fn fold_received_vote(&mut self, block_hash: Hash, part: PartialCert) -> Result<(), ConsensusError> {
        let threshold = self.vote_threshold();
        if let Some(sealed) = self.core.add_vote(block_hash, part, threshold)? {
            self.on_threshold_crossed(block_hash, sealed).await;
        }
        Ok(())
    }

    async fn forward_vote_to_root(&mut self, block_hash: Hash, part: PartialCert) {
        let root = match self.pacemaker.tree.root() {
            Some(r) => r,
            None => {
                warn!("no tree root to forward vote to");
                return;
            }
        };
        let wire = WireMessage::Vote {
            proposer_id: part.voter,
            block_hash,
            partial_cert: WirePartialCert {
                scheme: part.kind(),
                bytes: part.sig_bytes(),
            },
        };
        if let Err(e) = self.network.send(root, wire).await {
            warn!(error = %e, ?block_hash, "failed to forward vote to root");
        }
    }

    async fn route_relay(&mut self, block_hash: Hash, aggregate: QuorumCert) -> Result<(), ConsensusError> {
        let threshold = self.vote_threshold();
        if let Some(sealed) = self.core.add_relay(block_hash, &aggregate, threshold)? {
            self.on_threshold_crossed(block_hash, sealed).await;
        }
        Ok(())
    }

    async fn on_threshold_crossed(&mut self, block_hash: Hash, sealed: QuorumCert) {
        if self.pacemaker.is_leader(self.me()) {
            match self.core.on_qc_sealed_at_root(block_hash) {
                Ok(resolved) => {
                    if !resolved.is_empty() {
                        debug!(?resolved, "pipeline advanced");
                    }
                }
                Err(e) => warn!(error = %e, ?block_hash, "failed to seal QC at root"),
            }
            self.pacemaker.on_progress();
            self.refresh_view_deadline();
            self.try_beat().await;
            return;
        }
        let parent = match self.pacemaker.tree.parent_of(self.me()) {
            Some(p) => p,
            None => {
                warn!("non-root replica has no tree parent; dropping sealed relay");
                return;
            }
        };
        let wire_qc = qc_to_wire(&sealed);
        if let Err(e) = self
            .network
            .send(
                parent,
                WireMessage::VoteRelay {
                    voter_id: self.me(),
                    block_hash,
                    aggregate_qc: wire_qc,
                },
            )
            .await
        {
            warn!(error = %e, ?block_hash, "failed to relay sealed QC to parent");
        }
    }

    // ---- Block delivery & fetch gating ----

    fn missing_ancestor(&self, block: &Block) -> Option<Hash> {
        if let Some(parent) = block.primary_parent() {
            if !self.core.is_delivered(&parent) {
                return Some(parent);
            }
        }
        if let Some(qc) = &block.qc {
            if !self.core.is_delivered(&qc.obj_hash) {
                return Some(qc.obj_hash);
            }
        }
        None
    }

    async fn defer_on_missing(&mut self, missing: Hash, holder: ReplicaId, block: Block) {
        debug!(?missing, holder, "deferring block on missing ancestor");
        self.pending_on.entry(missing).or_default().push(block);
        if !self.fetch.is_pending(&missing) {
            let rx = self.fetch.request(missing, holder);
            self.in_flight_fetches
                .push(Box::pin(async move { (missing, rx.await) }));
        } else {
            self.fetch.add_holder(missing, holder);
        }
        let _ = self
            .network
            .send(holder, WireMessage::ReqBlock { hashes: vec![missing] })
            .await;
    }

    async fn on_fetch_timeout(&mut self, hash: Hash) {
        for target in self.fetch.handle_timeout(hash) {
            let _ = self
                .network
                .send(target, WireMessage::ReqBlock { hashes: vec![hash] })
                .await;
        }
    }

    /// Delivers `block` (from a proposal, a fetch response, or a resolved
    /// fetch future) and iteratively drains anything in `pending_on` that
    /// was waiting on it, in FIFO discovery order. Deliberately a loop
    /// rather than recursion: a fetched ancestor can itself unblock another
    /// deferred block, and Rust's async fns can't recurse without boxing.
    async fn deliver_and_drain(&mut self, from: ReplicaId, block: Block) {
        let mut queue = VecDeque::new();
        queue.push_back((from, block));
        while let Some((holder, mut blk)) = queue.pop_front() {
            let hash = blk.hash;
            if self.core.is_delivered(&hash) {
                continue;
            }
            if let Some(missing) = self.missing_ancestor(&blk) {
                self.defer_on_missing(missing, holder, blk).await;
                continue;
            }
            if let Some(parent) = blk.primary_parent() {
                if let Some(rec) = self.core.store.get(&parent) {
                    blk.resolve_height(rec.block.height);
                }
            }
            if !self.verify_proposal_qc(&blk).await {
                // Dropped: an invalid embedded QC must never reach
                // `on_receive_proposal` and advance hqc/b_lock/the commit
                // chain. Anything still parked on this hash in `pending_on`
                // stays parked rather than being incorrectly unblocked.
                continue;
            }
            self.fetch.deliver(hash, blk.clone());
            self.process_delivered(blk).await;
            if let Some(unblocked) = self.pending_on.remove(&hash) {
                for b in unblocked {
                    queue.push_back((holder, b));
                }
            }
        }
    }

    async fn process_delivered(&mut self, block: Block) {
        let hash = block.hash;
        match self.core.on_receive_proposal(block) {
            Ok(outcome) => {
                if let Some(part) = outcome.vote {
                    if let Err(e) = self.dispatch_own_vote(hash, part).await {
                        warn!(error = %e, ?hash, "failed to dispatch own vote");
                    }
                }
                if !outcome.committed.is_empty() {
                    self.pacemaker.on_progress();
                    self.refresh_view_deadline();
                    for committed_hash in outcome.committed {
                        self.fire_decisions(committed_hash);
                    }
                }
            }
            Err(e) => warn!(error = %e, ?hash, "failed to process delivered block"),
        }
    }

    /// Invokes every pending decision callback for commands in the
    /// just-committed block, in list order. A no-op per command on any
    /// replica other than the one that originally accepted it into its own
    /// ingress queue.
    fn fire_decisions(&mut self, block_hash: Hash) {
        let (height, cmds) = match self.core.store.get(&block_hash) {
            Some(rec) => (rec.block.height, rec.block.cmds.clone()),
            None => return,
        };
        for (idx, cmd_hash) in cmds.into_iter().enumerate() {
            if let Some(callback) = self.pending_decisions.remove(&cmd_hash) {
                callback(Finality::Decided { height, idx });
                self.core.store.release_cmd(&cmd_hash);
            }
        }
    }

    // ---- Command ingress & pipelined proposing ----

    async fn on_ingress_entry(&mut self, entry: Entry) {
        if !self.pacemaker.is_leader(self.me()) {
            ack_not_leader(entry);
            return;
        }
        self.ingress.push(entry);
        self.try_beat().await;
    }

    /// Attempts one `beat()`: proposes a new speculative block over the
    /// current pipeline frontier if the pipelining policy allows it. The
    /// block may carry zero commands — an empty block still extends the
    /// chain and carries `hqc` forward, which is what lets a lone earlier
    /// command's three-chain actually complete once no further commands
    /// arrive. Leader only.
    async fn try_beat(&mut self) {
        if !self.pacemaker.is_leader(self.me()) {
            return;
        }
        if !self
            .core
            .can_beat(self.core.config.pipeline_depth, self.core.config.piped_latency)
        {
            return;
        }
        self.ingress.drain_available();
        let batch = self.ingress.take_batch().unwrap_or_default();

        let parent = match self.core.next_primary_parent() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "cannot determine next primary parent, requeueing batch");
                for entry in batch {
                    self.ingress.push(entry);
                }
                return;
            }
        };
        let parent_height = match self.core.store.require(&parent) {
            Ok(rec) => rec.block.height,
            Err(e) => {
                warn!(error = %e, "primary parent missing from store, requeueing batch");
                for entry in batch {
                    self.ingress.push(entry);
                }
                return;
            }
        };

        let mut cmd_hashes = Vec::with_capacity(batch.len());
        for entry in batch {
            self.core.store.insert_cmd(entry.cmd_hash, entry.payload);
            self.core.store.retain_cmd(&entry.cmd_hash);
            self.pending_decisions.insert(entry.cmd_hash, entry.callback);
            cmd_hashes.push(entry.cmd_hash);
        }

        let wire_qc = self.core.hqc_qc_for_piping().map(|q| qc_to_wire(&q));
        let block = match Block::new(vec![parent], parent_height + 1, cmd_hashes, wire_qc, Vec::new()) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to construct proposal block");
                return;
            }
        };
        info!(height = block.height, hash = ?block.hash, "proposing block");
        self.core.begin_piped_proposal(block.hash);
        if let Err(e) = self.network.broadcast(WireMessage::Propose { block: block.clone() }).await {
            warn!(error = %e, "failed to broadcast proposal");
        }
        self.deliver_and_drain(self.me(), block).await;
    }

    // ---- View change ----

    /// A new leader's first block always carries `hqc`, making it
    /// self-justifying: no view-change vote needs to be broadcast here.
    /// Every correct replica independently rotates its tree the same
    /// deterministic way once its own timer fires, converging on the same
    /// new root without a message.
    async fn on_view_timeout(&mut self) {
        warn!(view = self.pacemaker.view(), "view timed out, rotating leader");
        self.pacemaker.on_timeout();
        self.refresh_view_deadline();
        self.try_beat().await;
    }
}
