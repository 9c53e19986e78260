/// Content-addressed entity store for blocks and commands.
///
/// An in-memory, reference-counted arena is the system of record for
/// protocol correctness; `persist` is an optional durability side-channel —
/// no persisted state is required for correctness, but logging QCs and
/// decided blocks lets a restarted replica catch up faster — kept in a
/// RocksDB-backed idiom.
///
/// Ownership model: a block's `parent_hashes[0]` (primary parent) and every
/// additional parent hold a strong retain on that ancestor; `qc_ref` is a
/// weak back-edge (a hash only) since its target may already be pruned by
/// the time it is looked up. The consensus core retains a block for as long
/// as it sits in `tails`, `piped_queue`, `rdy_queue`, or `qc_waiting`;
/// `prune()` releases anything the retain graph no longer reaches.

pub mod persist;

use crate::block::Block;
use crate::crypto::hash::Hash;
use crate::crypto::scheme::QuorumCert;
use crate::ReplicaId;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("block {0} not found")]
    BlockNotFound(Hash),
    #[error("command {0} not found")]
    CommandNotFound(Hash),
}

/// The mutable bookkeeping the consensus core layers on top of an immutable
/// `Block`: everything here is mutable except the embedded block itself,
/// and `decision` only ever flips false→true, never back.
pub struct BlockRecord {
    pub block: Block,
    /// Resolved pointer for `block.qc`'s target, once known locally.
    pub qc_ref: Option<Hash>,
    /// QC being assembled for this block as votes arrive.
    pub self_qc: Option<QuorumCert>,
    pub voted: HashSet<ReplicaId>,
    pub delivered: bool,
    pub decision: bool,
    refcount: usize,
}

impl BlockRecord {
    fn new(block: Block) -> Self {
        BlockRecord {
            block,
            qc_ref: None,
            self_qc: None,
            voted: HashSet::new(),
            delivered: false,
            decision: false,
            refcount: 0,
        }
    }

    /// Marks `decision = true`. Caller enforces the monotonic false→true
    /// invariant; this is a plain setter, not a toggle.
    pub fn mark_decided(&mut self) {
        self.decision = true;
    }
}

/// Arena-style, reference-counted block/command store.
pub struct Store {
    blocks: HashMap<Hash, BlockRecord>,
    cmds: HashMap<Hash, CmdEntry>,
}

struct CmdEntry {
    payload: Vec<u8>,
    refcount: usize,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            blocks: HashMap::new(),
            cmds: HashMap::new(),
        }
    }

    /// Seeds the store with genesis, retained forever: genesis is
    /// constructed at init and never released.
    pub fn with_genesis() -> Self {
        let mut store = Store::new();
        let genesis = Block::genesis();
        let mut record = BlockRecord::new(genesis);
        record.delivered = true;
        record.decision = true;
        record.refcount = 1;
        store.blocks.insert(record.block.hash, record);
        store
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&BlockRecord> {
        self.blocks.get(hash)
    }

    pub fn get_mut(&mut self, hash: &Hash) -> Option<&mut BlockRecord> {
        self.blocks.get_mut(hash)
    }

    pub fn require(&self, hash: &Hash) -> Result<&BlockRecord, StoreError> {
        self.get(hash).ok_or(StoreError::BlockNotFound(*hash))
    }

    pub fn require_mut(&mut self, hash: &Hash) -> Result<&mut BlockRecord, StoreError> {
        let missing = !self.blocks.contains_key(hash);
        if missing {
            return Err(StoreError::BlockNotFound(*hash));
        }
        Ok(self.blocks.get_mut(hash).expect("checked above"))
    }

    /// Inserts a block if absent; idempotent on re-insertion of a block with
    /// the same hash. Does not retain it — callers retain explicitly per the
    /// graph edge they are creating.
    pub fn insert(&mut self, block: Block) -> &mut BlockRecord {
        self.blocks
            .entry(block.hash)
            .or_insert_with(|| BlockRecord::new(block))
    }

    pub fn insert_cmd(&mut self, hash: Hash, payload: Vec<u8>) {
        self.cmds
            .entry(hash)
            .or_insert_with(|| CmdEntry { payload, refcount: 0 });
    }

    pub fn get_cmd(&self, hash: &Hash) -> Option<&[u8]> {
        self.cmds.get(hash).map(|e| e.payload.as_slice())
    }

    pub fn retain(&mut self, hash: &Hash) {
        if let Some(r) = self.blocks.get_mut(hash) {
            r.refcount += 1;
        }
    }

    pub fn retain_cmd(&mut self, hash: &Hash) {
        if let Some(c) = self.cmds.get_mut(hash) {
            c.refcount += 1;
        }
    }

    /// Releases one retain on `hash`. If its count reaches zero, the record
    /// is pruned and its strong edges (primary + extra parents) are released
    /// in turn, recursively.
    pub fn release(&mut self, hash: &Hash) {
        let parents = match self.blocks.get_mut(hash) {
            Some(r) if r.refcount > 0 => {
                r.refcount -= 1;
                if r.refcount > 0 {
                    return;
                }
                r.block.parent_hashes.clone()
            }
            _ => return,
        };
        if *hash == Hash::genesis() {
            // genesis is never actually released even if refcount hits zero
            return;
        }
        self.blocks.remove(hash);
        for p in parents {
            self.release(&p);
        }
    }

    pub fn release_cmd(&mut self, hash: &Hash) {
        if let Some(c) = self.cmds.get_mut(hash) {
            if c.refcount > 0 {
                c.refcount -= 1;
            }
            if c.refcount == 0 {
                self.cmds.remove(hash);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
