/// Optional durability side-channel. No persisted state is required for
/// protocol correctness, but logging decided blocks and their QCs lets an
/// operator recover decided history after a crash; full checkpoint-based
/// state transfer is out of scope here.
///
/// Same column family / `Options` setup as a RocksDB-backed system of
/// record, narrowed to just decided blocks rather than a full state machine
/// snapshot store.

use crate::block::Block;
use crate::crypto::hash::Hash;
use rocksdb::{Options, DB};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("rocksdb error: {0}")]
    Db(#[from] rocksdb::Error),
    #[error("serialization error: {0}")]
    Codec(#[from] bincode::Error),
}

const CF_DECIDED: &str = "decided_blocks";

/// Append-only log of decided blocks, keyed by hash. Not consulted for
/// protocol correctness on the happy path — a replica that never restarts
/// never touches this type; it exists so an operator can recover decided
/// history after a crash. Crash recovery itself is out of scope here.
pub struct DecisionLog {
    db: DB,
}

impl DecisionLog {
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = DB::open_cf(&opts, path, [CF_DECIDED])?;
        Ok(DecisionLog { db })
    }

    pub fn record_decided(&self, block: &Block) -> Result<(), PersistError> {
        let cf = self.db.cf_handle(CF_DECIDED).expect("cf created at open");
        let bytes = bincode::serialize(block)?;
        self.db.put_cf(cf, block.hash.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn load_decided(&self, hash: &Hash) -> Result<Option<Block>, PersistError> {
        let cf = self.db.cf_handle(CF_DECIDED).expect("cf created at open");
        match self.db.get_cf(cf, hash.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_decided_block_through_rocksdb() {
        let dir = tempfile::tempdir().unwrap();
        let log = DecisionLog::open(dir.path()).unwrap();
        let block = Block::new(vec![Hash::genesis()], 1, vec![], None, vec![]).unwrap();
        log.record_decided(&block).unwrap();
        let loaded = log.load_decided(&block.hash).unwrap().unwrap();
        assert_eq!(loaded.hash, block.hash);
    }

    #[test]
    fn missing_block_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let log = DecisionLog::open(dir.path()).unwrap();
        assert!(log.load_decided(&Hash::new([9u8; 32])).unwrap().is_none());
    }
}
