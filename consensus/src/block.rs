/// The replicated unit: a proposal binding a set of commands to a position
/// in the chain, plus a quorum certificate for one of its ancestors.
///
/// `Block` itself is immutable wire data; the mutable bookkeeping fields
/// (`qc_ref`, `self_qc`, `voted`, `delivered`, `decision`) live on
/// `BlockRecord` in `store`, not here — see DESIGN.md.

use crate::crypto::hash::{hash_data, Hash};
use crate::crypto::scheme::{Bitmap, CryptoError, QuorumCert, SchemeKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("truncated block: expected {expected} more bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("block has zero parents")]
    NoParent,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub hash: Hash,
    /// Ordered ancestor hashes; index 0 is the primary parent.
    pub parent_hashes: Vec<Hash>,
    pub height: u64,
    /// Ordered command hashes.
    pub cmds: Vec<Hash>,
    /// A QC for some ancestor; `None` only for genesis.
    pub qc: Option<WireQc>,
    /// Opaque leader metadata, uninterpreted here.
    pub extra: Vec<u8>,
}

/// The serializable form of a `QuorumCert`. `QuorumCert` itself carries
/// scheme-internal state (unaggregated parts) that has no wire
/// representation prior to `compute()`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireQc {
    pub obj_hash: Hash,
    pub scheme: SchemeKind,
    pub bits: Vec<bool>,
    pub ecdsa_sigs: Vec<Vec<u8>>,
    pub bls_aggregate: Option<Vec<u8>>,
}

impl Block {
    /// Construct a block and compute its content hash.
    pub fn new(
        parent_hashes: Vec<Hash>,
        height: u64,
        cmds: Vec<Hash>,
        qc: Option<WireQc>,
        extra: Vec<u8>,
    ) -> Result<Self, BlockError> {
        if parent_hashes.is_empty() && height != 0 {
            return Err(BlockError::NoParent);
        }
        let hash = Self::content_hash(&parent_hashes, &cmds, &qc, &extra);
        Ok(Block {
            hash,
            parent_hashes,
            height,
            cmds,
            qc,
            extra,
        })
    }

    /// Genesis is a fixed sentinel, not content-addressed like every other
    /// block: its hash must be identical across all replicas regardless of
    /// which `HashFunction` a deployment configures. Constructed once at
    /// init and never released.
    pub fn genesis() -> Self {
        Block {
            hash: Hash::genesis(),
            parent_hashes: vec![],
            height: 0,
            cmds: vec![],
            qc: None,
            extra: vec![],
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.parent_hashes.is_empty()
    }

    pub fn primary_parent(&self) -> Option<Hash> {
        self.parent_hashes.first().copied()
    }

    /// `hash` must be a digest over `(parent_hashes, cmds, qc, extra)`;
    /// recomputation must always reproduce it.
    fn content_hash(
        parent_hashes: &[Hash],
        cmds: &[Hash],
        qc: &Option<WireQc>,
        extra: &[u8],
    ) -> Hash {
        let mut buf = Vec::new();
        for p in parent_hashes {
            buf.extend_from_slice(p.as_bytes());
        }
        for c in cmds {
            buf.extend_from_slice(c.as_bytes());
        }
        if let Some(qc) = qc {
            buf.extend_from_slice(qc.obj_hash.as_bytes());
            for b in &qc.bits {
                buf.push(*b as u8);
            }
        }
        buf.extend_from_slice(extra);
        hash_data(&buf)
    }

    pub fn recompute_hash(&self) -> Hash {
        Self::content_hash(&self.parent_hashes, &self.cmds, &self.qc, &self.extra)
    }

    /// `parent_count (u32 LE) || parent_hashes || cmd_count (u32 LE) ||
    /// cmd_hashes || has_qc (u8) || qc? || extra_len (u32 LE) || extra_bytes`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.parent_hashes.len() as u32).to_le_bytes());
        for p in &self.parent_hashes {
            buf.extend_from_slice(p.as_bytes());
        }
        buf.extend_from_slice(&(self.cmds.len() as u32).to_le_bytes());
        for c in &self.cmds {
            buf.extend_from_slice(c.as_bytes());
        }
        match &self.qc {
            Some(qc) => {
                buf.push(1);
                buf.extend_from_slice(&encode_wire_qc(qc));
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&(self.extra.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.extra);
        buf
    }

    pub fn from_bytes(bytes: &[u8], scheme: SchemeKind) -> Result<Self, BlockError> {
        let mut cur = Cursor::new(bytes);
        let parent_count = cur.take_u32()? as usize;
        let mut parent_hashes = Vec::with_capacity(parent_count);
        for _ in 0..parent_count {
            parent_hashes.push(cur.take_hash()?);
        }
        let cmd_count = cur.take_u32()? as usize;
        let mut cmds = Vec::with_capacity(cmd_count);
        for _ in 0..cmd_count {
            cmds.push(cur.take_hash()?);
        }
        let has_qc = cur.take_u8()?;
        let qc = if has_qc == 1 {
            Some(decode_wire_qc(&mut cur, scheme)?)
        } else {
            None
        };
        let extra_len = cur.take_u32()? as usize;
        let extra = cur.take_bytes(extra_len)?.to_vec();

        // `height` is not on the wire: it is derived from the primary
        // parent's height once that parent is resolved locally. The caller
        // must call `resolve_height` before trusting this field.
        let mut block = Block {
            hash: Hash::genesis(),
            parent_hashes,
            height: 0,
            cmds,
            qc,
            extra,
        };
        block.hash = block.recompute_hash();
        Ok(block)
    }

    /// Fill in `height` from the primary parent's height, as required after
    /// `from_bytes` deserializes a block whose parent is now known locally.
    /// Does not affect `hash` (height is not part of the content digest).
    pub fn resolve_height(&mut self, primary_parent_height: u64) {
        self.height = if self.parent_hashes.is_empty() {
            0
        } else {
            primary_parent_height + 1
        };
    }
}

fn encode_wire_qc(qc: &WireQc) -> Vec<u8> {
    match qc.scheme {
        SchemeKind::Bls | SchemeKind::Dummy => {
            let mut buf = Vec::new();
            buf.extend_from_slice(qc.obj_hash.as_bytes());
            buf.extend_from_slice(&(qc.bits.len() as u32).to_le_bytes());
            for b in &qc.bits {
                buf.push(*b as u8);
            }
            match &qc.bls_aggregate {
                Some(agg) => {
                    buf.push(1);
                    buf.extend_from_slice(agg);
                }
                None => buf.push(0),
            }
            buf
        }
        SchemeKind::Ecdsa => {
            let mut buf = Vec::new();
            buf.extend_from_slice(qc.obj_hash.as_bytes());
            buf.extend_from_slice(&(qc.bits.len() as u32).to_le_bytes());
            for b in &qc.bits {
                buf.push(*b as u8);
            }
            for sig in &qc.ecdsa_sigs {
                buf.extend_from_slice(sig);
            }
            buf
        }
    }
}

fn decode_wire_qc(cur: &mut Cursor, scheme: SchemeKind) -> Result<WireQc, BlockError> {
    // The wire framing differs by scheme (BLS carries one aggregate
    // signature, ECDSA carries one signature per signer); the scheme is
    // fixed per deployment and known out of band, so the caller supplies it
    // rather than it being self-describing on the wire.
    match scheme {
        SchemeKind::Bls | SchemeKind::Dummy => {
            let obj_hash = cur.take_hash()?;
            let bits_len = cur.take_u32()? as usize;
            let mut bits = Vec::with_capacity(bits_len);
            for _ in 0..bits_len {
                bits.push(cur.take_u8()? == 1);
            }
            let has_aggregate = cur.take_u8()?;
            let bls_aggregate = if has_aggregate == 1 {
                Some(cur.take_bytes(96)?.to_vec())
            } else {
                None
            };
            Ok(WireQc {
                obj_hash,
                scheme,
                bits,
                ecdsa_sigs: Vec::new(),
                bls_aggregate,
            })
        }
        SchemeKind::Ecdsa => {
            let obj_hash = cur.take_hash()?;
            // Bit count is implicit: one byte per configured replica. The
            // block codec does not know `nreplicas`, so ECDSA QCs carry
            // their bit count explicitly here, needed to make `from_bytes`
            // self-contained without threading replica-count through every
            // call.
            let bits_len = cur.take_u32()? as usize;
            let mut bits = Vec::with_capacity(bits_len);
            for _ in 0..bits_len {
                bits.push(cur.take_u8()? == 1);
            }
            let signer_count = bits.iter().filter(|b| **b).count();
            let mut ecdsa_sigs = Vec::with_capacity(signer_count);
            for _ in 0..signer_count {
                ecdsa_sigs.push(cur.take_bytes(64)?.to_vec());
            }
            Ok(WireQc {
                obj_hash,
                scheme,
                bits,
                ecdsa_sigs,
                bls_aggregate: None,
            })
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take_bytes(&mut self, n: usize) -> Result<&'a [u8], BlockError> {
        if self.bytes.len() < self.pos + n {
            return Err(BlockError::Truncated {
                expected: n,
                got: self.bytes.len() - self.pos,
            });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_u8(&mut self) -> Result<u8, BlockError> {
        Ok(self.take_bytes(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32, BlockError> {
        let b = self.take_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_hash(&mut self) -> Result<Hash, BlockError> {
        let b = self.take_bytes(32)?;
        Hash::from_slice(b).map_err(|_| BlockError::Truncated {
            expected: 32,
            got: b.len(),
        })
    }
}

/// Converts a computed, sealed `QuorumCert` into its wire form.
pub fn qc_to_wire(qc: &QuorumCert) -> WireQc {
    match qc {
        QuorumCert::Dummy(q) => WireQc {
            obj_hash: q.obj_hash,
            scheme: SchemeKind::Dummy,
            bits: q.bitmap.0.clone(),
            ecdsa_sigs: Vec::new(),
            bls_aggregate: None,
        },
        QuorumCert::Ecdsa(q) => WireQc {
            obj_hash: q.obj_hash,
            scheme: SchemeKind::Ecdsa,
            bits: q.bitmap.0.clone(),
            ecdsa_sigs: q
                .sealed_sigs()
                .map(|sigs| sigs.iter().map(|s| s.to_bytes()).collect())
                .unwrap_or_default(),
            bls_aggregate: None,
        },
        QuorumCert::Bls(q) => WireQc {
            obj_hash: q.obj_hash,
            scheme: SchemeKind::Bls,
            bits: q.bitmap.0.clone(),
            ecdsa_sigs: Vec::new(),
            bls_aggregate: q.sealed_sig().map(|s| s.to_bytes()),
        },
    }
}

/// The reverse of `qc_to_wire`: rebuilds a sealed `QuorumCert` from a
/// received `WireQc`. A replica receiving a block trusts the embedded QC's
/// bitmap/signature bytes only provisionally — it re-verifies them against
/// its own public key table before acting on it.
pub fn wire_to_qc(wire: &WireQc) -> Result<QuorumCert, CryptoError> {
    QuorumCert::from_sealed(
        wire.scheme,
        wire.obj_hash,
        Bitmap(wire.bits.clone()),
        &wire.ecdsa_sigs,
        wire.bls_aggregate.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_has_height_zero_and_no_parents() {
        let g = Block::genesis();
        assert_eq!(g.height, 0);
        assert!(g.parent_hashes.is_empty());
        assert!(g.is_genesis());
    }

    #[test]
    fn hash_is_reproducible_from_fields() {
        let b = Block::new(vec![Hash::genesis()], 1, vec![Hash::new([2u8; 32])], None, vec![9]).unwrap();
        assert_eq!(b.hash, b.recompute_hash());
    }

    #[test]
    fn non_genesis_requires_a_parent() {
        let err = Block::new(vec![], 1, vec![], None, vec![]);
        assert!(matches!(err, Err(BlockError::NoParent)));
    }

    #[test]
    fn round_trips_through_wire_bytes_without_qc() {
        let b = Block::new(
            vec![Hash::genesis(), Hash::new([3u8; 32])],
            1,
            vec![Hash::new([4u8; 32]), Hash::new([5u8; 32])],
            None,
            vec![1, 2, 3],
        )
        .unwrap();
        let bytes = b.to_bytes();
        let mut decoded = Block::from_bytes(&bytes, SchemeKind::Bls).unwrap();
        assert_eq!(decoded.hash, b.hash);
        assert_eq!(decoded.parent_hashes, b.parent_hashes);
        assert_eq!(decoded.cmds, b.cmds);
        assert_eq!(decoded.extra, b.extra);
        decoded.resolve_height(0);
        assert_eq!(decoded.height, b.height);
    }

    #[test]
    fn from_bytes_rejects_truncated_input() {
        let b = Block::new(vec![Hash::genesis()], 1, vec![], None, vec![]).unwrap();
        let mut bytes = b.to_bytes();
        bytes.truncate(bytes.len() - 2);
        assert!(Block::from_bytes(&bytes, SchemeKind::Bls).is_err());
    }
}
