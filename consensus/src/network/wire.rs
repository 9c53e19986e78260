/// Wire message framing.
///
/// Length-prefixed, big-endian opcode byte, length-encoded payload. Five
/// opcodes cover the entire protocol surface; everything else (transport,
/// TLS, connection management) is a collaborator interface out of scope
/// here.

use crate::block::{Block, BlockError, WireQc};
use crate::crypto::hash::Hash;
use crate::crypto::scheme::SchemeKind;
use crate::ReplicaId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("empty message")]
    Empty,
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error("truncated message body")]
    Truncated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Propose = 0x00,
    Vote = 0x01,
    ReqBlock = 0x02,
    RespBlock = 0x03,
    VoteRelay = 0x04,
}

impl Opcode {
    fn from_byte(b: u8) -> Result<Self, WireError> {
        match b {
            0x00 => Ok(Opcode::Propose),
            0x01 => Ok(Opcode::Vote),
            0x02 => Ok(Opcode::ReqBlock),
            0x03 => Ok(Opcode::RespBlock),
            0x04 => Ok(Opcode::VoteRelay),
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

/// A single replica's signature over a block hash, as carried on the wire:
/// the Vote payload is `proposer_id || block_hash || partial_cert`.
#[derive(Clone, Debug)]
pub struct WirePartialCert {
    pub scheme: SchemeKind,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub enum WireMessage {
    Propose {
        block: Block,
    },
    Vote {
        proposer_id: ReplicaId,
        block_hash: Hash,
        partial_cert: WirePartialCert,
    },
    ReqBlock {
        hashes: Vec<Hash>,
    },
    RespBlock {
        blocks: Vec<Block>,
    },
    VoteRelay {
        voter_id: ReplicaId,
        block_hash: Hash,
        aggregate_qc: WireQc,
    },
}

impl WireMessage {
    pub fn opcode(&self) -> Opcode {
        match self {
            WireMessage::Propose { .. } => Opcode::Propose,
            WireMessage::Vote { .. } => Opcode::Vote,
            WireMessage::ReqBlock { .. } => Opcode::ReqBlock,
            WireMessage::RespBlock { .. } => Opcode::RespBlock,
            WireMessage::VoteRelay { .. } => Opcode::VoteRelay,
        }
    }

    /// `opcode (u8) || length (u32 LE) || payload`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let mut out = Vec::with_capacity(payload.len() + 5);
        out.push(self.opcode() as u8);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    fn encode_payload(&self) -> Vec<u8> {
        match self {
            WireMessage::Propose { block } => block.to_bytes(),
            WireMessage::Vote {
                proposer_id,
                block_hash,
                partial_cert,
            } => {
                let mut buf = Vec::new();
                buf.extend_from_slice(&proposer_id.to_le_bytes());
                buf.extend_from_slice(block_hash.as_bytes());
                buf.extend_from_slice(&partial_cert.bytes);
                buf
            }
            WireMessage::ReqBlock { hashes } => {
                let mut buf = Vec::new();
                buf.extend_from_slice(&(hashes.len() as u32).to_le_bytes());
                for h in hashes {
                    buf.extend_from_slice(h.as_bytes());
                }
                buf
            }
            WireMessage::RespBlock { blocks } => {
                let mut buf = Vec::new();
                buf.extend_from_slice(&(blocks.len() as u32).to_le_bytes());
                for b in blocks {
                    let bytes = b.to_bytes();
                    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                    buf.extend_from_slice(&bytes);
                }
                buf
            }
            WireMessage::VoteRelay {
                voter_id,
                block_hash,
                aggregate_qc,
            } => {
                let mut buf = Vec::new();
                buf.extend_from_slice(&voter_id.to_le_bytes());
                buf.extend_from_slice(block_hash.as_bytes());
                buf.extend_from_slice(aggregate_qc.obj_hash.as_bytes());
                buf.extend_from_slice(&(aggregate_qc.bits.len() as u32).to_le_bytes());
                for b in &aggregate_qc.bits {
                    buf.push(*b as u8);
                }
                match &aggregate_qc.bls_aggregate {
                    Some(agg) => {
                        buf.push(1);
                        buf.extend_from_slice(agg);
                    }
                    None => buf.push(0),
                }
                buf
            }
        }
    }

    /// Parses a single framed message. `scheme`/`nreplicas` resolve the
    /// scheme-dependent block/QC encodings (see `block::decode_wire_qc`).
    pub fn from_bytes(bytes: &[u8], scheme: SchemeKind) -> Result<Self, WireError> {
        if bytes.len() < 5 {
            return Err(WireError::Empty);
        }
        let opcode = Opcode::from_byte(bytes[0])?;
        let len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let payload = bytes
            .get(5..5 + len)
            .ok_or(WireError::Truncated)?;
        match opcode {
            Opcode::Propose => Ok(WireMessage::Propose {
                block: Block::from_bytes(payload, scheme)?,
            }),
            Opcode::Vote => {
                if payload.len() < 34 {
                    return Err(WireError::Truncated);
                }
                let proposer_id = u16::from_le_bytes([payload[0], payload[1]]);
                let block_hash =
                    Hash::from_slice(&payload[2..34]).map_err(|_| WireError::Truncated)?;
                let partial_cert = WirePartialCert {
                    scheme,
                    bytes: payload[34..].to_vec(),
                };
                Ok(WireMessage::Vote {
                    proposer_id,
                    block_hash,
                    partial_cert,
                })
            }
            Opcode::ReqBlock => {
                if payload.len() < 4 {
                    return Err(WireError::Truncated);
                }
                let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
                let mut hashes = Vec::with_capacity(count);
                let mut off = 4;
                for _ in 0..count {
                    let h = payload.get(off..off + 32).ok_or(WireError::Truncated)?;
                    hashes.push(Hash::from_slice(h).map_err(|_| WireError::Truncated)?);
                    off += 32;
                }
                Ok(WireMessage::ReqBlock { hashes })
            }
            Opcode::RespBlock => {
                if payload.len() < 4 {
                    return Err(WireError::Truncated);
                }
                let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
                let mut blocks = Vec::with_capacity(count);
                let mut off = 4;
                for _ in 0..count {
                    let blen_bytes = payload.get(off..off + 4).ok_or(WireError::Truncated)?;
                    let blen = u32::from_le_bytes([
                        blen_bytes[0],
                        blen_bytes[1],
                        blen_bytes[2],
                        blen_bytes[3],
                    ]) as usize;
                    off += 4;
                    let bbytes = payload.get(off..off + blen).ok_or(WireError::Truncated)?;
                    blocks.push(Block::from_bytes(bbytes, scheme)?);
                    off += blen;
                }
                Ok(WireMessage::RespBlock { blocks })
            }
            Opcode::VoteRelay => {
                if payload.len() < 70 {
                    return Err(WireError::Truncated);
                }
                let voter_id = u16::from_le_bytes([payload[0], payload[1]]);
                let block_hash =
                    Hash::from_slice(&payload[2..34]).map_err(|_| WireError::Truncated)?;
                let obj_hash =
                    Hash::from_slice(&payload[34..66]).map_err(|_| WireError::Truncated)?;
                let bits_len = u32::from_le_bytes([payload[66], payload[67], payload[68], payload[69]]) as usize;
                let mut off = 70;
                let mut bits = Vec::with_capacity(bits_len);
                for _ in 0..bits_len {
                    bits.push(*payload.get(off).ok_or(WireError::Truncated)? == 1);
                    off += 1;
                }
                let has_agg = *payload.get(off).ok_or(WireError::Truncated)?;
                off += 1;
                let bls_aggregate = if has_agg == 1 {
                    Some(payload.get(off..off + 96).ok_or(WireError::Truncated)?.to_vec())
                } else {
                    None
                };
                Ok(WireMessage::VoteRelay {
                    voter_id,
                    block_hash,
                    aggregate_qc: WireQc {
                        obj_hash,
                        scheme,
                        bits,
                        ecdsa_sigs: Vec::new(),
                        bls_aggregate,
                    },
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn req_block_round_trips() {
        let msg = WireMessage::ReqBlock {
            hashes: vec![Hash::new([1u8; 32]), Hash::new([2u8; 32])],
        };
        let bytes = msg.to_bytes();
        assert_eq!(bytes[0], Opcode::ReqBlock as u8);
        let decoded = WireMessage::from_bytes(&bytes, SchemeKind::Bls).unwrap();
        match decoded {
            WireMessage::ReqBlock { hashes } => assert_eq!(hashes.len(), 2),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn vote_round_trips() {
        let msg = WireMessage::Vote {
            proposer_id: 3,
            block_hash: Hash::new([9u8; 32]),
            partial_cert: WirePartialCert {
                scheme: SchemeKind::Bls,
                bytes: vec![1, 2, 3, 4],
            },
        };
        let bytes = msg.to_bytes();
        let decoded = WireMessage::from_bytes(&bytes, SchemeKind::Bls).unwrap();
        match decoded {
            WireMessage::Vote {
                proposer_id,
                block_hash,
                partial_cert,
            } => {
                assert_eq!(proposer_id, 3);
                assert_eq!(block_hash, Hash::new([9u8; 32]));
                assert_eq!(partial_cert.bytes, vec![1, 2, 3, 4]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn propose_round_trips() {
        let block = Block::new(vec![Hash::genesis()], 1, vec![], None, vec![]).unwrap();
        let msg = WireMessage::Propose { block: block.clone() };
        let bytes = msg.to_bytes();
        let decoded = WireMessage::from_bytes(&bytes, SchemeKind::Bls).unwrap();
        match decoded {
            WireMessage::Propose { block: b } => assert_eq!(b.hash, block.hash),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_unknown_opcode() {
        let bytes = vec![0xFF, 0, 0, 0, 0];
        assert!(matches!(
            WireMessage::from_bytes(&bytes, SchemeKind::Bls),
            Err(WireError::UnknownOpcode(0xFF))
        ));
    }

    #[test]
    fn rejects_truncated_frame() {
        let bytes = vec![0x02, 10, 0, 0, 0]; // claims 10-byte payload, has none
        assert!(matches!(
            WireMessage::from_bytes(&bytes, SchemeKind::Bls),
            Err(WireError::Truncated)
        ));
    }

    #[test]
    fn vote_relay_with_truncated_bits_len_is_dropped_not_panicked() {
        // voter_id(2) + block_hash(32) + obj_hash(32) = 66 bytes, short of the
        // 4-byte bits_len field by 2 or 3 bytes — must be reported as
        // truncated, not index out of the payload.
        for payload_len in [68usize, 69] {
            let mut buf = vec![0x04];
            buf.extend_from_slice(&(payload_len as u32).to_le_bytes());
            buf.extend(std::iter::repeat(0u8).take(payload_len));
            assert!(matches!(
                WireMessage::from_bytes(&buf, SchemeKind::Bls),
                Err(WireError::Truncated)
            ));
        }
    }
}
