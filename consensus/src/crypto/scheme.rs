/// Capability-set abstraction over the signature scheme backing quorum certificates.
///
/// The consensus core never touches `blst`/`k256` directly; it only calls
/// `add_part`/`merge`/`has_n`/`compute`/`verify` on a `QuorumCert`. Three
/// concrete schemes exist side by side: `Dummy` (tests), `Ecdsa` (per-replica
/// signature plus bitmap) and `Bls` (aggregate signature plus bitmap, the
/// only scheme that supports tree vote-relay).

use super::bls::{self, BLSKeyPair, BLSPartialSignature, BLSPublicKey, BLSSecretKey, BLSSignature};
use super::ecdsa::{self, ECDSAPublicKey, ECDSASecretKey, ECDSASignature};
use super::hash::Hash;
use crate::ReplicaId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("partial cert is for object {expected}, not {actual}")]
    WrongObject { expected: Hash, actual: Hash },
    #[error("scheme mismatch between QC and incoming part")]
    SchemeMismatch,
    #[error("replica {0} already contributed a part for this object")]
    DuplicateVoter(ReplicaId),
    #[error("cannot merge: overlapping signer bitmaps")]
    OverlappingSigners,
    #[error("compute() called before any part was added")]
    Empty,
    #[error("verify() called before compute()")]
    NotSealed,
    #[error(transparent)]
    Bls(#[from] bls::BLSError),
    #[error(transparent)]
    Ecdsa(#[from] ecdsa::ECDSAError),
}

/// Which signature scheme a replica set is configured to use. Fixed at boot,
/// identical across all replicas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemeKind {
    Dummy,
    Ecdsa,
    Bls,
}

impl SchemeKind {
    /// Whether this scheme supports merging already-sealed aggregates
    /// (required for tree vote-relay).
    pub fn supports_relay(&self) -> bool {
        matches!(self, SchemeKind::Bls)
    }
}

#[derive(Clone)]
pub enum SecretKey {
    Dummy,
    Ecdsa(ECDSASecretKey),
    Bls(BLSSecretKey),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    Dummy,
    Ecdsa(ECDSAPublicKey),
    Bls(BLSPublicKey),
}

impl PublicKey {
    pub fn kind(&self) -> SchemeKind {
        match self {
            PublicKey::Dummy => SchemeKind::Dummy,
            PublicKey::Ecdsa(_) => SchemeKind::Ecdsa,
            PublicKey::Bls(_) => SchemeKind::Bls,
        }
    }
}

/// A keypair for one replica, generated for whichever scheme the deployment
/// is configured with.
#[derive(Clone)]
pub struct Keypair {
    pub id: ReplicaId,
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl Keypair {
    pub fn generate(id: ReplicaId, kind: SchemeKind) -> Self {
        match kind {
            SchemeKind::Dummy => Keypair {
                id,
                secret: SecretKey::Dummy,
                public: PublicKey::Dummy,
            },
            SchemeKind::Ecdsa => {
                let sk = ECDSASecretKey::generate();
                let pk = sk.public_key();
                Keypair {
                    id,
                    secret: SecretKey::Ecdsa(sk),
                    public: PublicKey::Ecdsa(pk),
                }
            }
            SchemeKind::Bls => {
                let sk = BLSSecretKey::generate(id as u64);
                let pk = sk.public_key();
                Keypair {
                    id,
                    secret: SecretKey::Bls(sk),
                    public: PublicKey::Bls(pk),
                }
            }
        }
    }

    pub fn from_bls(id: ReplicaId, pair: BLSKeyPair) -> Self {
        Keypair {
            id,
            secret: SecretKey::Bls(pair.secret_key),
            public: PublicKey::Bls(pair.public_key),
        }
    }

    /// Sign over an object hash, producing a partial certificate.
    pub fn sign_part(&self, obj_hash: Hash) -> PartialCert {
        let sig = match &self.secret {
            SecretKey::Dummy => PartialSig::Dummy,
            SecretKey::Ecdsa(sk) => PartialSig::Ecdsa(ecdsa::sign(sk, obj_hash.as_bytes())),
            SecretKey::Bls(sk) => {
                PartialSig::Bls(bls::threshold_sign(sk, obj_hash.as_bytes()))
            }
        };
        PartialCert {
            obj_hash,
            voter: self.id,
            sig,
        }
    }
}

#[derive(Clone, Debug)]
pub enum PartialSig {
    Dummy,
    Ecdsa(ECDSASignature),
    Bls(BLSPartialSignature),
}

/// A single replica's signature over a block hash.
#[derive(Clone, Debug)]
pub struct PartialCert {
    pub obj_hash: Hash,
    pub voter: ReplicaId,
    pub sig: PartialSig,
}

impl PartialCert {
    /// Raw signature bytes for the wire's `partial_cert` tail. Voter and
    /// object hash travel alongside it in the envelope, not inside this blob.
    pub fn sig_bytes(&self) -> Vec<u8> {
        match &self.sig {
            PartialSig::Dummy => Vec::new(),
            PartialSig::Ecdsa(s) => s.to_bytes(),
            PartialSig::Bls(p) => p.signature.to_bytes(),
        }
    }

    /// Reconstructs a `PartialCert` from its wire signature bytes, given the
    /// scheme, voter id and object hash carried separately in the envelope.
    pub fn from_sig_bytes(
        obj_hash: Hash,
        voter: ReplicaId,
        scheme: SchemeKind,
        bytes: &[u8],
    ) -> Result<Self, CryptoError> {
        let sig = match scheme {
            SchemeKind::Dummy => PartialSig::Dummy,
            SchemeKind::Ecdsa => PartialSig::Ecdsa(ecdsa::ECDSASignature::from_bytes(bytes)?),
            SchemeKind::Bls => PartialSig::Bls(BLSPartialSignature {
                signature: bls::BLSSignature::from_bytes(bytes)?,
                validator_id: voter as u64,
            }),
        };
        Ok(PartialCert { obj_hash, voter, sig })
    }

    pub fn kind(&self) -> SchemeKind {
        match self.sig {
            PartialSig::Dummy => SchemeKind::Dummy,
            PartialSig::Ecdsa(_) => SchemeKind::Ecdsa,
            PartialSig::Bls(_) => SchemeKind::Bls,
        }
    }

    pub fn verify(&self, pk: &PublicKey) -> Result<bool, CryptoError> {
        match (&self.sig, pk) {
            (PartialSig::Dummy, PublicKey::Dummy) => Ok(true),
            (PartialSig::Ecdsa(sig), PublicKey::Ecdsa(pk)) => {
                Ok(ecdsa::verify(pk, self.obj_hash.as_bytes(), sig)?)
            }
            (PartialSig::Bls(part), PublicKey::Bls(pk)) => Ok(bls::threshold_verify(
                self.obj_hash.as_bytes(),
                &part.signature,
                std::slice::from_ref(pk),
            )?),
            _ => Err(CryptoError::SchemeMismatch),
        }
    }
}

/// A bitmap of which replica indices have contributed to a QC. Indexed by
/// replica id, not a dense position, so its length equals `nreplicas`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Bitmap(pub Vec<bool>);

impl Bitmap {
    pub fn new(nreplicas: usize) -> Self {
        Bitmap(vec![false; nreplicas])
    }

    pub fn set(&mut self, id: ReplicaId) {
        if (id as usize) >= self.0.len() {
            self.0.resize(id as usize + 1, false);
        }
        self.0[id as usize] = true;
    }

    pub fn get(&self, id: ReplicaId) -> bool {
        self.0.get(id as usize).copied().unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|b| **b).count()
    }

    pub fn signers(&self) -> Vec<ReplicaId> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .map(|(i, _)| i as ReplicaId)
            .collect()
    }

    fn overlaps(&self, other: &Bitmap) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .any(|(a, b)| *a && *b)
    }

    fn union(&mut self, other: &Bitmap) {
        if other.0.len() > self.0.len() {
            self.0.resize(other.0.len(), false);
        }
        for (i, b) in other.0.iter().enumerate() {
            if *b {
                self.0[i] = true;
            }
        }
    }
}

/// Binds an object hash to proof that `>= nmajority` replicas voted for it
/// Polymorphic over scheme via a closed enum
/// rather than a trait object — see DESIGN.md for why.
#[derive(Clone, Debug)]
pub enum QuorumCert {
    Dummy(DummyQc),
    Ecdsa(EcdsaQc),
    Bls(BlsQc),
}

impl QuorumCert {
    pub fn new(kind: SchemeKind, obj_hash: Hash, nreplicas: usize) -> Self {
        match kind {
            SchemeKind::Dummy => QuorumCert::Dummy(DummyQc {
                obj_hash,
                bitmap: Bitmap::new(nreplicas),
                sealed: false,
            }),
            SchemeKind::Ecdsa => QuorumCert::Ecdsa(EcdsaQc {
                obj_hash,
                bitmap: Bitmap::new(nreplicas),
                parts: Vec::new(),
                sealed: None,
            }),
            SchemeKind::Bls => QuorumCert::Bls(BlsQc {
                obj_hash,
                bitmap: Bitmap::new(nreplicas),
                chunks: Vec::new(),
                sealed: None,
            }),
        }
    }

    /// Reconstructs an already-sealed QC from wire parts: a bitmap plus
    /// scheme-specific sealed bytes, with no local aggregation
    /// history. Used when decoding a `WireQc` received over the network
    /// (e.g. the `qc` carried on a `Propose`, or a relayed `VoteRelay`
    /// aggregate) rather than one this replica folded votes into itself.
    pub fn from_sealed(
        kind: SchemeKind,
        obj_hash: Hash,
        bitmap: Bitmap,
        ecdsa_sigs: &[Vec<u8>],
        bls_aggregate: Option<&[u8]>,
    ) -> Result<Self, CryptoError> {
        match kind {
            SchemeKind::Dummy => Ok(QuorumCert::Dummy(DummyQc::sealed(obj_hash, bitmap))),
            SchemeKind::Ecdsa => {
                let sigs = ecdsa_sigs
                    .iter()
                    .map(|b| ECDSASignature::from_bytes(b))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(QuorumCert::Ecdsa(EcdsaQc::sealed(obj_hash, bitmap, sigs)))
            }
            SchemeKind::Bls => {
                let agg = bls_aggregate.ok_or(CryptoError::NotSealed)?;
                let sig = BLSSignature::from_bytes(agg)?;
                Ok(QuorumCert::Bls(BlsQc::sealed(obj_hash, bitmap, sig)))
            }
        }
    }

    pub fn obj_hash(&self) -> Hash {
        match self {
            QuorumCert::Dummy(q) => q.obj_hash,
            QuorumCert::Ecdsa(q) => q.obj_hash,
            QuorumCert::Bls(q) => q.obj_hash,
        }
    }

    pub fn bitmap(&self) -> &Bitmap {
        match self {
            QuorumCert::Dummy(q) => &q.bitmap,
            QuorumCert::Ecdsa(q) => &q.bitmap,
            QuorumCert::Bls(q) => &q.bitmap,
        }
    }

    pub fn kind(&self) -> SchemeKind {
        match self {
            QuorumCert::Dummy(_) => SchemeKind::Dummy,
            QuorumCert::Ecdsa(_) => SchemeKind::Ecdsa,
            QuorumCert::Bls(_) => SchemeKind::Bls,
        }
    }

    /// `add_part(rid, partial)` — rejects a part for a different object hash;
    /// silently no-ops on a duplicate voter.
    pub fn add_part(&mut self, part: PartialCert) -> Result<(), CryptoError> {
        if part.obj_hash != self.obj_hash() {
            return Err(CryptoError::WrongObject {
                expected: self.obj_hash(),
                actual: part.obj_hash,
            });
        }
        if self.bitmap().get(part.voter) {
            return Ok(());
        }
        match (self, part.sig) {
            (QuorumCert::Dummy(q), PartialSig::Dummy) => {
                q.bitmap.set(part.voter);
            }
            (QuorumCert::Ecdsa(q), PartialSig::Ecdsa(sig)) => {
                q.bitmap.set(part.voter);
                q.parts.push((part.voter, sig));
            }
            (QuorumCert::Bls(q), PartialSig::Bls(sig)) => {
                q.bitmap.set(part.voter);
                q.chunks.push(sig.signature);
            }
            _ => return Err(CryptoError::SchemeMismatch),
        }
        Ok(())
    }

    /// `merge(other)` — incorporates an already-`compute()`d QC for the same
    /// object (a relayed partial aggregate from a tree child). Rejects an
    /// overlapping signer set: each replica contributes exactly once.
    pub fn merge(&mut self, other: &QuorumCert) -> Result<(), CryptoError> {
        if other.obj_hash() != self.obj_hash() {
            return Err(CryptoError::WrongObject {
                expected: self.obj_hash(),
                actual: other.obj_hash(),
            });
        }
        if self.bitmap().overlaps(other.bitmap()) {
            return Err(CryptoError::OverlappingSigners);
        }
        match (self, other) {
            (QuorumCert::Dummy(q), QuorumCert::Dummy(o)) => {
                q.bitmap.union(&o.bitmap);
            }
            (QuorumCert::Ecdsa(q), QuorumCert::Ecdsa(o)) => {
                let sealed = o.sealed.as_ref().ok_or(CryptoError::NotSealed)?;
                for (id, sig) in o.bitmap.signers().into_iter().zip(sealed.iter().cloned()) {
                    q.parts.push((id, sig));
                }
                q.bitmap.union(&o.bitmap);
            }
            (QuorumCert::Bls(q), QuorumCert::Bls(o)) => {
                let sealed = o.sealed.as_ref().ok_or(CryptoError::NotSealed)?;
                q.chunks.push(sealed.clone());
                q.bitmap.union(&o.bitmap);
            }
            _ => return Err(CryptoError::SchemeMismatch),
        }
        Ok(())
    }

    /// `has_n(t)` — monotone in incoming votes.
    pub fn has_n(&self, t: usize) -> bool {
        self.bitmap().count() >= t
    }

    /// `compute()` — finalize aggregation. Idempotent.
    pub fn compute(&mut self) -> Result<(), CryptoError> {
        match self {
            QuorumCert::Dummy(q) => {
                if q.bitmap.count() == 0 {
                    return Err(CryptoError::Empty);
                }
                q.sealed = true;
                Ok(())
            }
            QuorumCert::Ecdsa(q) => {
                if q.sealed.is_some() {
                    return Ok(());
                }
                if q.parts.is_empty() {
                    return Err(CryptoError::Empty);
                }
                let mut ordered = q.parts.clone();
                ordered.sort_by_key(|(id, _)| *id);
                q.sealed = Some(ordered.into_iter().map(|(_, s)| s).collect());
                Ok(())
            }
            QuorumCert::Bls(q) => {
                if q.sealed.is_some() {
                    return Ok(());
                }
                if q.chunks.is_empty() {
                    return Err(CryptoError::Empty);
                }
                let k = q.chunks.len();
                let parts: Vec<BLSPartialSignature> = q
                    .chunks
                    .iter()
                    .enumerate()
                    .map(|(i, sig)| BLSPartialSignature {
                        signature: sig.clone(),
                        validator_id: i as u64,
                    })
                    .collect();
                let combined = bls::threshold_combine(q.obj_hash.as_bytes(), &parts, k)?;
                q.sealed = Some(combined);
                Ok(())
            }
        }
    }

    /// `verify(config)` — requires `compute()` to have run.
    pub fn verify(&self, pubkeys: &[PublicKey]) -> Result<bool, CryptoError> {
        match self {
            QuorumCert::Dummy(q) => {
                if !q.sealed {
                    return Err(CryptoError::NotSealed);
                }
                Ok(true)
            }
            QuorumCert::Ecdsa(q) => {
                let sealed = q.sealed.as_ref().ok_or(CryptoError::NotSealed)?;
                for (id, sig) in q.bitmap.signers().into_iter().zip(sealed.iter()) {
                    let pk = match &pubkeys[id as usize] {
                        PublicKey::Ecdsa(pk) => pk,
                        _ => return Err(CryptoError::SchemeMismatch),
                    };
                    if !ecdsa::verify(pk, q.obj_hash.as_bytes(), sig)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            QuorumCert::Bls(q) => {
                let sealed = q.sealed.as_ref().ok_or(CryptoError::NotSealed)?;
                let signer_keys: Vec<BLSPublicKey> = q
                    .bitmap
                    .signers()
                    .into_iter()
                    .map(|id| match &pubkeys[id as usize] {
                        PublicKey::Bls(pk) => pk.clone(),
                        _ => unreachable!("scheme mismatch checked by caller"),
                    })
                    .collect();
                Ok(bls::threshold_verify(q.obj_hash.as_bytes(), sealed, &signer_keys)?)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct DummyQc {
    pub obj_hash: Hash,
    pub bitmap: Bitmap,
    sealed: bool,
}

impl DummyQc {
    /// Rebuilds an already-sealed QC straight from a wire bitmap, skipping
    /// `add_part`/`compute` — used when a replica reconstructs a QC it
    /// received rather than aggregated itself.
    fn sealed(obj_hash: Hash, bitmap: Bitmap) -> Self {
        DummyQc { obj_hash, bitmap, sealed: true }
    }
}

#[derive(Clone, Debug)]
pub struct EcdsaQc {
    pub obj_hash: Hash,
    pub bitmap: Bitmap,
    parts: Vec<(ReplicaId, ECDSASignature)>,
    sealed: Option<Vec<ECDSASignature>>,
}

impl EcdsaQc {
    pub fn sealed_sigs(&self) -> Option<&[ECDSASignature]> {
        self.sealed.as_deref()
    }

    fn sealed(obj_hash: Hash, bitmap: Bitmap, sigs: Vec<ECDSASignature>) -> Self {
        EcdsaQc { obj_hash, bitmap, parts: Vec::new(), sealed: Some(sigs) }
    }
}

#[derive(Clone, Debug)]
pub struct BlsQc {
    pub obj_hash: Hash,
    pub bitmap: Bitmap,
    chunks: Vec<BLSSignature>,
    sealed: Option<BLSSignature>,
}

impl BlsQc {
    pub fn sealed_sig(&self) -> Option<&BLSSignature> {
        self.sealed.as_ref()
    }

    fn sealed(obj_hash: Hash, bitmap: Bitmap, sig: BLSSignature) -> Self {
        BlsQc { obj_hash, bitmap, chunks: Vec::new(), sealed: Some(sig) }
    }
}
