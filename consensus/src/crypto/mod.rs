/// Cryptography module.
///
/// Implements:
/// - A capability-set abstraction (`scheme`) over partial/quorum certs with
///   dummy, ECDSA+bitmap and BLS-aggregate backends.
/// - BLS threshold signatures (k-of-n, constant-size QCs).
/// - ECDSA signatures (per-replica QC fallback).
/// - Hash functions (SHA-256 / BLAKE3).
/// - A fixed-size verification worker pool.

pub mod bls;
pub mod ecdsa;
pub mod hash;
pub mod pool;
pub mod scheme;

pub use bls::{
    threshold_combine, threshold_sign, threshold_verify, BLSKeyPair, BLSPartialSignature,
    BLSPublicKey, BLSSecretKey, BLSSignature,
};
pub use ecdsa::{sign as ecdsa_sign, verify as ecdsa_verify, ECDSAPublicKey, ECDSASecretKey, ECDSASignature};
pub use hash::{hash_data, Hash, HashFunction};
pub use pool::{VerificationPool, VerifyOutcome, VerifyTask};
pub use scheme::{
    Bitmap, CryptoError, Keypair, PartialCert, PartialSig, PublicKey, QuorumCert, SchemeKind,
    SecretKey,
};

pub use hash::hash_data as hash;
