/// Fixed-size worker pool for CPU-bound signature verification.
///
/// The consensus core never verifies a signature inline: it submits a
/// `VerifyTask` and is handed back a future that resolves on the event loop
/// once a pool worker finishes. Built on `tokio::task::spawn_blocking` rather
/// than a hand-rolled thread pool, matching the async idiom the rest of this
/// crate uses for off-loop work.

use super::scheme::{CryptoError, PartialCert, PublicKey, QuorumCert};
use tokio::sync::Semaphore;
use std::sync::Arc;

/// A single verification task: either a partial certificate against one
/// public key, or a sealed quorum certificate against the full signer set.
pub enum VerifyTask {
    Part {
        part: PartialCert,
        pubkey: PublicKey,
    },
    Cert {
        cert: QuorumCert,
        pubkeys: Vec<PublicKey>,
    },
}

pub enum VerifyOutcome {
    Part(Result<bool, CryptoError>),
    Cert(Result<bool, CryptoError>),
}

/// Bounds the number of verification tasks running concurrently to
/// `workers` (default 4), the way a fixed-size thread pool would.
pub struct VerificationPool {
    permits: Arc<Semaphore>,
}

impl VerificationPool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn default_sized() -> Self {
        Self::new(4)
    }

    /// Submit a task; resolves once a worker slot is free and verification
    /// completes. Safe to call from the event-loop thread — the blocking
    /// verification work happens on tokio's blocking pool, not here.
    pub async fn submit(&self, task: VerifyTask) -> VerifyOutcome {
        let permits = self.permits.clone();
        let _permit = permits.acquire_owned().await.expect("pool semaphore closed");
        tokio::task::spawn_blocking(move || match task {
            VerifyTask::Part { part, pubkey } => VerifyOutcome::Part(part.verify(&pubkey)),
            VerifyTask::Cert { cert, pubkeys } => VerifyOutcome::Cert(cert.verify(&pubkeys)),
        })
        .await
        .expect("verification worker panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::Hash;
    use crate::crypto::scheme::{Keypair, SchemeKind};

    #[tokio::test]
    async fn verifies_valid_part() {
        let pool = VerificationPool::default_sized();
        let kp = Keypair::generate(0, SchemeKind::Bls);
        let hash = Hash::new([1u8; 32]);
        let part = kp.sign_part(hash);
        let outcome = pool
            .submit(VerifyTask::Part {
                part,
                pubkey: kp.public.clone(),
            })
            .await;
        match outcome {
            VerifyOutcome::Part(Ok(valid)) => assert!(valid),
            _ => panic!("expected valid part"),
        }
    }

    #[tokio::test]
    async fn rejects_tampered_part() {
        let pool = VerificationPool::default_sized();
        let kp = Keypair::generate(0, SchemeKind::Bls);
        let other = Keypair::generate(1, SchemeKind::Bls);
        let hash = Hash::new([1u8; 32]);
        let part = kp.sign_part(hash);
        let outcome = pool
            .submit(VerifyTask::Part {
                part,
                pubkey: other.public.clone(),
            })
            .await;
        match outcome {
            VerifyOutcome::Part(Ok(valid)) => assert!(!valid),
            VerifyOutcome::Part(Err(_)) => {}
            _ => panic!("expected part outcome"),
        }
    }

    #[tokio::test]
    async fn bounded_concurrency_still_completes_all() {
        let pool = Arc::new(VerificationPool::new(2));
        let kp = Keypair::generate(0, SchemeKind::Bls);
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let pool = pool.clone();
            let kp = kp.clone();
            handles.push(tokio::spawn(async move {
                let hash = Hash::new([i; 32]);
                let part = kp.sign_part(hash);
                pool.submit(VerifyTask::Part {
                    part,
                    pubkey: kp.public.clone(),
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }
}
