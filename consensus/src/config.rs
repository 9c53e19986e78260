/// Replica configuration.
///
/// Immutable after construction, identical (modulo `this_id`/`secret_key`)
/// across all correct replicas.

use crate::crypto::scheme::{Keypair, PublicKey, SchemeKind};
use crate::ReplicaId;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub id: ReplicaId,
    pub address: String,
    pub public_key: PublicKey,
}

#[derive(Clone)]
pub struct ReplicaConfig {
    /// `N`, total replica count.
    pub nreplicas: usize,
    /// Maximum tolerated Byzantine faults, `f = (N-1)/3`.
    pub f: usize,
    /// `nmajority = N - f`, the vote threshold.
    pub nmajority: usize,
    pub scheme: SchemeKind,
    /// Every replica's network identity and public key, indexed by `ReplicaId`.
    pub peers: Vec<PeerInfo>,
    pub this_id: ReplicaId,
    pub keypair: Keypair,
    /// Tree fanout `k`: how many children each vote-aggregation tree node has.
    pub fanout: usize,
    /// Pipelining depth `A`: how many speculative blocks the leader may have
    /// outstanding before a prior one's QC lands.
    pub pipeline_depth: usize,
    /// Minimum spacing between speculative proposals when no piped QC has
    /// landed yet.
    pub piped_latency: Duration,
    /// Max commands batched per block.
    pub blk_size: usize,
    /// Pacemaker base view timeout, configurable per deployment.
    pub view_timeout: Duration,
    /// Fetch retry timer, randomized around this value.
    pub fetch_timeout: Duration,
}

impl ReplicaConfig {
    pub fn new(
        peers: Vec<PeerInfo>,
        this_id: ReplicaId,
        keypair: Keypair,
        scheme: SchemeKind,
        f: usize,
        fanout: usize,
        pipeline_depth: usize,
    ) -> Self {
        let nreplicas = peers.len();
        assert!(
            nreplicas >= 3 * f + 1,
            "replica set of {nreplicas} cannot tolerate f={f} Byzantine faults"
        );
        let nmajority = nreplicas - f;
        Self {
            nreplicas,
            f,
            nmajority,
            scheme,
            peers,
            this_id,
            keypair,
            fanout: fanout.max(1),
            pipeline_depth: pipeline_depth.max(1),
            piped_latency: Duration::from_millis(50),
            blk_size: 100,
            view_timeout: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(10),
        }
    }

    pub fn public_key(&self, id: ReplicaId) -> Option<&PublicKey> {
        self.peers.iter().find(|p| p.id == id).map(|p| &p.public_key)
    }

    pub fn public_keys_in_order(&self) -> Vec<PublicKey> {
        let mut by_id: Vec<Option<PublicKey>> = vec![None; self.nreplicas];
        for p in &self.peers {
            by_id[p.id as usize] = Some(p.public_key.clone());
        }
        by_id
            .into_iter()
            .map(|pk| pk.expect("replica config missing a public key"))
            .collect()
    }

}
