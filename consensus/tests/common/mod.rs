//! Shared harness for the cross-module end-to-end scenarios: wires up a
//! fully connected `LoopbackNetwork` mesh and one `Replica` per id, mirroring
//! how a deployment wires `P2pNetwork` but without real sockets.

use consensus::config::{PeerInfo, ReplicaConfig};
use consensus::crypto::scheme::{Keypair, SchemeKind};
use consensus::ingress::IngressHandle;
use consensus::network::LoopbackNetwork;
use consensus::tree::TreeTopology;
use consensus::{Replica, ReplicaId};

/// Builds `n` replicas (ids `0..n`, id 0 the initial tree root) over an
/// in-memory loopback mesh. `f` is derived as `(n-1)/3`.
pub fn cluster(
    n: u16,
    scheme: SchemeKind,
    fanout: usize,
    pipeline_depth: usize,
) -> Vec<(Replica<LoopbackNetwork>, IngressHandle)> {
    let f = (n as usize - 1) / 3;
    let ids: Vec<ReplicaId> = (0..n).collect();
    let keys: Vec<Keypair> = ids.iter().map(|&id| Keypair::generate(id, scheme)).collect();
    let peers: Vec<PeerInfo> = keys
        .iter()
        .map(|k| PeerInfo {
            id: k.id,
            address: format!("127.0.0.1:{}", 9000 + k.id),
            public_key: k.public.clone(),
        })
        .collect();
    let mut networks = LoopbackNetwork::mesh(&ids);

    keys.into_iter()
        .map(|kp| {
            let id = kp.id;
            let config = ReplicaConfig::new(peers.clone(), id, kp, scheme, f, fanout, pipeline_depth);
            let tree = TreeTopology::new(ids.clone(), ids.clone(), fanout);
            let network = networks.remove(&id).expect("mesh built an entry for every id");
            Replica::new(config, tree, network)
        })
        .collect()
}

/// Spawns every replica's `run()` loop and returns the ingress handles in id
/// order. Replicas run until the test's runtime is torn down.
pub fn spawn_all(replicas: Vec<(Replica<LoopbackNetwork>, IngressHandle)>) -> Vec<IngressHandle> {
    let mut handles = Vec::with_capacity(replicas.len());
    for (replica, handle) in replicas {
        handles.push(handle);
        tokio::spawn(replica.run());
    }
    handles
}
