/// Pipelined, tree-aggregated BFT state-machine replication core.
///
/// A cluster of `nreplicas` replicas, tolerating `f < nreplicas/3` Byzantine
/// faults, agrees on a totally ordered sequence of opaque commands via a
/// pipelined three-phase chained-voting protocol (HotStuff-family). See
/// DESIGN.md for the module-by-module design rationale.

pub mod block;
pub mod config;
pub mod crypto;
pub mod consensus;
pub mod fetch;
pub mod ingress;
pub mod network;
pub mod pacemaker;
pub mod replica;
pub mod store;
pub mod tree;

/// Replica identifier, stable across view changes: the replica set and its
/// configuration persist even as tree topology and the designated leader
/// rotate.
pub type ReplicaId = u16;

pub use block::{Block, WireQc};
pub use config::{PeerInfo, ReplicaConfig};
pub use crypto::Hash;
pub use replica::Replica;
