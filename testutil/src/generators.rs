/// Test data generators

use rand::Rng;

/// Generate random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Generate random message for testing
pub fn random_message() -> Vec<u8> {
    random_bytes(32)
}

/// A batch of random command payloads, the shape consensus code batches into
/// a block body.
pub fn random_commands(count: usize, payload_len: usize) -> Vec<Vec<u8>> {
    (0..count).map(|_| random_bytes(payload_len)).collect()
}

/// Replica ids `0..n`, the ordering `ReplicaConfig`/`TreeTopology` expect.
pub fn replica_ids(n: u16) -> Vec<u16> {
    (0..n).collect()
}

