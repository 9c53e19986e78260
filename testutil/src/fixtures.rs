/// Shared test fixtures: deterministic RNG seeding and Byzantine fault
/// injection primitives. Kept generic over byte payloads rather than
/// `consensus` types — `testutil` sits below `consensus` in the dependency
/// graph, so it cannot name `consensus::Block` etc.; callers in `consensus`
/// build their own domain fixtures on top of these primitives.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A reproducible RNG for property tests that need a fixed seed to debug a
/// failing case (`proptest` shrinking aside, some scenario tests want a
/// literal seed to replay).
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_hash_bytes() -> [u8; 32] {
    let mut rng = rand::thread_rng();
    let mut out = [0u8; 32];
    rng.fill(&mut out);
    out
}

/// A free TCP port in the ephemeral range, for standing up loopback listeners
/// in network integration tests without port collisions.
pub fn random_loopback_port() -> u16 {
    rand::thread_rng().gen_range(20000..60000)
}

/// Simulates an unreliable link: drops or corrupts outbound bytes at fixed
/// rates, for exercising the fetch-retry and verification-rejection paths
/// without a real network.
pub struct ByzantineFaultInjector {
    drop_rate: f64,
    corrupt_rate: f64,
    rng: StdRng,
}

impl ByzantineFaultInjector {
    pub fn new(seed: u64, drop_rate: f64, corrupt_rate: f64) -> Self {
        ByzantineFaultInjector {
            drop_rate: drop_rate.clamp(0.0, 1.0),
            corrupt_rate: corrupt_rate.clamp(0.0, 1.0),
            rng: seeded_rng(seed),
        }
    }

    pub fn should_drop(&mut self) -> bool {
        self.rng.gen_bool(self.drop_rate)
    }

    /// Flips a random bit in `bytes` if this injector rolls a corruption,
    /// otherwise leaves it untouched. Returns whether it corrupted.
    pub fn maybe_corrupt(&mut self, bytes: &mut [u8]) -> bool {
        if bytes.is_empty() || !self.rng.gen_bool(self.corrupt_rate) {
            return false;
        }
        let idx = self.rng.gen_range(0..bytes.len());
        let bit = self.rng.gen_range(0..8);
        bytes[idx] ^= 1 << bit;
        true
    }
}
