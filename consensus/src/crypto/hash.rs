/// Content hashing.
///
/// Supports:
/// - SHA-256 (compatibility, wide support)
/// - BLAKE3 (3-10x faster than SHA-256)

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const HASH_SIZE: usize = 32;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("Invalid hash size")]
    InvalidSize,
}

/// Hash output (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, HashError> {
        if slice.len() != HASH_SIZE {
            return Err(HashError::InvalidSize);
        }
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Genesis hash (all zeros)
    pub fn genesis() -> Self {
        Self([0u8; HASH_SIZE])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash function selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashFunction {
    /// SHA-256 (compatibility)
    Sha256,
    /// BLAKE3 (performance)
    Blake3,
}

impl Default for HashFunction {
    fn default() -> Self {
        // Default to BLAKE3 for performance
        Self::Blake3
    }
}

/// Hash arbitrary data
pub fn hash_data(data: &[u8]) -> Hash {
    hash_data_with(data, HashFunction::default())
}

/// Hash data with specific function
pub fn hash_data_with(data: &[u8], function: HashFunction) -> Hash {
    match function {
        HashFunction::Sha256 => {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(data);
            let result = hasher.finalize();
            Hash::new(result.into())
        }
        HashFunction::Blake3 => {
            let result = blake3::hash(data);
            Hash::new(*result.as_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Instant;

    #[test]
    fn no_collisions_across_many_distinct_inputs() {
        let mut hashes = HashSet::new();
        let count = 100_000; // Reduced from 1M for faster testing
        
        for i in 0..count {
            let data = format!("block_{}", i);
            let hash = hash_data(data.as_bytes());
            hashes.insert(hash);
        }
        
        // Assert: No collisions
        assert_eq!(hashes.len(), count);
    }

    #[test]
    fn hashing_a_one_megabyte_block_stays_well_under_a_frame_budget() {
        let data = vec![0u8; 1_000_000];

        let start = Instant::now();
        let _ = hash_data(&data);
        let duration = start.elapsed();

        println!("Hash 1MB block: {:?}", duration);
        assert!(duration.as_millis() < 50);
    }

    #[test]
    fn hashing_is_deterministic_for_the_same_input() {
        let data = b"test data";
        
        let hash1 = hash_data(data);
        let hash2 = hash_data(data);
        let hash3 = hash_data(data);
        
        assert_eq!(hash1, hash2);
        assert_eq!(hash2, hash3);
    }

    #[test]
    fn blake3_and_sha256_both_complete_on_a_large_input() {
        let data = vec![0u8; 1_000_000];
        
        // SHA-256
        let start = Instant::now();
        let _sha256_hash = hash_data_with(&data, HashFunction::Sha256);
        let sha256_duration = start.elapsed();
        
        // BLAKE3
        let start = Instant::now();
        let _blake3_hash = hash_data_with(&data, HashFunction::Blake3);
        let blake3_duration = start.elapsed();
        
        println!("SHA-256: {:?}", sha256_duration);
        println!("BLAKE3: {:?}", blake3_duration);
        
        // BLAKE3 should be faster (but we don't assert to avoid flakiness)
    }

    #[test]
    fn display_shows_first_eight_bytes_in_hex() {
        let hash = hash_data(b"test");
        let display = format!("{}", hash);
        
        // Should show first 8 bytes in hex
        assert_eq!(display.len(), 16); // 8 bytes = 16 hex chars
    }

    #[test]
    fn genesis_hash_is_all_zeros() {
        let genesis = Hash::genesis();
        assert_eq!(genesis.as_bytes(), &[0u8; HASH_SIZE]);
    }
}

