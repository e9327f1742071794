//! Generation seeds.
//!
//! A uniform string maps to the same seed for the lifetime of one
//! [`SeedSalt`], so images sharing it are reproducible within a run but not
//! across runs.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Largest seed the backend accepts.
pub const MAX_SEED: u64 = (1 << 63) - 1;

/// Per-process salt mixed into every uniform-string hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSalt(u32);

impl SeedSalt {
    pub fn generate() -> Self {
        Self(rand::rng().random())
    }

    pub fn from_value(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Low 63 bits of `sha256(s + decimal(salt))` read as a big-endian integer.
    pub fn hash_mix_salt(self, s: &str) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(s.as_bytes());
        hasher.update(self.0.to_string().as_bytes());
        let digest = hasher.finalize();

        let mut low = [0u8; 8];
        low.copy_from_slice(&digest[24..32]);
        u64::from_be_bytes(low) & MAX_SEED
    }
}

pub fn random_seed() -> u64 {
    rand::rng().random_range(0..=MAX_SEED)
}

/// Seed for one planning round: derived from the uniform string when one is
/// set, random otherwise.
pub fn order_seed(salt: SeedSalt, uniform_string: &str) -> u64 {
    if uniform_string.is_empty() {
        random_seed()
    } else {
        salt.hash_mix_salt(uniform_string)
    }
}
