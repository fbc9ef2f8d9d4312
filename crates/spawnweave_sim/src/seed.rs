//! Run seeds.
//!
//! A run is reproducible from one `u64`. Each seeded component draws from its
//! own stream, derived from the run seed and a context name, so adding a node
//! does not shift the latency draws of the network.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Seed of one simulated run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimSeed(u64);

impl SimSeed {
    /// Seed from a literal value
    #[must_use]
    pub fn from_literal(seed: u64) -> Self {
        Self(seed)
    }

    /// Raw seed value
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }

    /// Seed of one component, e.g. `"network"` or a node name
    #[must_use]
    pub fn derive(self, context: &str) -> Self {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write_u64(self.0);
        hasher.write(context.as_bytes());
        Self(hasher.finish())
    }

    /// Generator for this seed
    #[must_use]
    pub fn into_rng(self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.0)
    }
}

impl Default for SimSeed {
    fn default() -> Self {
        Self(42)
    }
}
