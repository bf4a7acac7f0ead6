//! Probe instance names
//!
//! Names must be valid Compute Engine resource names
//! (`[a-z]([-a-z0-9]*[a-z0-9])?`, at most 63 characters) and should not collide
//! with a leftover instance from an earlier run in the same zone.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Prefix shared by all probe instances
pub const NAME_PREFIX: &str = "egress-verifier";

const SUFFIX_LEN: usize = 8;
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generates `egress-verifier-<suffix>` names from an injected random source
pub struct InstanceNameGenerator {
    rng: Mutex<StdRng>,
}

impl Default for InstanceNameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceNameGenerator {
    /// Generator seeded from OS entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic generator, for reproducible names in tests
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Generator over the given random source
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Produce the next name
    pub fn generate(&self) -> String {
        // RNG state stays valid across a poisoned lock.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
            .collect();
        format!("{}-{}", NAME_PREFIX, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn is_valid_gce_name(name: &str) -> bool {
        let bytes = name.as_bytes();
        !bytes.is_empty()
            && bytes.len() <= 63
            && bytes[0].is_ascii_lowercase()
            && bytes
                .iter()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
            && !name.ends_with('-')
    }

    #[test]
    fn names_are_prefixed_and_valid() {
        let gen = InstanceNameGenerator::new();
        for _ in 0..100 {
            let name = gen.generate();
            assert!(name.starts_with("egress-verifier-"), "{name}");
            assert_eq!(name.len(), NAME_PREFIX.len() + 1 + SUFFIX_LEN);
            assert!(is_valid_gce_name(&name), "{name}");
        }
    }

    #[test]
    fn same_seed_yields_same_sequence() {
        let a = InstanceNameGenerator::seeded(42);
        let b = InstanceNameGenerator::seeded(42);
        for _ in 0..10 {
            assert_eq!(a.generate(), b.generate());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let a = InstanceNameGenerator::seeded(1);
        let b = InstanceNameGenerator::seeded(2);
        assert_ne!(a.generate(), b.generate());
    }

    #[test]
    fn consecutive_names_do_not_collide() {
        let gen = InstanceNameGenerator::seeded(7);
        let names: HashSet<String> = (0..1000).map(|_| gen.generate()).collect();
        assert_eq!(names.len(), 1000);
    }
}
