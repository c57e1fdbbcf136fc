use std::hash::{BuildHasher, Hash};

use foldhash::fast::FixedState;

/// Hashes and compares keys of a [`JumpTable`][crate::JumpTable].
///
/// The table never hashes keys itself - it calls the hasher with the key and the table's current
/// seed, so that re-seeding during a rehash changes the probe layout.
pub trait KeyHasher<K: ?Sized> {
    /// Returns a 64-bit hash of `key` mixed with `seed`.
    fn hash(&self, key: &K, seed: u64) -> u64;

    /// Returns whether two keys are the same key.
    fn equals(&self, a: &K, b: &K) -> bool;
}

/// The default [`KeyHasher`] for keys that implement [`Hash`] and [`Eq`], backed by `foldhash`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[expect(clippy::exhaustive_structs, reason = "intentionally an empty struct")]
pub struct FoldKeyHasher;

impl<K: Hash + Eq + ?Sized> KeyHasher<K> for FoldKeyHasher {
    fn hash(&self, key: &K, seed: u64) -> u64 {
        FixedState::with_seed(seed).hash_one(key)
    }

    fn equals(&self, a: &K, b: &K) -> bool {
        a == b
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_hash() {
        let hasher = FoldKeyHasher;

        assert_eq!(hasher.hash(&42_u32, 7), hasher.hash(&42_u32, 7));
        assert_eq!(hasher.hash("text", 7), hasher.hash("text", 7));
    }

    #[test]
    fn seed_changes_hash() {
        let hasher = FoldKeyHasher;

        assert_ne!(hasher.hash(&42_u32, 7), hasher.hash(&42_u32, 8));
    }

    #[test]
    fn equals_uses_eq() {
        let hasher = FoldKeyHasher;

        assert!(hasher.equals(&1, &1));
        assert!(!hasher.equals(&1, &2));
    }
}
