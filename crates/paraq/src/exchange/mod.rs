//! Redistributing elements across partitions by hash.

pub mod hash_repartition;

use std::hash::Hash;

use ahash::RandomState;

/// State used for hashing elements when picking an output partition.
pub const HASH_RANDOM_STATE: RandomState = RandomState::with_seeds(0, 0, 0, 0);

/// State used for hash tables built after repartitioning.
///
/// Differs from the partitioning state. Every key in a partition shares the
/// same hash modulo the partition count, which would otherwise cluster
/// buckets in the table.
pub const TABLE_RANDOM_STATE: RandomState = RandomState::with_seeds(1, 2, 3, 4);

pub type HashMap<K, V> = hashbrown::HashMap<K, V, RandomState>;
pub type HashSet<K> = hashbrown::HashSet<K, RandomState>;

pub fn new_hash_map<K, V>() -> HashMap<K, V> {
    hashbrown::HashMap::with_hasher(TABLE_RANDOM_STATE)
}

pub fn new_hash_set<K>() -> HashSet<K> {
    hashbrown::HashSet::with_hasher(TABLE_RANDOM_STATE)
}

pub fn hash_value<K: Hash + ?Sized>(value: &K) -> u64 {
    HASH_RANDOM_STATE.hash_one(value)
}

/// Get the partition to use for a hash.
pub const fn partition_for_hash(hash: u64, partitions: usize) -> usize {
    hash as usize % partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_value("group"), hash_value("group"));
        assert_eq!(hash_value(&42_u64), hash_value(&42_u64));
    }

    #[test]
    fn partition_in_range() {
        for v in 0..1000_u32 {
            assert!(partition_for_hash(hash_value(&v), 7) < 7);
        }
    }
}
