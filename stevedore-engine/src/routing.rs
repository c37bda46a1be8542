//! Partition routing model.
//!
//! A partition key hashes to a point in a 64-bit key space; a
//! [`RoutingMap`] maps half-open slices of that space to range ids. The map
//! is fetched (and refreshed after split/merge signals) through the
//! [`MetadataProvider`] collaborator; translation from key to range id is a
//! pure function of the key, the definition, and the map.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::Hasher;
use std::sync::Arc;

use async_trait::async_trait;

use stevedore_core::{PartitionKey, RangeId};

use crate::cancel::CancelToken;
use crate::error::EngineResult;

/// Partition key definition of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionKeyDefinition {
    /// JSON paths making up the key.
    pub paths: Vec<String>,
    /// Hashing version; part of the effective-key derivation.
    pub version: u32,
}

impl Default for PartitionKeyDefinition {
    fn default() -> Self {
        Self {
            paths: vec!["/pk".to_string()],
            version: 2,
        }
    }
}

/// Hashes a partition key into the routing key space.
///
/// Pure function of the key and the definition: the same key always lands
/// on the same point, so retried operations re-resolve consistently.
#[must_use]
pub fn effective_hash(key: &PartitionKey, definition: &PartitionKeyDefinition) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write_u32(definition.version);
    hasher.write(&key.canonical_bytes());
    let hash = hasher.finish();
    // The key space is [0, u64::MAX) so half-open ranges cover it exactly.
    if hash == u64::MAX {
        u64::MAX - 1
    } else {
        hash
    }
}

/// A half-open slice `[start, end)` of the routing key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    /// Start of the range (inclusive).
    pub start: u64,
    /// End of the range (exclusive).
    pub end: u64,
}

impl KeyRange {
    /// Creates a new key range.
    ///
    /// # Panics
    /// Panics if `start >= end`.
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start < end, "key range start must be < end");
        Self { start, end }
    }

    /// Returns true if this range contains the given hash.
    #[must_use]
    pub const fn contains(&self, hash: u64) -> bool {
        hash >= self.start && hash < self.end
    }

    /// Splits this range at `mid`.
    ///
    /// # Panics
    /// Panics if `mid` is not strictly inside the range.
    #[must_use]
    pub fn split_at(&self, mid: u64) -> (Self, Self) {
        assert!(
            mid > self.start && mid < self.end,
            "split point must be within range"
        );
        (Self::new(self.start, mid), Self::new(mid, self.end))
    }
}

#[derive(Debug, Clone)]
struct RangeEntry {
    range: KeyRange,
    id: RangeId,
}

/// Maps routing-key slices to partition range ids.
#[derive(Debug, Clone, Default)]
pub struct RoutingMap {
    /// Entries keyed by range start for efficient lookup.
    ranges: BTreeMap<u64, RangeEntry>,
    /// Bumped on every change; refreshed maps always compare newer.
    version: u64,
}

impl RoutingMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map with one range covering the whole key space.
    #[must_use]
    pub fn single(id: RangeId) -> Self {
        let mut map = Self::new();
        map.assign(KeyRange::new(0, u64::MAX), id);
        map
    }

    /// Creates a map dividing the key space evenly among `ids`.
    ///
    /// # Panics
    /// Panics if `ids` is empty.
    #[must_use]
    pub fn uniform(ids: &[RangeId]) -> Self {
        assert!(!ids.is_empty(), "ids cannot be empty");

        let mut map = Self::new();
        let slice = u64::MAX / ids.len() as u64;
        for (i, &id) in ids.iter().enumerate() {
            let start = slice * i as u64;
            let end = if i == ids.len() - 1 {
                u64::MAX
            } else {
                slice * (i as u64 + 1)
            };
            map.assign(KeyRange::new(start, end), id);
        }
        map
    }

    /// Assigns a range id to a key slice, replacing any entry with the same
    /// start.
    pub fn assign(&mut self, range: KeyRange, id: RangeId) {
        self.ranges.insert(range.start, RangeEntry { range, id });
        self.version += 1;
    }

    /// Returns the range id owning `hash`.
    #[must_use]
    pub fn range_of(&self, hash: u64) -> Option<RangeId> {
        self.ranges
            .range(..=hash)
            .next_back()
            .filter(|(_, entry)| entry.range.contains(hash))
            .map(|(_, entry)| entry.id)
    }

    /// Returns a copy of this map with `old` split at its midpoint into
    /// `left` and `right`, or `None` if `old` is not present.
    #[must_use]
    pub fn split(&self, old: RangeId, left: RangeId, right: RangeId) -> Option<Self> {
        let entry = self.ranges.values().find(|e| e.id == old)?.clone();
        let mid = entry.range.start + (entry.range.end - entry.range.start) / 2;
        let (left_range, right_range) = entry.range.split_at(mid);

        let mut map = self.clone();
        map.ranges.remove(&entry.range.start);
        map.assign(left_range, left);
        map.assign(right_range, right);
        Some(map)
    }

    /// Returns the number of ranges in the map.
    #[must_use]
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Returns the map version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }
}

/// Routing and container metadata collaborator.
///
/// Implementations must be `Send + Sync`; the engine calls them from the
/// add path and the rebatch loop concurrently.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Returns the container's partition key definition.
    async fn partition_key_definition(
        &self,
        cancel: &CancelToken,
    ) -> EngineResult<PartitionKeyDefinition>;

    /// Returns the current routing map.
    async fn routing_map(&self, cancel: &CancelToken) -> EngineResult<Arc<RoutingMap>>;

    /// Forces a routing-map refresh and returns the refreshed map.
    async fn refresh_routing_map(&self, cancel: &CancelToken) -> EngineResult<Arc<RoutingMap>>;

    /// Returns the value routed for operations without a partition key.
    async fn none_partition_key(&self, cancel: &CancelToken) -> EngineResult<PartitionKey>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_map_covers_key_space() {
        let map = RoutingMap::single(RangeId::new(0));
        for hash in [0, 1, u64::MAX / 2, u64::MAX - 1] {
            assert_eq!(map.range_of(hash), Some(RangeId::new(0)));
        }
    }

    #[test]
    fn test_uniform_map_partitions_key_space() {
        let ids = vec![RangeId::new(1), RangeId::new(2), RangeId::new(3)];
        let map = RoutingMap::uniform(&ids);

        assert_eq!(map.range_count(), 3);
        assert_eq!(map.range_of(0), Some(RangeId::new(1)));
        assert_eq!(map.range_of(u64::MAX - 1), Some(RangeId::new(3)));

        // Every hash maps to exactly one range.
        for hash in [0, u64::MAX / 3, u64::MAX / 2, u64::MAX - 1] {
            assert!(map.range_of(hash).is_some(), "hash {hash} unmapped");
        }
    }

    #[test]
    fn test_split_moves_ownership() {
        let map = RoutingMap::single(RangeId::new(0));
        let split = map
            .split(RangeId::new(0), RangeId::new(1), RangeId::new(2))
            .unwrap();

        assert_eq!(split.range_count(), 2);
        assert_eq!(split.range_of(0), Some(RangeId::new(1)));
        assert_eq!(split.range_of(u64::MAX - 1), Some(RangeId::new(2)));
        assert!(split.version() > map.version());

        // The old id no longer owns anything.
        for hash in [0, u64::MAX / 2, u64::MAX - 1] {
            assert_ne!(split.range_of(hash), Some(RangeId::new(0)));
        }
    }

    #[test]
    fn test_split_unknown_range_is_none() {
        let map = RoutingMap::single(RangeId::new(0));
        assert!(map
            .split(RangeId::new(9), RangeId::new(1), RangeId::new(2))
            .is_none());
    }

    #[test]
    fn test_effective_hash_is_stable() {
        let definition = PartitionKeyDefinition::default();
        let a = effective_hash(&PartitionKey::from("tenant-1"), &definition);
        let b = effective_hash(&PartitionKey::from("tenant-1"), &definition);
        let c = effective_hash(&PartitionKey::from("tenant-2"), &definition);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_none_sentinel_hashes_distinctly() {
        let definition = PartitionKeyDefinition::default();
        let none = effective_hash(&PartitionKey::None, &definition);
        let null = effective_hash(&PartitionKey::Null, &definition);
        assert_ne!(none, null);
    }
}
