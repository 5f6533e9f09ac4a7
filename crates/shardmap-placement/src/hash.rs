//! Routing application keys to partitions.
//!
//! Every node must send a key to the same partition, so the hash is seeded
//! with a fixed key rather than per-process randomness. A key maps to an index
//! into the ascending list of partition ids, which keeps routing stable for a
//! given topology even when partition ids are not contiguous.

use std::hash::Hasher;

use siphasher::sip::SipHasher13;

use crate::topology::{HostId, PartitionId, Topology};

/// Routing hash key shared by all nodes.
const ROUTING_HASH_KEY: (u64, u64) = (0x0706_0504_0302_0100, 0x0f0e_0d0c_0b0a_0908);

/// Hash a key for partition routing.
///
/// Uses SipHash-1-3 over the raw key bytes.
#[inline]
#[must_use]
pub fn key_hash(key: &[u8]) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(ROUTING_HASH_KEY.0, ROUTING_HASH_KEY.1);
    hasher.write(key);
    hasher.finish()
}

impl Topology {
    /// Partition responsible for `key`, or `None` if there are no partitions.
    #[must_use]
    pub fn partition_for_key(&self, key: &[u8]) -> Option<PartitionId> {
        let count = self.partition_count();
        if count == 0 {
            return None;
        }
        let index = (key_hash(key) % count as u64) as usize;
        self.partitions().keys().nth(index).copied()
    }

    /// Host leading the partition responsible for `key`.
    #[must_use]
    pub fn leader_for_key(&self, key: &[u8]) -> Option<HostId> {
        self.partition_for_key(key)
            .and_then(|id| self.partition(id))
            .map(|p| p.leader_host_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Host, Partition};

    fn topology(partitions: u32) -> Topology {
        Topology::from_parts(
            1,
            vec![Host::new(0, "a", (0..partitions).map(|id| id * 3), false)],
            (0..partitions).map(|id| Partition::new(id * 3, 0, [0])),
            partitions as i32,
            0,
            0,
        )
    }

    #[test]
    fn test_key_hash_deterministic() {
        assert_eq!(key_hash(b"customer-42"), key_hash(b"customer-42"));
        assert_ne!(key_hash(b"customer-42"), key_hash(b"customer-43"));
    }

    #[test]
    fn test_no_partitions() {
        assert!(Topology::empty().partition_for_key(b"key").is_none());
        assert!(Topology::empty().leader_for_key(b"key").is_none());
    }

    #[test]
    fn test_routes_to_existing_partition() {
        let topo = topology(16);
        for i in 0..1000 {
            let key = format!("key{i}");
            let id = topo.partition_for_key(key.as_bytes()).unwrap();
            assert_eq!(id % 3, 0);
            assert!(topo.partition(id).is_some());
            assert_eq!(topo.leader_for_key(key.as_bytes()), Some(0));
        }
    }

    #[test]
    fn test_routing_distribution() {
        let topo = topology(64);
        let mut counts = std::collections::BTreeMap::new();
        for i in 0..10000 {
            let id = topo.partition_for_key(format!("object-{i}").as_bytes()).unwrap();
            *counts.entry(id).or_insert(0u32) += 1;
        }
        assert_eq!(counts.len(), 64);

        // Within 60% of the expected share.
        let expected = 10000.0 / 64.0;
        for count in counts.values() {
            let ratio = f64::from(*count) / expected;
            assert!(ratio > 0.4 && ratio < 1.6, "Distribution too skewed: {ratio}");
        }
    }
}
