//! Read-only questions asked of a topology.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::RangeInclusive;

use crate::group::PlacementGroupToken;
use crate::topology::{HostId, PartitionId, Topology};

/// Protection groups keyed by the span of partition ids they replicate.
///
/// Each entry covers an inclusive partition id range and the hosts that,
/// through shared partitions, jointly hold every partition in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionGroupMap {
    ranges: BTreeMap<PartitionId, (PartitionId, BTreeSet<HostId>)>,
}

impl PartitionGroupMap {
    fn insert(&mut self, range: RangeInclusive<PartitionId>, hosts: BTreeSet<HostId>) {
        self.ranges.insert(*range.start(), (*range.end(), hosts));
    }

    /// Hosts of the protection group whose range covers `partition_id`.
    #[must_use]
    pub fn get(&self, partition_id: PartitionId) -> Option<&BTreeSet<HostId>> {
        self.ranges
            .range(..=partition_id)
            .next_back()
            .filter(|(_, (end, _))| partition_id <= *end)
            .map(|(_, (_, hosts))| hosts)
    }

    /// Ranges and their hosts in ascending order of range start.
    pub fn iter(&self) -> impl Iterator<Item = (RangeInclusive<PartitionId>, &BTreeSet<HostId>)> + '_ {
        self.ranges.iter().map(|(start, (end, hosts))| (*start..=*end, hosts))
    }

    /// Number of protection groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the map has no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl Topology {
    /// Explain why the layout is not acceptable, if it is not.
    ///
    /// A layout is rejected when some partitions are not spread over enough
    /// placement groups, or when a partition is led by a host outside
    /// `live_hosts` although one of its replicas is live.
    #[must_use]
    pub fn validate_layout(&self, live_hosts: &BTreeSet<HostId>) -> Option<String> {
        let mut reasons = Vec::new();
        if self.unbalanced_partition_count() > 0 {
            reasons.push(format!(
                "{} partitions are not spread across enough placement groups",
                self.unbalanced_partition_count()
            ));
        }
        for partition in self.partitions().values() {
            if live_hosts.contains(&partition.leader_host_id) {
                continue;
            }
            let live: Vec<HostId> = partition
                .replica_host_ids
                .iter()
                .copied()
                .filter(|id| live_hosts.contains(id))
                .collect();
            if !live.is_empty() {
                reasons.push(format!(
                    "partition {} is led by host {} which is not live while hosts {live:?} are",
                    partition.id, partition.leader_host_id
                ));
            }
        }
        (!reasons.is_empty()).then(|| reasons.join("; "))
    }

    /// Hosts transitively linked to `host_id` through shared partitions.
    ///
    /// The result includes `host_id` itself and is empty for unknown hosts.
    #[must_use]
    pub fn partition_group_peers(&self, host_id: HostId) -> BTreeSet<HostId> {
        if self.host(host_id).is_none() {
            return BTreeSet::new();
        }
        self.connected_hosts(host_id).0
    }

    /// Discover every protection group.
    ///
    /// Walks the host/partition graph from each unvisited host that holds
    /// partitions and records the span of partition ids each component covers.
    #[must_use]
    pub fn get_partition_groups(&self) -> PartitionGroupMap {
        let mut groups = PartitionGroupMap::default();
        let mut visited = BTreeSet::new();
        for host in self.hosts().values() {
            if host.partitions.is_empty() || visited.contains(&host.id) {
                continue;
            }
            let (hosts, partitions) = self.connected_hosts(host.id);
            if let (Some(&first), Some(&last)) = (partitions.first(), partitions.last()) {
                groups.insert(first..=last, hosts.clone());
            }
            visited.extend(hosts);
        }
        groups
    }

    /// Breadth-first walk from a host over shared partitions.
    fn connected_hosts(&self, start: HostId) -> (BTreeSet<HostId>, BTreeSet<PartitionId>) {
        let mut hosts = BTreeSet::from([start]);
        let mut partitions = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            let Some(host) = self.host(id) else {
                continue;
            };
            for partition_id in &host.partitions {
                if !partitions.insert(*partition_id) {
                    continue;
                }
                let Some(partition) = self.partition(*partition_id) else {
                    continue;
                };
                for replica in &partition.replica_host_ids {
                    if hosts.insert(*replica) {
                        queue.push_back(*replica);
                    }
                }
            }
        }
        (hosts, partitions)
    }

    /// Bucket hosts by placement group distance from `local_host_id`.
    ///
    /// `host_groups` maps host ids to placement group tokens. Buckets run from
    /// the farthest hosts to the nearest, each ascending by host id, and the
    /// local host is left out. If the local host's group is unknown every
    /// other host lands in one bucket.
    #[must_use]
    pub fn sort_hosts_by_group_distance(
        &self,
        local_host_id: HostId,
        host_groups: &BTreeMap<HostId, String>,
    ) -> Vec<Vec<HostId>> {
        let local = host_groups
            .get(&local_host_id)
            .map(|g| PlacementGroupToken::new(g.as_str()))
            .or_else(|| self.host(local_host_id).map(|h| h.placement_group.clone()));

        let mut buckets: BTreeMap<Reverse<i32>, Vec<HostId>> = BTreeMap::new();
        for (id, group) in host_groups {
            if *id == local_host_id {
                continue;
            }
            let distance = local
                .as_ref()
                .map_or(0, |l| l.relationship_to(&PlacementGroupToken::new(group.as_str())).distance);
            buckets.entry(Reverse(distance)).or_default().push(*id);
        }
        buckets.into_values().collect()
    }
}

/// Pre-flight check of a cluster's size against its k-factor.
///
/// Returns a reason string if `host_count` hosts with `sites_per_host` sites
/// each cannot hold `k_factor + 1` copies of every partition.
#[must_use]
pub fn validate_legacy_cluster_config(
    host_count: usize,
    sites_per_host: i32,
    k_factor: u32,
) -> Option<String> {
    if host_count <= k_factor as usize {
        return Some("Not enough nodes to ensure K-Safety.".to_string());
    }
    let total_sites = host_count as i64 * i64::from(sites_per_host);
    if total_sites % (i64::from(k_factor) + 1) != 0 {
        return Some("Total number of sites is not divisible by the number of partitions.".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Host, Partition};

    /// Two disjoint protection groups: {0, 1} with partitions 0..=1, {2, 3, 4}
    /// with partitions 2..=4 chained through host 3.
    fn sample() -> Topology {
        Topology::from_parts(
            1,
            vec![
                Host::new(0, "zone1.rack1", [0, 1], false),
                Host::new(1, "zone1.rack2", [0, 1], false),
                Host::new(2, "zone2.rack1", [2, 3], false),
                Host::new(3, "zone2.rack2", [3, 4], false),
                Host::new(4, "zone1.rack1", [2, 4], false),
                Host::new(5, "zone3", [], false),
            ],
            vec![
                Partition::new(0, 0, [0, 1]),
                Partition::new(1, 1, [0, 1]),
                Partition::new(2, 2, [2, 4]),
                Partition::new(3, 3, [2, 3]),
                Partition::new(4, 4, [3, 4]),
            ],
            2,
            1,
            0,
        )
    }

    #[test]
    fn test_validate_layout_ok() {
        let live = BTreeSet::from([0, 1, 2, 3, 4, 5]);
        assert!(sample().validate_layout(&live).is_none());
    }

    #[test]
    fn test_validate_layout_dead_leader() {
        let live = BTreeSet::from([1, 2, 3, 4]);
        let reason = sample().validate_layout(&live).unwrap();
        assert!(reason.contains("partition 0 is led by host 0"));
    }

    #[test]
    fn test_validate_layout_whole_partition_down() {
        // Neither replica of partitions 0 and 1 is live, so leadership is moot.
        let live = BTreeSet::from([2, 3, 4]);
        assert!(sample().validate_layout(&live).is_none());
    }

    #[test]
    fn test_validate_layout_unbalanced() {
        let topo = Topology::from_parts(1, vec![Host::new(0, "a", [0], false)], vec![Partition::new(0, 0, [0])], 1, 0, 2);
        let reason = topo.validate_layout(&BTreeSet::from([0])).unwrap();
        assert!(reason.contains("2 partitions are not spread"));
    }

    #[test]
    fn test_partition_group_peers() {
        let topo = sample();
        assert_eq!(topo.partition_group_peers(0), BTreeSet::from([0, 1]));
        assert_eq!(topo.partition_group_peers(2), BTreeSet::from([2, 3, 4]));
        assert_eq!(topo.partition_group_peers(5), BTreeSet::from([5]));
        assert!(topo.partition_group_peers(42).is_empty());
    }

    #[test]
    fn test_get_partition_groups() {
        let groups = sample().get_partition_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.get(1), Some(&BTreeSet::from([0, 1])));
        assert_eq!(groups.get(3), Some(&BTreeSet::from([2, 3, 4])));
        assert_eq!(groups.get(9), None);

        let ranges: Vec<_> = groups.iter().map(|(range, _)| range).collect();
        assert_eq!(ranges, vec![0..=1, 2..=4]);
    }

    #[test]
    fn test_sort_hosts_by_group_distance() {
        let topo = sample();
        let groups: BTreeMap<HostId, String> = topo
            .hosts()
            .values()
            .map(|h| (h.id, h.placement_group.to_string()))
            .collect();

        let buckets = topo.sort_hosts_by_group_distance(0, &groups);
        // zone2.* are 4 away, zone3 is 3 away, zone1.rack2 is 2 away, host 4 shares the rack.
        assert_eq!(buckets, vec![vec![2, 3], vec![5], vec![1], vec![4]]);
    }

    #[test]
    fn test_sort_hosts_unknown_local() {
        let groups = BTreeMap::from([(1, "a".to_string()), (2, "b".to_string())]);
        let buckets = Topology::empty().sort_hosts_by_group_distance(9, &groups);
        assert_eq!(buckets, vec![vec![1, 2]]);
    }

    #[test]
    fn test_legacy_cluster_config() {
        assert_eq!(
            validate_legacy_cluster_config(2, 4, 2).as_deref(),
            Some("Not enough nodes to ensure K-Safety.")
        );
        assert_eq!(
            validate_legacy_cluster_config(3, 1, 1).as_deref(),
            Some("Total number of sites is not divisible by the number of partitions.")
        );
        assert!(validate_legacy_cluster_config(3, 2, 1).is_none());
        assert!(validate_legacy_cluster_config(1, 8, 0).is_none());
    }
}
