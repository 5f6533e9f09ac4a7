//! The immutable, versioned cluster topology.
//!
//! A [`Topology`] records which hosts exist, which placement group each host
//! belongs to, and which hosts replicate each partition. Values are never
//! edited in place: every mutation (see [`crate::mutate`]) returns a new
//! topology with `version + 1`. Host and partition maps are persistent
//! [`im::OrdMap`]s so that derived topologies share structure with their
//! parent.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::group::PlacementGroupToken;

/// Unique identifier for a host.
pub type HostId = u32;

/// Unique identifier for a partition.
pub type PartitionId = u32;

/// Sentinel for layout parameters that have not been fixed yet.
pub const UNSET: i32 = -1;

/// The canonical zero-state topology that seeds the very first build.
pub static EMPTY_TOPOLOGY: LazyLock<Topology> = LazyLock::new(Topology::empty);

/// Membership information reported by a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Placement group token, e.g. `"zone1.rack2"`.
    pub placement_group: String,
    /// Address used to order hosts within a placement group.
    pub ip_address: String,
    /// Number of sites the host runs.
    pub local_sites_count: i32,
    /// Partition ids the host held before a full cluster restart.
    #[serde(default)]
    pub recovered_partitions: BTreeSet<PartitionId>,
}

impl HostInfo {
    /// Create host info without any recovered partitions.
    #[must_use]
    pub fn new(
        placement_group: impl Into<String>,
        ip_address: impl Into<String>,
        local_sites_count: i32,
    ) -> Self {
        Self {
            placement_group: placement_group.into(),
            ip_address: ip_address.into(),
            local_sites_count,
            recovered_partitions: BTreeSet::new(),
        }
    }

    /// Attach the partition ids this host held before a restart.
    #[must_use]
    pub fn with_recovered_partitions(
        mut self,
        partitions: impl IntoIterator<Item = PartitionId>,
    ) -> Self {
        self.recovered_partitions = partitions.into_iter().collect();
        self
    }
}

/// A host in the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Unique host id.
    pub id: HostId,
    /// Failure domain the host lives in.
    pub placement_group: PlacementGroupToken,
    /// Partitions replicated on this host.
    pub partitions: BTreeSet<PartitionId>,
    /// Whether the host is a known member that is currently unreachable.
    pub is_missing: bool,
}

impl Host {
    /// Create a host.
    #[must_use]
    pub fn new(
        id: HostId,
        placement_group: impl Into<PlacementGroupToken>,
        partitions: impl IntoIterator<Item = PartitionId>,
        is_missing: bool,
    ) -> Self {
        Self {
            id,
            placement_group: placement_group.into(),
            partitions: partitions.into_iter().collect(),
            is_missing,
        }
    }

    /// Partition ids on this host in ascending order.
    #[must_use]
    pub fn sorted_partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.iter().copied().collect()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Host {} group:{}{} (Partitions {})",
            self.id,
            self.placement_group,
            if self.is_missing { " missing" } else { "" },
            join_ids(&self.partitions)
        )
    }
}

/// A partition and its replica set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Unique partition id.
    pub id: PartitionId,
    /// Host acting as primary for the partition.
    pub leader_host_id: HostId,
    /// Hosts holding a copy of the partition, leader included.
    pub replica_host_ids: BTreeSet<HostId>,
}

impl Partition {
    /// Create a partition.
    #[must_use]
    pub fn new(
        id: PartitionId,
        leader_host_id: HostId,
        replica_host_ids: impl IntoIterator<Item = HostId>,
    ) -> Self {
        Self { id, leader_host_id, replica_host_ids: replica_host_ids.into_iter().collect() }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Partition {} (leader {}, hosts {})",
            self.id,
            self.leader_host_id,
            join_ids(&self.replica_host_ids)
        )
    }
}

fn join_ids(ids: &BTreeSet<u32>) -> String {
    ids.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

/// An immutable cluster layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    version: u64,
    hosts: OrdMap<HostId, Host>,
    partitions: OrdMap<PartitionId, Partition>,
    sites_per_host: i32,
    replication_factor: i32,
    unbalanced_partition_count: i32,
}

impl Default for Topology {
    fn default() -> Self {
        Self::empty()
    }
}

impl Topology {
    /// The zero-state topology: no hosts, no partitions, layout parameters unset.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 0,
            hosts: OrdMap::new(),
            partitions: OrdMap::new(),
            sites_per_host: UNSET,
            replication_factor: UNSET,
            unbalanced_partition_count: 0,
        }
    }

    /// Assemble a topology from its parts.
    ///
    /// No cross-reference checks are made; the builder and the mutation
    /// operations are responsible for handing over a consistent layout.
    #[must_use]
    pub fn from_parts(
        version: u64,
        hosts: impl IntoIterator<Item = Host>,
        partitions: impl IntoIterator<Item = Partition>,
        sites_per_host: i32,
        replication_factor: i32,
        unbalanced_partition_count: i32,
    ) -> Self {
        Self {
            version,
            hosts: hosts.into_iter().map(|h| (h.id, h)).collect(),
            partitions: partitions.into_iter().map(|p| (p.id, p)).collect(),
            sites_per_host,
            replication_factor,
            unbalanced_partition_count,
        }
    }

    pub(crate) fn with_maps(
        version: u64,
        hosts: OrdMap<HostId, Host>,
        partitions: OrdMap<PartitionId, Partition>,
        sites_per_host: i32,
        replication_factor: i32,
        unbalanced_partition_count: i32,
    ) -> Self {
        Self {
            version,
            hosts,
            partitions,
            sites_per_host,
            replication_factor,
            unbalanced_partition_count,
        }
    }

    /// Monotonic version, bumped by every mutation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All hosts keyed by id.
    #[must_use]
    pub fn hosts(&self) -> &OrdMap<HostId, Host> {
        &self.hosts
    }

    /// All partitions keyed by id.
    #[must_use]
    pub fn partitions(&self) -> &OrdMap<PartitionId, Partition> {
        &self.partitions
    }

    /// Look up a host.
    #[must_use]
    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(&id)
    }

    /// Look up a partition.
    #[must_use]
    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(&id)
    }

    /// Number of hosts.
    #[must_use]
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Sites each host runs, or [`UNSET`] before the first build.
    #[must_use]
    pub fn sites_per_host(&self) -> i32 {
        self.sites_per_host
    }

    /// Extra copies kept of each partition (k-factor), or [`UNSET`] before the first build.
    #[must_use]
    pub fn replication_factor(&self) -> i32 {
        self.replication_factor
    }

    /// Copies kept of each partition (k-factor + 1). `None` before the first build.
    #[must_use]
    pub fn replica_count(&self) -> Option<usize> {
        usize::try_from(self.replication_factor).ok()?.checked_add(1)
    }

    /// Number of partitions placed without spanning enough placement groups.
    #[must_use]
    pub fn unbalanced_partition_count(&self) -> i32 {
        self.unbalanced_partition_count
    }

    /// Whether the layout parameters have been fixed by a build.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.sites_per_host != UNSET && self.replication_factor != UNSET
    }

    /// Partition ids replicated on a host, ascending. Empty for unknown hosts.
    #[must_use]
    pub fn partition_ids_for_host(&self, host_id: HostId) -> Vec<PartitionId> {
        self.hosts.get(&host_id).map(Host::sorted_partition_ids).unwrap_or_default()
    }

    /// Host ids replicating a partition, ascending. Empty for unknown partitions.
    #[must_use]
    pub fn host_ids_for_partition(&self, partition_id: PartitionId) -> Vec<HostId> {
        self.partitions
            .get(&partition_id)
            .map(|p| p.replica_host_ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Largest partition id in use.
    #[must_use]
    pub fn max_partition_id(&self) -> Option<PartitionId> {
        self.partitions.get_max().map(|(id, _)| *id)
    }

    /// Whether some partition has lost every replica to missing hosts.
    #[must_use]
    pub fn has_missing_partitions(&self) -> bool {
        self.partitions.values().any(|p| {
            p.replica_host_ids
                .iter()
                .all(|id| self.hosts.get(id).is_none_or(|h| h.is_missing))
        })
    }

    /// Ids of hosts currently marked missing.
    #[must_use]
    pub fn missing_host_ids(&self) -> BTreeSet<HostId> {
        self.hosts.values().filter(|h| h.is_missing).map(|h| h.id).collect()
    }

    /// Number of partitions each host leads. Hosts leading nothing map to zero.
    #[must_use]
    pub fn leader_counts(&self) -> BTreeMap<HostId, usize> {
        let mut counts: BTreeMap<HostId, usize> = self.hosts.keys().map(|id| (*id, 0)).collect();
        for partition in self.partitions.values() {
            *counts.entry(partition.leader_host_id).or_default() += 1;
        }
        counts
    }

    /// Host ids grouped by placement group token.
    #[must_use]
    pub fn placement_groups(&self) -> BTreeMap<String, BTreeSet<HostId>> {
        let mut groups: BTreeMap<String, BTreeSet<HostId>> = BTreeMap::new();
        for host in self.hosts.values() {
            groups.entry(host.placement_group.as_str().to_string()).or_default().insert(host.id);
        }
        groups
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Topology v{} (sites per host {}, k-factor {}, unbalanced {})",
            self.version, self.sites_per_host, self.replication_factor, self.unbalanced_partition_count
        )?;
        for host in self.hosts.values() {
            writeln!(f, "  {host}")?;
        }
        for partition in self.partitions.values() {
            writeln!(f, "  {partition}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Topology {
        Topology::from_parts(
            3,
            vec![
                Host::new(0, "rack1", [0, 1], false),
                Host::new(1, "rack1", [0, 1], false),
                Host::new(2, "rack2", [2], true),
                Host::new(3, "rack2", [2], true),
            ],
            vec![
                Partition::new(0, 0, [0, 1]),
                Partition::new(1, 1, [0, 1]),
                Partition::new(2, 2, [2, 3]),
            ],
            2,
            1,
            0,
        )
    }

    #[test]
    fn test_empty_topology() {
        let topo = Topology::empty();
        assert_eq!(topo.version(), 0);
        assert_eq!(topo.sites_per_host(), UNSET);
        assert_eq!(topo.replication_factor(), UNSET);
        assert!(!topo.is_initialized());
        assert!(topo.replica_count().is_none());
        assert_eq!(topo.host_count(), 0);
        assert_eq!(*EMPTY_TOPOLOGY, topo);
        assert!(topo.max_partition_id().is_none());
    }

    #[test]
    fn test_lookups() {
        let topo = sample();
        assert_eq!(topo.host_count(), 4);
        assert_eq!(topo.partition_count(), 3);
        assert_eq!(topo.partition_ids_for_host(0), vec![0, 1]);
        assert_eq!(topo.host_ids_for_partition(2), vec![2, 3]);
        assert!(topo.partition_ids_for_host(99).is_empty());
        assert!(topo.host_ids_for_partition(99).is_empty());
        assert_eq!(topo.max_partition_id(), Some(2));
        assert!(topo.is_initialized());
        assert_eq!(topo.replica_count(), Some(topo.replication_factor() as usize + 1));
    }

    #[test]
    fn test_has_missing_partitions() {
        let topo = sample();
        assert!(topo.has_missing_partitions());
        assert_eq!(topo.missing_host_ids(), BTreeSet::from([2, 3]));

        let healthy = Topology::from_parts(
            1,
            vec![Host::new(0, "a", [0], false), Host::new(1, "a", [0], true)],
            vec![Partition::new(0, 0, [0, 1])],
            1,
            1,
            0,
        );
        assert!(!healthy.has_missing_partitions());
    }

    #[test]
    fn test_leader_counts() {
        let counts = sample().leader_counts();
        assert_eq!(counts[&0], 1);
        assert_eq!(counts[&1], 1);
        assert_eq!(counts[&2], 1);
        assert_eq!(counts[&3], 0);
    }

    #[test]
    fn test_placement_groups() {
        let groups = sample().placement_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["rack1"], BTreeSet::from([0, 1]));
        assert_eq!(groups["rack2"], BTreeSet::from([2, 3]));
    }

    #[test]
    fn test_display() {
        let host = Host::new(2, "rack2", [5, 6], true);
        assert_eq!(host.to_string(), "Host 2 group:rack2 missing (Partitions 5,6)");

        let partition = Partition::new(5, 2, [2, 4]);
        assert_eq!(partition.to_string(), "Partition 5 (leader 2, hosts 2,4)");

        let rendered = sample().to_string();
        assert!(rendered.starts_with("Topology v3"));
        assert!(rendered.contains("Partition 2 (leader 2, hosts 2,3)"));
    }

    #[test]
    fn test_host_info_builder() {
        let info = HostInfo::new("rack1", "10.0.0.1", 8).with_recovered_partitions([3, 1, 2]);
        assert_eq!(info.local_sites_count, 8);
        assert_eq!(info.recovered_partitions.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
