//! Operations that derive a new topology from an existing one.
//!
//! None of these edit a topology in place. Each returns a fresh [`Topology`]
//! whose version is one higher than its parent, sharing untouched host and
//! partition records with it.

use std::collections::{BTreeMap, BTreeSet};

use im::OrdMap;
use tracing::{debug, info, warn};

use crate::builder::TopologyBuilder;
use crate::error::{Result, TopologyError};
use crate::selector::BalancedChecker;
use crate::topology::{Host, HostId, HostInfo, Partition, PartitionId, Topology, EMPTY_TOPOLOGY};

/// Build the topology of a fresh cluster.
///
/// Partition ids start at 0 and the result has version 1. When
/// `restore_partitions` is set and hosts reported the partitions they held
/// before a restart, the previous layout is restored on top of the build.
///
/// # Errors
///
/// Returns an error if the hosts cannot form a valid layout.
pub fn get_topology(
    host_infos: &BTreeMap<HostId, HostInfo>,
    missing_hosts: &BTreeSet<HostId>,
    k_factor: u32,
    restore_partitions: bool,
) -> Result<Topology> {
    let (topology, _) = EMPTY_TOPOLOGY.extend(host_infos, missing_hosts, k_factor)?;
    let reported = host_infos.values().any(|h| !h.recovered_partitions.is_empty());
    if restore_partitions && reported {
        return Ok(topology.restore_partitions_for_recovery(host_infos, missing_hosts));
    }
    Ok(topology)
}

impl Topology {
    /// Place new hosts and the partitions they bring.
    ///
    /// The builder runs over the new hosts only, with the replication factor
    /// the topology already uses; partition ids continue after the highest id
    /// already in use. Returns the new topology and the ids of the partitions
    /// it added.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::Uninitialized`] for a topology that has never
    /// been built (seed it with [`Topology::add_new_hosts_with_k_factor`]).
    /// Also fails if a new host id is already in use, if the hosts would
    /// change the sites per host, or if the builder rejects them.
    pub fn add_new_hosts(
        &self,
        new_hosts: &BTreeMap<HostId, HostInfo>,
    ) -> Result<(Topology, Vec<PartitionId>)> {
        if !self.is_initialized() {
            return Err(TopologyError::Uninitialized);
        }
        let k_factor =
            u32::try_from(self.replication_factor()).map_err(|_| TopologyError::Uninitialized)?;
        self.extend(new_hosts, &BTreeSet::new(), k_factor)
    }

    /// Like [`Topology::add_new_hosts`], with an explicit k-factor.
    ///
    /// This is how hosts are placed into the empty seed. On an initialized
    /// topology `k_factor` must match its replication factor.
    ///
    /// # Errors
    ///
    /// Returns an error if a new host id is already in use, if the hosts would
    /// change the sites per host or replication factor of an initialized
    /// topology, or if the builder rejects them.
    pub fn add_new_hosts_with_k_factor(
        &self,
        new_hosts: &BTreeMap<HostId, HostInfo>,
        k_factor: u32,
    ) -> Result<(Topology, Vec<PartitionId>)> {
        self.extend(new_hosts, &BTreeSet::new(), k_factor)
    }

    fn extend(
        &self,
        new_hosts: &BTreeMap<HostId, HostInfo>,
        missing_hosts: &BTreeSet<HostId>,
        k_factor: u32,
    ) -> Result<(Topology, Vec<PartitionId>)> {
        if let Some(&id) = new_hosts.keys().find(|id| self.hosts().contains_key(*id)) {
            return Err(TopologyError::DuplicateHostId(id));
        }

        let first_partition_id = self.max_partition_id().map_or(0, |id| id + 1);
        let builder = TopologyBuilder::new(new_hosts, missing_hosts, k_factor, first_partition_id)?;
        let replication_factor = k_factor as i32;
        if self.is_initialized() {
            ensure_unchanged("sites per host", self.sites_per_host(), builder.sites_per_host())?;
            ensure_unchanged("replication factor", self.replication_factor(), replication_factor)?;
        }
        let layout = builder.build()?;

        let mut hosts = self.hosts().clone();
        for host in layout.hosts {
            hosts.insert(host.id, host);
        }
        let added: Vec<PartitionId> = layout.partitions.iter().map(|p| p.id).collect();
        let mut partitions = self.partitions().clone();
        for partition in layout.partitions {
            partitions.insert(partition.id, partition);
        }

        let topology = Topology::with_maps(
            self.version() + 1,
            hosts,
            partitions,
            layout.sites_per_host,
            replication_factor,
            self.unbalanced_partition_count() + layout.unbalanced_partition_count,
        );
        info!(
            version = topology.version(),
            added_hosts = new_hosts.len(),
            added_partitions = added.len(),
            hosts = topology.host_count(),
            partitions = topology.partition_count(),
            "Added hosts to topology"
        );
        Ok((topology, added))
    }

    /// Remove hosts together with every partition they replicate.
    ///
    /// Returns the new topology and the ids of the removed partitions.
    ///
    /// # Errors
    ///
    /// Returns an error if `host_ids` is empty or the topology has never been built.
    pub fn remove_hosts(
        &self,
        host_ids: &BTreeSet<HostId>,
    ) -> Result<(Topology, BTreeSet<PartitionId>)> {
        if host_ids.is_empty() {
            return Err(TopologyError::EmptyHostSet);
        }
        if !self.is_initialized() {
            return Err(TopologyError::Uninitialized);
        }

        let removed: BTreeSet<PartitionId> = host_ids
            .iter()
            .filter_map(|id| self.host(*id))
            .flat_map(|h| h.partitions.iter().copied())
            .collect();

        let mut hosts = self.hosts().clone();
        for id in host_ids {
            hosts.remove(id);
        }
        let touched: Vec<HostId> = hosts
            .values()
            .filter(|h| !h.partitions.is_disjoint(&removed))
            .map(|h| h.id)
            .collect();
        for id in touched {
            if let Some(host) = hosts.get_mut(&id) {
                host.partitions.retain(|p| !removed.contains(p));
            }
        }

        let mut partitions = self.partitions().clone();
        for id in &removed {
            partitions.remove(id);
        }

        let topology = Topology::with_maps(
            self.version() + 1,
            hosts,
            partitions,
            self.sites_per_host(),
            self.replication_factor(),
            self.unbalanced_partition_count(),
        );
        info!(
            version = topology.version(),
            removed_hosts = host_ids.len(),
            removed_partitions = removed.len(),
            "Removed hosts from topology"
        );
        Ok((topology, removed))
    }

    /// Let a rejoining host take over the slot of a missing host.
    ///
    /// Candidates are hosts outside `live_host_ids` in `placement_group`. A
    /// candidate holding exactly `recover_partition_ids` wins; otherwise the
    /// lowest id is used. The candidate's id is replaced by `local_host_id`
    /// everywhere and every other host not in `live_host_ids` is marked
    /// missing.
    ///
    /// Returns `None` if no candidate exists or `local_host_id` is already part
    /// of the topology.
    #[must_use]
    pub fn recover_topology(
        &self,
        live_host_ids: &BTreeSet<HostId>,
        local_host_id: HostId,
        placement_group: &str,
        recover_partition_ids: Option<&BTreeSet<PartitionId>>,
    ) -> Option<Topology> {
        if self.hosts().contains_key(&local_host_id) {
            debug!(local_host_id, "Recovering host is already in the topology");
            return None;
        }

        let candidates: Vec<&Host> = self
            .hosts()
            .values()
            .filter(|h| !live_host_ids.contains(&h.id))
            .filter(|h| h.placement_group.as_str() == placement_group)
            .collect();
        let replaced = recover_partition_ids
            .and_then(|wanted| candidates.iter().find(|h| h.partitions == *wanted))
            .or_else(|| candidates.first())
            .copied();
        let Some(replaced) = replaced else {
            debug!(placement_group, "No missing host to recover in placement group");
            return None;
        };
        let old_id = replaced.id;

        let mut hosts: OrdMap<HostId, Host> = self
            .hosts()
            .values()
            .filter(|h| h.id != old_id)
            .map(|h| {
                let mut host = h.clone();
                host.is_missing = !live_host_ids.contains(&host.id);
                (host.id, host)
            })
            .collect();
        hosts.insert(
            local_host_id,
            Host::new(
                local_host_id,
                replaced.placement_group.clone(),
                replaced.partitions.iter().copied(),
                false,
            ),
        );

        let mut partitions = self.partitions().clone();
        for id in &replaced.partitions {
            if let Some(partition) = partitions.get_mut(id) {
                partition.replica_host_ids.remove(&old_id);
                partition.replica_host_ids.insert(local_host_id);
                if partition.leader_host_id == old_id {
                    partition.leader_host_id = local_host_id;
                }
            }
        }

        let topology = Topology::with_maps(
            self.version() + 1,
            hosts,
            partitions,
            self.sites_per_host(),
            self.replication_factor(),
            self.unbalanced_partition_count(),
        );
        info!(
            version = topology.version(),
            replaced = old_id,
            local_host_id,
            partitions = ?replaced.sorted_partition_ids(),
            "Recovered host into topology"
        );
        Some(topology)
    }

    /// Put partitions back on the hosts that held them before a full restart.
    ///
    /// Each host reports the partition ids it held through
    /// [`HostInfo::recovered_partitions`]; reports from `missing_hosts` are
    /// ignored. Hosts whose reported set is currently held by other hosts swap
    /// places with them. If the reports are inconsistent (wrong number of
    /// partitions per host, wrong number of replicas per partition, a set no
    /// host currently holds, or a swap that is not one-to-one) the topology is
    /// returned unchanged.
    #[must_use]
    pub fn restore_partitions_for_recovery(
        &self,
        host_infos: &BTreeMap<HostId, HostInfo>,
        missing_hosts: &BTreeSet<HostId>,
    ) -> Topology {
        match self.plan_restore(host_infos, missing_hosts) {
            Ok(mapping) if mapping.iter().any(|(from, to)| from != to) => {
                self.apply_host_mapping(&mapping)
            }
            Ok(_) => {
                debug!("Partition layout already matches the reported layout");
                self.clone()
            }
            Err(reason) => {
                warn!(%reason, "Abandoning partition layout restore");
                self.clone()
            }
        }
    }

    /// Map each current partition holder to the host that reported its set.
    fn plan_restore(
        &self,
        host_infos: &BTreeMap<HostId, HostInfo>,
        missing_hosts: &BTreeSet<HostId>,
    ) -> std::result::Result<BTreeMap<HostId, HostId>, String> {
        if !self.is_initialized() {
            return Err("topology has not been initialized".to_string());
        }

        let reports: BTreeMap<HostId, &BTreeSet<PartitionId>> = host_infos
            .iter()
            .filter(|(id, info)| !missing_hosts.contains(*id) && !info.recovered_partitions.is_empty())
            .map(|(id, info)| (*id, &info.recovered_partitions))
            .collect();
        if reports.is_empty() {
            return Err("no host reported previous partitions".to_string());
        }

        let sites_per_host = usize::try_from(self.sites_per_host())
            .map_err(|_| format!("invalid sites per host {}", self.sites_per_host()))?;
        for (id, reported) in &reports {
            if !self.hosts().contains_key(id) {
                return Err(format!("host {id} is not part of the topology"));
            }
            if reported.len() != sites_per_host {
                return Err(format!(
                    "host {id} reported {} partitions, expected {sites_per_host}",
                    reported.len()
                ));
            }
        }

        let replica_count = self
            .replica_count()
            .ok_or_else(|| format!("invalid replication factor {}", self.replication_factor()))?;
        let mut counts: BTreeMap<PartitionId, usize> = BTreeMap::new();
        for id in reports.values().flat_map(|r| r.iter()) {
            *counts.entry(*id).or_default() += 1;
        }
        for id in self.partitions().keys() {
            let restored = counts.remove(id).unwrap_or(0);
            if restored != replica_count {
                return Err(format!(
                    "partition {id} has {restored} restored replicas, expected {replica_count}"
                ));
            }
        }
        if let Some(id) = counts.keys().next() {
            return Err(format!("partition {id} is not part of the topology"));
        }

        let mut reporters: BTreeMap<&BTreeSet<PartitionId>, Vec<HostId>> = BTreeMap::new();
        for (id, reported) in &reports {
            reporters.entry(*reported).or_default().push(*id);
        }
        let mut holders: BTreeMap<&BTreeSet<PartitionId>, Vec<HostId>> = BTreeMap::new();
        for host in self.hosts().values() {
            holders.entry(&host.partitions).or_default().push(host.id);
        }

        let mut mapping = BTreeMap::new();
        for (set, reporting) in &reporters {
            let holding = holders
                .get(set)
                .ok_or_else(|| format!("no host currently holds partitions {set:?}"))?;
            if holding.len() != reporting.len() {
                return Err(format!(
                    "{} hosts reported partitions {set:?} but {} hold them",
                    reporting.len(),
                    holding.len()
                ));
            }
            // Hosts already holding their reported set stay put.
            for &id in holding.iter().filter(|&&id| reporting.contains(&id)) {
                mapping.insert(id, id);
            }
            let leaving = holding.iter().copied().filter(|id| !reporting.contains(id));
            let arriving = reporting.iter().copied().filter(|id| !holding.contains(id));
            for (from, to) in leaving.zip(arriving) {
                mapping.insert(from, to);
            }
        }

        let sources: BTreeSet<HostId> = mapping.keys().copied().collect();
        let targets: BTreeSet<HostId> = mapping.values().copied().collect();
        if sources != targets || targets.len() != mapping.len() {
            return Err("host swap is not one-to-one".to_string());
        }
        Ok(mapping)
    }

    fn apply_host_mapping(&self, mapping: &BTreeMap<HostId, HostId>) -> Topology {
        let remap = |id: HostId| mapping.get(&id).copied().unwrap_or(id);

        let mut hosts = self.hosts().clone();
        for (&from, &to) in mapping.iter().filter(|(from, to)| from != to) {
            if let (Some(source), Some(target)) = (self.host(from), hosts.get_mut(&to)) {
                target.partitions = source.partitions.clone();
            }
        }

        let partitions: OrdMap<PartitionId, Partition> = self
            .partitions()
            .values()
            .map(|p| {
                let partition = Partition::new(
                    p.id,
                    remap(p.leader_host_id),
                    p.replica_host_ids.iter().map(|&h| remap(h)),
                );
                (partition.id, partition)
            })
            .collect();

        let unbalanced = count_unbalanced(&hosts, &partitions, self.replica_count().unwrap_or(1));
        let topology = Topology::with_maps(
            self.version() + 1,
            hosts,
            partitions,
            self.sites_per_host(),
            self.replication_factor(),
            unbalanced,
        );
        info!(
            version = topology.version(),
            swapped = mapping.iter().filter(|(from, to)| from != to).count(),
            "Restored previous partition layout"
        );
        topology
    }
}

fn ensure_unchanged(parameter: &'static str, current: i32, requested: i32) -> Result<()> {
    if current == requested {
        Ok(())
    } else {
        Err(TopologyError::LayoutParameterChanged { parameter, current, requested })
    }
}

fn count_unbalanced(
    hosts: &OrdMap<HostId, Host>,
    partitions: &OrdMap<PartitionId, Partition>,
    replica_count: usize,
) -> i32 {
    let group_count = hosts.values().map(|h| h.placement_group.as_str()).collect::<BTreeSet<_>>().len();
    let checker = BalancedChecker::for_cluster(group_count, replica_count);
    partitions
        .values()
        .filter(|p| {
            !checker.is_balanced(
                p.replica_host_ids.iter().filter_map(|id| hosts.get(id)).map(|h| &h.placement_group),
            )
        })
        .count() as i32
}
