//! Topology construction.
//!
//! The builder turns a set of hosts into partitions in three steps:
//!
//! 1. **Grouping**: hosts are split into replica groups of roughly `R` hosts
//!    (`R = k + 1`), each sized so its sites divide evenly into partitions.
//!    The [`GroupSelector`] decides which hosts end up together.
//! 2. **Assignment**: within a group, partitions are laid round robin over
//!    the group's hosts, `R` consecutive slots per partition.
//! 3. **Leadership**: each partition is led by the live replica that leads
//!    the fewest partitions so far.
//!
//! Hosts and partitions under construction live in index-addressed arenas,
//! so a draft host refers to its partitions (and vice versa) by position.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::error::{Result, TopologyError};
use crate::group::{PlacementGroup, PlacementGroupToken};
use crate::selector::{BalancedChecker, GroupSelector, SelectorStrategy};
use crate::topology::{Host, HostId, HostInfo, Partition, PartitionId};

#[derive(Debug)]
struct HostDraft {
    id: HostId,
    token: PlacementGroupToken,
    missing: bool,
    partitions: Vec<usize>,
    led: usize,
}

#[derive(Debug)]
struct PartitionDraft {
    id: PartitionId,
    hosts: Vec<usize>,
    leader: usize,
}

/// Hosts and partitions produced by one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltLayout {
    /// Every host handed to the builder, with its assigned partitions.
    pub hosts: Vec<Host>,
    /// The newly allocated partitions, ascending by id.
    pub partitions: Vec<Partition>,
    /// Sites per host shared by all the hosts.
    pub sites_per_host: i32,
    /// Partitions whose replicas failed the balance check.
    pub unbalanced_partition_count: i32,
    /// Selection strategy used for the build.
    pub strategy: SelectorStrategy,
}

/// Computes a fresh layout for a set of hosts.
#[derive(Debug)]
pub struct TopologyBuilder {
    hosts: Vec<HostDraft>,
    partitions: Vec<PartitionDraft>,
    selector: GroupSelector,
    missing_count: usize,
    first_partition_id: PartitionId,
    replica_count: usize,
    sites_per_host: usize,
    partition_count: usize,
}

impl TopologyBuilder {
    /// Validate the hosts and prepare a build.
    ///
    /// # Errors
    ///
    /// Returns an error if the hosts disagree on their site count or if there
    /// are fewer hosts than replicas per partition.
    pub fn new(
        host_infos: &BTreeMap<HostId, HostInfo>,
        missing_hosts: &BTreeSet<HostId>,
        k_factor: u32,
        first_partition_id: PartitionId,
    ) -> Result<Self> {
        let counts: BTreeSet<i32> = host_infos.values().map(|h| h.local_sites_count).collect();
        if counts.len() > 1 {
            return Err(TopologyError::InconsistentSitesPerHost {
                counts: counts.into_iter().collect(),
            });
        }
        let sites_per_host = counts.first().copied().unwrap_or(0).max(0) as usize;

        let replica_count = k_factor as usize + 1;
        if host_infos.len() < replica_count {
            return Err(TopologyError::NotEnoughHosts {
                needed: replica_count,
                available: host_infos.len(),
            });
        }

        let mut hosts = Vec::with_capacity(host_infos.len());
        let mut groups: BTreeMap<&str, PlacementGroup> = BTreeMap::new();
        for (index, (&id, info)) in host_infos.iter().enumerate() {
            let missing = missing_hosts.contains(&id);
            let token = PlacementGroupToken::new(info.placement_group.as_str());
            groups
                .entry(info.placement_group.as_str())
                .or_insert_with(|| PlacementGroup::new(token.clone()))
                .add_host(index, id, &info.ip_address, missing);
            hosts.push(HostDraft { id, token, missing, partitions: Vec::new(), led: 0 });
        }
        let missing_count = hosts.iter().filter(|h| h.missing).count();

        let group_count = groups.len();
        let selector = GroupSelector::new(groups.into_values().collect(), replica_count);
        let partition_count = sites_per_host * hosts.len() / replica_count;

        debug!(
            hosts = hosts.len(),
            missing = missing_count,
            groups = group_count,
            replica_count,
            sites_per_host,
            partition_count,
            strategy = %selector.strategy(),
            "Prepared topology build"
        );

        Ok(Self {
            hosts,
            partitions: Vec::with_capacity(partition_count),
            selector,
            missing_count,
            first_partition_id,
            replica_count,
            sites_per_host,
            partition_count,
        })
    }

    /// Strategy the builder will use to form replica groups.
    #[must_use]
    pub fn strategy(&self) -> SelectorStrategy {
        self.selector.strategy()
    }

    /// Partitions the build is expected to allocate.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    /// Copies of each partition (k-factor + 1).
    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.replica_count
    }

    /// Sites per host shared by all the hosts.
    #[must_use]
    pub fn sites_per_host(&self) -> i32 {
        self.sites_per_host as i32
    }

    /// Run the build.
    ///
    /// # Errors
    ///
    /// Returns an error if a replica group would hold too many missing hosts
    /// or if the placement groups cannot supply a full replica group.
    pub fn build(mut self) -> Result<BuiltLayout> {
        let mut groups = self.form_replica_groups()?;
        // Lowest partition ids go to the largest groups.
        groups.sort_by_key(|g| Reverse(g.len()));

        let checker = self.selector.balance_checker();
        let mut next_id = self.first_partition_id;
        let mut unbalanced = 0;
        for group in &groups {
            unbalanced += self.assign_partitions(group, &mut next_id, checker);
        }

        let layout = self.finish(unbalanced);
        info!(
            hosts = layout.hosts.len(),
            partitions = layout.partitions.len(),
            unbalanced = layout.unbalanced_partition_count,
            strategy = %layout.strategy,
            "Built topology layout"
        );
        Ok(layout)
    }

    fn form_replica_groups(&mut self) -> Result<Vec<Vec<usize>>> {
        let r = self.replica_count;
        let sph = self.sites_per_host;
        let mut remaining = self.hosts.len();
        let mut missing_remaining = self.missing_count;
        let mut groups = Vec::new();

        while remaining > 0 {
            let remaining_groups = remaining / r;
            debug_assert!(remaining_groups > 0, "{remaining} hosts left for groups of {r}");

            let mut size = r + (remaining % r) / remaining_groups;
            while (size * sph) % r != 0 && size < remaining {
                size += 1;
            }
            if remaining - size < r {
                size = remaining;
            }
            if size % r == 0 && size >= 2 * r {
                size = r;
            }

            let mut max_missing = missing_remaining / remaining_groups;
            if max_missing >= size {
                return Err(TopologyError::TooManyMissingHosts { max_missing, group_size: size });
            }
            let budget = max_missing;
            let group = self.selector.select_next_group(size, &mut max_missing)?;
            missing_remaining -= budget - max_missing;

            debug!(
                size,
                missing = budget - max_missing,
                hosts = ?group.iter().map(|&h| self.hosts[h].id).collect::<Vec<_>>(),
                "Formed replica group"
            );
            remaining -= size;
            groups.push(group);
        }

        Ok(groups)
    }

    /// Lay partitions over one replica group. Returns how many were unbalanced.
    fn assign_partitions(
        &mut self,
        group: &[usize],
        next_id: &mut PartitionId,
        checker: BalancedChecker,
    ) -> i32 {
        let r = self.replica_count;
        let size = group.len();
        let count = size * self.sites_per_host / r;
        let mut unbalanced = 0;
        let mut slot = 0;

        for _ in 0..count {
            let index = self.partitions.len();
            let mut members = Vec::with_capacity(r);
            for _ in 0..r {
                let host = group[slot % size];
                slot += 1;
                self.hosts[host].partitions.push(index);
                debug_assert!(self.hosts[host].partitions.len() <= self.sites_per_host);
                members.push(host);
            }

            if !checker.is_balanced(members.iter().map(|&h| &self.hosts[h].token)) {
                unbalanced += 1;
            }

            let leader = members
                .iter()
                .copied()
                .filter(|&h| !self.hosts[h].missing)
                .min_by_key(|&h| self.hosts[h].led)
                .unwrap_or_else(|| {
                    warn!(partition = *next_id, "No live replica to lead partition");
                    members[0]
                });
            self.hosts[leader].led += 1;

            self.partitions.push(PartitionDraft { id: *next_id, hosts: members, leader });
            *next_id += 1;
        }

        unbalanced
    }

    fn finish(self, unbalanced: i32) -> BuiltLayout {
        let partitions: Vec<Partition> = self
            .partitions
            .iter()
            .map(|p| {
                Partition::new(
                    p.id,
                    self.hosts[p.leader].id,
                    p.hosts.iter().map(|&h| self.hosts[h].id),
                )
            })
            .collect();

        let hosts = self
            .hosts
            .iter()
            .map(|h| {
                Host::new(
                    h.id,
                    h.token.clone(),
                    h.partitions.iter().map(|&p| self.partitions[p].id),
                    h.missing,
                )
            })
            .collect();

        BuiltLayout {
            hosts,
            partitions,
            sites_per_host: self.sites_per_host as i32,
            unbalanced_partition_count: unbalanced,
            strategy: self.selector.strategy(),
        }
    }
}
