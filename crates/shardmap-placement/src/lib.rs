//! Failure-domain-aware partition placement for a sharded database cluster.
//!
//! This crate decides which hosts replicate which partitions and keeps that
//! assignment consistent as hosts join, leave, fail and come back. It does no
//! I/O: callers hand it host membership and liveness, it hands back an
//! immutable, versioned [`Topology`].
//!
//! # Overview
//!
//! Every host belongs to a *placement group*, a dot-separated path such as
//! `"zone1.rack2"` naming its failure domain. A build:
//!
//! - splits hosts into replica groups of about `k + 1` hosts,
//! - spreads each replica group across as many placement groups as it can,
//! - lays partitions round robin over each replica group,
//! - picks the least loaded live replica as each partition's leader.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Topology                           │
//! │   hosts ─────────────────────────┐      partitions        │
//! │   (id, group, partitions)        └──────(id, leader,      │
//! │                                          replicas)        │
//! └─────────────▲─────────────────────────────────────────────┘
//!               │ add / remove / recover / restore
//! ┌─────────────┴─────────────┐     ┌─────────────────────────┐
//! │      TopologyBuilder      │────▶│      GroupSelector      │
//! │  sizing, round robin,     │     │ single │ symmetric │    │
//! │  leader balancing         │     │ hierarchical            │
//! └───────────────────────────┘     └───────────▲─────────────┘
//!                                               │
//!                                   ┌───────────┴─────────────┐
//!                                   │   PlacementGroup pools  │
//!                                   └─────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::collections::{BTreeMap, BTreeSet};
//! use shardmap_placement::{get_topology, HostInfo};
//!
//! let hosts: BTreeMap<u32, HostInfo> = (0..4)
//!     .map(|id| (id, HostInfo::new("rack1", format!("10.0.0.{id}"), 2)))
//!     .collect();
//!
//! let topology = get_topology(&hosts, &BTreeSet::new(), 1, false).unwrap();
//! assert_eq!(topology.partition_count(), 4);
//!
//! let live: BTreeSet<u32> = hosts.keys().copied().collect();
//! assert!(topology.validate_layout(&live).is_none());
//!
//! let json = topology.to_json().unwrap();
//! assert_eq!(shardmap_placement::Topology::from_json(&json).unwrap(), topology);
//! ```

#![warn(missing_docs)]

pub mod builder;
pub mod error;
pub mod group;
pub mod hash;
pub mod json;
pub mod mutate;
pub mod query;
pub mod selector;
pub mod topology;

pub use builder::{BuiltLayout, TopologyBuilder};
pub use error::{Result, TopologyError};
pub use group::{PlacementGroupToken, Relationship};
pub use hash::key_hash;
pub use mutate::get_topology;
pub use query::{validate_legacy_cluster_config, PartitionGroupMap};
pub use selector::{BalancedChecker, SelectorStrategy};
pub use topology::{Host, HostId, HostInfo, Partition, PartitionId, Topology, EMPTY_TOPOLOGY, UNSET};
