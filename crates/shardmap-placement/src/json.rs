//! JSON encoding of a topology.
//!
//! The document layout and key names are shared with other cluster members
//! and with persisted state, so they must not change:
//!
//! ```json
//! {
//!   "version": 3,
//!   "partitions": [{ "partition_id": 0, "master": 1, "replicas": [0, 1] }],
//!   "hosts": [{ "host_id": 0, "haGroup": "rack1", "missing": false, "partitions": [0] }],
//!   "sitesPerHost": 1,
//!   "replicationFactor": 1,
//!   "unbalancedPartitionCount": 0
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, TopologyError};
use crate::topology::{Host, HostId, Partition, PartitionId, Topology, UNSET};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopologyDocument {
    version: u64,
    partitions: Vec<PartitionDocument>,
    hosts: Vec<HostDocument>,
    sites_per_host: i32,
    replication_factor: i32,
    unbalanced_partition_count: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionDocument {
    partition_id: PartitionId,
    master: HostId,
    replicas: Vec<HostId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HostDocument {
    host_id: HostId,
    #[serde(rename = "haGroup")]
    ha_group: String,
    missing: bool,
    partitions: Vec<PartitionId>,
}

impl From<&Topology> for TopologyDocument {
    fn from(topology: &Topology) -> Self {
        Self {
            version: topology.version(),
            partitions: topology
                .partitions()
                .values()
                .map(|p| PartitionDocument {
                    partition_id: p.id,
                    master: p.leader_host_id,
                    replicas: p.replica_host_ids.iter().copied().collect(),
                })
                .collect(),
            hosts: topology
                .hosts()
                .values()
                .map(|h| HostDocument {
                    host_id: h.id,
                    ha_group: h.placement_group.as_str().to_string(),
                    missing: h.is_missing,
                    partitions: h.sorted_partition_ids(),
                })
                .collect(),
            sites_per_host: topology.sites_per_host(),
            replication_factor: topology.replication_factor(),
            unbalanced_partition_count: topology.unbalanced_partition_count(),
        }
    }
}

impl TopologyDocument {
    fn into_topology(self) -> Result<Topology> {
        if self.sites_per_host < UNSET {
            return Err(TopologyError::InvalidDocument(format!(
                "sites per host {} is out of range",
                self.sites_per_host
            )));
        }
        // The replica count (k-factor + 1) must stay representable.
        if self.replication_factor < UNSET || self.replication_factor == i32::MAX {
            return Err(TopologyError::InvalidDocument(format!(
                "replication factor {} is out of range",
                self.replication_factor
            )));
        }
        let topology = Topology::from_parts(
            self.version,
            self.hosts
                .into_iter()
                .map(|h| Host::new(h.host_id, h.ha_group, h.partitions, h.missing)),
            self.partitions
                .into_iter()
                .map(|p| Partition::new(p.partition_id, p.master, p.replicas)),
            self.sites_per_host,
            self.replication_factor,
            self.unbalanced_partition_count,
        );
        check_references(&topology)?;
        Ok(topology)
    }
}

/// Reject documents whose hosts and partitions point at records that do not exist.
fn check_references(topology: &Topology) -> Result<()> {
    for partition in topology.partitions().values() {
        if topology.host(partition.leader_host_id).is_none() {
            return Err(TopologyError::InvalidDocument(format!(
                "partition {} is led by unknown host {}",
                partition.id, partition.leader_host_id
            )));
        }
        if let Some(id) = partition.replica_host_ids.iter().find(|id| topology.host(**id).is_none()) {
            return Err(TopologyError::InvalidDocument(format!(
                "partition {} references unknown host {id}",
                partition.id
            )));
        }
    }
    for host in topology.hosts().values() {
        if let Some(id) = host.partitions.iter().find(|id| topology.partition(**id).is_none()) {
            return Err(TopologyError::InvalidDocument(format!(
                "host {} references unknown partition {id}",
                host.id
            )));
        }
    }
    Ok(())
}

impl Topology {
    /// Encode the topology as a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&TopologyDocument::from(self))?)
    }

    /// Encode the topology as an indented JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&TopologyDocument::from(self))?)
    }

    /// Decode a topology from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or references hosts or
    /// partitions it does not define.
    pub fn from_json(json: &str) -> Result<Topology> {
        serde_json::from_str::<TopologyDocument>(json)?.into_topology()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::EMPTY_TOPOLOGY;

    fn sample() -> Topology {
        Topology::from_parts(
            7,
            vec![
                Host::new(0, "zone1.rack1", [0, 1], false),
                Host::new(1, "zone1.rack2", [0, 1], true),
            ],
            vec![Partition::new(0, 0, [0, 1]), Partition::new(1, 0, [0, 1])],
            2,
            1,
            1,
        )
    }

    #[test]
    fn test_document_keys() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["version"], 7);
        assert_eq!(value["sitesPerHost"], 2);
        assert_eq!(value["replicationFactor"], 1);
        assert_eq!(value["unbalancedPartitionCount"], 1);

        let partition = &value["partitions"][1];
        assert_eq!(partition["partition_id"], 1);
        assert_eq!(partition["master"], 0);
        assert_eq!(partition["replicas"], serde_json::json!([0, 1]));

        let host = &value["hosts"][1];
        assert_eq!(host["host_id"], 1);
        assert_eq!(host["haGroup"], "zone1.rack2");
        assert_eq!(host["missing"], true);
        assert_eq!(host["partitions"], serde_json::json!([0, 1]));
    }

    #[test]
    fn test_round_trip() {
        let topology = sample();
        assert_eq!(Topology::from_json(&topology.to_json().unwrap()).unwrap(), topology);
        assert_eq!(Topology::from_json(&topology.to_json_pretty().unwrap()).unwrap(), topology);
    }

    #[test]
    fn test_empty_round_trip() {
        let json = EMPTY_TOPOLOGY.to_json().unwrap();
        assert_eq!(Topology::from_json(&json).unwrap(), *EMPTY_TOPOLOGY);
    }

    #[test]
    fn test_rejects_unknown_host() {
        let json = r#"{
            "version": 1,
            "partitions": [{ "partition_id": 0, "master": 0, "replicas": [0, 5] }],
            "hosts": [{ "host_id": 0, "haGroup": "a", "missing": false, "partitions": [0] }],
            "sitesPerHost": 1,
            "replicationFactor": 1,
            "unbalancedPartitionCount": 0
        }"#;
        let err = Topology::from_json(json).unwrap_err();
        assert!(matches!(err, TopologyError::InvalidDocument(_)));
        assert!(err.to_string().contains("unknown host 5"));
    }

    #[test]
    fn test_rejects_unknown_partition() {
        let json = r#"{
            "version": 1,
            "partitions": [],
            "hosts": [{ "host_id": 0, "haGroup": "a", "missing": false, "partitions": [3] }],
            "sitesPerHost": 1,
            "replicationFactor": 0,
            "unbalancedPartitionCount": 0
        }"#;
        let err = Topology::from_json(json).unwrap_err();
        assert!(err.to_string().contains("unknown partition 3"));
    }

    #[test]
    fn test_rejects_malformed() {
        let err = Topology::from_json("{\"version\": 1}").unwrap_err();
        assert!(matches!(err, TopologyError::Json(_)));
    }

    #[test]
    fn test_rejects_out_of_range_layout_parameters() {
        let document = |sites: i64, replication: i64| {
            serde_json::json!({
                "version": 1,
                "partitions": [{ "partition_id": 0, "master": 0, "replicas": [0] }],
                "hosts": [{ "host_id": 0, "haGroup": "a", "missing": false, "partitions": [0] }],
                "sitesPerHost": sites,
                "replicationFactor": replication,
                "unbalancedPartitionCount": 0
            })
            .to_string()
        };

        for (sites, replication) in [(1, i64::from(i32::MAX)), (1, -2), (-3, 0)] {
            let err = Topology::from_json(&document(sites, replication)).unwrap_err();
            assert!(matches!(err, TopologyError::InvalidDocument(_)), "{sites} {replication}");
        }
        assert!(Topology::from_json(&document(1, 0)).is_ok());
    }
}
