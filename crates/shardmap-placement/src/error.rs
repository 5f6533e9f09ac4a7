//! Errors raised while building or mutating a topology.
//!
//! Every variant is a configuration or invariant violation. None of them are
//! transient, so callers are expected to abort the operation rather than retry.

use thiserror::Error;

use crate::topology::HostId;

/// A specialized `Result` type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Errors that can occur when computing or evolving a topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Hosts disagree on how many sites they run.
    #[error("not all hosts have the same site count: {counts:?}")]
    InconsistentSitesPerHost {
        /// Distinct site counts that were reported.
        counts: Vec<i32>,
    },

    /// Fewer hosts than replicas per partition.
    #[error("not enough eligible hosts for replica count: need {needed}, have {available}")]
    NotEnoughHosts {
        /// Replicas per partition (k-factor + 1).
        needed: usize,
        /// Hosts offered to the builder.
        available: usize,
    },

    /// A replica group would be made up mostly of missing hosts.
    #[error(
        "too many missing hosts for configuration: {max_missing} missing allowed in a group of {group_size}"
    )]
    TooManyMissingHosts {
        /// Missing hosts the group would have to absorb.
        max_missing: usize,
        /// Size of the replica group being formed.
        group_size: usize,
    },

    /// A new host reuses an id already present in the topology.
    #[error("new hosts must contain unique and unused host id, {0} is already in use")]
    DuplicateHostId(HostId),

    /// Sites per host or replication factor would change on an initialized topology.
    #[error("cannot change {parameter} of an initialized topology from {current} to {requested}")]
    LayoutParameterChanged {
        /// Name of the fixed parameter.
        parameter: &'static str,
        /// Value held by the current topology.
        current: i32,
        /// Value implied by the request.
        requested: i32,
    },

    /// `remove_hosts` was called without any host ids.
    #[error("no hosts were given for removal")]
    EmptyHostSet,

    /// The operation requires a topology that has been built at least once.
    #[error("topology has not been initialized")]
    Uninitialized,

    /// The placement groups ran out of hosts while filling a replica group.
    #[error("placement groups exhausted: requested {requested} hosts, obtained {obtained}")]
    ExhaustedPlacementGroups {
        /// Hosts requested for the replica group.
        requested: usize,
        /// Hosts that could be drawn before the pools ran dry.
        obtained: usize,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A decoded document references hosts or partitions it does not define.
    #[error("invalid topology document: {0}")]
    InvalidDocument(String),
}
