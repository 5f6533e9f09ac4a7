//! Placement groups for failure-domain-aware layout.
//!
//! Every host carries a placement group token such as `"zone1.rack2"`. The
//! token is a path through the failure-domain hierarchy: segments are
//! separated by `.` and read from the outermost domain inwards.
//!
//! Two tokens relate through their shared ancestry (the length of their common
//! segment prefix) and their distance (the number of tree edges between them):
//!
//! ```text
//!              zone1                 zone2
//!             /     \                  |
//!         rack1     rack2            rack1
//!
//!   zone1.rack1 <-> zone1.rack2   shared = 1, distance = 2
//!   zone1.rack1 <-> zone2.rack1   shared = 0, distance = 4
//! ```
//!
//! During a build, each distinct token also owns the pool of hosts that have
//! not been placed into a replica group yet.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::topology::HostId;

/// Separator between hierarchy levels in a placement group token.
pub const TOKEN_SEPARATOR: char = '.';

/// A dot-separated placement group token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PlacementGroupToken {
    raw: String,
    segments: Vec<String>,
}

/// How two placement group tokens relate in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Relationship {
    /// Number of tree edges between the two tokens.
    pub distance: i32,
    /// Number of leading segments the two tokens share.
    pub shared_ancestry: i32,
}

impl PlacementGroupToken {
    /// Parse a token.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments = raw.split(TOKEN_SEPARATOR).map(str::to_string).collect();
        Self { raw, segments }
    }

    /// The token as originally written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The hierarchy segments, outermost first.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of hierarchy levels in the token.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Compute the shared ancestry and distance to another token.
    #[must_use]
    pub fn relationship_to(&self, other: &Self) -> Relationship {
        let shared = self
            .segments
            .iter()
            .zip(other.segments.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let distance = self.segments.len() + other.segments.len() - 2 * shared;
        Relationship { distance: distance as i32, shared_ancestry: shared as i32 }
    }
}

impl From<String> for PlacementGroupToken {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for PlacementGroupToken {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<PlacementGroupToken> for String {
    fn from(token: PlacementGroupToken) -> Self {
        token.raw
    }
}

impl Ord for PlacementGroupToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl PartialOrd for PlacementGroupToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PlacementGroupToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A host drawn from a placement group pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PolledHost {
    /// Index of the host in the builder's host arena.
    pub index: usize,
    /// Whether the host is currently unreachable.
    pub missing: bool,
}

/// One placement group and its pool of hosts awaiting placement.
///
/// Live hosts come out ordered by IP address (then host id); missing hosts are
/// kept apart in arrival order so the builder can bound how many of them end
/// up in a single replica group.
#[derive(Debug)]
pub(crate) struct PlacementGroup {
    token: PlacementGroupToken,
    available: BinaryHeap<Reverse<(String, HostId, usize)>>,
    missing: VecDeque<usize>,
}

impl PlacementGroup {
    pub(crate) fn new(token: PlacementGroupToken) -> Self {
        Self { token, available: BinaryHeap::new(), missing: VecDeque::new() }
    }

    pub(crate) fn token(&self) -> &PlacementGroupToken {
        &self.token
    }

    /// Queue a host for placement.
    pub(crate) fn add_host(&mut self, index: usize, host_id: HostId, ip_address: &str, missing: bool) {
        if missing {
            self.missing.push_back(index);
        } else {
            self.available.push(Reverse((ip_address.to_string(), host_id, index)));
        }
    }

    /// Take the next host out of the pool.
    ///
    /// Missing hosts are only handed out when `allow_missing` is set, and then
    /// before any live host.
    pub(crate) fn poll_host(&mut self, allow_missing: bool) -> Option<PolledHost> {
        if allow_missing {
            if let Some(index) = self.missing.pop_front() {
                return Some(PolledHost { index, missing: true });
            }
        }
        self.available.pop().map(|Reverse((_, _, index))| PolledHost { index, missing: false })
    }

    /// Hosts still waiting in either pool.
    pub(crate) fn remaining(&self) -> usize {
        self.available.len() + self.missing.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_segments() {
        let token = PlacementGroupToken::new("zone1.rack2.row3");
        assert_eq!(token.depth(), 3);
        assert_eq!(token.segments()[1], "rack2");
        assert_eq!(token.as_str(), "zone1.rack2.row3");
        assert_eq!(token.to_string(), "zone1.rack2.row3");
    }

    #[test]
    fn test_relationship_identical() {
        let token = PlacementGroupToken::new("a.b.c");
        let rel = token.relationship_to(&token);
        assert_eq!(rel, Relationship { distance: 0, shared_ancestry: 3 });
    }

    #[test]
    fn test_relationship_siblings() {
        let a = PlacementGroupToken::new("zone1.rack1");
        let b = PlacementGroupToken::new("zone1.rack2");
        assert_eq!(a.relationship_to(&b), Relationship { distance: 2, shared_ancestry: 1 });
    }

    #[test]
    fn test_relationship_disjoint() {
        let a = PlacementGroupToken::new("zone1.rack1");
        let b = PlacementGroupToken::new("zone2.rack1");
        assert_eq!(a.relationship_to(&b), Relationship { distance: 4, shared_ancestry: 0 });
    }

    #[test]
    fn test_relationship_uneven_depth() {
        let a = PlacementGroupToken::new("zone1");
        let b = PlacementGroupToken::new("zone1.rack1.row1");
        let rel = a.relationship_to(&b);
        assert_eq!(rel, Relationship { distance: 2, shared_ancestry: 1 });
        assert_eq!(b.relationship_to(&a), rel);
    }

    #[test]
    fn test_distance_grows_with_divergence() {
        let base = PlacementGroupToken::new("a.b.c");
        let near = PlacementGroupToken::new("a.b.d");
        let mid = PlacementGroupToken::new("a.x.d");
        let far = PlacementGroupToken::new("y.x.d");
        let d_near = base.relationship_to(&near).distance;
        let d_mid = base.relationship_to(&mid).distance;
        let d_far = base.relationship_to(&far).distance;
        assert!(d_near < d_mid && d_mid < d_far);
    }

    #[test]
    fn test_token_serde_as_string() {
        let token = PlacementGroupToken::new("rack1.row2");
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"rack1.row2\"");
        let back: PlacementGroupToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_pool_orders_by_ip() {
        let mut group = PlacementGroup::new("rack1".into());
        group.add_host(0, 10, "10.0.0.3", false);
        group.add_host(1, 11, "10.0.0.1", false);
        group.add_host(2, 12, "10.0.0.2", false);

        assert_eq!(group.remaining(), 3);
        assert_eq!(group.poll_host(false).map(|h| h.index), Some(1));
        assert_eq!(group.poll_host(false).map(|h| h.index), Some(2));
        assert_eq!(group.poll_host(false).map(|h| h.index), Some(0));
        assert!(group.poll_host(false).is_none());
        assert!(group.is_empty());
    }

    #[test]
    fn test_pool_ip_tie_breaks_on_host_id() {
        let mut group = PlacementGroup::new("rack1".into());
        group.add_host(0, 9, "", false);
        group.add_host(1, 3, "", false);
        assert_eq!(group.poll_host(false).map(|h| h.index), Some(1));
    }

    #[test]
    fn test_pool_missing_hosts() {
        let mut group = PlacementGroup::new("rack1".into());
        group.add_host(0, 1, "10.0.0.1", false);
        group.add_host(1, 2, "10.0.0.2", true);

        // Missing hosts are withheld unless allowed.
        let first = group.poll_host(false).unwrap();
        assert_eq!(first, PolledHost { index: 0, missing: false });
        assert!(group.poll_host(false).is_none());
        assert_eq!(group.remaining(), 1);

        let second = group.poll_host(true).unwrap();
        assert_eq!(second, PolledHost { index: 1, missing: true });
        assert!(group.is_empty());
    }

    #[test]
    fn test_pool_prefers_missing_when_allowed() {
        let mut group = PlacementGroup::new("rack1".into());
        group.add_host(0, 1, "10.0.0.1", false);
        group.add_host(1, 2, "10.0.0.2", true);
        assert!(group.poll_host(true).unwrap().missing);
        assert!(!group.poll_host(true).unwrap().missing);
    }
}
