//! Strategies for drawing replica groups out of placement groups.
//!
//! The builder asks a [`GroupSelector`] for `n` hosts at a time. How those
//! hosts are spread over placement groups depends on the shape of the
//! hierarchy:
//!
//! - **Single**: one placement group, nothing to spread across.
//! - **Symmetric**: every pair of groups is equally far apart, so a plain
//!   round robin spreads replicas as widely as possible.
//! - **Hierarchical**: groups sit at different distances from each other;
//!   each pick goes to the group that is furthest from the picks made so far.

use std::cmp::Reverse;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Result, TopologyError};
use crate::group::{PlacementGroup, PlacementGroupToken, PolledHost, Relationship};

/// Which selection strategy a build used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorStrategy {
    /// Exactly one placement group.
    Single,
    /// Two or more groups, all pairwise distances equal.
    Symmetric,
    /// Two or more groups at unequal distances.
    Hierarchical,
}

impl fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Single => "single",
            Self::Symmetric => "symmetric",
            Self::Hierarchical => "hierarchical",
        };
        f.write_str(name)
    }
}

/// Judges whether a partition's replicas are spread over enough placement groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancedChecker {
    /// Every replica set is balanced.
    Always,
    /// Replica sets must span at least this many distinct groups.
    MinimumGroups(usize),
}

impl BalancedChecker {
    /// Checker for a cluster with `group_count` placement groups and
    /// `replica_count` copies of each partition.
    ///
    /// The required span is `min(group_count, replica_count)` with no floor of
    /// two: a single-copy partition can only ever touch one group, so with
    /// `k = 0` every partition counts as balanced.
    #[must_use]
    pub fn for_cluster(group_count: usize, replica_count: usize) -> Self {
        if group_count <= 1 {
            Self::Always
        } else {
            Self::MinimumGroups(group_count.min(replica_count))
        }
    }

    /// Whether the placement groups of a replica set satisfy the rule.
    pub fn is_balanced<'a>(
        &self,
        groups: impl IntoIterator<Item = &'a PlacementGroupToken>,
    ) -> bool {
        match self {
            Self::Always => true,
            Self::MinimumGroups(required) => {
                let distinct: BTreeSet<&str> = groups.into_iter().map(|g| g.as_str()).collect();
                distinct.len() >= *required
            }
        }
    }
}

/// Selects hosts for replica groups according to the placement group layout.
#[derive(Debug)]
pub(crate) enum GroupSelector {
    Single(SingleSelector),
    Symmetric(SymmetricSelector),
    Hierarchical(HierarchicalSelector),
}

impl GroupSelector {
    /// Pick a strategy for the given groups.
    ///
    /// `groups` must be non-empty and sorted by token.
    pub(crate) fn new(groups: Vec<PlacementGroup>, replica_count: usize) -> Self {
        let checker = BalancedChecker::for_cluster(groups.len(), replica_count);
        if groups.len() == 1 {
            return Self::Single(SingleSelector { groups });
        }

        let relationships = relationship_matrix(&groups);
        let mut distances = BTreeSet::new();
        for (i, row) in relationships.iter().enumerate() {
            for rel in &row[i + 1..] {
                distances.insert(rel.distance);
            }
        }

        if distances.len() <= 1 {
            Self::Symmetric(SymmetricSelector { groups, checker })
        } else {
            Self::Hierarchical(HierarchicalSelector::new(groups, relationships, checker))
        }
    }

    pub(crate) fn strategy(&self) -> SelectorStrategy {
        match self {
            Self::Single(_) => SelectorStrategy::Single,
            Self::Symmetric(_) => SelectorStrategy::Symmetric,
            Self::Hierarchical(_) => SelectorStrategy::Hierarchical,
        }
    }

    /// Draw exactly `size` hosts, consuming at most `max_missing` missing hosts.
    ///
    /// Returns host arena indices. `max_missing` is decremented for every
    /// missing host drawn.
    pub(crate) fn select_next_group(
        &mut self,
        size: usize,
        max_missing: &mut usize,
    ) -> Result<Vec<usize>> {
        let selected = match self {
            Self::Single(s) => s.select(size, max_missing),
            Self::Symmetric(s) => s.select(size, max_missing),
            Self::Hierarchical(s) => s.select(size, max_missing),
        };
        if selected.len() < size {
            return Err(TopologyError::ExhaustedPlacementGroups {
                requested: size,
                obtained: selected.len(),
            });
        }
        Ok(selected)
    }

    pub(crate) fn balance_checker(&self) -> BalancedChecker {
        match self {
            Self::Single(_) => BalancedChecker::Always,
            Self::Symmetric(s) => s.checker,
            Self::Hierarchical(s) => s.checker,
        }
    }
}

fn relationship_matrix(groups: &[PlacementGroup]) -> Vec<Vec<Relationship>> {
    groups
        .iter()
        .map(|a| groups.iter().map(|b| a.token().relationship_to(b.token())).collect())
        .collect()
}

fn take(group: &mut PlacementGroup, max_missing: &mut usize) -> Option<PolledHost> {
    let host = group.poll_host(*max_missing > 0)?;
    if host.missing {
        *max_missing -= 1;
    }
    Some(host)
}

/// All hosts come from the one placement group.
#[derive(Debug)]
pub(crate) struct SingleSelector {
    groups: Vec<PlacementGroup>,
}

impl SingleSelector {
    fn select(&mut self, size: usize, max_missing: &mut usize) -> Vec<usize> {
        let group = &mut self.groups[0];
        std::iter::from_fn(|| take(group, max_missing)).take(size).map(|h| h.index).collect()
    }
}

/// Round robin over equally distant groups, fullest group first.
#[derive(Debug)]
pub(crate) struct SymmetricSelector {
    groups: Vec<PlacementGroup>,
    checker: BalancedChecker,
}

impl SymmetricSelector {
    fn select(&mut self, size: usize, max_missing: &mut usize) -> Vec<usize> {
        let groups = &mut self.groups;

        let mut order: Vec<usize> = (0..groups.len()).filter(|&g| !groups[g].is_empty()).collect();
        order.sort_by(|&a, &b| {
            groups[b]
                .remaining()
                .cmp(&groups[a].remaining())
                .then_with(|| groups[a].token().cmp(groups[b].token()))
        });
        let mut queue: VecDeque<usize> = order.into();

        // Groups that could not hand out a host under the current missing budget.
        let mut set_aside = Vec::new();
        let mut progressed = false;
        let mut selected = Vec::with_capacity(size);

        while selected.len() < size {
            let Some(g) = queue.pop_front() else {
                if !progressed {
                    break;
                }
                progressed = false;
                queue.extend(set_aside.drain(..).filter(|&g: &usize| !groups[g].is_empty()));
                if queue.is_empty() {
                    break;
                }
                continue;
            };

            match take(&mut groups[g], max_missing) {
                Some(host) => {
                    trace!(group = %groups[g].token(), missing = host.missing, "Symmetric pick");
                    selected.push(host.index);
                    progressed = true;
                    if !groups[g].is_empty() {
                        queue.push_back(g);
                    }
                }
                None => set_aside.push(g),
            }
        }

        selected
    }
}

/// Spreads each replica group as far across the hierarchy as it can.
#[derive(Debug)]
pub(crate) struct HierarchicalSelector {
    groups: Vec<PlacementGroup>,
    relationships: Vec<Vec<Relationship>>,
    /// Group indices by ascending maximum distance to any other group, then token.
    central_first: Vec<usize>,
    checker: BalancedChecker,
}

impl HierarchicalSelector {
    fn new(
        groups: Vec<PlacementGroup>,
        relationships: Vec<Vec<Relationship>>,
        checker: BalancedChecker,
    ) -> Self {
        let mut central_first: Vec<usize> = (0..groups.len()).collect();
        central_first.sort_by(|&a, &b| {
            let max_a = relationships[a].iter().map(|r| r.distance).max().unwrap_or(0);
            let max_b = relationships[b].iter().map(|r| r.distance).max().unwrap_or(0);
            max_a.cmp(&max_b).then_with(|| groups[a].token().cmp(groups[b].token()))
        });
        Self { groups, relationships, central_first, checker }
    }

    fn select(&mut self, size: usize, max_missing: &mut usize) -> Vec<usize> {
        let count = self.groups.len();
        let mut eligible: Vec<bool> = self.groups.iter().map(|g| !g.is_empty()).collect();
        // Groups that came up empty-handed for this request only.
        let mut blocked = vec![false; count];
        let mut distance_sum = vec![0i64; count];
        let mut ancestry_sum = vec![0i64; count];
        let mut selected = Vec::with_capacity(size);

        while selected.len() < size {
            let candidate = if selected.is_empty() {
                self.central_first.iter().copied().find(|&g| eligible[g] && !blocked[g])
            } else {
                (0..count)
                    .filter(|&g| eligible[g] && !blocked[g])
                    .min_by_key(|&g| (Reverse(distance_sum[g]), ancestry_sum[g], g))
            };
            let Some(g) = candidate else {
                break;
            };

            let Some(host) = take(&mut self.groups[g], max_missing) else {
                blocked[g] = true;
                continue;
            };
            trace!(
                group = %self.groups[g].token(),
                distance = distance_sum[g],
                ancestry = ancestry_sum[g],
                "Hierarchical pick"
            );
            selected.push(host.index);

            for other in 0..count {
                if other != g && eligible[other] {
                    let rel = self.relationships[other][g];
                    distance_sum[other] += i64::from(rel.distance);
                    ancestry_sum[other] += i64::from(rel.shared_ancestry);
                }
            }
            if self.groups[g].is_empty() {
                eligible[g] = false;
                distance_sum[g] = 0;
                ancestry_sum[g] = 0;
            }
        }

        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build sorted groups; host ids and arena indices are assigned in order.
    fn groups(layout: &[(&str, usize)]) -> Vec<PlacementGroup> {
        let mut sorted = layout.to_vec();
        sorted.sort();
        let mut index = 0;
        sorted
            .into_iter()
            .map(|(token, hosts)| {
                let mut group = PlacementGroup::new(token.into());
                for _ in 0..hosts {
                    group.add_host(index, index as u32, &format!("10.0.{index:03}"), false);
                    index += 1;
                }
                group
            })
            .collect()
    }

    fn token_of(layout: &[(&str, usize)], index: usize) -> String {
        let mut sorted = layout.to_vec();
        sorted.sort();
        let mut start = 0;
        for (token, hosts) in sorted {
            if index < start + hosts {
                return token.to_string();
            }
            start += hosts;
        }
        unreachable!("index {index} out of range")
    }

    #[test]
    fn test_strategy_choice() {
        let single = GroupSelector::new(groups(&[("a", 3)]), 2);
        assert_eq!(single.strategy(), SelectorStrategy::Single);
        assert_eq!(single.balance_checker(), BalancedChecker::Always);

        let symmetric = GroupSelector::new(groups(&[("a", 2), ("b", 2), ("c", 2)]), 2);
        assert_eq!(symmetric.strategy(), SelectorStrategy::Symmetric);
        assert_eq!(symmetric.balance_checker(), BalancedChecker::MinimumGroups(2));

        let hierarchical =
            GroupSelector::new(groups(&[("z1.r1", 2), ("z1.r2", 2), ("z2.r1", 2)]), 3);
        assert_eq!(hierarchical.strategy(), SelectorStrategy::Hierarchical);
        assert_eq!(hierarchical.balance_checker(), BalancedChecker::MinimumGroups(3));
    }

    #[test]
    fn test_balanced_checker() {
        let a = PlacementGroupToken::new("a");
        let b = PlacementGroupToken::new("b");
        let checker = BalancedChecker::MinimumGroups(2);
        assert!(checker.is_balanced([&a, &b]));
        assert!(!checker.is_balanced([&a, &a]));
        assert!(BalancedChecker::Always.is_balanced([&a, &a]));
        assert_eq!(BalancedChecker::for_cluster(5, 1), BalancedChecker::MinimumGroups(1));
        assert!(BalancedChecker::for_cluster(5, 1).is_balanced([&a]));
    }

    #[test]
    fn test_single_selection() {
        let mut selector = GroupSelector::new(groups(&[("a", 4)]), 2);
        let mut missing = 0;
        assert_eq!(selector.select_next_group(2, &mut missing).unwrap(), vec![0, 1]);
        assert_eq!(selector.select_next_group(2, &mut missing).unwrap(), vec![2, 3]);
        let err = selector.select_next_group(1, &mut missing).unwrap_err();
        assert!(matches!(
            err,
            TopologyError::ExhaustedPlacementGroups { requested: 1, obtained: 0 }
        ));
    }

    #[test]
    fn test_symmetric_round_robin() {
        let layout = [("a", 3), ("b", 3)];
        let mut selector = GroupSelector::new(groups(&layout), 3);
        let mut missing = 0;

        for _ in 0..2 {
            let picked = selector.select_next_group(3, &mut missing).unwrap();
            let tokens: BTreeSet<String> = picked.iter().map(|&i| token_of(&layout, i)).collect();
            assert_eq!(tokens.len(), 2, "group {picked:?} should span both groups");
        }
    }

    #[test]
    fn test_symmetric_prefers_fullest_group() {
        let layout = [("a", 1), ("b", 3)];
        let mut selector = GroupSelector::new(groups(&layout), 2);
        let mut missing = 0;
        let picked = selector.select_next_group(2, &mut missing).unwrap();
        assert_eq!(token_of(&layout, picked[0]), "b");
        assert_eq!(token_of(&layout, picked[1]), "a");
    }

    #[test]
    fn test_symmetric_respects_missing_budget() {
        let mut pools = groups(&[("a", 1), ("b", 1)]);
        pools[0].add_host(2, 2, "10.0.9", true);
        pools[1].add_host(3, 3, "10.0.9", true);
        let mut selector = GroupSelector::new(pools, 2);

        let mut budget = 1;
        let picked = selector.select_next_group(2, &mut budget).unwrap();
        assert_eq!(budget, 0);
        assert_eq!(picked.iter().filter(|&&i| i >= 2).count(), 1);

        // Only one missing host is left and no budget to take it.
        let err = selector.select_next_group(2, &mut budget).unwrap_err();
        assert!(matches!(err, TopologyError::ExhaustedPlacementGroups { .. }));
    }

    #[test]
    fn test_hierarchical_spreads_across_zones() {
        let layout = [("z1.r1", 2), ("z1.r2", 2), ("z2.r1", 2), ("z2.r2", 2)];
        let mut selector = GroupSelector::new(groups(&layout), 2);
        let mut missing = 0;

        for _ in 0..4 {
            let picked = selector.select_next_group(2, &mut missing).unwrap();
            let zones: BTreeSet<String> = picked
                .iter()
                .map(|&i| token_of(&layout, i).split('.').next().unwrap().to_string())
                .collect();
            assert_eq!(zones.len(), 2, "pair {picked:?} should span both zones");
        }
    }

    #[test]
    fn test_hierarchical_starts_central() {
        // "a" sits one level from both "a.x" and "a.y", the leaves are two apart.
        let layout = [("a", 1), ("a.x", 1), ("a.y", 1)];
        let mut selector = GroupSelector::new(groups(&layout), 1);
        let mut missing = 0;
        let picked = selector.select_next_group(1, &mut missing).unwrap();
        assert_eq!(token_of(&layout, picked[0]), "a");
    }

    #[test]
    fn test_hierarchical_second_pick_is_farthest() {
        let layout = [("z1.r1", 1), ("z1.r2", 1), ("z2.r1", 1)];
        let mut selector = GroupSelector::new(groups(&layout), 2);
        let mut missing = 0;
        let picked = selector.select_next_group(2, &mut missing).unwrap();
        let first = token_of(&layout, picked[0]);
        let second = token_of(&layout, picked[1]);
        assert_ne!(first.split('.').next(), second.split('.').next());
    }

    #[test]
    fn test_hierarchical_exhaustion() {
        let mut selector = GroupSelector::new(groups(&[("a.x", 1), ("a.y", 1), ("b", 1)]), 3);
        assert_eq!(selector.strategy(), SelectorStrategy::Hierarchical);
        let mut missing = 0;
        assert_eq!(selector.select_next_group(3, &mut missing).unwrap().len(), 3);
        assert!(selector.select_next_group(1, &mut missing).is_err());
    }
}
