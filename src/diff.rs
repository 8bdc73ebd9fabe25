// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Set difference between two snapshots of a resource's child collection.
//!
//! Children (pool members, routing rules, backends, content-switching paths) are
//! compared by a canonical key, never by position. Elements present in both
//! snapshots are left alone; anything else is either added or removed. A member
//! whose weight changed therefore shows up as one removal plus one addition.
//!
//! Reconcilers decide the order in which the two halves are applied:
//!
//! | Collection | Order |
//! |------------|-------|
//! | Pool members | add, then remove |
//! | `AppExternalNat` rules | remove, then add |
//! | `ClassicExternalNat` backends | remove, then add |
//! | `AppLoadBalancer` paths | add, then remove |

use crate::constants::DEFAULT_MEMBER_WEIGHT;
use crate::crd::{AppExternalNatRule, ClassicExternalNatBackend, HostPath, PoolMember};
use std::collections::BTreeMap;

/// Canonical identity of a child element.
///
/// Multi-field keys join their fields with NUL, which cannot appear in a host,
/// path or pool name, so distinct elements never share a key.
pub trait ChildKey {
    fn child_key(&self) -> String;
}

impl ChildKey for PoolMember {
    fn child_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.ip,
            self.port,
            self.weight.unwrap_or(DEFAULT_MEMBER_WEIGHT)
        )
    }
}

impl ChildKey for AppExternalNatRule {
    fn child_key(&self) -> String {
        format!("{}\0{}", self.host, self.pool)
    }
}

impl ChildKey for ClassicExternalNatBackend {
    fn child_key(&self) -> String {
        self.pool_name.clone()
    }
}

impl ChildKey for HostPath {
    fn child_key(&self) -> String {
        // An empty path is normalized to `None` by `host_paths`
        format!(
            "{}\0{}\0{}",
            self.host,
            self.path.as_deref().unwrap_or_default(),
            self.pool
        )
    }
}

/// Result of [`diff`]. Both halves are sorted by child key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildDiff<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> ChildDiff<T> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Computes which children must be added and removed to turn `old` into `new`.
///
/// Duplicate keys within one snapshot collapse to their first occurrence.
pub fn diff<T: ChildKey + Clone>(old: &[T], new: &[T]) -> ChildDiff<T> {
    let old_set = keyed(old);
    let new_set = keyed(new);

    let added = new_set
        .iter()
        .filter(|(key, _)| !old_set.contains_key(*key))
        .map(|(_, item)| (*item).clone())
        .collect();
    let removed = old_set
        .iter()
        .filter(|(key, _)| !new_set.contains_key(*key))
        .map(|(_, item)| (*item).clone())
        .collect();

    ChildDiff { added, removed }
}

/// Returns the children with duplicate keys collapsed, in declaration order.
pub fn dedup<T: ChildKey + Clone>(items: &[T]) -> Vec<T> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.child_key()))
        .cloned()
        .collect()
}

fn keyed<T: ChildKey>(items: &[T]) -> BTreeMap<String, &T> {
    let mut map = BTreeMap::new();
    for item in items {
        map.entry(item.child_key()).or_insert(item);
    }
    map
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod diff_tests;
