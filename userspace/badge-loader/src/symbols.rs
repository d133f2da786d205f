// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

/// What happens when a second definition of a name arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// The later definition replaces the earlier one.
    #[default]
    LastWins,
    /// The earlier definition is kept.
    FirstWins,
}

/// Name to address mapping with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    entries: BTreeMap<String, usize>,
}

impl SymbolTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `name`, returning the previous address.
    pub fn insert(&mut self, name: impl Into<String>, addr: usize) -> Option<usize> {
        self.entries.insert(name.into(), addr)
    }

    /// Inserts `name` under `policy`, returning the previous address on collision.
    pub fn insert_with(&mut self, name: impl Into<String>, addr: usize, policy: CollisionPolicy) -> Option<usize> {
        let name = name.into();
        match (self.entries.get(&name).copied(), policy) {
            (Some(prev), CollisionPolicy::FirstWins) => Some(prev),
            _ => self.entries.insert(name, addr),
        }
    }

    /// Copies every entry of `other` into this table; `other` wins on collision.
    pub fn merge(&mut self, other: &SymbolTable) {
        for (name, addr) in &other.entries {
            self.entries.insert(name.clone(), *addr);
        }
    }

    /// Looks up `name`.
    pub fn get(&self, name: &str) -> Option<usize> {
        self.entries.get(name).copied()
    }

    /// Whether `name` is defined.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(name, addr)| (name.as_str(), *addr))
    }

    /// Mutable access for in-place rewriting of addresses.
    pub fn values_mut(&mut self) -> impl Iterator<Item = (&str, &mut usize)> {
        self.entries.iter_mut().map(|(name, addr)| (name.as_str(), addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_last_write_wins() {
        let mut table = SymbolTable::new();
        table.insert("printf", 1);
        table.insert("main", 2);
        let mut other = SymbolTable::new();
        other.insert("printf", 10);
        other.insert("sin", 11);
        table.merge(&other);
        assert_eq!(table.get("printf"), Some(10));
        assert_eq!(table.get("main"), Some(2));
        assert_eq!(table.get("sin"), Some(11));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn first_wins_keeps_the_earlier_definition() {
        let mut table = SymbolTable::new();
        assert_eq!(table.insert_with("foo", 1, CollisionPolicy::FirstWins), None);
        assert_eq!(table.insert_with("foo", 2, CollisionPolicy::FirstWins), Some(1));
        assert_eq!(table.get("foo"), Some(1));
        assert_eq!(table.insert_with("foo", 3, CollisionPolicy::LastWins), Some(1));
        assert_eq!(table.get("foo"), Some(3));
    }
}
