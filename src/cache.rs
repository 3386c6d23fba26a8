use std::collections::HashMap;
use std::hash::Hash;

use crate::convert::Converter;

/// A node bound to the amount and converter chosen when it was first found.
#[derive(Debug, Clone)]
pub struct CachedEntry<N> {
    pub node: N,
    pub amount: f64,
    pub converter: Converter,
}

/// Matched nodes across passes, keyed by node identity.
///
/// Grows for the life of the document; entries are never updated or evicted.
#[derive(Debug, Clone)]
pub struct MatchCache<N> {
    entries: Vec<CachedEntry<N>>,
    index: HashMap<N, usize>,
}

impl<N> Default for MatchCache<N> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<N: Copy + Eq + Hash> MatchCache<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node unless it is already known. `converter` is only called for
    /// new nodes. Returns whether the node was inserted.
    pub fn record_if_absent<F>(&mut self, node: N, amount: f64, converter: F) -> bool
    where
        F: FnOnce() -> Converter,
    {
        if self.index.contains_key(&node) {
            return false;
        }
        self.index.insert(node, self.entries.len());
        self.entries.push(CachedEntry {
            node,
            amount,
            converter: converter(),
        });
        true
    }

    pub fn get(&self, node: N) -> Option<&CachedEntry<N>> {
        self.index.get(&node).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, node: N) -> bool {
        self.index.contains_key(&node)
    }

    /// All entries, in insertion order.
    pub fn all(&self) -> &[CachedEntry<N>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
