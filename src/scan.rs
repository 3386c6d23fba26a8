//! Subtree scanning: decide which nodes hold a currency amount.
//!
//! Every node is evaluated, but a node is only reported when none of its
//! descendants qualified. The most specific node wins, so replacing it does not
//! erase unrelated text around it.

use serde::Serialize;

use crate::detect::CurrencyDetector;
use crate::dom::{NodeKind, Tree};

/// Default minimum proportion for a node to count as a match.
pub const DEFAULT_THRESHOLD: f64 = 0.4;

/// A node holding a currency amount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurrencyMatch<N> {
    pub node: N,
    pub amount: f64,
}

/// Walks a tree and collects [`CurrencyMatch`]es.
#[derive(Debug, Clone)]
pub struct Scanner {
    detector: CurrencyDetector,
    threshold: f64,
}

impl Scanner {
    /// `threshold` is clamped to `[0, 1]`; a NaN or infinite value falls back
    /// to [`DEFAULT_THRESHOLD`].
    pub fn new(detector: CurrencyDetector, threshold: f64) -> Self {
        let threshold = if threshold.is_finite() {
            threshold.clamp(0.0, 1.0)
        } else {
            tracing::warn!(threshold, "invalid threshold, using {}", DEFAULT_THRESHOLD);
            DEFAULT_THRESHOLD
        };
        Self { detector, threshold }
    }

    pub fn detector(&self) -> &CurrencyDetector {
        &self.detector
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Scan a subtree, returning matches in document order.
    pub fn scan<T: Tree>(&self, tree: &T, root: T::Node) -> Vec<CurrencyMatch<T::Node>> {
        self.scan_settled(tree, root, |_| None)
    }

    /// Scan a subtree, treating nodes for which `settled` returns an amount as
    /// already-decided matches. Settled nodes are reported with that amount and
    /// their subtrees are not entered.
    pub fn scan_settled<T, F>(&self, tree: &T, root: T::Node, settled: F) -> Vec<CurrencyMatch<T::Node>>
    where
        T: Tree,
        F: Fn(T::Node) -> Option<f64>,
    {
        enum Visit<N> {
            Enter(N),
            // (node, own amount if it qualifies, output length before children)
            Exit(N, Option<f64>, usize),
        }

        let mut found = Vec::new();
        let mut stack = vec![Visit::Enter(root)];

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(node) => {
                    if let Some(amount) = settled(node) {
                        found.push(CurrencyMatch { node, amount });
                        continue;
                    }
                    // Script text is code, not page content
                    if tree.kind(node) == NodeKind::Script {
                        continue;
                    }

                    let own = self
                        .detector
                        .detect(tree, node)
                        .filter(|d| d.proportion >= self.threshold)
                        .map(|d| d.amount);

                    stack.push(Visit::Exit(node, own, found.len()));
                    stack.extend(tree.children(node).into_iter().rev().map(Visit::Enter));
                }
                Visit::Exit(node, own, mark) => {
                    // Children found something: they take precedence
                    if found.len() > mark {
                        continue;
                    }
                    if let Some(amount) = own {
                        found.push(CurrencyMatch { node, amount });
                    }
                }
            }
        }

        found
    }
}
