//! Ordering graph for the jobs of a transaction
//!
//! Nodes are ordered by their `after` edges only: an edge `n -> m` means n
//! must run after m. Linearization is a depth-first post-order, so every node
//! comes after everything it is ordered after. Cycles are fatal and are
//! reported as the chain of node labels that closes the loop.

use std::collections::{BTreeMap, BTreeSet};

/// DAG over nodes of type `N`, each with a human-readable label
#[derive(Debug)]
pub struct OrderGraph<N> {
    labels: BTreeMap<N, String>,
    after: BTreeMap<N, BTreeSet<N>>,
}

impl<N> Default for OrderGraph<N> {
    fn default() -> Self {
        Self {
            labels: BTreeMap::new(),
            after: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl<N: Copy + Ord> OrderGraph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: N, label: impl Into<String>) {
        self.labels.insert(node, label.into());
    }

    /// `node` must run after `predecessor`. Edges to unknown nodes are ignored.
    pub fn add_edge(&mut self, node: N, predecessor: N) {
        if node == predecessor
            || !self.labels.contains_key(&node)
            || !self.labels.contains_key(&predecessor)
        {
            return;
        }
        self.after.entry(node).or_default().insert(predecessor);
    }

    /// Direct predecessors of a node
    pub fn predecessors(&self, node: N) -> impl Iterator<Item = N> + '_ {
        self.after.get(&node).into_iter().flatten().copied()
    }

    /// Every node exactly once, predecessors first
    pub fn linearize(&self) -> Result<Vec<N>, CycleError> {
        let mut marks = BTreeMap::new();
        let mut path = Vec::new();
        let mut order = Vec::with_capacity(self.labels.len());

        for &node in self.labels.keys() {
            self.visit(node, &mut marks, &mut path, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        node: N,
        marks: &mut BTreeMap<N, Mark>,
        path: &mut Vec<N>,
        order: &mut Vec<N>,
    ) -> Result<(), CycleError> {
        match marks.get(&node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(self.cycle_error(node, path)),
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        path.push(node);
        for pred in self.predecessors(node) {
            self.visit(pred, marks, path, order)?;
        }
        path.pop();
        marks.insert(node, Mark::Done);
        order.push(node);
        Ok(())
    }

    /// Chain from the first occurrence of `node` on the path back to itself
    fn cycle_error(&self, node: N, path: &[N]) -> CycleError {
        let start = path.iter().position(|&n| n == node).unwrap_or(0);
        let chain = path[start..]
            .iter()
            .chain(std::iter::once(&node))
            .map(|n| self.labels.get(n).cloned().unwrap_or_default())
            .collect();
        CycleError { chain }
    }
}

/// Ordering cycle; `chain` starts and ends with the same label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub chain: Vec<String>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ordering cycle: {}", self.chain.join(" -> "))
    }
}

impl std::error::Error for CycleError {}
