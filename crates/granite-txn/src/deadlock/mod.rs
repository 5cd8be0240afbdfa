//! Deadlock detection using wait-for graph analysis.
//!
//! The wait-for graph (WFG) has an edge for every blocked transaction
//! pointing at each transaction holding a conflicting grant on the
//! resource it wants:
//!
//! ```text
//! T1 waits for T2:  T1 -> T2
//! T2 waits for T3:  T2 -> T3
//! T3 waits for T1:  T3 -> T1 (cycle = deadlock!)
//! ```
//!
//! The graph is derived: the lock manager rebuilds it from lock-table
//! state each time a request is about to suspend, so edges can never go
//! stale. A new edge only appears when a transaction blocks, which means
//! checking at every block observes every cycle at the moment it forms.
//!
//! # Victim Selection
//!
//! The victim is the cycle member whose pending request has the greatest
//! sequence number - the transaction that issued the most recent request.
//! Sequence numbers are unique and totally ordered, so the choice is
//! deterministic, and older transactions are never starved by newcomers.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use granite_common::types::TxnId;

/// The wait-for graph over blocked transactions.
///
/// Built by the lock manager from the current lock-table state; see the
/// module docs for the edge rule.
#[derive(Default)]
pub struct WaitForGraph {
    /// Edges: waiter -> set of holders it is waiting for.
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
    /// Sequence number of each waiter's pending request.
    request_seq: BTreeMap<TxnId, u64>,
}

impl WaitForGraph {
    /// Creates a new empty wait-for graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a wait-for edge: `waiter` (whose pending request carries
    /// `seq`) is waiting for `holder`.
    pub fn add_wait(&mut self, waiter: TxnId, seq: u64, holder: TxnId) {
        self.edges.entry(waiter).or_default().insert(holder);
        let slot = self.request_seq.entry(waiter).or_insert(seq);
        if seq > *slot {
            *slot = seq;
        }
    }

    /// Returns the number of waiting transactions.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns the number of wait edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Checks if a transaction is waiting.
    #[must_use]
    pub fn is_waiting(&self, txn_id: TxnId) -> bool {
        self.edges.contains_key(&txn_id)
    }

    /// Returns the transactions `waiter` is waiting for.
    #[must_use]
    pub fn waits_of(&self, waiter: TxnId) -> Vec<TxnId> {
        self.edges
            .get(&waiter)
            .map(|holders| holders.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Finds a cycle reachable from `start`, if any.
    ///
    /// Returns the cycle members in wait order, starting and ending
    /// implicitly at the repeated node.
    #[must_use]
    pub fn find_cycle_from(&self, start: TxnId) -> Option<Vec<TxnId>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        self.dfs(start, &mut visited, &mut path)
    }

    fn dfs(
        &self,
        current: TxnId,
        visited: &mut HashSet<TxnId>,
        path: &mut Vec<TxnId>,
    ) -> Option<Vec<TxnId>> {
        if let Some(pos) = path.iter().position(|&t| t == current) {
            return Some(path[pos..].to_vec());
        }

        if !visited.insert(current) {
            return None; // Already fully explored without finding a cycle
        }

        path.push(current);
        if let Some(holders) = self.edges.get(&current) {
            for &holder in holders {
                if let Some(cycle) = self.dfs(holder, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();

        None
    }

    /// Returns the cycle member with the most recent pending request.
    ///
    /// `None` only if `cycle` is empty or none of its members are waiters.
    #[must_use]
    pub fn newest_request_in(&self, cycle: &[TxnId]) -> Option<TxnId> {
        cycle
            .iter()
            .filter_map(|txn| self.request_seq.get(txn).map(|&seq| (seq, *txn)))
            .max_by_key(|&(seq, _)| seq)
            .map(|(_, txn)| txn)
    }
}

impl fmt::Debug for WaitForGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitForGraph")
            .field("waiter_count", &self.waiter_count())
            .field("edge_count", &self.edge_count())
            .finish()
    }
}

/// Result of deadlock detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockInfo {
    /// The cycle of transactions involved, in wait order.
    pub cycle: Vec<TxnId>,
    /// The selected victim whose pending request is failed.
    pub victim: TxnId,
}

/// Statistics about deadlock detection.
#[derive(Debug, Default)]
pub struct DeadlockStats {
    /// Number of detection checks performed.
    pub checks: AtomicU64,
    /// Number of deadlocks found.
    pub deadlocks_found: AtomicU64,
    /// Number of victims selected.
    pub victims_selected: AtomicU64,
}

impl DeadlockStats {
    /// Creates new stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Detects deadlocks over a wait-for graph and selects victims.
#[derive(Default)]
pub struct DeadlockDetector {
    stats: DeadlockStats,
}

impl DeadlockDetector {
    /// Creates a new deadlock detector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stats: DeadlockStats::new(),
        }
    }

    /// Checks whether `waiter`'s pending request closes a cycle.
    ///
    /// Returns the cycle and the selected victim if so.
    pub fn check(&self, graph: &WaitForGraph, waiter: TxnId) -> Option<DeadlockInfo> {
        self.stats.checks.fetch_add(1, AtomicOrdering::Relaxed);

        let cycle = graph.find_cycle_from(waiter)?;
        self.stats
            .deadlocks_found
            .fetch_add(1, AtomicOrdering::Relaxed);

        let victim = graph.newest_request_in(&cycle)?;
        self.stats
            .victims_selected
            .fetch_add(1, AtomicOrdering::Relaxed);

        Some(DeadlockInfo { cycle, victim })
    }

    /// Runs a full detection pass over every waiter in the graph.
    ///
    /// Diagnostic sweep; the lock manager relies on [`check`](Self::check)
    /// at block time instead.
    pub fn sweep(&self, graph: &WaitForGraph) -> Vec<DeadlockInfo> {
        let mut deadlocks = Vec::new();
        let mut in_cycle: HashSet<TxnId> = HashSet::new();

        for waiter in graph.edges.keys().copied().collect::<Vec<_>>() {
            if in_cycle.contains(&waiter) {
                continue;
            }
            if let Some(info) = self.check(graph, waiter) {
                in_cycle.extend(info.cycle.iter().copied());
                deadlocks.push(info);
            }
        }

        deadlocks
    }

    /// Returns statistics.
    #[must_use]
    pub fn stats(&self) -> &DeadlockStats {
        &self.stats
    }
}

impl fmt::Debug for DeadlockDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlockDetector")
            .field(
                "checks",
                &self.stats.checks.load(AtomicOrdering::Relaxed),
            )
            .field(
                "deadlocks_found",
                &self.stats.deadlocks_found.load(AtomicOrdering::Relaxed),
            )
            .finish()
    }
}
