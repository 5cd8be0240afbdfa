//! Lock management for table-level transaction isolation.
//!
//! This module implements the lock manager at the core of GraniteDB's
//! pessimistic concurrency control:
//! - Shared (S) and exclusive (X) lock modes over a two-level resource
//!   hierarchy: the whole database, then individual tables
//! - Lock upgrading from S to X once the requester is the sole holder
//! - FIFO wait queues for blocked requests, with waiters parked on a
//!   condition variable and woken by the release that makes them eligible
//! - Deadlock detection before any request suspends
//!
//! # Lock Compatibility Matrix
//!
//! ```text
//!          │ S  │ X  │
//! ─────────┼────┼────┤
//!     S    │ ✓  │ ✗  │
//!     X    │ ✗  │ ✗  │
//! ```
//!
//! # Granting
//!
//! A request is granted when every *other* granted holder on the resource
//! is compatible with the requested mode. That one rule covers fresh
//! requests (all holders must be compatible) and upgrades (an S holder
//! gets X only once it is the sole holder). On release, the wait queue is
//! scanned from the front in arrival order, stopping at the first request
//! that still conflicts.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use granite_common::constants::DEFAULT_LOCK_TIMEOUT_MS;
use granite_common::types::{TableName, TxnId};
use parking_lot::{Condvar, Mutex};

use crate::deadlock::DeadlockDetector;

/// Lock mode for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock (read lock).
    Shared,
    /// Exclusive lock (write lock).
    Exclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    ///
    /// Only Shared/Shared is compatible; any pair involving Exclusive
    /// conflicts.
    #[must_use]
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }

    /// Checks if a grant in this mode already satisfies a request for
    /// `requested`.
    ///
    /// Exclusive covers both modes; Shared covers only Shared.
    #[must_use]
    pub fn covers(self, requested: LockMode) -> bool {
        match (self, requested) {
            (LockMode::Exclusive, _) | (LockMode::Shared, LockMode::Shared) => true,
            (LockMode::Shared, LockMode::Exclusive) => false,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "S"),
            LockMode::Exclusive => write!(f, "X"),
        }
    }
}

/// A lockable resource.
///
/// The database-wide sentinel is its own enum variant, so it can never
/// alias a table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// The whole database. Writers take this exclusively as an intent
    /// lock; readers never touch it.
    Database,
    /// A single table.
    Table(TableName),
}

impl ResourceId {
    /// Creates a table resource ID.
    pub fn table(name: impl Into<TableName>) -> Self {
        ResourceId::Table(name.into())
    }

    /// Returns true for the database-wide sentinel.
    #[must_use]
    pub fn is_database(&self) -> bool {
        matches!(self, ResourceId::Database)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Database => write!(f, "Database"),
            ResourceId::Table(name) => write!(f, "Table({})", name),
        }
    }
}

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    /// Lock was granted.
    Granted,
    /// Lock was upgraded from Shared to Exclusive.
    Upgraded,
    /// Transaction already holds a covering lock.
    AlreadyHeld,
    /// Non-blocking request refused due to a conflict.
    Denied,
    /// Blocking request exceeded its wait bound.
    Timeout,
    /// Deadlock was detected and this transaction was the victim.
    Deadlock,
}

impl LockResult {
    /// Returns true if the lock is held after the call.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            LockResult::Granted | LockResult::Upgraded | LockResult::AlreadyHeld
        )
    }
}

/// A pending lock request in a resource's wait queue.
#[derive(Debug, Clone)]
pub struct LockRequest {
    /// Transaction requesting the lock.
    pub txn_id: TxnId,
    /// Requested lock mode.
    pub mode: LockMode,
    /// Globally monotone sequence number; drives FIFO order bookkeeping
    /// and deadlock victim selection.
    pub seq: u64,
    /// When the request was queued.
    pub enqueued_at: Instant,
}

/// Per-resource lock record: granted holders plus the FIFO wait queue.
///
/// Entries are created lazily on first request and garbage-collected once
/// both sides are empty.
#[derive(Debug, Default)]
struct LockEntry {
    holders: HashMap<TxnId, LockMode>,
    wait_queue: VecDeque<LockRequest>,
}

impl LockEntry {
    /// A request is grantable when every other holder is compatible with
    /// the requested mode.
    fn can_grant(&self, txn_id: TxnId, mode: LockMode) -> bool {
        self.holders
            .iter()
            .all(|(holder, held)| *holder == txn_id || held.is_compatible_with(&mode))
    }

    fn grant(&mut self, txn_id: TxnId, mode: LockMode) {
        debug_assert!(self.can_grant(txn_id, mode), "incompatible grant");
        match self.holders.get_mut(&txn_id) {
            Some(held) => {
                if mode == LockMode::Exclusive {
                    *held = LockMode::Exclusive;
                }
            }
            None => {
                self.holders.insert(txn_id, mode);
            }
        }
    }

    fn is_free(&self) -> bool {
        self.holders.is_empty() && self.wait_queue.is_empty()
    }
}

/// Outcome of a parked wait, decided by whichever release or cancellation
/// made the waiter eligible (or aborted it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaiterOutcome {
    Granted,
    Upgraded,
    Aborted,
}

fn outcome_result(outcome: WaiterOutcome) -> LockResult {
    match outcome {
        WaiterOutcome::Granted => LockResult::Granted,
        WaiterOutcome::Upgraded => LockResult::Upgraded,
        WaiterOutcome::Aborted => LockResult::Deadlock,
    }
}

enum TryAcquire {
    Granted,
    Upgraded,
    AlreadyHeld,
    Conflict,
}

/// The shared lock-table state. All mutation happens under one mutex, so
/// every grant decision is atomic with respect to the holder-set snapshot
/// it was computed against.
#[derive(Debug, Default)]
struct LockTables {
    /// All lock entries, keyed by resource.
    entries: HashMap<ResourceId, LockEntry>,
    /// Resources held by each transaction, with the granted mode.
    txn_locks: HashMap<TxnId, HashMap<ResourceId, LockMode>>,
    /// Decided outcomes for parked waiters, keyed by request sequence
    /// number. A waiter always consumes its own slot before returning.
    outcomes: HashMap<u64, WaiterOutcome>,
    /// Next request sequence number.
    next_seq: u64,
}

impl LockTables {
    fn try_acquire(&mut self, txn_id: TxnId, resource: &ResourceId, mode: LockMode) -> TryAcquire {
        let entry = self.entries.entry(resource.clone()).or_default();

        if let Some(held) = entry.holders.get(&txn_id).copied() {
            if held.covers(mode) {
                return TryAcquire::AlreadyHeld;
            }
            // Upgrade: grantable only once the requester is the sole holder.
            if entry.can_grant(txn_id, mode) {
                entry.grant(txn_id, mode);
                self.txn_locks
                    .entry(txn_id)
                    .or_default()
                    .insert(resource.clone(), mode);
                return TryAcquire::Upgraded;
            }
            return TryAcquire::Conflict;
        }

        if entry.can_grant(txn_id, mode) {
            entry.grant(txn_id, mode);
            self.txn_locks
                .entry(txn_id)
                .or_default()
                .insert(resource.clone(), mode);
            return TryAcquire::Granted;
        }

        TryAcquire::Conflict
    }

    fn enqueue(&mut self, txn_id: TxnId, resource: &ResourceId, mode: LockMode) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries
            .entry(resource.clone())
            .or_default()
            .wait_queue
            .push_back(LockRequest {
                txn_id,
                mode,
                seq,
                enqueued_at: Instant::now(),
            });
        seq
    }

    /// Removes a queued request by sequence number. Other waiters on the
    /// same resource are untouched.
    fn remove_waiter(&mut self, resource: &ResourceId, seq: u64) -> bool {
        let Some(entry) = self.entries.get_mut(resource) else {
            return false;
        };
        let before = entry.wait_queue.len();
        entry.wait_queue.retain(|req| req.seq != seq);
        entry.wait_queue.len() != before
    }

    /// Removes the holder record for `txn_id` on `resource`.
    fn release(&mut self, txn_id: TxnId, resource: &ResourceId) -> bool {
        let Some(entry) = self.entries.get_mut(resource) else {
            return false;
        };
        if entry.holders.remove(&txn_id).is_none() {
            return false;
        }
        if let Some(held) = self.txn_locks.get_mut(&txn_id) {
            let removed = held.remove(resource);
            debug_assert!(removed.is_some(), "holder without txn_locks record");
            if held.is_empty() {
                self.txn_locks.remove(&txn_id);
            }
        }
        true
    }

    /// Scans a resource's wait queue from the front, granting each request
    /// now compatible with the remaining holder set, in FIFO order, and
    /// stopping at the first still-incompatible request.
    ///
    /// Returns the granted requests with an is-upgrade flag each.
    fn grant_waiters(&mut self, resource: &ResourceId) -> Vec<(LockRequest, bool)> {
        let mut granted = Vec::new();
        let Some(entry) = self.entries.get_mut(resource) else {
            return granted;
        };

        loop {
            let grantable = match entry.wait_queue.front() {
                Some(front) => entry.can_grant(front.txn_id, front.mode),
                None => false,
            };
            if !grantable {
                break;
            }
            let Some(req) = entry.wait_queue.pop_front() else {
                break;
            };
            let was_upgrade = entry.holders.contains_key(&req.txn_id);
            entry.grant(req.txn_id, req.mode);
            self.txn_locks
                .entry(req.txn_id)
                .or_default()
                .insert(resource.clone(), req.mode);
            let outcome = if was_upgrade {
                WaiterOutcome::Upgraded
            } else {
                WaiterOutcome::Granted
            };
            self.outcomes.insert(req.seq, outcome);
            granted.push((req, was_upgrade));
        }

        granted
    }

    /// Drops the entry for `resource` once it has no holders and no
    /// waiters.
    fn collect_entry(&mut self, resource: &ResourceId) {
        if self
            .entries
            .get(resource)
            .is_some_and(LockEntry::is_free)
        {
            self.entries.remove(resource);
        }
    }

    /// Builds the wait-for graph from the current table state: an edge
    /// from each queued request to every conflicting holder on the same
    /// resource.
    fn wait_for_graph(&self) -> crate::deadlock::WaitForGraph {
        let mut graph = crate::deadlock::WaitForGraph::new();
        for entry in self.entries.values() {
            for req in &entry.wait_queue {
                for (&holder, held) in &entry.holders {
                    if holder != req.txn_id && !held.is_compatible_with(&req.mode) {
                        graph.add_wait(req.txn_id, req.seq, holder);
                    }
                }
            }
        }
        graph
    }

    /// Removes every queued request of `txn_id`, returning the affected
    /// resources so their queues can be re-scanned.
    fn cancel_pending(&mut self, txn_id: TxnId) -> Vec<ResourceId> {
        let mut affected = Vec::new();
        for (resource, entry) in &mut self.entries {
            let before = entry.wait_queue.len();
            entry.wait_queue.retain(|req| req.txn_id != txn_id);
            if entry.wait_queue.len() != before {
                affected.push(resource.clone());
            }
        }
        affected
    }
}

/// Statistics about the lock manager.
#[derive(Debug, Default)]
pub struct LockStats {
    /// Total lock acquisitions.
    pub acquisitions: AtomicU64,
    /// Total lock upgrades.
    pub upgrades: AtomicU64,
    /// Total lock releases.
    pub releases: AtomicU64,
    /// Total lock waits.
    pub waits: AtomicU64,
    /// Total timeouts.
    pub timeouts: AtomicU64,
    /// Total deadlock victims.
    pub deadlocks: AtomicU64,
}

impl LockStats {
    /// Creates new stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful acquisition.
    pub fn record_acquisition(&self) {
        self.acquisitions.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Records an upgrade.
    pub fn record_upgrade(&self) {
        self.upgrades.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Records a release.
    pub fn record_release(&self) {
        self.releases.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Records a wait.
    pub fn record_wait(&self) {
        self.waits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Records a timeout.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Records a deadlock victim.
    pub fn record_deadlock(&self) {
        self.deadlocks.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// Configuration for the lock manager.
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Default wait bound for blocking requests.
    pub lock_timeout: Duration,
    /// Whether to run deadlock detection before suspending.
    pub deadlock_detection: bool,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            deadlock_detection: true,
        }
    }
}

/// The lock manager.
///
/// Sole point of mutation of lock-table state. Blocking callers park on a
/// condition variable without holding the table mutex and are woken by
/// whichever release makes them eligible.
pub struct LockManager {
    tables: Mutex<LockTables>,
    waiters: Condvar,
    detector: DeadlockDetector,
    config: LockManagerConfig,
    stats: LockStats,
}

impl LockManager {
    /// Creates a new lock manager with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LockManagerConfig::default())
    }

    /// Creates a lock manager with custom configuration.
    #[must_use]
    pub fn with_config(config: LockManagerConfig) -> Self {
        Self {
            tables: Mutex::new(LockTables::default()),
            waiters: Condvar::new(),
            detector: DeadlockDetector::new(),
            config,
            stats: LockStats::new(),
        }
    }

    /// Tries to acquire a lock without blocking.
    ///
    /// Returns `Denied` immediately on conflict; nothing is queued.
    pub fn try_lock(&self, txn_id: TxnId, resource: ResourceId, mode: LockMode) -> LockResult {
        let mut tables = self.tables.lock();
        tracing::trace!(txn = %txn_id, resource = %resource, mode = %mode, "lock requested");
        match tables.try_acquire(txn_id, &resource, mode) {
            TryAcquire::Granted => {
                self.stats.record_acquisition();
                tracing::trace!(txn = %txn_id, resource = %resource, mode = %mode, "lock granted");
                LockResult::Granted
            }
            TryAcquire::Upgraded => {
                self.stats.record_upgrade();
                tracing::trace!(txn = %txn_id, resource = %resource, "lock upgraded");
                LockResult::Upgraded
            }
            TryAcquire::AlreadyHeld => LockResult::AlreadyHeld,
            TryAcquire::Conflict => {
                tracing::trace!(txn = %txn_id, resource = %resource, mode = %mode, "lock denied");
                LockResult::Denied
            }
        }
    }

    /// Acquires a lock, blocking until granted, aborted as a deadlock
    /// victim, or timed out.
    ///
    /// `None` uses the configured default timeout.
    pub fn lock(
        &self,
        txn_id: TxnId,
        resource: ResourceId,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> LockResult {
        let timeout = timeout.unwrap_or(self.config.lock_timeout);
        let mut tables = self.tables.lock();
        tracing::trace!(txn = %txn_id, resource = %resource, mode = %mode, "lock requested");

        match tables.try_acquire(txn_id, &resource, mode) {
            TryAcquire::Granted => {
                self.stats.record_acquisition();
                tracing::trace!(txn = %txn_id, resource = %resource, mode = %mode, "lock granted");
                return LockResult::Granted;
            }
            TryAcquire::Upgraded => {
                self.stats.record_upgrade();
                tracing::trace!(txn = %txn_id, resource = %resource, "lock upgraded");
                return LockResult::Upgraded;
            }
            TryAcquire::AlreadyHeld => return LockResult::AlreadyHeld,
            TryAcquire::Conflict => {}
        }

        // Conflict: queue the request and suspend.
        let seq = tables.enqueue(txn_id, &resource, mode);
        self.stats.record_wait();
        tracing::debug!(txn = %txn_id, resource = %resource, mode = %mode, "lock blocked");

        if self.config.deadlock_detection {
            let graph = tables.wait_for_graph();
            if let Some(info) = self.detector.check(&graph, txn_id) {
                // This request is the newest in the cycle, so the victim
                // is always the requester itself.
                debug_assert_eq!(info.victim, txn_id);
                tables.remove_waiter(&resource, seq);
                tables.collect_entry(&resource);
                self.stats.record_deadlock();
                tracing::warn!(
                    txn = %txn_id,
                    resource = %resource,
                    cycle = ?info.cycle,
                    "deadlock detected, aborting request"
                );
                return LockResult::Deadlock;
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = tables.outcomes.remove(&seq) {
                return outcome_result(outcome);
            }

            let timed_out = self.waiters.wait_until(&mut tables, deadline).timed_out();

            // A grant may have landed exactly at the deadline; it wins.
            if let Some(outcome) = tables.outcomes.remove(&seq) {
                return outcome_result(outcome);
            }

            if timed_out {
                tables.remove_waiter(&resource, seq);
                // Removing a blocked head may make requests behind it
                // grantable.
                let granted = tables.grant_waiters(&resource);
                self.finish_grants(&resource, &granted);
                tables.collect_entry(&resource);
                if !granted.is_empty() {
                    self.waiters.notify_all();
                }
                self.stats.record_timeout();
                tracing::warn!(
                    txn = %txn_id,
                    resource = %resource,
                    waited_ms = timeout.as_millis() as u64,
                    "lock wait timed out"
                );
                return LockResult::Timeout;
            }
        }
    }

    /// Releases a single lock, waking any now-eligible waiters.
    pub fn unlock(&self, txn_id: TxnId, resource: &ResourceId) -> bool {
        let mut tables = self.tables.lock();
        if !tables.release(txn_id, resource) {
            return false;
        }
        self.stats.record_release();
        tracing::trace!(txn = %txn_id, resource = %resource, "lock released");

        let granted = tables.grant_waiters(resource);
        self.finish_grants(resource, &granted);
        tables.collect_entry(resource);
        if !granted.is_empty() {
            self.waiters.notify_all();
        }
        true
    }

    /// Releases all locks held by a transaction, in one atomic step.
    ///
    /// Idempotent: releasing a transaction with no locks is a no-op. Any
    /// queued requests the transaction left behind are cancelled without
    /// disturbing other waiters.
    pub fn release_all(&self, txn_id: TxnId) -> usize {
        let mut tables = self.tables.lock();
        let mut woke = false;

        for resource in tables.cancel_pending(txn_id) {
            let granted = tables.grant_waiters(&resource);
            self.finish_grants(&resource, &granted);
            tables.collect_entry(&resource);
            woke |= !granted.is_empty();
        }

        let resources: Vec<ResourceId> = tables
            .txn_locks
            .get(&txn_id)
            .map(|held| held.keys().cloned().collect())
            .unwrap_or_default();

        let count = resources.len();
        for resource in &resources {
            tables.release(txn_id, resource);
            self.stats.record_release();
            tracing::trace!(txn = %txn_id, resource = %resource, "lock released");

            let granted = tables.grant_waiters(resource);
            self.finish_grants(resource, &granted);
            tables.collect_entry(resource);
            woke |= !granted.is_empty();
        }

        if woke {
            self.waiters.notify_all();
        }
        count
    }

    fn finish_grants(&self, resource: &ResourceId, granted: &[(LockRequest, bool)]) {
        for (req, was_upgrade) in granted {
            if *was_upgrade {
                self.stats.record_upgrade();
                tracing::trace!(txn = %req.txn_id, resource = %resource, "lock upgraded");
            } else {
                self.stats.record_acquisition();
                tracing::trace!(
                    txn = %req.txn_id,
                    resource = %resource,
                    mode = %req.mode,
                    "lock granted"
                );
            }
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LockManagerConfig {
        &self.config
    }

    /// Returns statistics about the lock manager.
    #[must_use]
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    /// Returns the number of live lock entries.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.tables.lock().entries.len()
    }

    /// Returns the number of transactions holding locks.
    #[must_use]
    pub fn txn_count(&self) -> usize {
        self.tables.lock().txn_locks.len()
    }

    /// Returns the number of queued (blocked) requests.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.tables
            .lock()
            .entries
            .values()
            .map(|entry| entry.wait_queue.len())
            .sum()
    }

    /// Checks whether a transaction holds a lock on a resource.
    #[must_use]
    pub fn holds(&self, txn_id: TxnId, resource: &ResourceId) -> bool {
        self.tables
            .lock()
            .txn_locks
            .get(&txn_id)
            .is_some_and(|held| held.contains_key(resource))
    }

    /// Returns the locks held by a transaction.
    #[must_use]
    pub fn held_locks(&self, txn_id: TxnId) -> Vec<(ResourceId, LockMode)> {
        self.tables
            .lock()
            .txn_locks
            .get(&txn_id)
            .map(|held| {
                held.iter()
                    .map(|(resource, &mode)| (resource.clone(), mode))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("lock_count", &self.lock_count())
            .field("txn_count", &self.txn_count())
            .field("waiting_count", &self.waiting_count())
            .finish()
    }
}
