//! Transaction lifecycle coordination.
//!
//! This module owns transaction begin and end, and routes per-access
//! locking decisions to the configured [`AccessPolicy`]. Locking follows
//! strict two-phase locking: a transaction only gains locks while Active
//! (growing phase) and sheds all of them in one atomic step at end
//! (single shrinking phase).
//!
//! # Transaction States
//!
//! ```text
//! ┌───────┐   begin()   ┌────────┐   end(..)   ┌────────┐            ┌───────┐
//! │ Start │────────────▶│ Active │────────────▶│ Ending │───────────▶│ Ended │
//! └───────┘             └────────┘             └────────┘ release_all └───────┘
//! ```
//!
//! Ending an already-Ended transaction is an error, never a silent no-op,
//! so double-end bugs in the caller surface immediately.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use granite_common::constants::{DEFAULT_LOCK_TIMEOUT_MS, FIRST_TXN_ID};
use granite_common::error::{GraniteError, GraniteResult};
use granite_common::types::{SessionId, TableName, TxnId};
use parking_lot::{Mutex, RwLock};

use crate::lock::{LockManager, LockManagerConfig};
use crate::policy::{AccessMode, AccessPolicy, HierarchicalPolicy};

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can access tables.
    Active,
    /// Transaction is in the process of ending.
    Ending,
    /// Transaction has ended; it holds no locks.
    Ended,
}

impl TransactionState {
    /// Returns true if the transaction can access tables.
    #[must_use]
    pub fn is_active(&self) -> bool {
        *self == TransactionState::Active
    }

    /// Returns true if the transaction has ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        *self == TransactionState::Ended
    }

    /// Returns the state name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Active => "Active",
            TransactionState::Ending => "Ending",
            TransactionState::Ended => "Ended",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndType {
    /// The transaction committed.
    Commit,
    /// The transaction rolled back.
    Rollback,
}

impl fmt::Display for EndType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndType::Commit => write!(f, "commit"),
            EndType::Rollback => write!(f, "rollback"),
        }
    }
}

/// Per-transaction state tracked by the manager.
pub struct Transaction {
    id: TxnId,
    session: SessionId,
    state: TransactionState,
    end_type: Option<EndType>,
    started_at: Instant,
    tables_accessed: u64,
}

impl Transaction {
    fn new(id: TxnId, session: SessionId) -> Self {
        Self {
            id,
            session,
            state: TransactionState::Active,
            end_type: None,
            started_at: Instant::now(),
            tables_accessed: 0,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the owning session.
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns how the transaction ended, once it has.
    #[must_use]
    pub fn end_type(&self) -> Option<EndType> {
        self.end_type
    }

    /// Returns how long the transaction has been running.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the number of table accesses performed.
    #[must_use]
    pub fn tables_accessed(&self) -> u64 {
        self.tables_accessed
    }

    fn record_access(&mut self) {
        self.tables_accessed += 1;
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("state", &self.state)
            .field("tables_accessed", &self.tables_accessed)
            .finish()
    }
}

/// Configuration for the transaction manager.
#[derive(Debug, Clone)]
pub struct TransactionManagerConfig {
    /// Wait bound for blocking lock requests.
    pub lock_timeout: Duration,
    /// Whether to run deadlock detection before suspending.
    pub deadlock_detection: bool,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            deadlock_detection: true,
        }
    }
}

impl TransactionManagerConfig {
    /// A configuration with a short lock timeout, for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            lock_timeout: Duration::from_millis(200),
            deadlock_detection: true,
        }
    }
}

/// Statistics about the transaction manager.
#[derive(Debug, Default)]
pub struct TransactionStats {
    /// Total transactions started.
    pub started: AtomicU64,
    /// Total transactions committed.
    pub committed: AtomicU64,
    /// Total transactions rolled back.
    pub rolled_back: AtomicU64,
    /// Currently active transactions.
    pub active: AtomicU64,
    /// Table accesses that failed as deadlock victims.
    pub deadlocks: AtomicU64,
}

impl TransactionStats {
    /// Creates new stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// The transaction manager.
///
/// Owns the transaction registry, the lock manager, and the injected
/// access policy. Lock failures are reported to the caller; the manager
/// never rolls a transaction back on its own.
pub struct TransactionManager {
    lock_manager: Arc<LockManager>,
    policy: Arc<dyn AccessPolicy>,
    transactions: RwLock<HashMap<TxnId, Mutex<Transaction>>>,
    next_txn_id: AtomicU64,
    config: TransactionManagerConfig,
    stats: TransactionStats,
}

impl TransactionManager {
    /// Creates a manager with the hierarchical policy and default
    /// configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TransactionManagerConfig::default())
    }

    /// Creates a manager with the hierarchical policy and a custom
    /// configuration.
    #[must_use]
    pub fn with_config(config: TransactionManagerConfig) -> Self {
        Self::with_policy(Arc::new(HierarchicalPolicy), config)
    }

    /// Creates a manager with an injected access policy.
    #[must_use]
    pub fn with_policy(policy: Arc<dyn AccessPolicy>, config: TransactionManagerConfig) -> Self {
        let lock_manager = Arc::new(LockManager::with_config(LockManagerConfig {
            lock_timeout: config.lock_timeout,
            deadlock_detection: config.deadlock_detection,
        }));
        Self {
            lock_manager,
            policy,
            transactions: RwLock::new(HashMap::new()),
            next_txn_id: AtomicU64::new(FIRST_TXN_ID),
            config,
            stats: TransactionStats::new(),
        }
    }

    /// Begins a new transaction on behalf of `session`.
    ///
    /// Always succeeds.
    pub fn begin(&self, session: SessionId) -> TxnId {
        let txn_id = TxnId::new(self.next_txn_id.fetch_add(1, AtomicOrdering::SeqCst));
        let txn = Transaction::new(txn_id, session);

        self.transactions.write().insert(txn_id, Mutex::new(txn));

        self.stats.started.fetch_add(1, AtomicOrdering::Relaxed);
        self.stats.active.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::debug!(txn = %txn_id, session = %session, "transaction started");

        txn_id
    }

    /// Declares that `txn_id` is about to access `table`.
    ///
    /// Invoked once per distinct table a statement touches. May block
    /// while the policy waits on locks; fails with a deadlock or timeout
    /// error, leaving the end decision to the caller.
    pub fn access_table(
        &self,
        txn_id: TxnId,
        table: &TableName,
        access: AccessMode,
    ) -> GraniteResult<()> {
        {
            let txns = self.transactions.read();
            let txn = txns
                .get(&txn_id)
                .ok_or(GraniteError::TransactionNotFound { txn_id })?
                .lock();
            if !txn.state().is_active() {
                return Err(GraniteError::InvalidTransactionState {
                    txn_id,
                    state: txn.state().as_str(),
                });
            }
        }

        // The registry locks are dropped here: the policy may suspend the
        // calling thread and must not hold them while parked.
        let result = self
            .policy
            .access_table(&self.lock_manager, txn_id, table, access);

        match &result {
            Ok(()) => {
                let txns = self.transactions.read();
                if let Some(txn) = txns.get(&txn_id) {
                    txn.lock().record_access();
                }
            }
            Err(GraniteError::Deadlock { .. }) => {
                self.stats.deadlocks.fetch_add(1, AtomicOrdering::Relaxed);
            }
            Err(_) => {}
        }

        result
    }

    /// Ends a transaction, releasing every lock it holds.
    ///
    /// Fails with `DoubleEnd` if the transaction already ended and
    /// `TransactionNotFound` if it never existed.
    pub fn end(&self, txn_id: TxnId, end_type: EndType) -> GraniteResult<()> {
        {
            let txns = self.transactions.read();
            let mut txn = txns
                .get(&txn_id)
                .ok_or(GraniteError::TransactionNotFound { txn_id })?
                .lock();
            match txn.state() {
                TransactionState::Active => {
                    txn.state = TransactionState::Ending;
                }
                TransactionState::Ending | TransactionState::Ended => {
                    return Err(GraniteError::DoubleEnd { txn_id });
                }
            }
        }

        self.policy.end_txn(&self.lock_manager, txn_id);
        let released = self.lock_manager.release_all(txn_id);

        {
            let txns = self.transactions.read();
            if let Some(txn) = txns.get(&txn_id) {
                let mut txn = txn.lock();
                txn.state = TransactionState::Ended;
                txn.end_type = Some(end_type);
            }
        }

        match end_type {
            EndType::Commit => {
                self.stats.committed.fetch_add(1, AtomicOrdering::Relaxed);
            }
            EndType::Rollback => {
                self.stats.rolled_back.fetch_add(1, AtomicOrdering::Relaxed);
            }
        }
        self.stats.active.fetch_sub(1, AtomicOrdering::Relaxed);
        tracing::debug!(txn = %txn_id, end = %end_type, released, "transaction ended");

        Ok(())
    }

    /// Returns the state of a transaction, if known.
    #[must_use]
    pub fn transaction_state(&self, txn_id: TxnId) -> Option<TransactionState> {
        let txns = self.transactions.read();
        txns.get(&txn_id).map(|txn| txn.lock().state())
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.stats.active.load(AtomicOrdering::Relaxed) as usize
    }

    /// Returns the lock manager.
    #[must_use]
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TransactionManagerConfig {
        &self.config
    }

    /// Returns statistics.
    #[must_use]
    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("lock_count", &self.lock_manager.lock_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::ResourceId;
    use crate::policy::NullPolicy;

    fn session() -> SessionId {
        SessionId::new(1)
    }

    #[test]
    fn test_transaction_lifecycle() {
        let tm = TransactionManager::new();

        let txn_id = tm.begin(session());
        assert_eq!(tm.active_count(), 1);
        assert_eq!(tm.transaction_state(txn_id), Some(TransactionState::Active));

        tm.end(txn_id, EndType::Commit).unwrap();
        assert_eq!(tm.active_count(), 0);
        assert_eq!(tm.transaction_state(txn_id), Some(TransactionState::Ended));
        assert!(tm.config().deadlock_detection);

        let txns = tm.transactions.read();
        let txn = txns.get(&txn_id).unwrap().lock();
        assert_eq!(txn.end_type(), Some(EndType::Commit));
    }

    #[test]
    fn test_double_end_is_an_error() {
        let tm = TransactionManager::new();

        let txn_id = tm.begin(session());
        tm.end(txn_id, EndType::Commit).unwrap();

        let err = tm.end(txn_id, EndType::Commit).unwrap_err();
        assert!(matches!(err, GraniteError::DoubleEnd { .. }));
    }

    #[test]
    fn test_unknown_transaction() {
        let tm = TransactionManager::new();

        let err = tm.end(TxnId::new(999), EndType::Commit).unwrap_err();
        assert!(matches!(err, GraniteError::TransactionNotFound { .. }));

        let err = tm
            .access_table(TxnId::new(999), &TableName::from("t"), AccessMode::Read)
            .unwrap_err();
        assert!(matches!(err, GraniteError::TransactionNotFound { .. }));
    }

    #[test]
    fn test_access_after_end_is_rejected() {
        let tm = TransactionManager::new();

        let txn_id = tm.begin(session());
        tm.end(txn_id, EndType::Rollback).unwrap();

        let err = tm
            .access_table(txn_id, &TableName::from("t"), AccessMode::Read)
            .unwrap_err();
        assert!(matches!(
            err,
            GraniteError::InvalidTransactionState { state: "Ended", .. }
        ));
    }

    #[test]
    fn test_end_releases_all_locks() {
        let tm = TransactionManager::new();

        let txn_id = tm.begin(session());
        tm.access_table(txn_id, &TableName::from("a"), AccessMode::Read)
            .unwrap();
        tm.access_table(txn_id, &TableName::from("b"), AccessMode::Write)
            .unwrap();
        assert!(tm.lock_manager().txn_count() > 0);

        tm.end(txn_id, EndType::Commit).unwrap();
        assert_eq!(tm.lock_manager().lock_count(), 0);
        assert_eq!(tm.lock_manager().held_locks(txn_id).len(), 0);
    }

    #[test]
    fn test_write_takes_the_intent_lock() {
        let tm = TransactionManager::new();

        let txn_id = tm.begin(session());
        tm.access_table(txn_id, &TableName::from("t"), AccessMode::Write)
            .unwrap();

        assert!(tm.lock_manager().holds(txn_id, &ResourceId::Database));
        tm.end(txn_id, EndType::Commit).unwrap();
    }

    #[test]
    fn test_null_policy_manager() {
        let tm = TransactionManager::with_policy(
            Arc::new(NullPolicy),
            TransactionManagerConfig::default(),
        );

        let txn_id = tm.begin(session());
        tm.access_table(txn_id, &TableName::from("t"), AccessMode::Write)
            .unwrap();
        assert_eq!(tm.lock_manager().lock_count(), 0);
        tm.end(txn_id, EndType::Commit).unwrap();
    }

    #[test]
    fn test_stats() {
        let tm = TransactionManager::new();

        let txn1 = tm.begin(session());
        let txn2 = tm.begin(session());
        assert_eq!(tm.stats().started.load(AtomicOrdering::Relaxed), 2);
        assert_eq!(tm.stats().active.load(AtomicOrdering::Relaxed), 2);

        tm.end(txn1, EndType::Commit).unwrap();
        assert_eq!(tm.stats().committed.load(AtomicOrdering::Relaxed), 1);

        tm.end(txn2, EndType::Rollback).unwrap();
        assert_eq!(tm.stats().rolled_back.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(tm.stats().active.load(AtomicOrdering::Relaxed), 0);
    }

    #[test]
    fn test_access_counter() {
        let tm = TransactionManager::new();

        let txn_id = tm.begin(session());
        tm.access_table(txn_id, &TableName::from("a"), AccessMode::Read)
            .unwrap();
        tm.access_table(txn_id, &TableName::from("b"), AccessMode::Read)
            .unwrap();

        let txns = tm.transactions.read();
        let txn = txns.get(&txn_id).unwrap().lock();
        assert_eq!(txn.id(), txn_id);
        assert_eq!(txn.tables_accessed(), 2);
        assert_eq!(txn.session(), session());
        assert!(txn.end_type().is_none());
        assert!(txn.duration() >= Duration::ZERO);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(format!("{}", TransactionState::Active), "Active");
        assert_eq!(format!("{}", TransactionState::Ending), "Ending");
        assert_eq!(format!("{}", TransactionState::Ended), "Ended");
        assert_eq!(format!("{}", EndType::Commit), "commit");
    }
}
