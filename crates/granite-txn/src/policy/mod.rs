//! Table-access locking policies.
//!
//! The transaction manager delegates every logical "read/write this
//! table" access to an injected [`AccessPolicy`]. Two variants exist:
//! [`NullPolicy`], which acquires nothing, and [`HierarchicalPolicy`],
//! which maps accesses onto the two-level database/table hierarchy:
//!
//! - **Read**: Shared lock on the table only. Readers never touch the
//!   database-wide resource, so readers of different tables (and of the
//!   same table) never interact through it.
//! - **Write**: Exclusive lock on the whole database, then Exclusive
//!   lock on the table. The database lock is a writer intent lock: it
//!   excludes other writers regardless of target table, while leaving
//!   readers alone.
//!
//! The database-before-table order is fixed for every writer, so two
//! writers can never deadlock on the intent lock itself. Deadlocks mixing
//! readers and writers across tables remain possible and are handled by
//! the lock manager's detector.

use std::fmt;

use granite_common::error::{GraniteError, GraniteResult};
use granite_common::types::{TableName, TxnId};

use crate::lock::{LockManager, LockMode, LockResult, ResourceId};

/// The kind of table access a statement performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// The statement reads the table.
    Read,
    /// The statement modifies the table.
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => write!(f, "read"),
            AccessMode::Write => write!(f, "write"),
        }
    }
}

/// Strategy for turning logical table accesses into lock requests.
///
/// Selected when the transaction manager is constructed.
pub trait AccessPolicy: Send + Sync {
    /// Acquires whatever locks this policy requires for the access.
    ///
    /// Called once per distinct table a statement touches; re-invocation
    /// for an already-covered access must be cheap. May block.
    fn access_table(
        &self,
        locks: &LockManager,
        txn_id: TxnId,
        table: &TableName,
        access: AccessMode,
    ) -> GraniteResult<()>;

    /// Cleanup hook invoked when a transaction ends, before its locks are
    /// released.
    fn end_txn(&self, _locks: &LockManager, _txn_id: TxnId) {}
}

/// A policy that performs no locking at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPolicy;

impl AccessPolicy for NullPolicy {
    fn access_table(
        &self,
        _locks: &LockManager,
        _txn_id: TxnId,
        _table: &TableName,
        _access: AccessMode,
    ) -> GraniteResult<()> {
        Ok(())
    }
}

/// The two-level database/table locking policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct HierarchicalPolicy;

impl HierarchicalPolicy {
    fn acquire(
        &self,
        locks: &LockManager,
        txn_id: TxnId,
        resource: ResourceId,
        mode: LockMode,
    ) -> GraniteResult<()> {
        match locks.lock(txn_id, resource.clone(), mode, None) {
            result if result.is_success() => Ok(()),
            LockResult::Timeout => Err(GraniteError::LockTimeout {
                txn_id,
                resource: resource.to_string(),
                waited_ms: locks.config().lock_timeout.as_millis() as u64,
            }),
            LockResult::Deadlock => Err(GraniteError::Deadlock { txn_id }),
            _ => Err(GraniteError::LockDenied {
                txn_id,
                resource: resource.to_string(),
            }),
        }
    }
}

impl AccessPolicy for HierarchicalPolicy {
    fn access_table(
        &self,
        locks: &LockManager,
        txn_id: TxnId,
        table: &TableName,
        access: AccessMode,
    ) -> GraniteResult<()> {
        match access {
            AccessMode::Read => {
                // S-lock only the table; readers don't care about the
                // database lock.
                self.acquire(
                    locks,
                    txn_id,
                    ResourceId::Table(table.clone()),
                    LockMode::Shared,
                )
            }
            AccessMode::Write => {
                // X-lock the database to exclude other writers but not
                // readers, then X-lock the table to exclude its readers.
                self.acquire(locks, txn_id, ResourceId::Database, LockMode::Exclusive)?;
                self.acquire(
                    locks,
                    txn_id,
                    ResourceId::Table(table.clone()),
                    LockMode::Exclusive,
                )
            }
        }
    }
}
