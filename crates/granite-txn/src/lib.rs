//! # granite-txn
//!
//! Transactional concurrency control for GraniteDB.
//!
//! This crate implements pessimistic two-phase locking over a two-level
//! resource hierarchy:
//!
//! - **Lock Management**: Table-level locking with shared (S) and
//!   exclusive (X) modes, a database-wide writer intent lock, lock
//!   upgrading from S to X, and FIFO wait queues for blocked requests.
//!
//! - **Deadlock Detection**: Wait-for graph based cycle detection with
//!   deterministic victim selection, run before any request suspends.
//!
//! - **Locking Policy**: A pluggable strategy that translates logical
//!   "read/write this table" accesses into concrete lock requests.
//!
//! - **Transaction Lifecycle**: Begin and end operations with a single
//!   atomic lock-release step at end (growing phase, then one shrink).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  TransactionManager                      │
//! │                         │                                │
//! │                         ▼                                │
//! │                 ┌──────────────┐                         │
//! │                 │ AccessPolicy │  (hierarchical or null) │
//! │                 └──────────────┘                         │
//! │                         │                                │
//! │                         ▼                                │
//! │                 ┌──────────────┐    ┌──────────────────┐ │
//! │                 │ LockManager  │───▶│ DeadlockDetector │ │
//! │                 └──────────────┘    └──────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust
//! use granite_txn::{AccessMode, EndType, TransactionManager};
//! use granite_common::types::{SessionId, TableName};
//!
//! let tm = TransactionManager::new();
//!
//! let txn = tm.begin(SessionId::new(1));
//! tm.access_table(txn, &TableName::from("sales.orders"), AccessMode::Read)
//!     .unwrap();
//! tm.end(txn, EndType::Commit).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Deadlock detection.
///
/// This module provides:
/// - [`deadlock::WaitForGraph`]: Tracks transaction wait dependencies
/// - [`deadlock::DeadlockDetector`]: Detects cycles and selects victims
/// - [`deadlock::DeadlockInfo`]: Information about detected deadlocks
pub mod deadlock;

/// Lock table and lock manager.
///
/// This module provides:
/// - [`lock::LockManager`]: Grants, blocks, and releases locks
/// - [`lock::LockMode`]: Shared and Exclusive modes
/// - [`lock::ResourceId`]: The database sentinel and table resources
pub mod lock;

/// Transaction lifecycle coordination.
///
/// This module provides:
/// - [`manager::TransactionManager`]: Owns begin/access/end
/// - [`manager::Transaction`]: Per-transaction state
/// - [`manager::TransactionState`]: Lifecycle states
pub mod manager;

/// Table-access locking policies.
///
/// This module provides:
/// - [`policy::AccessPolicy`]: The strategy seam
/// - [`policy::HierarchicalPolicy`]: Database-then-table locking
/// - [`policy::NullPolicy`]: No locking at all
pub mod policy;

// Re-export commonly used types

pub use deadlock::{DeadlockDetector, DeadlockInfo, DeadlockStats, WaitForGraph};

pub use lock::{
    LockManager, LockManagerConfig, LockMode, LockRequest, LockResult, LockStats, ResourceId,
};

pub use manager::{
    EndType, Transaction, TransactionManager, TransactionManagerConfig, TransactionState,
    TransactionStats,
};

pub use policy::{AccessMode, AccessPolicy, HierarchicalPolicy, NullPolicy};
