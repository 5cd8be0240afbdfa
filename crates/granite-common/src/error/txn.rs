//! Transaction and lock error types.

use std::fmt;
use thiserror::Error;

use crate::types::TxnId;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug).
    Internal = 0x0001,

    // Transaction errors (0x0100 - 0x01FF)
    /// Transaction not found.
    TransactionNotFound = 0x0100,
    /// Transaction is not in the expected state.
    InvalidTransactionState = 0x0101,
    /// Transaction was ended twice.
    DoubleEnd = 0x0102,

    // Lock errors (0x0200 - 0x02FF)
    /// Blocking lock request exceeded its wait bound.
    LockTimeout = 0x0200,
    /// Deadlock detected; this transaction was the victim.
    Deadlock = 0x0201,
    /// Non-blocking lock request was refused.
    LockDenied = 0x0202,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Transaction",
            0x02 => "Lock",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for GraniteDB concurrency control.
///
/// Lock failures are reported to the caller; the concurrency core never
/// rolls a transaction back on its own. Whether to retry or end the
/// transaction is the caller's decision.
///
/// # Example
///
/// ```rust
/// use granite_common::error::{GraniteError, GraniteResult};
/// use granite_common::types::TxnId;
///
/// fn check(txn_id: TxnId) -> GraniteResult<()> {
///     Err(GraniteError::TransactionNotFound { txn_id })
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraniteError {
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Operation referenced an unknown transaction.
    #[error("transaction {txn_id} not found")]
    TransactionNotFound {
        /// The missing transaction.
        txn_id: TxnId,
    },

    /// Operation referenced a transaction that is no longer active.
    #[error("transaction {txn_id} is {state}, expected Active")]
    InvalidTransactionState {
        /// The transaction.
        txn_id: TxnId,
        /// The state it was found in.
        state: &'static str,
    },

    /// `end` was called on an already-ended transaction.
    #[error("transaction {txn_id} was already ended")]
    DoubleEnd {
        /// The transaction.
        txn_id: TxnId,
    },

    /// A blocking lock request exceeded its configured wait bound.
    ///
    /// Retryable: the caller may back off and reissue the access.
    #[error("transaction {txn_id} timed out after {waited_ms}ms waiting for lock on {resource}")]
    LockTimeout {
        /// The waiting transaction.
        txn_id: TxnId,
        /// The contended resource.
        resource: String,
        /// How long the request waited.
        waited_ms: u64,
    },

    /// Deadlock detected; this transaction was chosen as the victim.
    ///
    /// The caller must roll the transaction back.
    #[error("deadlock detected, transaction {txn_id} was chosen as victim")]
    Deadlock {
        /// The victim transaction.
        txn_id: TxnId,
    },

    /// A non-blocking lock request was refused due to a conflict.
    #[error("lock on {resource} denied for transaction {txn_id}")]
    LockDenied {
        /// The requesting transaction.
        txn_id: TxnId,
        /// The contended resource.
        resource: String,
    },
}

impl GraniteError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            GraniteError::Internal { .. } => ErrorCode::Internal,
            GraniteError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
            GraniteError::InvalidTransactionState { .. } => ErrorCode::InvalidTransactionState,
            GraniteError::DoubleEnd { .. } => ErrorCode::DoubleEnd,
            GraniteError::LockTimeout { .. } => ErrorCode::LockTimeout,
            GraniteError::Deadlock { .. } => ErrorCode::Deadlock,
            GraniteError::LockDenied { .. } => ErrorCode::LockDenied,
        }
    }

    /// Returns true if the caller may retry the failed operation.
    ///
    /// Timeouts and non-blocking denials are transient; a deadlock victim
    /// must roll back instead.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraniteError::LockTimeout { .. } | GraniteError::LockDenied { .. }
        )
    }
}
