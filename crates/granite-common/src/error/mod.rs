//! Error handling for GraniteDB.
//!
//! This module provides a unified error type and result alias used
//! across all GraniteDB components.

mod txn;

pub use txn::{ErrorCode, GraniteError};

/// Result type alias for GraniteDB operations.
pub type GraniteResult<T> = std::result::Result<T, GraniteError>;
