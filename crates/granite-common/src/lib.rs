//! # granite-common
//!
//! Common types, errors, and constants for GraniteDB.
//!
//! This crate provides the foundational types and abstractions used across
//! all GraniteDB components. It includes:
//!
//! - **Types**: Core identifiers (`TxnId`, `SessionId`) and qualified
//!   table names (`TableName`)
//! - **Errors**: Unified error handling with `GraniteError`
//! - **Constants**: System-wide constants and limits
//!
//! ## Example
//!
//! ```rust
//! use granite_common::types::{SessionId, TableName, TxnId};
//! use granite_common::error::GraniteResult;
//!
//! fn example() -> GraniteResult<()> {
//!     let txn_id = TxnId::new(1);
//!     let session = SessionId::new(7);
//!     let table = TableName::from("sales.orders");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use error::{ErrorCode, GraniteError, GraniteResult};
pub use types::{SessionId, TableName, TxnId};
