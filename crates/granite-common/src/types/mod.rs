//! Type definitions for GraniteDB.
//!
//! This module contains all core type definitions used across the database.

mod ids;
mod table;

pub use ids::{SessionId, TxnId};
pub use table::TableName;
