//! System-wide constants for GraniteDB.
//!
//! This module defines constants used across the database.

// =============================================================================
// Transaction Constants
// =============================================================================

/// First transaction ID handed out by a fresh coordinator.
///
/// ID 0 is reserved as the invalid sentinel.
pub const FIRST_TXN_ID: u64 = 1;

/// Lock acquisition timeout (default).
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000; // 30 seconds

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxnId;

    #[test]
    fn test_first_txn_id_is_valid() {
        assert!(TxnId::new(FIRST_TXN_ID).is_valid());
    }
}
