//! Qualified table names.
//!
//! Statements address tables by a multi-part name (catalog, schema, table);
//! the concurrency layer treats the full path as one opaque lockable key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A qualified table name, e.g. `sales.orders`.
///
/// Two names are equal only if every path component matches, so
/// `a.b` and `b` never collide as lock keys.
///
/// # Example
///
/// ```rust
/// use granite_common::types::TableName;
///
/// let orders = TableName::from("sales.orders");
/// assert_eq!(orders.parts(), &["sales", "orders"]);
/// assert_eq!(orders.to_string(), "sales.orders");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(Vec<String>);

impl TableName {
    /// Creates a table name from path components.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Returns the path components.
    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Returns the unqualified (last) component, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl fmt::Debug for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableName({})", self)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for TableName {
    fn from(path: &str) -> Self {
        Self(path.split('.').map(str::to_owned).collect())
    }
}

impl From<String> for TableName {
    fn from(path: String) -> Self {
        Self::from(path.as_str())
    }
}

impl From<Vec<String>> for TableName {
    fn from(parts: Vec<String>) -> Self {
        Self(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_parts() {
        let t = TableName::new(["catalog", "schema", "t"]);
        assert_eq!(t.parts().len(), 3);
        assert_eq!(t.name(), Some("t"));
        assert_eq!(t.to_string(), "catalog.schema.t");
    }

    #[test]
    fn test_table_name_from_str() {
        let t = TableName::from("sales.orders");
        assert_eq!(t, TableName::new(["sales", "orders"]));
    }

    #[test]
    fn test_table_name_equality() {
        // Qualification matters: `a.b` is a different key from `b`.
        assert_ne!(TableName::from("a.b"), TableName::from("b"));
        assert_eq!(TableName::from("a.b"), TableName::from("a.b"));
    }
}
