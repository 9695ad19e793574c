//! Tree Configuration
//!
//! The ordering engine never hard-codes column names. A [`TreeConfig`] names
//! the backing table and maps each semantic field to a column, and carries the
//! numbering conventions used by the rebuild engine. It is built once and
//! passed to the stores and the service at construction.
//!
//! # Examples
//!
//! ```rust
//! use ordering_core::config::{ColumnMap, TreeConfig};
//!
//! let config = TreeConfig::from_json_str(r#"{
//!     "table": "catalog",
//!     "columns": { "id": "id", "parent_id": "category_id" }
//! }"#).unwrap();
//! assert_eq!(config.columns.left, "lft");
//! assert_eq!(config.counter_base, 1);
//!
//! // Column naming used by the form element integration
//! let columns = ColumnMap::for_element("ordering", "id", "parent");
//! assert_eq!(columns.right, "ordering_rgt");
//! assert_eq!(columns.root_position.as_deref(), Some("ordering_prt"));
//! ```

use crate::operations::OrderingError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

// SQL identifiers accepted in a column map (unquoted SQLite identifier syntax)
const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

/// Default traversal depth guard for the rebuild engine
pub const DEFAULT_MAX_DEPTH: usize = 10_000;

/// Mapping of semantic node fields to table columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub id: String,
    pub parent_id: String,
    pub left: String,
    pub right: String,
    pub level: String,
    pub position: String,
    /// Secondary ordering column for roots; `None` orders roots by `position`
    pub root_position: Option<String>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            parent_id: "parent_id".to_string(),
            left: "lft".to_string(),
            right: "rgt".to_string(),
            level: "lvl".to_string(),
            position: "pos".to_string(),
            root_position: None,
        }
    }
}

impl ColumnMap {
    /// Columns derived from an ordering element name
    ///
    /// The element column itself holds the left bound; the other ordering
    /// columns carry `_rgt`, `_lvl`, `_pos` and `_prt` suffixes.
    pub fn for_element(element: &str, id_column: &str, parent_column: &str) -> Self {
        Self {
            id: id_column.to_string(),
            parent_id: parent_column.to_string(),
            left: element.to_string(),
            right: format!("{}_rgt", element),
            level: format!("{}_lvl", element),
            position: format!("{}_pos", element),
            root_position: Some(format!("{}_prt", element)),
        }
    }

    /// All mapped columns in a fixed order
    pub fn all(&self) -> Vec<&str> {
        let mut columns = vec![
            self.id.as_str(),
            self.parent_id.as_str(),
            self.left.as_str(),
            self.right.as_str(),
            self.level.as_str(),
            self.position.as_str(),
        ];
        if let Some(root_position) = &self.root_position {
            columns.push(root_position.as_str());
        }
        columns
    }

    /// Check identifier syntax and that no column is mapped twice
    pub fn validate(&self) -> Result<(), OrderingError> {
        let mut seen = HashSet::new();
        for column in self.all() {
            if !is_valid_identifier(column) {
                return Err(OrderingError::invalid_config(format!(
                    "'{}' is not a valid column name",
                    column
                )));
            }
            if !seen.insert(column.to_ascii_lowercase()) {
                return Err(OrderingError::invalid_config(format!(
                    "column '{}' is mapped to more than one field",
                    column
                )));
            }
        }
        Ok(())
    }
}

/// Configuration of one tree: table, column mapping and numbering conventions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Backing table name
    pub table: String,

    /// Column mapping for the ordering fields
    pub columns: ColumnMap,

    /// First value handed out by the rebuild counter
    pub counter_base: i64,

    /// Level assigned to roots
    pub root_level: i64,

    /// Deepest nesting the rebuild engine accepts
    pub max_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            table: "tree_nodes".to_string(),
            columns: ColumnMap::default(),
            counter_base: 1,
            root_level: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl TreeConfig {
    /// Configuration for `table` with default columns and numbering
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Builder-style setter for the column map
    pub fn with_columns(mut self, columns: ColumnMap) -> Self {
        self.columns = columns;
        self
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self, OrderingError> {
        let config: TreeConfig = serde_json::from_str(json).map_err(|e| {
            OrderingError::invalid_config(format!("failed to parse tree configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, OrderingError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            OrderingError::invalid_config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Validate table name, columns and numbering
    pub fn validate(&self) -> Result<(), OrderingError> {
        if !is_valid_identifier(&self.table) {
            return Err(OrderingError::invalid_config(format!(
                "'{}' is not a valid table name",
                self.table
            )));
        }
        self.columns.validate()?;
        if self.max_depth == 0 {
            return Err(OrderingError::invalid_config("max_depth must be at least 1"));
        }
        Ok(())
    }

    /// Whether roots are ordered through the secondary root column
    pub fn has_root_ordering(&self) -> bool {
        self.columns.root_position.is_some()
    }
}

/// Whether `name` can be used as a column or table name
pub fn is_valid_identifier(name: &str) -> bool {
    static IDENTIFIER_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = IDENTIFIER_REGEX.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).unwrap());
    regex.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TreeConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.has_root_ordering());
        assert_eq!(config.counter_base, 1);
        assert_eq!(config.root_level, 0);
    }

    #[test]
    fn test_element_columns() {
        let columns = ColumnMap::for_element("ordering", "id", "parent");
        assert_eq!(columns.left, "ordering");
        assert_eq!(columns.level, "ordering_lvl");
        assert_eq!(columns.position, "ordering_pos");
        assert!(columns.validate().is_ok());
    }

    #[test]
    fn test_rejects_injected_identifier() {
        let mut columns = ColumnMap::default();
        columns.left = "lft; DROP TABLE x".to_string();
        assert!(matches!(
            columns.validate(),
            Err(OrderingError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_column() {
        let mut columns = ColumnMap::default();
        columns.right = "LFT".to_string();
        assert!(columns.validate().is_err());
    }

    #[test]
    fn test_json_partial_override() {
        let config = TreeConfig::from_json_str(
            r#"{ "table": "pages", "root_level": 1, "columns": { "position": "sort" } }"#,
        )
        .unwrap();
        assert_eq!(config.table, "pages");
        assert_eq!(config.root_level, 1);
        assert_eq!(config.columns.position, "sort");
        assert_eq!(config.columns.parent_id, "parent_id");
    }

    #[test]
    fn test_json_invalid_table() {
        let err = TreeConfig::from_json_str(r#"{ "table": "bad name" }"#).unwrap_err();
        assert!(matches!(err, OrderingError::InvalidConfig { .. }));
    }
}
