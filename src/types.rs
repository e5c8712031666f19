use std::fmt;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Values that can be bound as query arguments or read back from a result row.
///
/// Both dialects normalize into this set, so callers never see driver types:
/// ```rust
/// use sql_dispatch::prelude::*;
///
/// let args = Args::new()
///     .with("id", 1)
///     .with("name", "alice")
///     .with("active", true);
/// # let _ = args;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    /// Booleans come back from both engines as 0/1 integers, so those are accepted too.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RowValues::Bool(value) => Some(*value),
            RowValues::Int(0) => Some(false),
            RowValues::Int(1) => Some(true),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            RowValues::Timestamp(value) => Some(*value),
            RowValues::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RowValues::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Short name of the variant, used in binding error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RowValues::Int(_) => "int",
            RowValues::Float(_) => "float",
            RowValues::Text(_) => "string",
            RowValues::Bool(_) => "bool",
            RowValues::Timestamp(_) => "timestamp",
            RowValues::Null => "null",
            RowValues::Blob(_) => "blob",
        }
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS` with optional fractional seconds, and the `T` separator.
pub(crate) fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<i32> for RowValues {
    fn from(value: i32) -> Self {
        RowValues::Int(i64::from(value))
    }
}

impl From<f64> for RowValues {
    fn from(value: f64) -> Self {
        RowValues::Float(value)
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_owned())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

impl From<NaiveDateTime> for RowValues {
    fn from(value: NaiveDateTime) -> Self {
        RowValues::Timestamp(value)
    }
}

impl From<Vec<u8>> for RowValues {
    fn from(value: Vec<u8>) -> Self {
        RowValues::Blob(value)
    }
}

impl<T: Into<RowValues>> From<Option<T>> for RowValues {
    fn from(value: Option<T>) -> Self {
        value.map_or(RowValues::Null, Into::into)
    }
}

/// The SQL engines a connector can target.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Embedded `SQLite` database file
    Sqlite,
    /// `MySQL` / `MariaDB` server
    Mysql,
}

impl Dialect {
    /// Resolve a configured type name, accepting the historical aliases.
    #[must_use]
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" | "sq3" => Some(Dialect::Sqlite),
            "mysql" | "mysqli" => Some(Dialect::Mysql),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller expects back from a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultShape {
    /// Run for side effects only
    None,
    /// Number of rows changed
    AffectedRows,
    /// First row, if any
    SingleRow,
    /// Every row
    Rows,
    /// Generated key of the inserted row
    InsertId,
}

impl ResultShape {
    /// Pick a shape from the statement's leading keyword.
    #[must_use]
    pub fn infer(sql: &str) -> Self {
        let keyword = leading_keyword(sql).to_ascii_uppercase();
        match keyword.as_str() {
            "SELECT" | "WITH" | "PRAGMA" | "SHOW" | "EXPLAIN" | "DESCRIBE" | "VALUES" => {
                ResultShape::Rows
            }
            "INSERT" | "REPLACE" => ResultShape::InsertId,
            "UPDATE" | "DELETE" => ResultShape::AffectedRows,
            _ => ResultShape::None,
        }
    }
}

fn leading_keyword(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix('(') {
            rest = after.trim_start();
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    &rest[..end]
}

/// Correlation id linking a submitted query to its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub(crate) u64);

impl QueryId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_shape_from_leading_keyword() {
        assert_eq!(ResultShape::infer("select 1"), ResultShape::Rows);
        assert_eq!(
            ResultShape::infer("  -- note\n/* x */ INSERT INTO t VALUES (1)"),
            ResultShape::InsertId
        );
        assert_eq!(ResultShape::infer("update t set a = 1"), ResultShape::AffectedRows);
        assert_eq!(ResultShape::infer("(SELECT 1) UNION (SELECT 2)"), ResultShape::Rows);
        assert_eq!(ResultShape::infer("CREATE TABLE t (a INT)"), ResultShape::None);
        assert_eq!(ResultShape::infer(""), ResultShape::None);
    }

    #[test]
    fn dialect_aliases_are_case_insensitive() {
        assert_eq!(Dialect::from_type_name("SQLite3"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_type_name("sq3"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_type_name("MySQLi"), Some(Dialect::Mysql));
        assert_eq!(Dialect::from_type_name("postgres"), None);
    }

    #[test]
    fn bool_accessor_accepts_integer_flags() {
        assert_eq!(RowValues::Int(1).as_bool(), Some(true));
        assert_eq!(RowValues::Int(0).as_bool(), Some(false));
        assert_eq!(RowValues::Int(2).as_bool(), None);
        assert_eq!(RowValues::Bool(true).as_bool(), Some(true));
    }

    #[test]
    fn parses_text_timestamps() {
        let ts = RowValues::Text("2024-02-03 04:05:06".into()).as_timestamp();
        assert!(ts.is_some());
        let ts = RowValues::Text("2024-02-03T04:05:06.250".into()).as_timestamp();
        assert!(ts.is_some());
        assert!(RowValues::Text("yesterday".into()).as_timestamp().is_none());
    }
}
