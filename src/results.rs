use std::collections::HashMap;
use std::sync::Arc;

use crate::types::RowValues;

mod row;

pub use row::CustomDbRow;
use row::index_columns;

/// Rows returned by a statement
///
/// Column names are stored once and shared by every row.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<CustomDbRow>,
    column_names: Arc<Vec<String>>,
    column_index: Arc<HashMap<String, usize>>,
}

impl ResultSet {
    /// Create an empty result set for the given columns.
    #[must_use]
    pub fn new(column_names: Vec<String>) -> Self {
        Self::with_capacity(column_names, 0)
    }

    #[must_use]
    pub fn with_capacity(column_names: Vec<String>, capacity: usize) -> Self {
        let column_index = Arc::new(index_columns(&column_names));
        Self {
            results: Vec::with_capacity(capacity),
            column_names: Arc::new(column_names),
            column_index,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Append a row; `row_values` must be in column order.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        self.results.push(CustomDbRow {
            column_names: Arc::clone(&self.column_names),
            rows: row_values,
            column_index: Arc::clone(&self.column_index),
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Take the first row, dropping the rest.
    #[must_use]
    pub fn into_first(self) -> Option<CustomDbRow> {
        self.results.into_iter().next()
    }
}

/// Normalized outcome of one statement.
#[derive(Debug, Clone)]
pub enum QueryResult {
    /// Statement ran; nothing to report
    Generic,
    /// Rows changed by an UPDATE/DELETE (or any DML)
    Change { affected_rows: u64 },
    /// Generated key of an INSERT
    Insert { insert_id: i64, affected_rows: u64 },
    /// First row of a SELECT, if there was one
    Row(Option<CustomDbRow>),
    /// All rows of a SELECT
    Rows(ResultSet),
    /// One result per statement of a multi-statement query
    Batch(Vec<QueryResult>),
}

impl QueryResult {
    #[must_use]
    pub fn insert_id(&self) -> Option<i64> {
        match self {
            QueryResult::Insert { insert_id, .. } => Some(*insert_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            QueryResult::Change { affected_rows } | QueryResult::Insert { affected_rows, .. } => {
                Some(*affected_rows)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// The single row of a [`QueryResult::Row`], or the first row of a
    /// [`QueryResult::Rows`].
    #[must_use]
    pub fn row(&self) -> Option<&CustomDbRow> {
        match self {
            QueryResult::Row(row) => row.as_ref(),
            QueryResult::Rows(rows) => rows.results.first(),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_batch(self) -> Vec<QueryResult> {
        match self {
            QueryResult::Batch(results) => results,
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_share_column_lookup() {
        let mut rs = ResultSet::new(vec!["id".into(), "name".into(), "id".into()]);
        rs.add_row_values(vec![
            RowValues::Int(1),
            RowValues::Text("ada".into()),
            RowValues::Int(9),
        ]);
        rs.add_row_values(vec![
            RowValues::Int(2),
            RowValues::Text("bob".into()),
            RowValues::Int(8),
        ]);

        assert_eq!(rs.len(), 2);
        assert_eq!(rs.results[1].get("name"), Some(&RowValues::Text("bob".into())));
        assert_eq!(rs.results[0].get("id"), Some(&RowValues::Int(1)));
        assert!(Arc::ptr_eq(
            &rs.results[0].column_names,
            &rs.results[1].column_names
        ));
        assert!(rs.results[0].get("missing").is_none());
    }

    #[test]
    fn row_accessor_covers_both_select_shapes() {
        let mut rs = ResultSet::new(vec!["n".into()]);
        rs.add_row_values(vec![RowValues::Int(7)]);
        let rows = QueryResult::Rows(rs.clone());
        let one = QueryResult::Row(rs.into_first());

        assert_eq!(rows.row().and_then(|r| r.get("n")), Some(&RowValues::Int(7)));
        assert_eq!(one.row().and_then(|r| r.get("n")), Some(&RowValues::Int(7)));
        assert!(QueryResult::Row(None).row().is_none());
        assert_eq!(QueryResult::Generic.affected_rows(), None);
    }
}
