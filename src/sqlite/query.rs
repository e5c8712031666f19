use rusqlite::types::Value;
use rusqlite::{Statement, ToSql};

use crate::results::ResultSet;
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns the rusqlite error if the column cannot be read.
pub fn sqlite_extract_value_sync(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<RowValues> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Run a prepared query and collect up to `limit` rows.
///
/// # Errors
/// Returns the rusqlite error if binding, stepping or reading a column fails.
pub fn build_result_set(
    stmt: &mut Statement,
    params: &[Value],
    limit: Option<usize>,
) -> rusqlite::Result<ResultSet> {
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(column_names, limit.unwrap_or(10).min(10));
    let mut rows_iter = stmt.query(&param_refs[..])?;

    while let Some(row) = rows_iter.next()? {
        if limit.is_some_and(|max| result_set.len() >= max) {
            break;
        }
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value_sync(row, i)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}
