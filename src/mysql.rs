//! `MySQL` backend built on `sqlx`.
//!
//! Workers are plain OS threads, so each connection carries its own current-thread
//! `tokio` runtime and drives `sqlx` futures to completion with `block_on`.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection as RawConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use tokio::runtime::{Builder, Runtime};

use crate::config::MysqlCredentials;
use crate::connection::{ConnectionFactory, SqlConnection};
use crate::error::SqlDispatchError;
use crate::results::{QueryResult, ResultSet};
use crate::template::RenderedQuery;
use crate::types::{Dialect, ResultShape, RowValues};

/// Opens one `sqlx` `MySQL` session per worker.
#[derive(Debug, Clone)]
pub struct MysqlFactory {
    creds: MysqlCredentials,
}

impl MysqlFactory {
    #[must_use]
    pub fn new(creds: MysqlCredentials) -> Self {
        Self { creds }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .username(&self.creds.username)
            .password(&self.creds.password)
            .database(&self.creds.schema);
        match &self.creds.socket {
            Some(socket) => options.socket(socket),
            None => options.host(&self.creds.host).port(self.creds.port),
        }
    }
}

impl ConnectionFactory for MysqlFactory {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn describe(&self) -> String {
        format!("mysql:{}", self.creds)
    }

    fn connect(&self) -> Result<Box<dyn SqlConnection>, SqlDispatchError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| {
                SqlDispatchError::ConnectionError(format!("cannot start driver runtime: {err}"))
            })?;
        let options = self.connect_options();
        let timeout = self.creds.connect_timeout;
        let conn = runtime
            .block_on(async { tokio::time::timeout(timeout, RawConnection::connect_with(&options)).await })
            .map_err(|_| {
                SqlDispatchError::ConnectionError(format!(
                    "timed out after {timeout:?} connecting to {}",
                    self.creds
                ))
            })?
            .map_err(|err| {
                SqlDispatchError::ConnectionError(format!("cannot connect to {}: {err}", self.creds))
            })?;
        Ok(Box::new(MysqlConnection { runtime, conn }))
    }
}

/// A worker-owned `MySQL` session and the runtime that drives it.
pub struct MysqlConnection {
    runtime: Runtime,
    conn: RawConnection,
}

impl MysqlConnection {
    fn run(&mut self, query: &RenderedQuery, shape: ResultShape) -> Result<QueryResult, sqlx::Error> {
        let Self { runtime, conn } = self;
        runtime.block_on(async {
            let bound = query
                .params
                .iter()
                .fold(sqlx::query(&query.sql), bind_value);
            let result = match shape {
                ResultShape::None => {
                    bound.execute(&mut *conn).await?;
                    QueryResult::Generic
                }
                ResultShape::AffectedRows => QueryResult::Change {
                    affected_rows: bound.execute(&mut *conn).await?.rows_affected(),
                },
                ResultShape::InsertId => {
                    let done = bound.execute(&mut *conn).await?;
                    QueryResult::Insert {
                        insert_id: i64::try_from(done.last_insert_id()).unwrap_or(i64::MAX),
                        affected_rows: done.rows_affected(),
                    }
                }
                ResultShape::SingleRow => {
                    let row = bound.fetch_optional(&mut *conn).await?;
                    QueryResult::Row(build_result_set(row.as_slice())?.into_first())
                }
                ResultShape::Rows => {
                    let rows = bound.fetch_all(&mut *conn).await?;
                    QueryResult::Rows(build_result_set(&rows)?)
                }
            };
            Ok(result)
        })
    }
}

impl SqlConnection for MysqlConnection {
    fn execute(
        &mut self,
        query: &RenderedQuery,
        shape: ResultShape,
    ) -> Result<QueryResult, SqlDispatchError> {
        self.run(query, shape).map_err(classify_error)
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &RowValues,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        RowValues::Int(i) => query.bind(*i),
        RowValues::Float(f) => query.bind(*f),
        RowValues::Text(s) => query.bind(s.clone()),
        RowValues::Bool(b) => query.bind(*b),
        RowValues::Timestamp(ts) => query.bind(*ts),
        RowValues::Null => query.bind(None::<String>),
        RowValues::Blob(bytes) => query.bind(bytes.clone()),
    }
}

fn build_result_set(rows: &[MySqlRow]) -> Result<ResultSet, sqlx::Error> {
    let column_names = rows.first().map_or_else(Vec::new, |row| {
        row.columns()
            .iter()
            .map(|col| col.name().to_owned())
            .collect()
    });
    let col_count = column_names.len();
    let mut result_set = ResultSet::with_capacity(column_names, rows.len());
    for row in rows {
        let values = (0..col_count)
            .map(|idx| mysql_extract_value(row, idx))
            .collect::<Result<Vec<_>, _>>()?;
        result_set.add_row_values(values);
    }
    Ok(result_set)
}

/// Normalize one column of a `MySQL` row by its declared type.
fn mysql_extract_value(row: &MySqlRow, idx: usize) -> Result<RowValues, sqlx::Error> {
    let type_name = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(RowValues::Null);
        }
        raw.type_info().name().to_ascii_uppercase()
    };

    let value = match type_name.as_str() {
        "BOOLEAN" => RowValues::Bool(row.try_get(idx)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            RowValues::Int(row.try_get::<i64, _>(idx)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "YEAR" => {
            let unsigned = row.try_get_unchecked::<u64, _>(idx)?;
            i64::try_from(unsigned).map_or_else(|_| RowValues::Text(unsigned.to_string()), RowValues::Int)
        }
        "FLOAT" | "DOUBLE" => RowValues::Float(row.try_get::<f64, _>(idx)?),
        "DATETIME" | "TIMESTAMP" => RowValues::Timestamp(row.try_get::<NaiveDateTime, _>(idx)?),
        "DATE" => RowValues::Timestamp(
            row.try_get::<NaiveDate, _>(idx)?
                .and_time(NaiveTime::MIN),
        ),
        "TIME" => RowValues::Text(row.try_get::<NaiveTime, _>(idx)?.to_string()),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
            RowValues::Blob(row.try_get_unchecked::<Vec<u8>, _>(idx)?)
        }
        _ => RowValues::Text(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}

/// Whether an `sqlx` error means the session itself is unusable.
pub(crate) fn is_connection_loss(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

fn classify_error(err: sqlx::Error) -> SqlDispatchError {
    match err {
        sqlx::Error::Encode(inner) => SqlDispatchError::BindError(inner.to_string()),
        sqlx::Error::ColumnDecode { index, source } => {
            SqlDispatchError::ExecutionError(format!("cannot decode column {index}: {source}"))
        }
        other if is_connection_loss(&other) => SqlDispatchError::ConnectionLost(other.to_string()),
        other => SqlDispatchError::MysqlError(other),
    }
}
