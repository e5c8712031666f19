use rusqlite::{Connection, OpenFlags};

use crate::config::SqliteConfig;
use crate::connection::{ConnectionFactory, SqlConnection};
use crate::error::SqlDispatchError;
use crate::results::QueryResult;
use crate::template::RenderedQuery;
use crate::types::{Dialect, ResultShape};

use super::classify_error;
use super::params::Params;
use super::query::build_result_set;

/// Opens one `rusqlite` connection per worker against the same file.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    config: SqliteConfig,
}

impl SqliteFactory {
    #[must_use]
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.config.file, flags)?;
        conn.busy_timeout(self.config.busy_timeout)?;
        let mode: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            &self.config.journal_mode,
            |row| row.get(0),
        )?;
        tracing::trace!(file = %self.config.file.display(), journal_mode = %mode, "sqlite connection opened");
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(conn)
    }
}

impl ConnectionFactory for SqliteFactory {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.config.file.display())
    }

    fn connect(&self) -> Result<Box<dyn SqlConnection>, SqlDispatchError> {
        let conn = self.open().map_err(|err| {
            SqlDispatchError::ConnectionError(format!(
                "cannot open {}: {err}",
                self.config.file.display()
            ))
        })?;
        Ok(Box::new(SqliteConnection { conn }))
    }
}

/// A worker-owned `rusqlite` connection.
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    fn run(&mut self, query: &RenderedQuery, shape: ResultShape) -> rusqlite::Result<QueryResult> {
        let params = Params::convert(&query.params);
        let mut stmt = self.conn.prepare_cached(&query.sql)?;
        let result = match shape {
            ResultShape::None => {
                if stmt.column_count() > 0 {
                    let refs = params.as_refs();
                    let mut rows = stmt.query(&refs[..])?;
                    while rows.next()?.is_some() {}
                } else {
                    stmt.execute(&params.as_refs()[..])?;
                }
                QueryResult::Generic
            }
            ResultShape::AffectedRows => {
                let affected = stmt.execute(&params.as_refs()[..])?;
                QueryResult::Change {
                    affected_rows: affected as u64,
                }
            }
            ResultShape::InsertId => {
                let affected = stmt.execute(&params.as_refs()[..])?;
                QueryResult::Insert {
                    insert_id: self.conn.last_insert_rowid(),
                    affected_rows: affected as u64,
                }
            }
            ResultShape::SingleRow => {
                let rows = build_result_set(&mut stmt, params.as_values(), Some(1))?;
                QueryResult::Row(rows.into_first())
            }
            ResultShape::Rows => {
                QueryResult::Rows(build_result_set(&mut stmt, params.as_values(), None)?)
            }
        };
        Ok(result)
    }
}

impl SqlConnection for SqliteConnection {
    fn execute(
        &mut self,
        query: &RenderedQuery,
        shape: ResultShape,
    ) -> Result<QueryResult, SqlDispatchError> {
        self.run(query, shape).map_err(classify_error)
    }
}
