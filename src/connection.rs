//! The seam between workers and database drivers.

use std::sync::Arc;

use crate::config::{DatabaseConfig, DialectConfig};
use crate::error::SqlDispatchError;
use crate::results::QueryResult;
use crate::template::RenderedQuery;
use crate::types::{Dialect, ResultShape};

/// One live session, owned by exactly one worker thread.
///
/// Dropping the connection closes it.
pub trait SqlConnection: Send {
    /// Run one statement and shape its outcome.
    ///
    /// # Errors
    /// Connection-level failures must satisfy
    /// [`SqlDispatchError::is_connection_loss`] so the worker knows to reconnect;
    /// engine errors must not.
    fn execute(
        &mut self,
        query: &RenderedQuery,
        shape: ResultShape,
    ) -> Result<QueryResult, SqlDispatchError>;
}

/// Opens connections to one database; shared by every worker of a pool.
pub trait ConnectionFactory: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Human-readable target, for logs.
    fn describe(&self) -> String;

    /// Open a new session. Called on a worker thread.
    ///
    /// # Errors
    /// [`SqlDispatchError::ConnectionError`] (or a driver error) when the target is
    /// unreachable.
    fn connect(&self) -> Result<Box<dyn SqlConnection>, SqlDispatchError>;
}

/// Pick the factory for a validated configuration.
///
/// # Errors
/// [`SqlDispatchError::DriverUnavailable`] if the dialect's cargo feature is disabled.
pub fn factory_for(config: &DatabaseConfig) -> Result<Arc<dyn ConnectionFactory>, SqlDispatchError> {
    match &config.target {
        #[cfg(feature = "sqlite")]
        DialectConfig::Sqlite(sqlite) => Ok(Arc::new(crate::sqlite::SqliteFactory::new(
            sqlite.clone(),
        ))),
        #[cfg(feature = "mysql")]
        DialectConfig::Mysql(creds) => Ok(Arc::new(crate::mysql::MysqlFactory::new(
            creds.clone(),
        ))),
        #[allow(unreachable_patterns)]
        other => Err(SqlDispatchError::DriverUnavailable(
            other.dialect().as_str().to_owned(),
        )),
    }
}
