use thiserror::Error;

/// Every failure this crate reports, from configuration through query execution.
#[derive(Debug, Error)]
pub enum SqlDispatchError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "mysql")]
    #[error(transparent)]
    MysqlError(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database driver unavailable: {0} support is not compiled into this build")]
    DriverUnavailable(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Parameter binding error: {0}")]
    BindError(String),

    #[error("Query \"{0}\" is not registered for this dialect")]
    MissingQuery(String),

    #[error("Query \"{query}\" requires argument \"{argument}\"")]
    MissingArgument { query: String, argument: String },

    #[error("Query \"{query}\": invalid argument \"{argument}\": {message}")]
    InvalidArgument {
        query: String,
        argument: String,
        message: String,
    },

    #[error("Malformed template in {source_name} line {line}: {message}")]
    MalformedTemplate {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("Too many queries in flight (limit {0})")]
    Backpressure(usize),

    #[error("Query pool has been shut down")]
    ShutDown,
}

impl SqlDispatchError {
    /// Whether the error means the worker's session is unusable and must be recreated.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        match self {
            Self::ConnectionError(_) | Self::ConnectionLost(_) => true,
            #[cfg(feature = "sqlite")]
            Self::SqliteError(err) => crate::sqlite::is_connection_loss(err),
            #[cfg(feature = "mysql")]
            Self::MysqlError(err) => crate::mysql::is_connection_loss(err),
            _ => false,
        }
    }

    /// Errors raised synchronously while resolving or rendering a named query.
    #[must_use]
    pub fn is_template_error(&self) -> bool {
        matches!(
            self,
            Self::MissingQuery(_)
                | Self::MissingArgument { .. }
                | Self::InvalidArgument { .. }
                | Self::MalformedTemplate { .. }
        )
    }

    pub(crate) fn malformed(source_name: &str, line: usize, message: impl Into<String>) -> Self {
        Self::MalformedTemplate {
            source_name: source_name.to_owned(),
            line,
            message: message.into(),
        }
    }
}
