//! `SQLite` backend built on `rusqlite`.
//!
//! Each worker opens its own connection to the configured file, so a pool of more than
//! one worker needs a real file (or a shared-cache URI); `:memory:` would give every
//! worker a separate database.

use rusqlite::ErrorCode;

use crate::error::SqlDispatchError;

pub mod connection;
pub mod params;
pub mod query;

pub use connection::{SqliteConnection, SqliteFactory};
pub use params::Params;
pub use query::build_result_set;

/// Whether a rusqlite error means the session itself is unusable.
pub(crate) fn is_connection_loss(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(
            ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure
        )
    )
}

/// Sort a rusqlite error into binding, connection or engine failures.
pub(crate) fn classify_error(err: rusqlite::Error) -> SqlDispatchError {
    match err {
        rusqlite::Error::InvalidParameterCount(given, expected) => SqlDispatchError::BindError(
            format!("statement expects {expected} parameters, {given} given"),
        ),
        rusqlite::Error::InvalidParameterName(name) => {
            SqlDispatchError::BindError(format!("unknown parameter {name}"))
        }
        rusqlite::Error::ToSqlConversionFailure(inner) => {
            SqlDispatchError::BindError(inner.to_string())
        }
        other if is_connection_loss(&other) => SqlDispatchError::ConnectionLost(other.to_string()),
        other => SqlDispatchError::SqliteError(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_binding_and_engine_errors() {
        let bind = classify_error(rusqlite::Error::InvalidParameterCount(1, 2));
        assert!(matches!(bind, SqlDispatchError::BindError(_)));
        assert!(!bind.is_connection_loss());

        let engine = classify_error(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(engine, SqlDispatchError::SqliteError(_)));
        assert!(!engine.is_connection_loss());
    }

    #[test]
    fn io_failures_are_connection_loss() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
            None,
        );
        assert!(is_connection_loss(&err));
        assert!(classify_error(err).is_connection_loss());
    }
}
