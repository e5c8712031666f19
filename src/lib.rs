//! Run named SQL queries on a pool of database worker threads without blocking the
//! application thread.
//!
//! Queries live in dialect-specific template files (see [`template::parser`]). A host
//! builds a [`DataConnector`] with [`create`], submits queries by name, and calls
//! [`DataConnector::tick`] from its own loop to receive results, either through a
//! [`QueryHandle`] or a continuation.
//!
//! ```
//! use serde_json::json;
//! use sql_dispatch::prelude::*;
//!
//! # fn main() -> Result<(), SqlDispatchError> {
//! let queries = "\
//! -- #!sqlite
//! -- #{ users
//! -- #  { init
//! CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
//! -- #  }
//! -- #  { add
//! -- #    :name string
//! INSERT INTO users(name) VALUES (:name);
//! -- #  }
//! -- #  { count
//! SELECT COUNT(*) AS n FROM users;
//! -- #  }
//! -- #}
//! ";
//! let sql = SqlMap::new().with_source(Dialect::Sqlite, TemplateSource::new("users.sql", queries));
//! let db = create(
//!     &json!({"type": "sqlite", "sqlite": {"file": ":memory:"}}),
//!     &sql,
//!     ConnectorOptions::default(),
//! )?;
//! db.execute_generic("users.init", &Args::new())?;
//! db.execute_insert("users.add", &Args::new().with("name", "ada"))?;
//! let mut count = db.execute_select_one("users.count", &Args::new())?;
//! db.wait_all();
//!
//! let result = count.try_take().expect("delivered by wait_all")?;
//! let n = result.row().and_then(|row| row.get("n")).and_then(RowValues::as_int);
//! assert_eq!(n, Some(&1));
//! db.close();
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod pool;
pub mod prelude;
pub mod results;
pub mod template;
pub mod types;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use builder::{SqlMap, create};
pub use config::{ConnectorOptions, DatabaseConfig, DeploymentMode};
pub use connector::{DataConnector, QueryHandle, QueryOutcome};
pub use error::SqlDispatchError;
pub use results::{CustomDbRow, QueryResult, ResultSet};
pub use template::{Args, TemplateSource};
pub use types::{Dialect, QueryId, ResultShape, RowValues};
