//! Connection settings: the `type`/`worker-limit`/`sqlite`/`mysql` configuration value,
//! plus construction options supplied by the host in code.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::SqlDispatchError;
use crate::pool::ReconnectPolicy;
use crate::types::Dialect;

const DEFAULT_SQLITE_FILE: &str = "data.sqlite";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Validated description of one database and how many workers talk to it.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub worker_limit: usize,
    pub target: DialectConfig,
}

/// Per-dialect connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum DialectConfig {
    Sqlite(SqliteConfig),
    Mysql(MysqlCredentials),
}

impl DialectConfig {
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        match self {
            DialectConfig::Sqlite(_) => Dialect::Sqlite,
            DialectConfig::Mysql(_) => Dialect::Mysql,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Database file; `:memory:` gives every worker its own private database
    pub file: PathBuf,
    pub busy_timeout: Duration,
    pub journal_mode: String,
}

impl SqliteConfig {
    #[must_use]
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            journal_mode: "WAL".to_owned(),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct MysqlCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
    pub schema: String,
    pub port: u16,
    /// Unix socket path; used instead of host/port when set
    pub socket: Option<String>,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for MysqlCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlCredentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("schema", &self.schema)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for MysqlCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.socket {
            Some(socket) => write!(f, "{}@{}/{}", self.username, socket, self.schema),
            None => write!(
                f,
                "{}@{}:{}/{}",
                self.username, self.host, self.port, self.schema
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    #[serde(rename = "type")]
    db_type: Option<String>,
    worker_limit: Option<i64>,
    sqlite: Option<RawSqlite>,
    mysql: Option<RawMysql>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawSqlite {
    file: Option<String>,
    busy_timeout_ms: Option<u64>,
    journal_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawMysql {
    host: Option<String>,
    #[serde(alias = "user")]
    username: Option<String>,
    password: Option<String>,
    schema: Option<String>,
    port: Option<u16>,
    socket: Option<String>,
    connect_timeout_ms: Option<u64>,
}

impl DatabaseConfig {
    /// Validate a host configuration value.
    ///
    /// Everything is checked here, before any thread is spawned.
    ///
    /// # Errors
    /// [`SqlDispatchError::ConfigError`] when the value is not an object, `type` is missing
    /// or unknown, `worker-limit` is below 1, or a dialect section is missing or invalid.
    pub fn from_value(
        value: &JsonValue,
        options: &ConnectorOptions,
    ) -> Result<Self, SqlDispatchError> {
        if !value.is_object() {
            return Err(config_error("Database settings are missing or incorrect"));
        }
        let raw: RawConfig = serde_json::from_value(value.clone())
            .map_err(|err| config_error(format!("Invalid database settings: {err}")))?;

        let type_name = raw
            .db_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| config_error("Database type is missing"))?;
        let dialect = Dialect::from_type_name(type_name).ok_or_else(|| {
            config_error(format!(
                "Unsupported database type \"{type_name}\". Try \"sqlite\" or \"mysql\"."
            ))
        })?;

        let worker_limit = match raw.worker_limit {
            None => 1,
            Some(n) if n >= 1 => usize::try_from(n)
                .map_err(|_| config_error(format!("worker-limit {n} is too large")))?,
            Some(n) => {
                return Err(config_error(format!(
                    "worker-limit must be at least 1, got {n}"
                )));
            }
        };

        let target = match dialect {
            Dialect::Sqlite => {
                DialectConfig::Sqlite(sqlite_config(raw.sqlite.unwrap_or_default(), options))
            }
            Dialect::Mysql => {
                let mysql = raw
                    .mysql
                    .ok_or_else(|| config_error("Missing MySQL settings"))?;
                DialectConfig::Mysql(mysql_credentials(mysql, options)?)
            }
        };

        Ok(Self {
            worker_limit,
            target,
        })
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.target.dialect()
    }
}

fn sqlite_config(raw: RawSqlite, options: &ConnectorOptions) -> SqliteConfig {
    let file = raw.file.unwrap_or_else(|| DEFAULT_SQLITE_FILE.to_owned());
    SqliteConfig {
        file: resolve_path(options.data_dir.as_deref(), &file),
        busy_timeout: Duration::from_millis(raw.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS)),
        journal_mode: raw.journal_mode.unwrap_or_else(|| "WAL".to_owned()),
    }
}

fn mysql_credentials(
    raw: RawMysql,
    options: &ConnectorOptions,
) -> Result<MysqlCredentials, SqlDispatchError> {
    let schema = raw
        .schema
        .or_else(|| options.default_schema.clone())
        .ok_or_else(|| config_error("mysql.schema is required"))?;
    Ok(MysqlCredentials {
        host: raw.host.unwrap_or_else(|| "127.0.0.1".to_owned()),
        username: raw.username.unwrap_or_else(|| "root".to_owned()),
        password: raw.password.unwrap_or_default(),
        schema,
        port: raw.port.unwrap_or(DEFAULT_MYSQL_PORT),
        socket: raw.socket.filter(|s| !s.is_empty()),
        connect_timeout: Duration::from_millis(
            raw.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        ),
    })
}

/// Relative paths are taken from the host's data directory when it has one.
///
/// `:memory:` and `file:` URIs go to `SQLite` untouched.
fn resolve_path(data_dir: Option<&Path>, file: &str) -> PathBuf {
    let path = Path::new(file);
    let special = file == ":memory:" || file.starts_with("file:");
    match data_dir {
        Some(dir) if !path.is_absolute() && !special => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn config_error(message: impl Into<String>) -> SqlDispatchError {
    SqlDispatchError::ConfigError(message.into())
}

/// How the host ships this library; development builds get a warning at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentMode {
    #[default]
    Packaged,
    Development,
}

/// Construction-time options supplied by the host in code rather than configuration.
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    /// Base directory for relative `sqlite.file` paths
    pub data_dir: Option<PathBuf>,
    /// Schema used when `mysql.schema` is absent
    pub default_schema: Option<String>,
    pub deployment: DeploymentMode,
    /// Upper bound on how long [`crate::create`] waits for workers to connect
    pub settle_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Fail `execute*` with [`SqlDispatchError::Backpressure`] at this many pending queries
    pub max_in_flight: Option<usize>,
    /// Log every submitted query at `debug`
    pub log_queries: bool,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            data_dir: None,
            default_schema: None,
            deployment: DeploymentMode::default(),
            settle_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            max_in_flight: None,
            log_queries: false,
        }
    }
}

impl ConnectorOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn with_deployment(mut self, deployment: DeploymentMode) -> Self {
        self.deployment = deployment;
        self
    }

    #[must_use]
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    #[must_use]
    pub fn with_query_logging(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: &JsonValue) -> Result<DatabaseConfig, SqlDispatchError> {
        DatabaseConfig::from_value(value, &ConnectorOptions::default())
    }

    #[test]
    fn sqlite_defaults() {
        let cfg = parse(&json!({"type": "SQLite3"})).unwrap();
        assert_eq!(cfg.worker_limit, 1);
        match cfg.target {
            DialectConfig::Sqlite(sqlite) => {
                assert_eq!(sqlite.file, PathBuf::from("data.sqlite"));
                assert_eq!(sqlite.journal_mode, "WAL");
            }
            other => panic!("expected sqlite, got {other:?}"),
        }
    }

    #[test]
    fn relative_sqlite_path_uses_data_dir() {
        let options = ConnectorOptions::new().with_data_dir("/srv/app");
        let cfg = DatabaseConfig::from_value(
            &json!({"type": "sq3", "sqlite": {"file": "db/main.sqlite"}}),
            &options,
        )
        .unwrap();
        assert_eq!(
            cfg.target,
            DialectConfig::Sqlite(SqliteConfig {
                file: PathBuf::from("/srv/app/db/main.sqlite"),
                busy_timeout: Duration::from_millis(5_000),
                journal_mode: "WAL".into(),
            })
        );
    }

    #[test]
    fn memory_and_uri_files_ignore_data_dir() {
        let options = ConnectorOptions::new().with_data_dir("/srv/app");
        for file in [":memory:", "file:shared?mode=memory&cache=shared"] {
            let cfg = DatabaseConfig::from_value(
                &json!({"type": "sqlite", "sqlite": {"file": file}}),
                &options,
            )
            .unwrap();
            let DialectConfig::Sqlite(sqlite) = cfg.target else {
                panic!("expected sqlite");
            };
            assert_eq!(sqlite.file, PathBuf::from(file));
        }
    }

    #[test]
    fn mysql_defaults_and_alias() {
        let options = ConnectorOptions::new().with_default_schema("shop");
        let cfg = DatabaseConfig::from_value(
            &json!({"type": "mysqli", "worker-limit": 3, "mysql": {"user": "app"}}),
            &options,
        )
        .unwrap();
        assert_eq!(cfg.worker_limit, 3);
        let DialectConfig::Mysql(creds) = cfg.target else {
            panic!("expected mysql");
        };
        assert_eq!(creds.username, "app");
        assert_eq!(creds.host, "127.0.0.1");
        assert_eq!(creds.port, 3306);
        assert_eq!(creds.schema, "shop");
        assert!(!format!("{creds:?}").contains("password: \"\""));
    }

    #[test]
    fn rejects_invalid_settings() {
        let cases = [
            json!(null),
            json!("sqlite"),
            json!({}),
            json!({"type": ""}),
            json!({"type": "postgres"}),
            json!({"type": "sqlite", "worker-limit": 0}),
            json!({"type": "sqlite", "worker-limit": "many"}),
            json!({"type": "mysql"}),
            json!({"type": "mysql", "mysql": {}}),
        ];
        for case in cases {
            assert!(
                matches!(parse(&case), Err(SqlDispatchError::ConfigError(_))),
                "expected config error for {case}"
            );
        }
    }
}
