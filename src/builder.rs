use std::collections::HashMap;
use std::path::Path;

use serde_json::Value as JsonValue;

use crate::config::{ConnectorOptions, DatabaseConfig, DeploymentMode};
use crate::connection::factory_for;
use crate::connector::DataConnector;
use crate::error::SqlDispatchError;
use crate::pool::SqlThreadPool;
use crate::template::{TemplateRegistry, TemplateSource};
use crate::types::Dialect;

/// Template files for each dialect the host supports.
#[derive(Debug, Clone, Default)]
pub struct SqlMap {
    sources: HashMap<Dialect, Vec<TemplateSource>>,
}

impl SqlMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_source(mut self, dialect: Dialect, source: TemplateSource) -> Self {
        self.insert(dialect, source);
        self
    }

    /// Add a template file read from disk.
    ///
    /// # Errors
    /// [`SqlDispatchError::Io`] if the file cannot be read.
    pub fn with_file(
        mut self,
        dialect: Dialect,
        path: impl AsRef<Path>,
    ) -> Result<Self, SqlDispatchError> {
        self.insert(dialect, TemplateSource::from_file(path)?);
        Ok(self)
    }

    pub fn insert(&mut self, dialect: Dialect, source: TemplateSource) {
        self.sources.entry(dialect).or_default().push(source);
    }

    /// Sources for `dialect`, in insertion order; `None` if the dialect has no entry.
    #[must_use]
    pub fn sources(&self, dialect: Dialect) -> Option<&[TemplateSource]> {
        self.sources.get(&dialect).map(Vec::as_slice)
    }

    #[must_use]
    pub fn supports(&self, dialect: Dialect) -> bool {
        self.sources.contains_key(&dialect)
    }
}

/// Build a [`DataConnector`] from a configuration value.
///
/// Validates the configuration, starts the worker pool and waits (up to
/// `options.settle_timeout`) for every worker to attempt its first connection before
/// loading the templates for the configured dialect.
///
/// # Errors
/// - [`SqlDispatchError::ConfigError`] for an invalid configuration or a dialect missing
///   from `sql_map`; no thread is started then.
/// - [`SqlDispatchError::DriverUnavailable`] if the dialect was compiled out.
/// - [`SqlDispatchError::ConnectionError`] if any worker fails to connect or the pool
///   does not settle in time; the pool is shut down first.
/// - [`SqlDispatchError::MalformedTemplate`] or [`SqlDispatchError::Io`] from template
///   loading.
pub fn create(
    config: &JsonValue,
    sql_map: &SqlMap,
    options: ConnectorOptions,
) -> Result<DataConnector, SqlDispatchError> {
    let config = DatabaseConfig::from_value(config, &options)?;
    let dialect = config.dialect();
    let factory = factory_for(&config)?;
    let Some(sources) = sql_map.sources(dialect) else {
        return Err(SqlDispatchError::ConfigError(format!(
            "Unsupported database type \"{dialect}\": no queries were provided for it"
        )));
    };
    if options.deployment == DeploymentMode::Development {
        tracing::warn!(
            "running from a development build; the query layer may change without notice"
        );
    }

    let pool = SqlThreadPool::create(factory, config.worker_limit, options.reconnect)?;
    if !pool.wait_settled(options.settle_timeout) {
        return Err(SqlDispatchError::ConnectionError(format!(
            "workers did not finish connecting within {:?}",
            options.settle_timeout
        )));
    }
    if let Some(message) = pool.first_connection_error() {
        return Err(SqlDispatchError::ConnectionError(message.to_owned()));
    }

    let mut registry = TemplateRegistry::new();
    for source in sources {
        registry.load(source, dialect)?;
    }
    tracing::info!(
        %dialect,
        workers = config.worker_limit,
        queries = registry.len(),
        "data connector ready"
    );

    let connector = DataConnector::new(dialect, pool, registry, options.max_in_flight);
    connector.set_logging_enabled(options.log_queries);
    Ok(connector)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_dialect_in_sql_map_is_a_config_error() {
        let map = SqlMap::new().with_source(
            Dialect::Mysql,
            TemplateSource::new("m.sql", "-- #{ q\nSELECT 1;\n-- #}\n"),
        );
        let err = create(
            &json!({"type": "sqlite", "sqlite": {"file": ":memory:"}}),
            &map,
            ConnectorOptions::default(),
        )
        .unwrap_err();
        match err {
            SqlDispatchError::ConfigError(message) => {
                assert!(message.contains("Unsupported database type"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sql_map_keeps_insertion_order() {
        let map = SqlMap::new()
            .with_source(Dialect::Sqlite, TemplateSource::new("a.sql", ""))
            .with_source(Dialect::Sqlite, TemplateSource::new("b.sql", ""));
        let names: Vec<&str> = map
            .sources(Dialect::Sqlite)
            .unwrap()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["a.sql", "b.sql"]);
        assert!(!map.supports(Dialect::Mysql));
    }
}
