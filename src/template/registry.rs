use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SqlDispatchError;
use crate::types::Dialect;

use super::parser::parse;
use super::{Template, TemplateSource};

/// Compiled templates keyed by `(dialect, name)`.
///
/// A name registered twice keeps the most recent definition ("last wins"); the
/// replacement is logged at `warn` so accidental clashes between files are visible.
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<(Dialect, String), Arc<Template>>,
}

impl TemplateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source` for `dialect` and register every query in it.
    ///
    /// Returns the number of queries registered. Nothing is registered if the file is
    /// malformed.
    ///
    /// # Errors
    /// [`SqlDispatchError::MalformedTemplate`] from the parser.
    pub fn load(
        &mut self,
        source: &TemplateSource,
        dialect: Dialect,
    ) -> Result<usize, SqlDispatchError> {
        let templates = parse(source, dialect)?;
        let count = templates.len();
        for template in templates {
            if let Some(previous) = self.insert(template) {
                tracing::warn!(
                    query = previous.name(),
                    source = %source.name,
                    "query redefined; the later definition replaces the earlier one"
                );
            }
        }
        tracing::debug!(source = %source.name, %dialect, count, "loaded query templates");
        Ok(count)
    }

    /// Register one template, returning the definition it replaced.
    pub fn insert(&mut self, template: Template) -> Option<Arc<Template>> {
        let key = (template.dialect(), template.name().to_owned());
        self.templates.insert(key, Arc::new(template))
    }

    #[must_use]
    pub fn get(&self, dialect: Dialect, name: &str) -> Option<&Arc<Template>> {
        self.templates.get(&(dialect, name.to_owned()))
    }

    /// Registered names for `dialect`, sorted.
    #[must_use]
    pub fn names(&self, dialect: Dialect) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .templates
            .keys()
            .filter(|(d, _)| *d == dialect)
            .map(|(_, name)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Args;

    #[test]
    fn later_definition_wins() {
        let mut registry = TemplateRegistry::new();
        let first = TemplateSource::new("a.sql", "-- #{ q\nSELECT 1;\n-- #}\n");
        let second = TemplateSource::new("b.sql", "-- #{ q\nSELECT 2;\n-- #}\n");
        registry.load(&first, Dialect::Sqlite).unwrap();
        registry.load(&second, Dialect::Sqlite).unwrap();

        assert_eq!(registry.len(), 1);
        let rendered = registry
            .get(Dialect::Sqlite, "q")
            .unwrap()
            .render(&Args::new())
            .unwrap();
        assert_eq!(rendered[0].sql, "SELECT 2");
    }

    #[test]
    fn dialects_do_not_collide() {
        let mut registry = TemplateRegistry::new();
        let text = "-- #{ q\nSELECT 1;\n-- #}\n";
        registry
            .load(&TemplateSource::new("s.sql", text), Dialect::Sqlite)
            .unwrap();
        registry
            .load(&TemplateSource::new("m.sql", text), Dialect::Mysql)
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(Dialect::Mysql), vec!["q"]);
        assert!(registry.get(Dialect::Sqlite, "missing").is_none());
    }

    #[test]
    fn malformed_file_registers_nothing() {
        let mut registry = TemplateRegistry::new();
        let text = "-- #{ ok\nSELECT 1;\n-- #}\n-- #{ bad\nSELECT :x;\n-- #}\n";
        assert!(registry
            .load(&TemplateSource::new("x.sql", text), Dialect::Sqlite)
            .is_err());
        assert!(registry.is_empty());
    }
}
