//! Named SQL templates.
//!
//! Template files are plain SQL annotated with `-- #` directive comments; see [`parser`]
//! for the format. Placeholders are located once when a file is loaded, so rendering is a
//! pure walk over pre-split segments.

use std::path::Path;

use crate::error::SqlDispatchError;
use crate::types::{Dialect, RowValues};

pub mod parser;
mod registry;
mod scan;
mod variable;

pub use registry::TemplateRegistry;
pub use variable::{ArgValue, Args, VarType, Variable};

/// A statement ready for a worker: dialect-specific SQL plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<RowValues>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Sql(String),
    /// Index into [`Template::variables`]
    Var(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct Statement {
    segments: Vec<Segment>,
}

/// One named query, compiled for a single dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    name: String,
    dialect: Dialect,
    description: Option<String>,
    variables: Vec<Variable>,
    statements: Vec<Statement>,
}

impl Template {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Placeholder names in the order they occur, across all statements.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.statements
            .iter()
            .flat_map(|stmt| stmt.segments.iter())
            .filter_map(|seg| match seg {
                Segment::Var(idx) => Some(self.variables[*idx].name.as_str()),
                Segment::Sql(_) => None,
            })
    }

    /// Substitute `args` into every statement.
    ///
    /// `SQLite` gets numbered `?N` markers, `MySQL` gets bare `?`; parameters are emitted in
    /// occurrence order either way. An empty list renders as `(NULL)`.
    ///
    /// # Errors
    /// [`SqlDispatchError::MissingArgument`] when a variable without a default has no
    /// argument, [`SqlDispatchError::InvalidArgument`] when a value does not fit the
    /// declared type.
    pub fn render(&self, args: &Args) -> Result<Vec<RenderedQuery>, SqlDispatchError> {
        let bound = self.bind(args)?;
        let rendered = self
            .statements
            .iter()
            .map(|stmt| {
                let mut sql = String::new();
                let mut params = Vec::new();
                for segment in &stmt.segments {
                    match segment {
                        Segment::Sql(text) => sql.push_str(text),
                        Segment::Var(idx) => match &bound[*idx] {
                            ArgValue::Scalar(value) => {
                                params.push(value.clone());
                                self.push_marker(&mut sql, params.len());
                            }
                            ArgValue::List(values) if values.is_empty() => sql.push_str("(NULL)"),
                            ArgValue::List(values) => {
                                sql.push('(');
                                for (i, value) in values.iter().enumerate() {
                                    if i > 0 {
                                        sql.push_str(", ");
                                    }
                                    params.push(value.clone());
                                    self.push_marker(&mut sql, params.len());
                                }
                                sql.push(')');
                            }
                        },
                    }
                }
                RenderedQuery { sql, params }
            })
            .collect();
        Ok(rendered)
    }

    fn push_marker(&self, sql: &mut String, position: usize) {
        match self.dialect {
            Dialect::Sqlite => {
                sql.push('?');
                sql.push_str(&position.to_string());
            }
            Dialect::Mysql => sql.push('?'),
        }
    }

    fn bind(&self, args: &Args) -> Result<Vec<ArgValue>, SqlDispatchError> {
        self.variables
            .iter()
            .map(|var| {
                let invalid = |message: String| SqlDispatchError::InvalidArgument {
                    query: self.name.clone(),
                    argument: var.name.clone(),
                    message,
                };
                match (args.get(&var.name), var.list) {
                    (None, _) => var.default.clone().map(ArgValue::Scalar).ok_or_else(|| {
                        SqlDispatchError::MissingArgument {
                            query: self.name.clone(),
                            argument: var.name.clone(),
                        }
                    }),
                    (Some(ArgValue::Scalar(value)), false) => {
                        var.bind_scalar(value).map(ArgValue::Scalar).map_err(invalid)
                    }
                    (Some(ArgValue::List(values)), true) => values
                        .iter()
                        .map(|value| var.bind_scalar(value))
                        .collect::<Result<Vec<_>, _>>()
                        .map(ArgValue::List)
                        .map_err(invalid),
                    (Some(ArgValue::Scalar(_)), true) => {
                        Err(invalid("expected a list of values".into()))
                    }
                    (Some(ArgValue::List(_)), false) => {
                        Err(invalid("expected a single value, got a list".into()))
                    }
                }
            })
            .collect()
    }
}

/// Named text of one template file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    /// Used in error messages and logs
    pub name: String,
    pub text: String,
}

impl TemplateSource {
    #[must_use]
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Read a template file from disk.
    ///
    /// # Errors
    /// Returns [`SqlDispatchError::Io`] if the file cannot be read.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SqlDispatchError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Ok(Self::new(path.display().to_string(), text))
    }
}
