//! Parser for annotated SQL template files.
//!
//! ```sql
//! -- #!sqlite
//! -- #{ users
//! -- #  { insert
//! -- #    * Adds one user
//! -- #    :name string
//! INSERT INTO users(name) VALUES(:name);
//! -- #  }
//! -- #  { by_ids
//! -- #    :ids list:int
//! -- #    :limit int 10
//! SELECT * FROM users WHERE id IN :ids LIMIT :limit;
//! -- #  }
//! -- #}
//! ```
//!
//! Lines starting with `-- #` are directives:
//!
//! * `!dialect` names the dialect the file is written for; it must precede the first
//!   group and match the dialect the file is loaded for. Files without it are assumed to
//!   match.
//! * `{ name` opens a group or query and `}` closes it. A node containing SQL is a
//!   query, a node containing other nodes is a group; a node cannot be both. Query names
//!   are the dot-joined path of open nodes (`users.insert`).
//! * `:name type [default]` declares a variable of the enclosing query, before its SQL.
//!   Types are `string`, `int`, `float`, `bool`, `timestamp`, `blob`; prefix `?` for
//!   nullable and `list:` for list variables.
//! * `* text` documents the enclosing query.
//!
//! Every other line inside a query is SQL. A query body may hold several `;`-separated
//! statements.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::SqlDispatchError;
use crate::types::Dialect;

use super::scan::scan_statements;
use super::variable::Variable;
use super::{Segment, Statement, Template, TemplateSource};

static DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^--\s*#(.*)$").expect("directive pattern"));
static NODE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("node name pattern"));
static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^:([A-Za-z_][A-Za-z0-9_]*)\s+(\S+)(?:\s+(.+))?$").expect("variable pattern")
});

struct Node {
    name: String,
    line: usize,
    description: Vec<String>,
    variables: Vec<Variable>,
    body: Vec<String>,
    has_children: bool,
}

impl Node {
    fn new(name: String, line: usize) -> Self {
        Self {
            name,
            line,
            description: Vec::new(),
            variables: Vec::new(),
            body: Vec::new(),
            has_children: false,
        }
    }

    fn is_query(&self) -> bool {
        !self.variables.is_empty() || !self.body.is_empty() || !self.description.is_empty()
    }
}

struct Parser<'a> {
    source: &'a str,
    dialect: Dialect,
    stack: Vec<Node>,
    seen_node: bool,
    templates: Vec<Template>,
}

/// Parse every query in `source`, compiling them for `dialect`.
///
/// Parsing is all-or-nothing: the first error aborts the whole file.
///
/// # Errors
/// [`SqlDispatchError::MalformedTemplate`] describing the first problem and its line.
pub fn parse(source: &TemplateSource, dialect: Dialect) -> Result<Vec<Template>, SqlDispatchError> {
    let mut parser = Parser {
        source: &source.name,
        dialect,
        stack: Vec::new(),
        seen_node: false,
        templates: Vec::new(),
    };
    for (idx, line) in source.text.lines().enumerate() {
        parser.line(idx + 1, line)?;
    }
    if let Some(open) = parser.stack.last() {
        return Err(SqlDispatchError::malformed(
            parser.source,
            open.line,
            format!("\"{{ {}\" is never closed", open.name),
        ));
    }
    Ok(parser.templates)
}

impl Parser<'_> {
    fn line(&mut self, line_no: usize, line: &str) -> Result<(), SqlDispatchError> {
        let trimmed = line.trim();
        match DIRECTIVE.captures(trimmed) {
            Some(caps) => {
                let directive = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.directive(line_no, directive)
            }
            None => self.sql_line(line_no, line),
        }
    }

    fn directive(&mut self, line_no: usize, directive: &str) -> Result<(), SqlDispatchError> {
        let Some(first) = directive.chars().next() else {
            return Ok(());
        };
        let rest = directive[first.len_utf8()..].trim();
        match first {
            '!' => self.declare_dialect(line_no, rest),
            '{' => self.open(line_no, rest),
            '}' => self.close(line_no, rest),
            ':' => self.declare_variable(line_no, directive),
            '*' => {
                let node = self.current(line_no, "description outside of a query")?;
                node.description.push(rest.to_owned());
                Ok(())
            }
            _ => Err(self.error(line_no, format!("unknown directive \"{directive}\""))),
        }
    }

    fn declare_dialect(&mut self, line_no: usize, name: &str) -> Result<(), SqlDispatchError> {
        if self.seen_node {
            return Err(self.error(line_no, "dialect must be declared before any query"));
        }
        let declared = Dialect::from_type_name(name)
            .ok_or_else(|| self.error(line_no, format!("unknown dialect \"{name}\"")))?;
        if declared != self.dialect {
            return Err(self.error(
                line_no,
                format!(
                    "file is written for {declared} but is being loaded for {}",
                    self.dialect
                ),
            ));
        }
        Ok(())
    }

    fn open(&mut self, line_no: usize, name: &str) -> Result<(), SqlDispatchError> {
        if !NODE_NAME.is_match(name) {
            return Err(self.error(line_no, format!("invalid query name \"{name}\"")));
        }
        if let Some(parent) = self.stack.last_mut() {
            if parent.is_query() {
                let parent_name = parent.name.clone();
                return Err(self.error(
                    line_no,
                    format!("\"{parent_name}\" cannot contain both SQL and nested queries"),
                ));
            }
            parent.has_children = true;
        }
        self.seen_node = true;
        self.stack.push(Node::new(name.to_owned(), line_no));
        Ok(())
    }

    fn close(&mut self, line_no: usize, trailing: &str) -> Result<(), SqlDispatchError> {
        if !trailing.is_empty() {
            return Err(self.error(line_no, format!("unexpected \"{trailing}\" after \"}}\"")));
        }
        let Some(node) = self.stack.pop() else {
            return Err(self.error(line_no, "\"}\" without matching \"{\""));
        };
        if node.has_children {
            return Ok(());
        }
        let full_name = self
            .stack
            .iter()
            .map(|n| n.name.as_str())
            .chain(std::iter::once(node.name.as_str()))
            .collect::<Vec<_>>()
            .join(".");
        let template = self.compile(full_name, node)?;
        self.templates.push(template);
        Ok(())
    }

    fn declare_variable(&mut self, line_no: usize, directive: &str) -> Result<(), SqlDispatchError> {
        let caps = VARIABLE
            .captures(directive)
            .ok_or_else(|| self.error(line_no, format!("malformed variable \"{directive}\"")))?;
        let name = &caps[1];
        let variable = Variable::parse(name, &caps[2], caps.get(3).map(|m| m.as_str()))
            .map_err(|msg| self.error(line_no, msg))?;

        let source = self.source;
        let node = self.current(line_no, "variable outside of a query")?;
        let problem = if node.has_children {
            Some(format!("group \"{}\" cannot declare variables", node.name))
        } else if !node.body.is_empty() {
            Some(format!("variable :{name} declared after SQL"))
        } else if node.variables.iter().any(|v| v.name == name) {
            Some(format!("variable :{name} declared twice"))
        } else {
            None
        };
        if let Some(message) = problem {
            return Err(SqlDispatchError::malformed(source, line_no, message));
        }
        node.variables.push(variable);
        Ok(())
    }

    fn sql_line(&mut self, line_no: usize, line: &str) -> Result<(), SqlDispatchError> {
        let trimmed = line.trim();
        let source = self.source;
        match self.stack.last_mut() {
            None if trimmed.is_empty() || trimmed.starts_with("--") => Ok(()),
            None => Err(SqlDispatchError::malformed(
                source,
                line_no,
                "SQL outside of any query",
            )),
            // Leading comments belong to no statement; keeping them would make a group
            // look like a query before its first child.
            Some(node) if node.body.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) => {
                Ok(())
            }
            Some(node) if node.has_children => {
                if trimmed.is_empty() || trimmed.starts_with("--") {
                    Ok(())
                } else {
                    Err(SqlDispatchError::malformed(
                        source,
                        line_no,
                        format!("\"{}\" cannot contain both SQL and nested queries", node.name),
                    ))
                }
            }
            Some(node) => {
                node.body.push(line.to_owned());
                Ok(())
            }
        }
    }

    fn compile(&self, name: String, node: Node) -> Result<Template, SqlDispatchError> {
        let body = node.body.join("\n");
        let mut statements = Vec::new();

        for raw in scan_statements(&body, self.dialect) {
            if !raw.has_code {
                continue;
            }
            let mut segments = Vec::new();
            let mut cursor = raw.range.start;
            for ph in &raw.placeholders {
                let var_name = &body[ph.start + 1..ph.end];
                let idx = node
                    .variables
                    .iter()
                    .position(|v| v.name == var_name)
                    .ok_or_else(|| {
                        self.error(
                            node.line,
                            format!("query \"{name}\" uses undeclared variable :{var_name}"),
                        )
                    })?;
                segments.push(Segment::Sql(body[cursor..ph.start].to_owned()));
                segments.push(Segment::Var(idx));
                cursor = ph.end;
            }
            segments.push(Segment::Sql(body[cursor..raw.range.end].to_owned()));
            trim_edges(&mut segments);
            segments.retain(|seg| !matches!(seg, Segment::Sql(text) if text.is_empty()));
            statements.push(Statement { segments });
        }

        if statements.is_empty() {
            return Err(self.error(node.line, format!("query \"{name}\" has no SQL")));
        }

        for var in &node.variables {
            let used = statements
                .iter()
                .flat_map(|s| s.segments.iter())
                .any(|seg| matches!(seg, Segment::Var(i) if node.variables[*i].name == var.name));
            if !used {
                tracing::debug!(query = %name, variable = %var.name, "template variable is never used");
            }
        }

        let description = if node.description.is_empty() {
            None
        } else {
            Some(node.description.join("\n"))
        };

        Ok(Template {
            name,
            dialect: self.dialect,
            description,
            variables: node.variables,
            statements,
        })
    }

    fn current(&mut self, line_no: usize, message: &str) -> Result<&mut Node, SqlDispatchError> {
        let source = self.source;
        self.stack
            .last_mut()
            .ok_or_else(|| SqlDispatchError::malformed(source, line_no, message))
    }

    fn error(&self, line_no: usize, message: impl Into<String>) -> SqlDispatchError {
        SqlDispatchError::malformed(self.source, line_no, message)
    }
}

fn trim_edges(segments: &mut [Segment]) {
    if let Some(Segment::Sql(first)) = segments.first_mut() {
        *first = first.trim_start().to_owned();
    }
    if let Some(Segment::Sql(last)) = segments.last_mut() {
        *last = last.trim_end().to_owned();
    }
}
