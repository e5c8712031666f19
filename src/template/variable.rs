use std::collections::HashMap;
use std::fmt;

use chrono::DateTime;

use crate::types::{RowValues, parse_timestamp};

/// Scalar type a template variable accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    Blob,
}

impl VarType {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" | "str" => Some(VarType::String),
            "int" | "integer" => Some(VarType::Int),
            "float" | "double" => Some(VarType::Float),
            "bool" | "boolean" => Some(VarType::Bool),
            "timestamp" => Some(VarType::Timestamp),
            "blob" | "binary" => Some(VarType::Blob),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            VarType::String => "string",
            VarType::Int => "int",
            VarType::Float => "float",
            VarType::Bool => "bool",
            VarType::Timestamp => "timestamp",
            VarType::Blob => "blob",
        }
    }

    /// Fit `value` to this type, widening where it is lossless.
    fn coerce(self, value: &RowValues) -> Result<RowValues, String> {
        let coerced = match (self, value) {
            (VarType::String, RowValues::Text(_))
            | (VarType::Int, RowValues::Int(_))
            | (VarType::Float, RowValues::Float(_))
            | (VarType::Bool, RowValues::Bool(_))
            | (VarType::Timestamp, RowValues::Timestamp(_))
            | (VarType::Blob, RowValues::Blob(_)) => Some(value.clone()),
            #[allow(clippy::cast_precision_loss)]
            (VarType::Float, RowValues::Int(i)) => Some(RowValues::Float(*i as f64)),
            (VarType::Bool, RowValues::Int(i)) if *i == 0 || *i == 1 => {
                Some(RowValues::Bool(*i == 1))
            }
            (VarType::Timestamp, RowValues::Int(secs)) => {
                DateTime::from_timestamp(*secs, 0).map(|dt| RowValues::Timestamp(dt.naive_utc()))
            }
            (VarType::Timestamp, RowValues::Text(s)) => parse_timestamp(s).map(RowValues::Timestamp),
            (VarType::Blob, RowValues::Text(s)) => Some(RowValues::Blob(s.as_bytes().to_vec())),
            _ => None,
        };
        coerced.ok_or_else(|| format!("expected {}, got {}", self.name(), value.kind()))
    }

    fn parse_literal(self, literal: &str) -> Result<RowValues, String> {
        let bad = || format!("\"{literal}\" is not a valid {} default", self.name());
        match self {
            VarType::String => parse_text(literal).map(RowValues::Text),
            VarType::Int => literal.parse().map(RowValues::Int).map_err(|_| bad()),
            VarType::Float => literal.parse().map(RowValues::Float).map_err(|_| bad()),
            VarType::Bool => match literal.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(RowValues::Bool(true)),
                "false" | "0" => Ok(RowValues::Bool(false)),
                _ => Err(bad()),
            },
            VarType::Timestamp => {
                let text = parse_text(literal)?;
                match text.parse::<i64>() {
                    Ok(secs) => self.coerce(&RowValues::Int(secs)),
                    Err(_) => parse_timestamp(&text)
                        .map(RowValues::Timestamp)
                        .ok_or_else(bad),
                }
            }
            VarType::Blob => parse_text(literal).map(|s| RowValues::Blob(s.into_bytes())),
        }
    }
}

/// Quoted defaults use JSON string syntax; bare words are taken verbatim.
fn parse_text(literal: &str) -> Result<String, String> {
    if literal.starts_with('"') {
        serde_json::from_str(literal).map_err(|err| format!("bad string literal {literal}: {err}"))
    } else {
        Ok(literal.to_owned())
    }
}

/// A variable declared by a `-- #    :name type [default]` line.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: VarType,
    /// Declared with a leading `?`; accepts NULL
    pub nullable: bool,
    /// Declared as `list:<type>`; binds a parenthesized list
    pub list: bool,
    pub default: Option<RowValues>,
}

impl Variable {
    /// Parse a declaration's type token (`int`, `?string`, `list:int`) and optional default.
    pub(crate) fn parse(name: &str, type_token: &str, default: Option<&str>) -> Result<Self, String> {
        let (list, scalar) = match type_token.strip_prefix("list:") {
            Some(rest) => (true, rest),
            None => (false, type_token),
        };
        let (nullable, scalar) = match scalar.strip_prefix('?') {
            Some(rest) => (true, rest),
            None => (false, scalar),
        };
        let ty = VarType::from_name(&scalar.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown type \"{type_token}\" for variable :{name}"))?;

        let default = match default.map(str::trim).filter(|d| !d.is_empty()) {
            None => None,
            Some(_) if list => {
                return Err(format!("list variable :{name} cannot have a default"));
            }
            Some(d) if nullable && d.eq_ignore_ascii_case("null") => Some(RowValues::Null),
            Some(d) => Some(
                ty.parse_literal(d)
                    .map_err(|msg| format!("variable :{name}: {msg}"))?,
            ),
        };

        Ok(Self {
            name: name.to_owned(),
            ty,
            nullable,
            list,
            default,
        })
    }

    pub(crate) fn bind_scalar(&self, value: &RowValues) -> Result<RowValues, String> {
        if value.is_null() {
            return if self.nullable {
                Ok(RowValues::Null)
            } else {
                Err(format!("NULL is not allowed for non-nullable {}", self.ty.name()))
            };
        }
        self.ty.coerce(value)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{} ", self.name)?;
        if self.list {
            f.write_str("list:")?;
        }
        if self.nullable {
            f.write_str("?")?;
        }
        f.write_str(self.ty.name())
    }
}

/// Value supplied for one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Scalar(RowValues),
    List(Vec<RowValues>),
}

/// Named arguments for one query execution.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: HashMap<String, ArgValue>,
}

impl Args {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<RowValues>) -> Self {
        self.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_list<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<RowValues>,
    {
        self.values.insert(
            name.into(),
            ArgValue::List(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<RowValues>) {
        self.values
            .insert(name.into(), ArgValue::Scalar(value.into()));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for Args
where
    K: Into<String>,
    V: Into<RowValues>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut args = Args::new();
        for (name, value) in iter {
            args.insert(name, value);
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_tokens() {
        let v = Variable::parse("ids", "list:int", None).unwrap();
        assert!(v.list && !v.nullable && v.ty == VarType::Int);

        let v = Variable::parse("note", "?string", Some("null")).unwrap();
        assert!(v.nullable);
        assert_eq!(v.default, Some(RowValues::Null));

        let v = Variable::parse("greeting", "string", Some("\"hi \\\"there\\\"\"")).unwrap();
        assert_eq!(v.default, Some(RowValues::Text("hi \"there\"".into())));

        assert!(Variable::parse("x", "decimal", None).is_err());
        assert!(Variable::parse("x", "int", Some("ten")).is_err());
        assert!(Variable::parse("x", "list:int", Some("1")).is_err());
    }

    #[test]
    fn coerces_compatible_values() {
        let float = Variable::parse("f", "float", None).unwrap();
        assert_eq!(float.bind_scalar(&RowValues::Int(2)), Ok(RowValues::Float(2.0)));

        let ts = Variable::parse("t", "timestamp", None).unwrap();
        assert!(matches!(
            ts.bind_scalar(&RowValues::Int(0)),
            Ok(RowValues::Timestamp(_))
        ));

        let int = Variable::parse("i", "int", None).unwrap();
        assert!(int.bind_scalar(&RowValues::Text("1".into())).is_err());
        assert!(int.bind_scalar(&RowValues::Null).is_err());
    }

    #[test]
    fn args_collect_from_pairs() {
        let args: Args = [("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(args.len(), 2);
        assert_eq!(args.get("b"), Some(&ArgValue::Scalar(RowValues::Int(2))));
    }
}
