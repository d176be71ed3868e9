//! Query-related data models.
//!
//! This module defines types for SQL query requests and results.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::convert::Infallible;
use std::str::FromStr;

/// One result row: column name to value, keys in result column order.
pub type Record = serde_json::Map<String, JsonValue>;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Arrays and objects, bound as `jsonb`
    Json(JsonValue),
}

/// Parse a parameter given on the command line.
///
/// JSON scalars (`42`, `1.5`, `true`, `null`, `"quoted"`) keep their type;
/// JSON arrays and objects become [`QueryParam::Json`]; anything else is taken
/// verbatim as a string.
impl FromStr for QueryParam {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match serde_json::from_str::<JsonValue>(s) {
            Ok(value) => QueryParam::from(value),
            Err(_) => QueryParam::String(s.to_string()),
        })
    }
}

impl From<JsonValue> for QueryParam {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(v) => Self::Bool(v),
            JsonValue::Number(n) => match n.as_i64() {
                Some(v) => Self::Int(v),
                None => match n.as_f64() {
                    Some(v) => Self::Float(v),
                    None => Self::String(n.to_string()),
                },
            },
            JsonValue::String(v) => Self::String(v),
            other => Self::Json(other),
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// How many result rows a statement should materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Every row, as a (possibly empty) sequence
    #[default]
    All,
    /// The first row, or nothing when the result is empty
    One,
    /// No rows; only the statement's effects
    None,
}

impl std::fmt::Display for FetchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::One => write!(f, "one"),
            Self::None => write!(f, "none"),
        }
    }
}

impl FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "one" => Ok(Self::One),
            "none" => Ok(Self::None),
            other => Err(format!(
                "Unknown fetch mode '{}'; expected all, one or none",
                other
            )),
        }
    }
}

/// A statement to run, its positional parameters and the result shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySpec {
    pub statement: String,
    /// Empty means "no parameters supplied"
    #[serde(default)]
    pub params: Vec<QueryParam>,
    #[serde(default)]
    pub fetch_mode: FetchMode,
}

impl QuerySpec {
    /// Create a query spec returning all rows.
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: Vec::new(),
            fetch_mode: FetchMode::All,
        }
    }

    /// Add a parameter to this query.
    pub fn with_param(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Replace all parameters.
    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    /// Set the fetch mode.
    pub fn with_fetch_mode(mut self, fetch_mode: FetchMode) -> Self {
        self.fetch_mode = fetch_mode;
        self
    }

    /// Whether parameters were supplied.
    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }
}

/// Result of a statement, shaped by its [`FetchMode`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// `FetchMode::All`
    Rows(Vec<Record>),
    /// `FetchMode::One`
    Row(Option<Record>),
    /// `FetchMode::None`
    Done { rows_affected: u64 },
}

impl QueryOutput {
    /// The fetch mode this output answers.
    pub fn fetch_mode(&self) -> FetchMode {
        match self {
            Self::Rows(_) => FetchMode::All,
            Self::Row(_) => FetchMode::One,
            Self::Done { .. } => FetchMode::None,
        }
    }

    /// Take the rows of an `all` result.
    pub fn into_rows(self) -> Option<Vec<Record>> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Take the row of a `one` result.
    pub fn into_row(self) -> Option<Option<Record>> {
        match self {
            Self::Row(row) => Some(row),
            _ => None,
        }
    }

    /// Rows affected by a `none` statement.
    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            Self::Done { rows_affected } => Some(*rows_affected),
            _ => None,
        }
    }

    /// Render the output as JSON: an array, an object or `null`, or a
    /// `{"rows_affected": n}` summary.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Rows(rows) => {
                JsonValue::Array(rows.iter().cloned().map(JsonValue::Object).collect())
            }
            Self::Row(Some(row)) => JsonValue::Object(row.clone()),
            Self::Row(None) => JsonValue::Null,
            Self::Done { rows_affected } => serde_json::json!({ "rows_affected": rows_affected }),
        }
    }
}
