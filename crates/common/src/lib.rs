pub mod pretty;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::Value;

/// Positional row representation backed by `types::Value`.
/// Examples:
/// - `let row = Row::new(vec![Value::Int(1)]);`
/// - `let row = Row::new(vec![Value::Text("alice".into()), Value::Null]);`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, ordinal: usize) -> Option<&Value> {
        self.values.get(ordinal)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Canonical error type shared across the join subsystem.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("syntax: {0}")]
    Syntax(String),
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("unsupported join type: {0}")]
    UnsupportedJoinType(String),
    #[error("too few arguments: query needs {required}, caller supplied {supplied}")]
    TooFewArguments { required: usize, supplied: usize },
    #[error("scanner: {0}")]
    Scanner(String),
    #[error("predicate: {0}")]
    Predicate(String),
    #[error("join results cannot be modified")]
    Unmodifiable,
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{DbError, DbResult, Row};
    pub use types::{Value, ValueType};
}
