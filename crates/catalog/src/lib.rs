use std::sync::Arc;

use ahash::RandomState;
use common::{DbError, DbResult};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use types::ValueType;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Role a column plays in its table's keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRole {
    None,
    Primary,
    Alternate,
}

/// Metadata for one column of a table row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub ty: ValueType,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: &str, ty: ValueType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Ordered column metadata for one table row type, with key information.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RowSchema {
    columns: Vec<ColumnInfo>,
    primary_key: Vec<usize>,
    alternate_keys: Vec<Vec<usize>>,
    #[serde(skip)]
    #[serde(default)]
    by_name: Map<String, usize>,
}

impl RowSchema {
    /// Create a schema, validating column names and key references.
    pub fn new(columns: Vec<ColumnInfo>, primary_key: &[&str]) -> DbResult<Self> {
        let mut by_name = Map::default();
        for (idx, col) in columns.iter().enumerate() {
            if by_name.insert(col.name.clone(), idx).is_some() {
                return Err(DbError::DuplicateColumn(col.name.clone()));
            }
        }
        let mut schema = Self {
            columns,
            primary_key: Vec::new(),
            alternate_keys: Vec::new(),
            by_name,
        };
        schema.primary_key = schema.resolve_key(primary_key)?;
        Ok(schema)
    }

    /// Register an alternate (unique secondary) key.
    pub fn with_alternate_key(mut self, columns: &[&str]) -> DbResult<Self> {
        let key = self.resolve_key(columns)?;
        if key.is_empty() {
            return Err(DbError::Syntax("alternate key needs columns".into()));
        }
        self.alternate_keys.push(key);
        Ok(self)
    }

    fn resolve_key(&self, names: &[&str]) -> DbResult<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.column_index(name)
                    .ok_or_else(|| DbError::UnknownColumn((*name).to_string()))
            })
            .collect()
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    pub fn alternate_keys(&self) -> &[Vec<usize>] {
        &self.alternate_keys
    }

    pub fn key_role(&self, ordinal: usize) -> KeyRole {
        if self.primary_key.contains(&ordinal) {
            KeyRole::Primary
        } else if self.alternate_keys.iter().any(|k| k.contains(&ordinal)) {
            KeyRole::Alternate
        } else {
            KeyRole::None
        }
    }

    /// Names of the primary key columns, in key order.
    pub fn primary_key_names(&self) -> Vec<String> {
        self.primary_key
            .iter()
            .map(|&i| self.columns[i].name.clone())
            .collect()
    }
}

// Deserialized schemas rebuild the name index lazily; structural equality
// ignores it.
impl PartialEq for RowSchema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
            && self.primary_key == other.primary_key
            && self.alternate_keys == other.alternate_keys
    }
}

impl Eq for RowSchema {}

/// One declared column of a joined row: a named slot whose value is a row of
/// the given schema.
#[derive(Clone, Debug)]
pub struct JoinColumn {
    pub name: String,
    pub schema: Arc<RowSchema>,
    pub nullable: bool,
}

impl JoinColumn {
    pub fn new(name: &str, schema: Arc<RowSchema>) -> Self {
        Self {
            name: name.to_string(),
            schema,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// The declared row type a join specification is parsed against.
#[derive(Clone, Debug)]
pub struct JoinSchema {
    columns: Vec<JoinColumn>,
    by_name: Map<String, usize>,
}

impl JoinSchema {
    pub fn new(columns: Vec<JoinColumn>) -> DbResult<Self> {
        let mut by_name = Map::default();
        for (idx, col) in columns.iter().enumerate() {
            if by_name.insert(col.name.clone(), idx).is_some() {
                return Err(DbError::DuplicateColumn(col.name.clone()));
            }
        }
        Ok(Self { columns, by_name })
    }

    pub fn columns(&self) -> &[JoinColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&JoinColumn> {
        self.by_name.get(name).map(|&idx| &self.columns[idx])
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pq_schema() -> RowSchema {
        RowSchema::new(
            vec![
                ColumnInfo::new("id", ValueType::Int),
                ColumnInfo::new("name", ValueType::Text).nullable(),
            ],
            &["id"],
        )
        .unwrap()
    }

    #[test]
    fn duplicate_columns_rejected() {
        let err = RowSchema::new(
            vec![
                ColumnInfo::new("id", ValueType::Int),
                ColumnInfo::new("id", ValueType::Text),
            ],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, DbError::DuplicateColumn(_)));
    }

    #[test]
    fn key_roles_resolve() {
        let schema = pq_schema().with_alternate_key(&["name"]).unwrap();
        assert_eq!(schema.key_role(0), KeyRole::Primary);
        assert_eq!(schema.key_role(1), KeyRole::Alternate);
        assert_eq!(schema.primary_key_names(), vec!["id".to_string()]);
    }

    #[test]
    fn unknown_key_column_rejected() {
        let err = RowSchema::new(vec![ColumnInfo::new("id", ValueType::Int)], &["nope"])
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownColumn(_)));
    }

    #[test]
    fn join_schema_rejects_duplicates() {
        let schema = Arc::new(pq_schema());
        let err = JoinSchema::new(vec![
            JoinColumn::new("p", schema.clone()),
            JoinColumn::new("p", schema),
        ])
        .unwrap_err();
        assert!(matches!(err, DbError::DuplicateColumn(_)));
    }

    #[test]
    fn schema_equality_is_structural() {
        assert_eq!(pq_schema(), pq_schema());
        let other = RowSchema::new(vec![ColumnInfo::new("id", ValueType::Int)], &["id"]).unwrap();
        assert_ne!(pq_schema(), other);
    }
}
