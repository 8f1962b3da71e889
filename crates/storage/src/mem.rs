//! In-memory table with filtered scans and plan reporting.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

use catalog::RowSchema;
use common::{DbError, DbResult, Row};
use filter::{Compare, CompareOp, Operand, RowFilter};
use lru::LruCache;
use plan::QueryPlan;
use types::Value;
use uuid::Uuid;

use crate::{Cardinality, Scanner, Table, Transaction};

const FILTER_CACHE_SIZE: usize = 64;

/// Row store backed by a plain vector. Scans snapshot the matching rows, so
/// a scanner stays stable while the table is mutated behind it.
pub struct MemTable {
    name: String,
    schema: Arc<RowSchema>,
    token: Uuid,
    cardinality: Cardinality,
    rows: RwLock<Vec<Row>>,
    filters: Mutex<LruCache<String, Arc<RowFilter>>>,
}

impl MemTable {
    pub fn new(name: &str, schema: Arc<RowSchema>) -> Self {
        Self {
            name: name.to_string(),
            schema,
            token: Uuid::new_v4(),
            cardinality: Cardinality::Many,
            rows: RwLock::new(Vec::new()),
            filters: Mutex::new(LruCache::new(
                NonZeroUsize::new(FILTER_CACHE_SIZE).unwrap(),
            )),
        }
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Append a row after checking it against the schema.
    pub fn insert(&self, values: Vec<Value>) -> DbResult<()> {
        let columns = self.schema.columns();
        if values.len() != columns.len() {
            return Err(DbError::TypeMismatch(format!(
                "table '{}' expects {} columns, got {}",
                self.name,
                columns.len(),
                values.len()
            )));
        }
        for (value, col) in values.iter().zip(columns) {
            if !value.conforms(col.ty, col.nullable) {
                return Err(DbError::TypeMismatch(format!(
                    "column '{}.{}' cannot hold {:?}",
                    self.name, col.name, value
                )));
            }
        }
        self.rows.write().unwrap().push(Row::new(values));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    fn parsed_filter(&self, text: &str) -> DbResult<Arc<RowFilter>> {
        let mut cache = self.filters.lock().unwrap();
        if let Some(found) = cache.get(text) {
            return Ok(found.clone());
        }
        let parsed = RowFilter::parse(text)?;
        parsed.check_columns(|path| {
            path.is_simple() && self.schema.column_index(path.head()).is_some()
        })?;
        let parsed = Arc::new(parsed);
        cache.put(text.to_string(), parsed.clone());
        Ok(parsed)
    }
}

impl Table for MemTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    fn token(&self) -> Uuid {
        self.token
    }

    fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    fn is_empty(&self) -> DbResult<bool> {
        Ok(self.rows.read().unwrap().is_empty())
    }

    fn new_scanner(
        &self,
        _txn: &dyn Transaction,
        filter: Option<&str>,
        args: &[Value],
    ) -> DbResult<Box<dyn Scanner>> {
        let filter = match filter {
            Some(text) => Some(self.parsed_filter(text)?),
            None => None,
        };
        let rows = self.rows.read().unwrap();
        let mut matched = Vec::new();
        for row in rows.iter() {
            let keep = match &filter {
                Some(f) => matches_row(&self.schema, f, row, args)?,
                None => true,
            };
            if keep {
                matched.push(row.clone());
            }
        }
        Ok(Box::new(MemScanner {
            rows: matched,
            pos: 0,
        }))
    }

    fn any_rows(
        &self,
        _txn: &dyn Transaction,
        filter: Option<&str>,
        args: &[Value],
    ) -> DbResult<bool> {
        let filter = match filter {
            Some(text) => Some(self.parsed_filter(text)?),
            None => None,
        };
        let rows = self.rows.read().unwrap();
        for row in rows.iter() {
            let hit = match &filter {
                Some(f) => matches_row(&self.schema, f, row, args)?,
                None => true,
            };
            if hit {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn scanner_plan(&self, filter: Option<&str>, _args: &[Value]) -> DbResult<QueryPlan> {
        let filter = match filter {
            Some(text) => (*self.parsed_filter(text)?).clone(),
            None => RowFilter::True,
        };
        Ok(describe_scan(&self.name, &self.schema, &filter))
    }
}

struct MemScanner {
    rows: Vec<Row>,
    pos: usize,
}

impl Scanner for MemScanner {
    fn row(&self) -> Option<&Row> {
        self.rows.get(self.pos)
    }

    fn step(&mut self) -> DbResult<()> {
        if self.pos < self.rows.len() {
            self.pos += 1;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.rows.clear();
        self.pos = 0;
    }
}

/// Evaluate a table-relative filter against one row.
pub fn matches_row(
    schema: &RowSchema,
    filter: &RowFilter,
    row: &Row,
    args: &[Value],
) -> DbResult<bool> {
    match filter {
        RowFilter::True => Ok(true),
        RowFilter::False => Ok(false),
        RowFilter::And(children) => {
            for child in children {
                if !matches_row(schema, child, row, args)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        RowFilter::Or(children) => {
            for child in children {
                if matches_row(schema, child, row, args)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        RowFilter::Compare(cmp) => compare_row(schema, cmp, row, args),
    }
}

fn compare_row(schema: &RowSchema, cmp: &Compare, row: &Row, args: &[Value]) -> DbResult<bool> {
    let lhs = column_value(schema, row, &cmp.column)?;
    let rhs = match &cmp.rhs {
        Operand::Null => &Value::Null,
        Operand::Column(path) => column_value(schema, row, path)?,
        Operand::Arg(n) => {
            let idx = n.unsigned_abs() as usize - 1;
            args.get(idx).ok_or(DbError::TooFewArguments {
                required: idx + 1,
                supplied: args.len(),
            })?
        }
    };
    compare_values(lhs, cmp.op, rhs)
}

fn column_value<'a>(schema: &RowSchema, row: &'a Row, path: &filter::ColumnPath) -> DbResult<&'a Value> {
    if !path.is_simple() {
        return Err(DbError::UnknownColumn(path.to_string()));
    }
    let ordinal = schema
        .column_index(path.head())
        .ok_or_else(|| DbError::UnknownColumn(path.to_string()))?;
    row.get(ordinal)
        .ok_or_else(|| DbError::Scanner(format!("row is missing column {ordinal}")))
}

/// Shared comparison semantics for scanner-side filters.
pub fn compare_values(lhs: &Value, op: CompareOp, rhs: &Value) -> DbResult<bool> {
    match op {
        CompareOp::Eq => Ok(lhs.equals(rhs)),
        CompareOp::Ne => Ok(!lhs.equals(rhs)),
        CompareOp::In | CompareOp::NotIn => {
            let Value::Array(elements) = rhs else {
                return Err(DbError::Predicate(format!(
                    "membership test needs an array argument, got {rhs:?}"
                )));
            };
            let found = elements.iter().any(|e| lhs.equals(e));
            Ok(if op == CompareOp::In { found } else { !found })
        }
        _ => {
            let ord = lhs.compare(rhs).ok_or_else(|| {
                DbError::Predicate(format!("cannot compare {lhs:?} against {rhs:?}"))
            })?;
            Ok(match op {
                CompareOp::Ge => ord.is_ge(),
                CompareOp::Lt => ord.is_lt(),
                CompareOp::Le => ord.is_le(),
                CompareOp::Gt => ord.is_gt(),
                _ => unreachable!(),
            })
        }
    }
}

/// Classify what a scan with this filter does, for the plan tree.
fn describe_scan(table: &str, schema: &RowSchema, filter: &RowFilter) -> QueryPlan {
    if filter.is_false() {
        return QueryPlan::Empty;
    }

    let pk_names = schema.primary_key_names();
    let full_scan = QueryPlan::FullScan {
        table: table.to_string(),
        which: "primary key".into(),
        key_columns: pk_names.clone(),
    };
    if filter.is_true() {
        return full_scan;
    }

    // Equality coverage over the top-level conjuncts decides between a
    // single-row load, a key range, and a filtered full scan.
    let conjuncts = filter.clone().into_conjuncts();
    let mut eq_names = Vec::new();
    for conjunct in &conjuncts {
        if let RowFilter::Compare(Compare {
            column,
            op: CompareOp::Eq,
            rhs: Operand::Arg(_) | Operand::Null,
        }) = conjunct
        {
            if column.is_simple() {
                eq_names.push(column.head().to_string());
            }
        }
    }

    let covers = |key: &[String]| !key.is_empty() && key.iter().all(|k| eq_names.contains(k));

    if covers(&pk_names) {
        return QueryPlan::LoadOne {
            table: table.to_string(),
            which: "primary key".into(),
            key_columns: pk_names,
            filter: filter.to_string(),
        };
    }
    for key in schema.alternate_keys() {
        let names: Vec<String> = key
            .iter()
            .map(|&i| schema.columns()[i].name.clone())
            .collect();
        if covers(&names) {
            return QueryPlan::LoadOne {
                table: table.to_string(),
                which: "alternate key".into(),
                key_columns: names,
                filter: filter.to_string(),
            };
        }
    }

    // A range comparison on the leading primary key column narrows the scan.
    if let Some(lead) = pk_names.first() {
        let mut range = None;
        let mut rest = Vec::new();
        for conjunct in conjuncts {
            let is_lead_range = matches!(
                &conjunct,
                RowFilter::Compare(Compare { column, op, rhs: Operand::Arg(_) })
                    if op.is_range() && column.is_simple() && column.head() == lead
            );
            if is_lead_range && range.is_none() {
                range = Some(conjunct.to_string());
            } else {
                rest.push(conjunct);
            }
        }
        if let Some(range) = range {
            let scan = QueryPlan::RangeScan {
                table: table.to_string(),
                which: "primary key".into(),
                key_columns: pk_names,
                range,
            };
            let rest = RowFilter::and(rest);
            return if rest.is_true() {
                scan
            } else {
                QueryPlan::Filter {
                    filter: rest.to_string(),
                    source: Box::new(scan),
                }
            };
        }
    }

    QueryPlan::Filter {
        filter: filter.to_string(),
        source: Box::new(full_scan),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoTxn;
    use catalog::{ColumnInfo, RowSchema};
    use pretty_assertions::assert_eq;
    use types::ValueType;

    fn people() -> MemTable {
        let schema = Arc::new(
            RowSchema::new(
                vec![
                    ColumnInfo::new("id", ValueType::Int),
                    ColumnInfo::new("name", ValueType::Text).nullable(),
                ],
                &["id"],
            )
            .unwrap(),
        );
        let table = MemTable::new("people", schema);
        table.insert(vec![Value::Int(1), Value::Text("a".into())]).unwrap();
        table.insert(vec![Value::Int(2), Value::Text("b".into())]).unwrap();
        table.insert(vec![Value::Int(3), Value::Null]).unwrap();
        table
    }

    #[test]
    fn insert_validates_schema() {
        let table = people();
        assert!(matches!(
            table.insert(vec![Value::Int(4)]),
            Err(DbError::TypeMismatch(_))
        ));
        assert!(matches!(
            table.insert(vec![Value::Text("x".into()), Value::Null]),
            Err(DbError::TypeMismatch(_))
        ));
        assert!(matches!(
            table.insert(vec![Value::Null, Value::Null]),
            Err(DbError::TypeMismatch(_))
        ));
    }

    #[test]
    fn unfiltered_scan_sees_all_rows() {
        let table = people();
        let mut scanner = table.new_scanner(&NoTxn, None, &[]).unwrap();
        let mut seen = 0;
        while scanner.row().is_some() {
            seen += 1;
            scanner.step().unwrap();
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn filtered_scan_binds_arguments() {
        let table = people();
        let mut scanner = table
            .new_scanner(&NoTxn, Some("id >= ?1"), &[Value::Int(2)])
            .unwrap();
        assert_eq!(scanner.row().unwrap().values[0], Value::Int(2));
        scanner.step().unwrap();
        assert_eq!(scanner.row().unwrap().values[0], Value::Int(3));
        scanner.step().unwrap();
        assert!(scanner.row().is_none());
    }

    #[test]
    fn null_literal_filters_match_null_columns() {
        let table = people();
        let mut scanner = table.new_scanner(&NoTxn, Some("name == null"), &[]).unwrap();
        assert_eq!(scanner.row().unwrap().values[0], Value::Int(3));
        scanner.step().unwrap();
        assert!(scanner.row().is_none());
    }

    #[test]
    fn membership_requires_array_argument() {
        let table = people();
        let err = table
            .new_scanner(&NoTxn, Some("id in ?1"), &[Value::Int(1)])
            .unwrap_err();
        assert!(matches!(err, DbError::Predicate(_)));

        let mut scanner = table
            .new_scanner(
                &NoTxn,
                Some("id in ?1"),
                &[Value::Array(vec![Value::Int(1), Value::Int(3)])],
            )
            .unwrap();
        assert_eq!(scanner.row().unwrap().values[0], Value::Int(1));
        scanner.step().unwrap();
        assert_eq!(scanner.row().unwrap().values[0], Value::Int(3));
    }

    #[test]
    fn missing_argument_is_reported() {
        let table = people();
        let err = table.new_scanner(&NoTxn, Some("id == ?2"), &[Value::Int(1)]).unwrap_err();
        assert!(matches!(
            err,
            DbError::TooFewArguments { required: 2, supplied: 1 }
        ));
    }

    #[test]
    fn unknown_filter_column_is_rejected() {
        let table = people();
        let err = table.new_scanner(&NoTxn, Some("nope == ?1"), &[]).unwrap_err();
        assert!(matches!(err, DbError::UnknownColumn(_)));
    }

    #[test]
    fn any_rows_short_circuits() {
        let table = people();
        assert!(table.any_rows(&NoTxn, Some("id == ?1"), &[Value::Int(2)]).unwrap());
        assert!(!table.any_rows(&NoTxn, Some("id == ?1"), &[Value::Int(9)]).unwrap());
    }

    #[test]
    fn scanner_plans_classify_access() {
        let table = people();

        assert_eq!(
            table.scanner_plan(None, &[]).unwrap(),
            QueryPlan::FullScan {
                table: "people".into(),
                which: "primary key".into(),
                key_columns: vec!["id".into()],
            }
        );

        assert_eq!(
            table.scanner_plan(Some("id == ?1"), &[]).unwrap(),
            QueryPlan::LoadOne {
                table: "people".into(),
                which: "primary key".into(),
                key_columns: vec!["id".into()],
                filter: "id == ?1".into(),
            }
        );

        assert_eq!(
            table.scanner_plan(Some("id >= ?1 && name == ?2"), &[]).unwrap(),
            QueryPlan::Filter {
                filter: "name == ?2".into(),
                source: Box::new(QueryPlan::RangeScan {
                    table: "people".into(),
                    which: "primary key".into(),
                    key_columns: vec!["id".into()],
                    range: "id >= ?1".into(),
                }),
            }
        );

        assert_eq!(
            table.scanner_plan(Some("name == ?1"), &[]).unwrap(),
            QueryPlan::Filter {
                filter: "name == ?1".into(),
                source: Box::new(QueryPlan::FullScan {
                    table: "people".into(),
                    which: "primary key".into(),
                    key_columns: vec!["id".into()],
                }),
            }
        );

        assert_eq!(table.scanner_plan(Some("false"), &[]).unwrap(), QueryPlan::Empty);
    }

    #[test]
    fn alternate_key_load_one() {
        let schema = Arc::new(
            RowSchema::new(
                vec![
                    ColumnInfo::new("id", ValueType::Int),
                    ColumnInfo::new("email", ValueType::Text),
                ],
                &["id"],
            )
            .unwrap()
            .with_alternate_key(&["email"])
            .unwrap(),
        );
        let table = MemTable::new("users", schema);
        assert_eq!(
            table.scanner_plan(Some("email == ?1"), &[]).unwrap(),
            QueryPlan::LoadOne {
                table: "users".into(),
                which: "alternate key".into(),
                key_columns: vec!["email".into()],
                filter: "email == ?1".into(),
            }
        );
    }
}
