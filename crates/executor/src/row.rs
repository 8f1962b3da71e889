//! The joined output row: one slot per top-level source.

use std::fmt;
use std::sync::Arc;

use common::Row;
use common::pretty::format_row;
use planner::{JoinLayout, ResolvedPath};
use types::Value;

/// Value bound into one slot of a join row.
#[derive(Clone, Debug, PartialEq)]
pub enum SlotValue {
    /// A row of the slot's table.
    Row(Row),
    /// The nested row of a full-join pseudo-source.
    Nested(JoinRow),
}

/// Result of walking a resolved path through a join row.
#[derive(Clone, Debug, PartialEq)]
pub enum PathValue<'a> {
    /// A slot on the way to the value was null.
    NullPrefix,
    /// The path named a whole slot; `null` tells whether it is bound.
    Slot { null: bool },
    Value(&'a Value),
}

/// One joined result row. Slots are null until their level binds a row, and
/// null again when an outer or anti join pads them.
#[derive(Clone, Debug)]
pub struct JoinRow {
    layout: Arc<JoinLayout>,
    slots: Vec<Option<SlotValue>>,
}

impl JoinRow {
    pub fn new(layout: Arc<JoinLayout>) -> JoinRow {
        let slots = vec![None; layout.len()];
        JoinRow { layout, slots }
    }

    pub fn layout(&self) -> &Arc<JoinLayout> {
        &self.layout
    }

    /// The table row bound under a top-level source name.
    pub fn row(&self, name: &str) -> Option<&Row> {
        match self.named(name) {
            Some(SlotValue::Row(row)) => Some(row),
            _ => None,
        }
    }

    /// The nested join row bound under a full-join source name.
    pub fn nested(&self, name: &str) -> Option<&JoinRow> {
        match self.named(name) {
            Some(SlotValue::Nested(row)) => Some(row),
            _ => None,
        }
    }

    fn named(&self, name: &str) -> Option<&SlotValue> {
        let idx = self.layout.index_of(name)?;
        self.slots[idx].as_ref()
    }

    pub(crate) fn slot(&self, idx: usize) -> Option<&SlotValue> {
        self.slots[idx].as_ref()
    }

    pub(crate) fn set_row(&mut self, idx: usize, row: Row) {
        self.slots[idx] = Some(SlotValue::Row(row));
    }

    pub(crate) fn set_nested(&mut self, idx: usize, row: JoinRow) {
        self.slots[idx] = Some(SlotValue::Nested(row));
    }

    pub(crate) fn clear_slot(&mut self, idx: usize) {
        self.slots[idx] = None;
    }

    /// Walk a resolved path. A null slot before the terminal step fails the
    /// prefix; the terminal step yields either the slot itself or one column
    /// value.
    pub fn lookup<'a>(&'a self, path: &ResolvedPath) -> PathValue<'a> {
        let mut current = self;
        for (pos, &step) in path.steps.iter().enumerate() {
            let last = pos + 1 == path.steps.len();
            match current.slots.get(step).and_then(Option::as_ref) {
                None => {
                    return if last && path.column.is_none() {
                        PathValue::Slot { null: true }
                    } else {
                        PathValue::NullPrefix
                    };
                }
                Some(SlotValue::Row(row)) => {
                    if !last {
                        return PathValue::NullPrefix;
                    }
                    return match path.column {
                        None => PathValue::Slot { null: false },
                        Some(ordinal) => match row.get(ordinal) {
                            Some(value) => PathValue::Value(value),
                            None => PathValue::NullPrefix,
                        },
                    };
                }
                Some(SlotValue::Nested(nested)) => {
                    if last && path.column.is_none() {
                        return PathValue::Slot { null: false };
                    }
                    current = nested;
                }
            }
        }
        PathValue::NullPrefix
    }

    /// Value at a path, with null prefixes collapsing to null. Used for
    /// argument assignment writes.
    pub(crate) fn value_at(&self, path: &ResolvedPath) -> Value {
        match self.lookup(path) {
            PathValue::Value(value) => value.clone(),
            PathValue::NullPrefix | PathValue::Slot { .. } => Value::Null,
        }
    }
}

// Rows compare by bound slots; the shared layout is identity, not state.
impl PartialEq for JoinRow {
    fn eq(&self, other: &JoinRow) -> bool {
        self.slots == other.slots
    }
}

impl fmt::Display for JoinRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, def) in self.layout.slots().iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: ", def.name)?;
            match &self.slots[idx] {
                None => write!(f, "null")?,
                Some(SlotValue::Row(row)) => write!(f, "({})", format_row(row))?,
                Some(SlotValue::Nested(nested)) => write!(f, "{nested}")?,
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::{ColumnInfo, RowSchema};
    use planner::{SlotDef, SlotKind};
    use types::ValueType;

    fn layout() -> Arc<JoinLayout> {
        let schema = Arc::new(
            RowSchema::new(vec![ColumnInfo::new("id", ValueType::Int)], &["id"]).unwrap(),
        );
        Arc::new(JoinLayout::new(vec![
            SlotDef {
                name: "p".into(),
                kind: SlotKind::Table(schema.clone()),
                nullable: false,
            },
            SlotDef {
                name: "q".into(),
                kind: SlotKind::Table(schema),
                nullable: true,
            },
        ]))
    }

    #[test]
    fn lookup_distinguishes_null_prefix_from_null_slot() {
        let row = JoinRow::new(layout());
        let whole = ResolvedPath {
            steps: vec![1],
            column: None,
        };
        let column = ResolvedPath {
            steps: vec![1],
            column: Some(0),
        };
        assert_eq!(row.lookup(&whole), PathValue::Slot { null: true });
        assert_eq!(row.lookup(&column), PathValue::NullPrefix);
    }

    #[test]
    fn lookup_reads_bound_values() {
        let mut row = JoinRow::new(layout());
        row.set_row(0, Row::new(vec![Value::Int(7)]));
        let path = ResolvedPath {
            steps: vec![0],
            column: Some(0),
        };
        assert_eq!(row.lookup(&path), PathValue::Value(&Value::Int(7)));
        assert_eq!(row.value_at(&path), Value::Int(7));
        assert_eq!(
            row.lookup(&ResolvedPath {
                steps: vec![0],
                column: None
            }),
            PathValue::Slot { null: false }
        );
    }

    #[test]
    fn display_shows_slot_names() {
        let mut row = JoinRow::new(layout());
        row.set_row(0, Row::new(vec![Value::Int(1)]));
        assert_eq!(row.to_string(), "{p: (1), q: null}");
    }
}
