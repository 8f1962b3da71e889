//! Join-row layout: one slot per top-level source, in the order the sources
//! appear in the original spec text. Planner permutations never change the
//! layout, so both halves of a split full join share one shape.

use std::sync::Arc;

use ahash::RandomState;
use catalog::RowSchema;
use common::{DbError, DbResult};
use filter::ColumnPath;
use hashbrown::HashMap;

type Map<K, V> = HashMap<K, V, RandomState>;

/// What a slot holds: a table row, or the nested row of a wrapped full join.
#[derive(Clone, Debug)]
pub enum SlotKind {
    Table(Arc<RowSchema>),
    Nested(Arc<JoinLayout>),
}

#[derive(Clone, Debug)]
pub struct SlotDef {
    pub name: String,
    pub kind: SlotKind,
    /// Declared nullable, or null-padded by an outer/anti join position.
    pub nullable: bool,
}

/// Slot layout of a join row.
#[derive(Clone, Debug, Default)]
pub struct JoinLayout {
    slots: Vec<SlotDef>,
    by_name: Map<String, usize>,
}

/// A column path resolved against a layout: slot indices to descend through,
/// then an optional column ordinal (`None` refers to the slot itself).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedPath {
    pub steps: Vec<usize>,
    pub column: Option<usize>,
}

impl JoinLayout {
    pub fn new(slots: Vec<SlotDef>) -> JoinLayout {
        let by_name = slots
            .iter()
            .enumerate()
            .map(|(idx, slot)| (slot.name.clone(), idx))
            .collect();
        JoinLayout { slots, by_name }
    }

    pub fn slots(&self) -> &[SlotDef] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Does this layout bind the name, directly or inside a nested layout?
    pub fn binds(&self, name: &str) -> bool {
        if self.by_name.contains_key(name) {
            return true;
        }
        self.slots.iter().any(|slot| match &slot.kind {
            SlotKind::Nested(inner) => inner.binds(name),
            SlotKind::Table(_) => false,
        })
    }

    /// Resolve a dotted path to slot steps plus a column ordinal.
    pub fn resolve(&self, path: &ColumnPath) -> DbResult<ResolvedPath> {
        let unknown = || DbError::UnknownColumn(path.to_string());
        let head = path.head();

        if let Some(idx) = self.index_of(head) {
            let segments = path.segments();
            return match &self.slots[idx].kind {
                SlotKind::Table(schema) => match segments.len() {
                    1 => Ok(ResolvedPath {
                        steps: vec![idx],
                        column: None,
                    }),
                    2 => {
                        let ordinal =
                            schema.column_index(&segments[1]).ok_or_else(unknown)?;
                        Ok(ResolvedPath {
                            steps: vec![idx],
                            column: Some(ordinal),
                        })
                    }
                    _ => Err(unknown()),
                },
                SlotKind::Nested(inner) => {
                    if segments.len() == 1 {
                        Ok(ResolvedPath {
                            steps: vec![idx],
                            column: None,
                        })
                    } else {
                        let tail = ColumnPath::new(segments[1..].to_vec());
                        let mut resolved = inner.resolve(&tail)?;
                        resolved.steps.insert(0, idx);
                        Ok(resolved)
                    }
                }
            };
        }

        // A member of a wrapped full join may be referenced directly.
        for (idx, slot) in self.slots.iter().enumerate() {
            if let SlotKind::Nested(inner) = &slot.kind {
                if inner.binds(head) {
                    let mut resolved = inner.resolve(path)?;
                    resolved.steps.insert(0, idx);
                    return Ok(resolved);
                }
            }
        }
        Err(unknown())
    }

    /// May the value at this path be null: any slot on the way is nullable or
    /// null-padded, or the terminal column is declared nullable.
    pub fn nullable(&self, path: &ColumnPath) -> DbResult<bool> {
        let resolved = self.resolve(path)?;
        let mut layout = self;
        let mut nullable = false;
        let mut schema: Option<&Arc<RowSchema>> = None;
        for &step in &resolved.steps {
            let slot = &layout.slots[step];
            nullable |= slot.nullable;
            match &slot.kind {
                SlotKind::Table(s) => schema = Some(s),
                SlotKind::Nested(inner) => layout = inner,
            }
        }
        if let (Some(ordinal), Some(schema)) = (resolved.column, schema) {
            nullable |= schema.columns()[ordinal].nullable;
        }
        Ok(nullable)
    }
}
