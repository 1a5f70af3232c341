//! Turning collection diffs into write operations.
//!
//! A cascading write compares the previously known state of a relation with
//! the state the caller wants persisted:
//! - REMOVED elements become deletes
//! - ADDED elements become inserts
//! - HELD elements become updates carrying only the columns that changed
//!
//! Ordered (indexed) associations additionally get positional link operations
//! so a reorder rewrites index columns instead of deleting and re-inserting.

use crate::diff::State;
use crate::differ::CollectionDiffer;
use graphmodel_core::{Model, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::Hash;

/// A pending database operation produced by cascade planning.
///
/// Serializes so a plan can be handed to a writer in another process or
/// logged as structured data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PendingOp {
    /// Insert a new row.
    Insert {
        /// Table name.
        table: &'static str,
        /// Column names.
        columns: Vec<&'static str>,
        /// Values to insert.
        values: Vec<Value>,
    },
    /// Update an existing row.
    Update {
        /// Table name.
        table: &'static str,
        /// Primary key column names.
        pk_columns: Vec<&'static str>,
        /// Primary key values.
        pk_values: Vec<Value>,
        /// Columns to update (only changed ones).
        set_columns: Vec<&'static str>,
        /// New values for changed columns.
        set_values: Vec<Value>,
    },
    /// Delete an existing row.
    Delete {
        /// Table name.
        table: &'static str,
        /// Primary key column names.
        pk_columns: Vec<&'static str>,
        /// Primary key values.
        pk_values: Vec<Value>,
    },
}

impl PendingOp {
    /// Get the table name for this operation.
    pub fn table(&self) -> &'static str {
        match self {
            PendingOp::Insert { table, .. }
            | PendingOp::Update { table, .. }
            | PendingOp::Delete { table, .. } => table,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, PendingOp::Insert { .. })
    }

    pub fn is_update(&self) -> bool {
        matches!(self, PendingOp::Update { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, PendingOp::Delete { .. })
    }
}

/// Operations planned for one relation, grouped by kind.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CascadePlan {
    /// Delete operations.
    pub deletes: Vec<PendingOp>,
    /// Insert operations.
    pub inserts: Vec<PendingOp>,
    /// Update operations.
    pub updates: Vec<PendingOp>,
}

impl CascadePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty() && self.updates.is_empty()
    }

    /// Total number of operations.
    pub fn len(&self) -> usize {
        self.deletes.len() + self.inserts.len() + self.updates.len()
    }

    /// All operations in execution order: deletes, then inserts, then updates.
    pub fn into_ops(self) -> Vec<PendingOp> {
        let mut ops = self.deletes;
        ops.extend(self.inserts);
        ops.extend(self.updates);
        ops
    }
}

/// Plan the writes that bring a relation from `before` to `after`.
///
/// `None` means the relation was never loaded and is treated as empty.
/// Elements are matched by `Model::id`.
#[tracing::instrument(level = "debug", skip_all, fields(table = M::TABLE_NAME))]
pub fn plan_collection<M: Model>(before: Option<&[M]>, after: &[M]) -> CascadePlan {
    let before: Vec<&M> = before.unwrap_or_default().iter().collect();
    let after: Vec<&M> = after.iter().collect();

    let differ = CollectionDiffer::new(|m: &&M| m.id());
    let mut plan = CascadePlan::new();

    for diff in differ.diff(&before, &after) {
        match diff.into_parts() {
            (State::Removed, Some(source), _) => plan.deletes.push(delete_op(source)),
            (State::Added, _, Some(replacing)) => plan.inserts.push(insert_op(replacing)),
            (State::Held, Some(source), Some(replacing)) => {
                if let Some(update) = update_op(source, replacing) {
                    plan.updates.push(update);
                }
            }
            _ => {}
        }
    }

    tracing::debug!(
        deletes = plan.deletes.len(),
        inserts = plan.inserts.len(),
        updates = plan.updates.len(),
        "Cascade plan built"
    );
    plan
}

fn primary_key<M: Model>(row: &[(&'static str, Value)]) -> (Vec<&'static str>, Vec<Value>) {
    let pk_values = M::PRIMARY_KEY
        .iter()
        .map(|pk| {
            row.iter()
                .find(|(name, _)| name == pk)
                .map_or(Value::Null, |(_, value)| value.clone())
        })
        .collect();
    (M::PRIMARY_KEY.to_vec(), pk_values)
}

fn insert_op<M: Model>(model: &M) -> PendingOp {
    let (columns, values) = model.to_row().into_iter().unzip();
    PendingOp::Insert {
        table: M::TABLE_NAME,
        columns,
        values,
    }
}

fn delete_op<M: Model>(model: &M) -> PendingOp {
    let (pk_columns, pk_values) = primary_key::<M>(&model.to_row());
    PendingOp::Delete {
        table: M::TABLE_NAME,
        pk_columns,
        pk_values,
    }
}

fn update_op<M: Model>(source: &M, replacing: &M) -> Option<PendingOp> {
    let old_row = source.to_row();
    let new_row = replacing.to_row();

    let mut set_columns = Vec::new();
    let mut set_values = Vec::new();
    for (name, value) in &new_row {
        if M::PRIMARY_KEY.contains(name) {
            continue;
        }
        let unchanged = old_row
            .iter()
            .any(|(old_name, old_value)| old_name == name && old_value == value);
        if !unchanged {
            set_columns.push(*name);
            set_values.push(value.clone());
        }
    }

    if set_columns.is_empty() {
        return None;
    }

    let (pk_columns, pk_values) = primary_key::<M>(&new_row);
    Some(PendingOp::Update {
        table: M::TABLE_NAME,
        pk_columns,
        pk_values,
        set_columns,
        set_values,
    })
}

/// A positional change to an indexed association (list column or link table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum LinkOp<K> {
    /// Remove the entry at `position`.
    Delete { position: usize, target: K },
    /// Move an entry that survives from `from` to `to`.
    Reindex { from: usize, to: usize, target: K },
    /// Add an entry at `position`.
    Insert { position: usize, target: K },
}

impl<K> LinkOp<K> {
    pub fn target(&self) -> &K {
        match self {
            LinkOp::Delete { target, .. }
            | LinkOp::Reindex { target, .. }
            | LinkOp::Insert { target, .. } => target,
        }
    }
}

/// Plan positional link changes for an ordered association of target keys.
///
/// Ops come back as deletes, then reindexes, then inserts, each ascending by
/// position. Positions that stay put produce nothing.
#[tracing::instrument(level = "debug", skip_all)]
pub fn plan_ordered_links<K>(before: Option<&[K]>, after: &[K]) -> Vec<LinkOp<K>>
where
    K: Clone + Eq + Hash,
{
    let before = before.unwrap_or_default();
    let differ = CollectionDiffer::new(|k: &K| k.clone());

    let mut deletes = Vec::new();
    let mut reindexes = Vec::new();
    let mut inserts = Vec::new();

    for diff in differ.diff_ordered(before, after) {
        let target = diff.as_diff().current().clone();
        match diff.state() {
            State::Removed => {
                deletes.extend(positions(diff.source_indexes(), &target).map(
                    |(position, target)| LinkOp::Delete { position, target },
                ));
            }
            State::Added => {
                inserts.extend(positions(diff.replacer_indexes(), &target).map(
                    |(position, target)| LinkOp::Insert { position, target },
                ));
            }
            State::Held => {
                // paired positions have equal counts on both sides
                for (&from, &to) in diff.source_indexes().iter().zip(diff.replacer_indexes()) {
                    if from != to {
                        reindexes.push(LinkOp::Reindex {
                            from,
                            to,
                            target: target.clone(),
                        });
                    }
                }
            }
        }
    }

    deletes.sort_by_key(|op| match op {
        LinkOp::Delete { position, .. } => *position,
        _ => usize::MAX,
    });
    reindexes.sort_by_key(|op| match op {
        LinkOp::Reindex { from, .. } => *from,
        _ => usize::MAX,
    });
    inserts.sort_by_key(|op| match op {
        LinkOp::Insert { position, .. } => *position,
        _ => usize::MAX,
    });

    let mut ops = deletes;
    ops.extend(reindexes);
    ops.extend(inserts);
    tracing::debug!(ops = ops.len(), "Ordered link plan built");
    ops
}

fn positions<'a, K: Clone>(
    indexes: &'a BTreeSet<usize>,
    target: &'a K,
) -> impl Iterator<Item = (usize, K)> + 'a {
    indexes.iter().map(move |&i| (i, target.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmodel_core::{Result, Row};

    #[derive(Debug, Clone, PartialEq)]
    struct Child {
        id: i64,
        name: String,
        rank: i32,
    }

    impl Model for Child {
        const TABLE_NAME: &'static str = "children";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];
        type Id = i64;

        fn id(&self) -> i64 {
            self.id
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
                name: row.get_named("name")?,
                rank: row.get_named("rank")?,
            })
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", Value::BigInt(self.id)),
                ("name", Value::Text(self.name.clone())),
                ("rank", Value::Int(self.rank)),
            ]
        }
    }

    fn child(id: i64, name: &str, rank: i32) -> Child {
        Child {
            id,
            name: name.to_string(),
            rank,
        }
    }

    #[test]
    fn test_plan_collection_classifies_ops() {
        let before = vec![child(1, "a", 0), child(2, "b", 0), child(3, "c", 0)];
        let after = vec![child(1, "a", 0), child(3, "c", 5), child(4, "d", 1)];

        let plan = plan_collection(Some(before.as_slice()), &after);
        assert_eq!(plan.len(), 3);

        assert_eq!(
            plan.deletes,
            vec![PendingOp::Delete {
                table: "children",
                pk_columns: vec!["id"],
                pk_values: vec![Value::BigInt(2)],
            }]
        );
        assert_eq!(
            plan.inserts,
            vec![PendingOp::Insert {
                table: "children",
                columns: vec!["id", "name", "rank"],
                values: vec![
                    Value::BigInt(4),
                    Value::Text("d".to_string()),
                    Value::Int(1)
                ],
            }]
        );
        // unchanged child 1 produces no update; child 3 only sets "rank"
        assert_eq!(
            plan.updates,
            vec![PendingOp::Update {
                table: "children",
                pk_columns: vec!["id"],
                pk_values: vec![Value::BigInt(3)],
                set_columns: vec!["rank"],
                set_values: vec![Value::Int(5)],
            }]
        );
    }

    #[test]
    fn test_plan_collection_unknown_before_is_empty() {
        let after = vec![child(1, "a", 0), child(2, "b", 0)];
        let plan = plan_collection(None, &after);
        assert_eq!(plan.inserts.len(), 2);
        assert!(plan.deletes.is_empty());
        assert!(plan.updates.is_empty());

        let plan = plan_collection::<Child>(None, &[]);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_into_ops_order() {
        let before = vec![child(1, "a", 0), child(2, "b", 0)];
        let after = vec![child(2, "b2", 0), child(3, "c", 0)];
        let ops = plan_collection(Some(before.as_slice()), &after).into_ops();
        assert!(ops[0].is_delete());
        assert!(ops[1].is_insert());
        assert!(ops[2].is_update());
        assert!(ops.iter().all(|op| op.table() == "children"));
    }

    #[test]
    fn test_plan_serializes_for_writers() {
        let before = vec![child(1, "a", 0), child(2, "b", 0)];
        let after = vec![child(1, "a", 3)];
        let plan = plan_collection(Some(before.as_slice()), &after);

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "deletes": [{"Delete": {
                    "table": "children",
                    "pk_columns": ["id"],
                    "pk_values": [{"BigInt": 2}],
                }}],
                "inserts": [],
                "updates": [{"Update": {
                    "table": "children",
                    "pk_columns": ["id"],
                    "pk_values": [{"BigInt": 1}],
                    "set_columns": ["rank"],
                    "set_values": [{"Int": 3}],
                }}],
            })
        );
    }

    #[test]
    fn test_link_ops_round_trip_through_json() {
        let ops = plan_ordered_links(Some(&[10_i64, 20][..]), &[20, 30]);
        let json = serde_json::to_string(&ops).unwrap();
        assert_eq!(
            json,
            r#"[{"op":"delete","position":0,"target":10},{"op":"reindex","from":1,"to":0,"target":20},{"op":"insert","position":1,"target":30}]"#
        );
        let back: Vec<LinkOp<i64>> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ops);
    }

    #[test]
    fn test_links_reorder_only_reindexes() {
        let ops = plan_ordered_links(Some(&[10, 20, 30][..]), &[30, 10, 20]);
        assert_eq!(
            ops,
            vec![
                LinkOp::Reindex {
                    from: 0,
                    to: 1,
                    target: 10
                },
                LinkOp::Reindex {
                    from: 1,
                    to: 2,
                    target: 20
                },
                LinkOp::Reindex {
                    from: 2,
                    to: 0,
                    target: 30
                },
            ]
        );
    }

    #[test]
    fn test_links_duplicate_shrink_and_append() {
        let ops = plan_ordered_links(Some(&['a', 'b', 'a'][..]), &['a', 'c']);
        assert_eq!(
            ops,
            vec![
                LinkOp::Delete {
                    position: 1,
                    target: 'b'
                },
                LinkOp::Delete {
                    position: 2,
                    target: 'a'
                },
                LinkOp::Insert {
                    position: 1,
                    target: 'c'
                },
            ]
        );
    }

    #[test]
    fn test_links_identical_lists_plan_nothing() {
        let list = ["x", "y", "x"];
        assert!(plan_ordered_links(Some(&list[..]), &list).is_empty());
        assert!(plan_ordered_links::<&str>(None, &[]).is_empty());
        let fresh = plan_ordered_links(None, &list);
        assert_eq!(fresh.len(), 3);
        assert_eq!(fresh[2].target(), &"x");
    }
}
