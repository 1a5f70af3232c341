//! Table-level relation graph built from `Model::RELATIONSHIPS`.
//!
//! Used at configuration time to check that a relation registered on a cycle
//! loader really leads back to the loader's table.

use graphmodel_core::Model;
use indexmap::IndexMap;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    relation: &'static str,
    target: &'static str,
}

/// Relations between registered tables.
#[derive(Debug, Default, Clone)]
pub struct MappingGraph {
    edges: IndexMap<&'static str, Vec<Edge>>,
}

impl MappingGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model's table and its declared relationships.
    pub fn register<M: Model>(&mut self) -> &mut Self {
        let edges = self.edges.entry(M::TABLE_NAME).or_default();
        for rel in M::RELATIONSHIPS {
            let edge = Edge {
                relation: rel.name,
                target: rel.related_table,
            };
            if !edges.contains(&edge) {
                edges.push(edge);
            }
        }
        self
    }

    pub fn contains(&self, table: &str) -> bool {
        self.edges.contains_key(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.edges.keys().copied()
    }

    /// Whether `target` is reachable from `from` through known tables.
    pub fn reaches(&self, from: &'static str, target: &str) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(table) = stack.pop() {
            if !visited.insert(table) {
                continue;
            }
            for edge in self.edges.get(table).into_iter().flatten() {
                if edge.target == target {
                    return true;
                }
                if self.contains(edge.target) {
                    stack.push(edge.target);
                }
            }
        }
        false
    }

    /// Whether a relation from `source` to `target` is part of a cycle.
    ///
    /// True when `source` has a relation to `target` and `target` leads back
    /// to `source` (trivially when they are the same table).
    pub fn closes_cycle(&self, source: &'static str, target: &'static str) -> bool {
        let direct = self
            .edges
            .get(source)
            .is_some_and(|edges| edges.iter().any(|e| e.target == target));
        direct && (source == target || self.reaches(target, source))
    }

    /// Every simple relation path leaving `table` and ending back at it.
    ///
    /// Paths are dotted relation names, e.g. `"parent"` or
    /// `"department.manager"`.
    pub fn cycles_through(&self, table: &'static str) -> Vec<String> {
        let mut found = Vec::new();
        if self.contains(table) {
            let mut rec_stack = HashSet::new();
            let mut path = Vec::new();
            self.cycles_dfs(table, table, &mut rec_stack, &mut path, &mut found);
        }
        found
    }

    /// DFS helper for cycle discovery.
    fn cycles_dfs(
        &self,
        start: &'static str,
        table: &'static str,
        rec_stack: &mut HashSet<&'static str>,
        path: &mut Vec<&'static str>,
        found: &mut Vec<String>,
    ) {
        rec_stack.insert(table);

        for edge in self.edges.get(table).into_iter().flatten() {
            // Only follow tables we know about
            if !self.contains(edge.target) {
                continue;
            }

            path.push(edge.relation);
            if edge.target == start {
                found.push(path.join("."));
            } else if !rec_stack.contains(edge.target) {
                self.cycles_dfs(start, edge.target, rec_stack, path, found);
            }
            path.pop();
        }

        rec_stack.remove(table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmodel_core::{RelationshipInfo, RelationshipKind, Result, Row, Value};

    macro_rules! table {
        ($name:ident, $table:literal, [$($rel:expr),*]) => {
            struct $name;

            impl Model for $name {
                const TABLE_NAME: &'static str = $table;
                const PRIMARY_KEY: &'static [&'static str] = &["id"];
                const RELATIONSHIPS: &'static [RelationshipInfo] = &[$($rel),*];
                type Id = i64;

                fn id(&self) -> i64 {
                    0
                }

                fn from_row(_row: &Row) -> Result<Self> {
                    Ok(Self)
                }

                fn to_row(&self) -> Vec<(&'static str, Value)> {
                    Vec::new()
                }
            }
        };
    }

    table!(Node, "nodes", [
        RelationshipInfo::new("parent", "nodes", RelationshipKind::ManyToOne),
        RelationshipInfo::new("children", "nodes", RelationshipKind::OneToMany)
    ]);
    table!(Employee, "employees", [
        RelationshipInfo::new("department", "departments", RelationshipKind::ManyToOne)
    ]);
    table!(Department, "departments", [
        RelationshipInfo::new("manager", "employees", RelationshipKind::OneToOne),
        RelationshipInfo::new("site", "sites", RelationshipKind::ManyToOne)
    ]);
    table!(Site, "sites", []);

    fn graph() -> MappingGraph {
        let mut graph = MappingGraph::new();
        graph
            .register::<Node>()
            .register::<Employee>()
            .register::<Department>()
            .register::<Site>();
        graph
    }

    #[test]
    fn test_self_reference_cycles() {
        let graph = graph();
        assert_eq!(graph.cycles_through("nodes"), vec!["parent", "children"]);
        assert!(graph.closes_cycle("nodes", "nodes"));
    }

    #[test]
    fn test_indirect_cycle_paths() {
        let graph = graph();
        assert_eq!(
            graph.cycles_through("employees"),
            vec!["department.manager"]
        );
        assert_eq!(
            graph.cycles_through("departments"),
            vec!["manager.department"]
        );
        assert!(graph.closes_cycle("employees", "departments"));
        assert!(graph.closes_cycle("departments", "employees"));
    }

    #[test]
    fn test_acyclic_relations() {
        let graph = graph();
        assert!(graph.cycles_through("sites").is_empty());
        assert!(!graph.closes_cycle("departments", "sites"));
        assert!(graph.reaches("employees", "sites"));
        assert!(!graph.reaches("sites", "employees"));
        assert!(graph.cycles_through("unknown").is_empty());
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut graph = graph();
        graph.register::<Node>();
        assert_eq!(graph.cycles_through("nodes").len(), 2);
        assert_eq!(graph.tables().count(), 4);
    }
}
