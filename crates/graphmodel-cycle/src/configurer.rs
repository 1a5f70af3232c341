//! Wiring of cyclic relations onto one loader per target type.
//!
//! Every relation that cycles back to `M`, whatever its source type, must
//! share one [`CycleLoader<M>`] and therefore one reentrancy counter. Separate
//! loaders for sibling relations of the same cycle would each see their own
//! depth reach zero and drop state while a sibling is still resolving.
//!
//! # Example
//!
//! ```ignore
//! let mut cycles = CycleConfigurer::<Node>::new();
//! cycles
//!     .one_to_one("parent", "parent_id", |n: &mut Node, p| n.parent = Some(p))?
//!     .one_to_many("children", "child_ids", |n: &mut Node| &mut n.children)?;
//! cycles.validate_against(&graph)?;
//! let loader = cycles.configure(&node_persister, LoaderConfig::default())?;
//! ```

use crate::graph::MappingGraph;
use crate::loader::{CycleLoader, CycleRelation, LoaderConfig, RelationFixer};
use crate::persister::EntityPersister;
use graphmodel_core::{Error, MappingErrorKind, Model, ModelRef, Result};
use indexmap::IndexMap;
use std::sync::Arc;

/// Collects the cyclic relations of target type `M`.
pub struct CycleConfigurer<M: Model> {
    relations: IndexMap<String, CycleRelation<M>>,
}

impl<M: Model> Default for CycleConfigurer<M> {
    fn default() -> Self {
        Self {
            relations: IndexMap::new(),
        }
    }
}

impl<M: Model> CycleConfigurer<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single-valued relation from `S` to `M`.
    #[allow(clippy::result_large_err)]
    pub fn one_to_one<S: Model>(
        &mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        set: impl Fn(&mut S, ModelRef<M>) + Send + Sync + 'static,
    ) -> Result<&mut Self> {
        self.relation(CycleRelation::new(name, column, RelationFixer::one(set)))
    }

    /// Register a collection-valued relation from `S` to `M`.
    #[allow(clippy::result_large_err)]
    pub fn one_to_many<S: Model>(
        &mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        collection: impl Fn(&mut S) -> &mut Vec<ModelRef<M>> + Send + Sync + 'static,
    ) -> Result<&mut Self> {
        self.relation(CycleRelation::new(
            name,
            column,
            RelationFixer::many(collection),
        ))
    }

    /// Register a prepared relation. Names are unique per target type.
    #[allow(clippy::result_large_err)]
    pub fn relation(&mut self, relation: CycleRelation<M>) -> Result<&mut Self> {
        if self.relations.contains_key(relation.name()) {
            return Err(Error::mapping(
                MappingErrorKind::DuplicateRelation,
                relation.name(),
                format!(
                    "relation already registered on the cycle loader of {}",
                    M::TABLE_NAME
                ),
            ));
        }
        tracing::debug!(
            table = M::TABLE_NAME,
            relation = relation.name(),
            source = relation.source_type_name(),
            kind = ?relation.kind(),
            "Cyclic relation registered"
        );
        self.relations.insert(relation.name().to_string(), relation);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Check every registered relation against the mapped graph.
    ///
    /// Fails with `UnknownTable` when the target or a source table is not
    /// registered, and `NotCyclic` when a relation's source has no relation to
    /// `M` that leads back to the source. Every cycle through `M` in the graph
    /// must itself be registered under its dotted path (`parent`,
    /// `department.manager`), otherwise `UnregisteredCycle`: loads through an
    /// unregistered path would never have their back references fixed up.
    #[allow(clippy::result_large_err)]
    pub fn validate_against(&self, graph: &MappingGraph) -> Result<()> {
        if !graph.contains(M::TABLE_NAME) {
            return Err(Error::mapping(
                MappingErrorKind::UnknownTable,
                M::TABLE_NAME,
                "target table is not part of the mapping graph",
            ));
        }
        for relation in self.relations.values() {
            let source = relation.source_table();
            if !graph.contains(source) {
                return Err(Error::mapping(
                    MappingErrorKind::UnknownTable,
                    relation.name(),
                    format!("source table '{}' is not part of the mapping graph", source),
                ));
            }
            if !graph.closes_cycle(source, M::TABLE_NAME) {
                return Err(Error::mapping(
                    MappingErrorKind::NotCyclic,
                    relation.name(),
                    format!(
                        "{} -> {} does not lead back to {}",
                        source,
                        M::TABLE_NAME,
                        source
                    ),
                ));
            }
        }
        for path in graph.cycles_through(M::TABLE_NAME) {
            if !self.relations.contains_key(&path) {
                return Err(Error::mapping(
                    MappingErrorKind::UnregisteredCycle,
                    path,
                    format!("cycle through {} has no registered relation", M::TABLE_NAME),
                ));
            }
        }
        Ok(())
    }

    /// Build the loader and attach it to the persister of `M`.
    ///
    /// Relations whose source type is not `M` additionally need
    /// [`CycleLoader::attach_source`] on their source persister.
    #[allow(clippy::result_large_err)]
    pub fn configure(
        self,
        persister: &Arc<EntityPersister<M>>,
        config: LoaderConfig,
    ) -> Result<Arc<CycleLoader<M>>> {
        let relations = self.relations.len();
        let loader = Arc::new(CycleLoader::new(self.relations, config));
        persister.add_listener(loader.listener::<M>(persister))?;
        tracing::info!(
            table = M::TABLE_NAME,
            relations,
            loader = loader.id().as_u64(),
            "Cycle loader configured"
        );
        Ok(loader)
    }
}

impl<M: Model> std::fmt::Debug for CycleConfigurer<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleConfigurer")
            .field("table", &M::TABLE_NAME)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}
