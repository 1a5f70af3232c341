//! GraphModel Rust - the runtime core of an object-relational mapper.
//!
//! Two problems are solved here, independently of any SQL dialect or driver:
//!
//! - Reconciling a relation's in-memory collection with its previously known
//!   state ([`CollectionDiffer`], [`plan_collection`], [`plan_ordered_links`])
//! - Loading entity graphs that cycle back to their own type with exactly one
//!   extra batched select per unresolved level ([`CycleConfigurer`],
//!   [`CycleLoader`], [`EntityPersister`])
//!
//! # Quick Start
//!
//! ```ignore
//! use graphmodel::prelude::*;
//!
//! let nodes = Arc::new(EntityPersister::<Node>::new(row_source));
//! let mut cycles = CycleConfigurer::<Node>::new();
//! cycles.one_to_one("parent", "parent_id", |n: &mut Node, p| n.parent = Some(p))?;
//! cycles.configure(&nodes, LoaderConfig::default())?;
//!
//! // every parent pointer of the loaded nodes is now wired
//! let loaded = nodes.load(&[1, 3, 5]);
//! ```

pub use graphmodel_core::{
    ColumnInfo, ConfigError, EntityHandle, Error, Identifier, LoadError, LoadErrorKind,
    MappingError, MappingErrorKind, Model, ModelRef, Outcome, QueryError, QueryErrorKind,
    RelationshipInfo, RelationshipKind, Result, Row, TypeError, Value, find_relationship,
    model_ref, read_entity, write_entity,
};
pub use graphmodel_cycle::{
    CycleConfigurer, CycleLoadRuntimeContext, CycleLoader, CycleRelation, EntityPersister,
    EntityRelationStorage, LoadSession, LoaderConfig, LoaderId, MappingGraph,
    MissingTargetPolicy, RelationFixer, RelationKind, RowSource, SelectListener, entity_id,
};
pub use graphmodel_diff::{
    CascadePlan, CollectionDiffer, Diff, IndexedDiff, LinkOp, PendingOp, State, plan_collection,
    plan_ordered_links,
};

/// Wire every cyclic relation of `M` onto the persister of `M` after checking
/// them against the mapping graph.
///
/// Shorthand for [`CycleConfigurer::validate_against`] followed by
/// [`CycleConfigurer::configure`].
#[allow(clippy::result_large_err)]
pub fn configure_cycles<M: Model>(
    cycles: CycleConfigurer<M>,
    graph: &MappingGraph,
    persister: &std::sync::Arc<EntityPersister<M>>,
    config: LoaderConfig,
) -> Result<std::sync::Arc<CycleLoader<M>>> {
    if let Err(e) = cycles.validate_against(graph) {
        tracing::warn!(table = M::TABLE_NAME, error = %e, "Cycle configuration rejected");
        return Err(e);
    }
    cycles.configure(persister, config)
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        // Cascade writes
        CascadePlan,
        CollectionDiffer,
        // Cycle loading
        CycleConfigurer,
        CycleLoader,
        Diff,
        EntityPersister,
        // Core
        Error,
        Identifier,
        IndexedDiff,
        LinkOp,
        LoadSession,
        LoaderConfig,
        MappingGraph,
        MissingTargetPolicy,
        Model,
        ModelRef,
        Outcome,
        PendingOp,
        RelationshipInfo,
        RelationshipKind,
        Result,
        Row,
        RowSource,
        State,
        Value,
        configure_cycles,
        model_ref,
        plan_collection,
        plan_ordered_links,
    };
    pub use std::sync::Arc;
}
