//! Cycle-safe loading of self-referencing entity graphs.
//!
//! `graphmodel-cycle` resolves relations that lead from a mapped type back to
//! itself (directly, like `Node.parent`, or through other types) with a
//! two-phase protocol: record target identifiers while rows are consumed,
//! then fetch every missing target in one batched select and fix up the
//! pending relations.
//!
//! - [`EntityPersister`] runs selects through a [`RowSource`] and drives
//!   [`SelectListener`] hooks
//! - [`CycleLoader`] is that listener for one target type
//! - [`CycleConfigurer`] groups every relation cycling back to a type onto one
//!   loader
//! - [`LoadSession`] carries the per-load state through nested selects

pub mod configurer;
pub mod context;
pub mod graph;
pub mod loader;
pub mod persister;
pub mod session;
pub mod storage;

pub use configurer::CycleConfigurer;
pub use context::CycleLoadRuntimeContext;
pub use graph::MappingGraph;
pub use loader::{
    CycleLoader, CycleRelation, LoaderConfig, MissingTargetPolicy, RelationFixer, RelationKind,
};
pub use persister::{EntityPersister, RowSource, SelectListener, entity_id};
pub use session::{LoadSession, LoaderId};
pub use storage::EntityRelationStorage;
