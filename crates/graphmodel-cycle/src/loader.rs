//! Two-phase loading of entity graphs that cycle back to their own type.
//!
//! A [`CycleLoader<M>`] feeds on the persister of `M` (and on the persisters of
//! other source types through [`CycleLoader::attach_source`]).
//!
//! - Phase 1: while a select consumes rows, every relation whose source type
//!   matches records the target identifier found in its column.
//! - Phase 2: once the outermost select of a load has consumed its rows,
//!   identifiers not already resolved are fetched in one batched select of
//!   `M` per round. Rows of those selects record further identifiers, and
//!   rounds repeat until no loader of the load has anything left to fetch.
//!   Every pending relation is then fixed up against the resolved instances.
//!
//! Phase-2 selects never run phase 2 themselves, so a load nests at most one
//! select below the outermost one however deep the loaded chain is. All
//! selects of one load share a single [`CycleLoadRuntimeContext`] per loader,
//! so identifiers resolved anywhere are never fetched again, and state is
//! dropped only when the outermost select finishes.

use crate::context::CycleLoadRuntimeContext;
use crate::persister::{EntityPersister, SelectListener, entity_id};
use crate::session::{LoadSession, LoaderId, PendingLoad};
use graphmodel_core::{
    ConfigError, EntityHandle, Error, Identifier, LoadErrorKind, MappingErrorKind, Model,
    ModelRef, Outcome, Result, Row, Value, write_entity,
};
use indexmap::{IndexMap, IndexSet};
use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// What to do with a pending identifier that no select returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingTargetPolicy {
    /// Leave the relation unset.
    #[default]
    Skip,
    /// Leave the relation unset and log a warning.
    Warn,
    /// Fail the load with `LoadErrorKind::MissingTarget`.
    Fail,
}

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Handling of dangling identifiers.
    pub missing_target: MissingTargetPolicy,
    /// Maximum nesting of selects sharing one context. Loads nest at most
    /// two deep; the guard only trips on listeners that re-enter selects
    /// themselves.
    pub max_reentrancy: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            missing_target: MissingTargetPolicy::Skip,
            max_reentrancy: 64,
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing_target(mut self, policy: MissingTargetPolicy) -> Self {
        self.missing_target = policy;
        self
    }

    pub fn with_max_reentrancy(mut self, depth: usize) -> Self {
        self.max_reentrancy = depth;
        self
    }
}

/// Cardinality of a cyclic relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
}

/// Attaches a resolved target `T` to a source `S`.
pub enum RelationFixer<S, T> {
    /// Set a single-valued field.
    One(Box<dyn Fn(&mut S, ModelRef<T>) + Send + Sync>),
    /// Expose the collection the target is appended to.
    Many(Box<dyn Fn(&mut S) -> &mut Vec<ModelRef<T>> + Send + Sync>),
}

impl<S, T> RelationFixer<S, T> {
    pub fn one(set: impl Fn(&mut S, ModelRef<T>) + Send + Sync + 'static) -> Self {
        RelationFixer::One(Box::new(set))
    }

    pub fn many(collection: impl Fn(&mut S) -> &mut Vec<ModelRef<T>> + Send + Sync + 'static) -> Self {
        RelationFixer::Many(Box::new(collection))
    }

    pub fn kind(&self) -> RelationKind {
        match self {
            RelationFixer::One(_) => RelationKind::OneToOne,
            RelationFixer::Many(_) => RelationKind::OneToMany,
        }
    }

    /// Attach `target` to `source`. Collections never receive the same
    /// instance twice; returns `false` when nothing changed.
    pub fn apply(&self, source: &mut S, target: ModelRef<T>) -> bool {
        match self {
            RelationFixer::One(set) => {
                set(source, target);
                true
            }
            RelationFixer::Many(collection) => {
                let held = collection(source);
                if held.iter().any(|existing| Arc::ptr_eq(existing, &target)) {
                    false
                } else {
                    held.push(target);
                    true
                }
            }
        }
    }
}

type ErasedFixer<M> = Box<dyn Fn(&EntityHandle, ModelRef<M>) -> Result<bool> + Send + Sync>;

/// One relation that cycles back to `M`, with its source type erased.
pub struct CycleRelation<M: Model> {
    name: String,
    column: String,
    kind: RelationKind,
    source_type: TypeId,
    source_type_name: &'static str,
    source_table: &'static str,
    fix: ErasedFixer<M>,
}

impl<M: Model> CycleRelation<M> {
    /// A relation from sources of type `S`, read from `column` of their rows.
    pub fn new<S: Model>(
        name: impl Into<String>,
        column: impl Into<String>,
        fixer: RelationFixer<S, M>,
    ) -> Self {
        let kind = fixer.kind();
        let fix: ErasedFixer<M> = Box::new(move |source, target| {
            let Some(source) = source.downcast::<S>() else {
                return Ok(false);
            };
            let mut guard = write_entity(&source)?;
            Ok(fixer.apply(&mut guard, target))
        });
        Self {
            name: name.into(),
            column: column.into(),
            kind,
            source_type: TypeId::of::<S>(),
            source_type_name: std::any::type_name::<S>(),
            source_table: S::TABLE_NAME,
            fix,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn source_type_name(&self) -> &'static str {
        self.source_type_name
    }

    pub fn source_table(&self) -> &'static str {
        self.source_table
    }

    /// Whether sources of type `S` take part in this relation.
    pub fn accepts<S: 'static>(&self) -> bool {
        self.source_type == TypeId::of::<S>()
    }

    /// Target identifiers carried by a raw column value.
    ///
    /// NULL yields nothing. One-to-many relations also accept an array column.
    pub fn identifiers(&self, raw: &Value) -> Vec<M::Id> {
        match (self.kind, raw) {
            (RelationKind::OneToMany, Value::Array(items)) => {
                items
                .iter()
                .filter_map(<M::Id as Identifier>::from_column)
                .collect()
            }
            _ => <M::Id as Identifier>::from_column(raw).into_iter().collect(),
        }
    }

    /// Attach `target` to the entity behind `source`.
    #[allow(clippy::result_large_err)]
    pub fn fix(&self, source: &EntityHandle, target: ModelRef<M>) -> Result<bool> {
        (self.fix)(source, target)
    }
}

impl<M: Model> std::fmt::Debug for CycleRelation<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleRelation")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("kind", &self.kind)
            .field("source", &self.source_type_name)
            .finish_non_exhaustive()
    }
}

/// Resolves every relation cycling back to `M` with one shared context.
pub struct CycleLoader<M: Model> {
    id: LoaderId,
    relations: IndexMap<String, CycleRelation<M>>,
    config: LoaderConfig,
}

impl<M: Model> CycleLoader<M> {
    pub(crate) fn new(relations: IndexMap<String, CycleRelation<M>>, config: LoaderConfig) -> Self {
        Self {
            id: LoaderId::next(),
            relations,
            config,
        }
    }

    pub fn id(&self) -> LoaderId {
        self.id
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn relation(&self, name: &str) -> Option<&CycleRelation<M>> {
        self.relations.get(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = &CycleRelation<M>> {
        self.relations.values()
    }

    /// This loader's context in `session`, if the session used it.
    pub fn context<'s>(&self, session: &'s LoadSession) -> Option<&'s CycleLoadRuntimeContext<M>> {
        session.context::<M>(self.id)
    }

    /// How many times this loader's context was released in `session`.
    pub fn releases(&self, session: &LoadSession) -> usize {
        self.context(session)
            .map_or(0, CycleLoadRuntimeContext::releases)
    }

    /// Enter a select of `M` (or of a source feeding this loader).
    #[allow(clippy::result_large_err)]
    pub fn enter(&self, session: &mut LoadSession) -> Result<usize> {
        let depth = session.context_mut::<M>(self.id).before_select();
        if depth > self.config.max_reentrancy {
            return Err(Error::load(
                LoadErrorKind::ReentrancyLimit,
                format!(
                    "cycle load of {} nested {} selects deep (limit {})",
                    M::TABLE_NAME,
                    depth,
                    self.config.max_reentrancy
                ),
            ));
        }
        Ok(depth)
    }

    /// Phase 1 for one row: record every matching relation's target ids.
    ///
    /// Relations declared for a source type other than `S` are ignored.
    pub fn record_row<S: Model>(
        &self,
        session: &mut LoadSession,
        source: &ModelRef<S>,
        row: &Row,
    ) -> usize {
        let handle = EntityHandle::new(source);
        let context = session.context_mut::<M>(self.id);
        let mut recorded = 0;
        for relation in self.relations.values().filter(|r| r.accepts::<S>()) {
            let Some(raw) = row.get_by_name(relation.column()) else {
                continue;
            };
            for id in relation.identifiers(raw) {
                context.add_relation_to_initialize(relation.name(), handle.clone(), id);
                recorded += 1;
            }
        }
        if recorded > 0 {
            tracing::trace!(table = M::TABLE_NAME, recorded, "Pending relations recorded");
        }
        recorded
    }

    /// Record one raw target identifier for `source` on `relation`.
    ///
    /// Returns `false` when nothing was recorded: the value is the "no
    /// relation" sentinel or `S` is not the relation's source type.
    #[allow(clippy::result_large_err)]
    pub fn record<S: Model>(
        &self,
        session: &mut LoadSession,
        relation: &str,
        source: &ModelRef<S>,
        raw: &Value,
    ) -> Result<bool> {
        self.record_many(session, relation, source, std::iter::once(raw))
            .map(|n| n > 0)
    }

    /// Record zero or more raw target identifiers for `source` on `relation`.
    #[allow(clippy::result_large_err)]
    pub fn record_many<'v, S: Model>(
        &self,
        session: &mut LoadSession,
        relation: &str,
        source: &ModelRef<S>,
        raw: impl IntoIterator<Item = &'v Value>,
    ) -> Result<usize> {
        let Some(registered) = self.relations.get(relation) else {
            return Err(Error::mapping(
                MappingErrorKind::UnknownRelation,
                relation,
                format!("no cyclic relation with this name targets {}", M::TABLE_NAME),
            ));
        };
        if !registered.accepts::<S>() {
            tracing::trace!(
                relation,
                source = std::any::type_name::<S>(),
                expected = registered.source_type_name(),
                "Source type filtered out"
            );
            return Ok(0);
        }

        let handle = EntityHandle::new(source);
        let context = session.context_mut::<M>(self.id);
        let mut recorded = 0;
        for value in raw {
            for id in registered.identifiers(value) {
                context.add_relation_to_initialize(relation, handle.clone(), id);
                recorded += 1;
            }
        }
        Ok(recorded)
    }

    /// Phase 2, one round: fetch every pending identifier that no select of
    /// this load returned or was asked for yet, in one select of `M`.
    ///
    /// Returns `true` when a select was issued. Nested selects only record
    /// further identifiers; the outermost select repeats rounds until no
    /// loader issues one.
    pub fn fetch_pending(
        &self,
        session: &mut LoadSession,
        persister: &EntityPersister<M>,
    ) -> Outcome<bool, Error> {
        let pending = session.context_mut::<M>(self.id).take_unrequested();
        if pending.is_empty() {
            return Outcome::Ok(false);
        }

        tracing::debug!(
            table = M::TABLE_NAME,
            pending = pending.len(),
            "Fetching pending targets"
        );
        let fetched = match persister.select(session, &pending) {
            Outcome::Ok(fetched) => fetched,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match self.register(session, &fetched) {
            Ok(()) => Outcome::Ok(true),
            Err(e) => Outcome::Err(e),
        }
    }

    /// Whether a [`fetch_pending`](Self::fetch_pending) round has work to do.
    pub fn has_pending(&self, session: &LoadSession) -> bool {
        self.context(session)
            .is_some_and(CycleLoadRuntimeContext::has_unrequested)
    }

    /// Remember instances of `M` observed by this load.
    #[allow(clippy::result_large_err)]
    pub fn register(&self, session: &mut LoadSession, entities: &[ModelRef<M>]) -> Result<()> {
        let context = session.context_mut::<M>(self.id);
        for entity in entities {
            context.resolve(entity_id(entity)?, Arc::clone(entity));
        }
        Ok(())
    }

    /// Attach resolved targets to every pending source and drain the storages.
    ///
    /// Identifiers that no select returned go through the missing-target
    /// policy.
    #[allow(clippy::result_large_err)]
    pub fn fix_up(&self, session: &mut LoadSession) -> Result<usize> {
        let context = session.context_mut::<M>(self.id);
        let mut applied = 0;
        for relation in self.relations.values() {
            let Some(storage) = context.storage_mut(relation.name()) else {
                continue;
            };
            let pending: Vec<(EntityHandle, IndexSet<M::Id>)> = storage.drain().collect();
            for (source, ids) in pending {
                for id in ids {
                    match context.resolved(&id) {
                        Some(target) => {
                            if relation.fix(&source, Arc::clone(target))? {
                                applied += 1;
                            }
                        }
                        None => self.missing_target(relation, &id)?,
                    }
                }
            }
        }
        Ok(applied)
    }

    #[allow(clippy::result_large_err)]
    fn missing_target(&self, relation: &CycleRelation<M>, id: &M::Id) -> Result<()> {
        match self.config.missing_target {
            MissingTargetPolicy::Skip => {
                tracing::trace!(relation = relation.name(), target = ?id, "Missing target skipped");
                Ok(())
            }
            MissingTargetPolicy::Warn => {
                tracing::warn!(
                    relation = relation.name(),
                    table = M::TABLE_NAME,
                    target = ?id,
                    "Pending target not found, relation left unset"
                );
                Ok(())
            }
            MissingTargetPolicy::Fail => Err(Error::load(
                LoadErrorKind::MissingTarget,
                format!(
                    "relation '{}' references {} {:?} which no select returned",
                    relation.name(),
                    M::TABLE_NAME,
                    id
                ),
            )),
        }
    }

    /// Leave a select; returns `true` when the context was released.
    pub fn leave(&self, session: &mut LoadSession) -> bool {
        let released = session.context_mut::<M>(self.id).after_select();
        if released {
            tracing::debug!(table = M::TABLE_NAME, "Cycle load context released");
        }
        released
    }

    /// Drop this loader's state for the current load.
    pub fn release(&self, session: &mut LoadSession) {
        session.context_mut::<M>(self.id).release();
    }

    /// A listener feeding this loader from selects of `S`.
    ///
    /// `S` is `M` itself for the target persister, or the source type of a
    /// relation declared for another type. Phase-2 fetches go through
    /// `target`, which is held weakly so that persisters referencing each
    /// other do not keep each other alive.
    pub fn listener<S: Model>(
        self: &Arc<Self>,
        target: &Arc<EntityPersister<M>>,
    ) -> Arc<dyn SelectListener<S>> {
        Arc::new(CycleListener {
            loader: Arc::clone(self),
            target: Arc::downgrade(target),
            _source: PhantomData::<fn() -> S>,
        })
    }

    /// Attach a [`listener`](Self::listener) to the persister of a source
    /// type other than `M`.
    #[allow(clippy::result_large_err)]
    pub fn attach_source<S: Model>(
        self: &Arc<Self>,
        source: &EntityPersister<S>,
        target: &Arc<EntityPersister<M>>,
    ) -> Result<()> {
        if TypeId::of::<S>() == TypeId::of::<M>() {
            return Err(Error::Config(ConfigError {
                message: format!(
                    "{} rows already feed their own cycle loader",
                    M::TABLE_NAME
                ),
                source: None,
            }));
        }
        source.add_listener(self.listener::<S>(target))
    }
}

impl<M: Model> std::fmt::Debug for CycleLoader<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleLoader")
            .field("id", &self.id)
            .field("table", &M::TABLE_NAME)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

/// Fetch rounds over every loader of the load until none issues a select,
/// then fix up all of them once.
fn drive(session: &mut LoadSession) -> Outcome<(), Error> {
    let mut rounds = 0_usize;
    loop {
        let mut fetched = false;
        for load in session.tracked() {
            match load.fetch_pending(session) {
                Outcome::Ok(issued) => fetched |= issued,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        if !fetched {
            break;
        }
        rounds += 1;
    }

    let mut applied = 0;
    for load in session.tracked() {
        match load.fix_up(session) {
            Ok(n) => applied += n,
            Err(e) => return Outcome::Err(e),
        }
    }
    tracing::debug!(rounds, applied, "Pending relations fixed up");
    Outcome::Ok(())
}

/// A loader together with the persister its phase-2 fetches go through.
struct LoaderDriver<M: Model> {
    loader: Arc<CycleLoader<M>>,
    target: Weak<EntityPersister<M>>,
}

impl<M: Model> PendingLoad for LoaderDriver<M> {
    fn fetch_pending(&self, session: &mut LoadSession) -> Outcome<bool, Error> {
        if !self.loader.has_pending(session) {
            return Outcome::Ok(false);
        }
        let Some(target) = self.target.upgrade() else {
            return Outcome::Err(Error::load(
                LoadErrorKind::PersisterDropped,
                format!("persister of {} was dropped", M::TABLE_NAME),
            ));
        };
        self.loader.fetch_pending(session, &target)
    }

    fn fix_up(&self, session: &mut LoadSession) -> Result<usize> {
        self.loader.fix_up(session)
    }

    fn finish(&self, session: &mut LoadSession) {
        if session.context_mut::<M>(self.loader.id).unhold() {
            tracing::debug!(table = M::TABLE_NAME, "Cycle load context released");
        }
    }
}

/// Feeds a loader of `M` from selects of `S`.
struct CycleListener<S, M: Model> {
    loader: Arc<CycleLoader<M>>,
    target: Weak<EntityPersister<M>>,
    _source: PhantomData<fn() -> S>,
}

impl<S: Model, M: Model> SelectListener<S> for CycleListener<S, M> {
    fn before_select(&self, session: &mut LoadSession, _ids: &[S::Id]) -> Result<()> {
        self.loader.enter(session)?;
        let joined = session.track(self.loader.id, || {
            Arc::new(LoaderDriver {
                loader: Arc::clone(&self.loader),
                target: self.target.clone(),
            }) as Arc<dyn PendingLoad>
        });
        if joined {
            // kept until the outermost select finishes, even if only nested
            // selects enter this loader
            session.context_mut::<M>(self.loader.id).hold();
        }
        Ok(())
    }

    fn on_row(&self, session: &mut LoadSession, entity: &ModelRef<S>, row: &Row) -> Result<()> {
        self.loader.record_row(session, entity, row);
        // rows of the target type are resolved as soon as they are decoded
        match EntityHandle::new(entity).downcast::<M>() {
            Some(target) => self.loader.register(session, &[target]),
            None => Ok(()),
        }
    }

    fn after_select(
        &self,
        session: &mut LoadSession,
        _persister: &EntityPersister<S>,
        _results: &[ModelRef<S>],
    ) -> Outcome<(), Error> {
        if session.is_outermost() {
            drive(session)
        } else {
            Outcome::Ok(())
        }
    }

    fn select_completed(&self, session: &mut LoadSession) {
        self.loader.leave(session);
    }

    fn on_error(&self, session: &mut LoadSession, ids: &[S::Id], error: &Error) {
        tracing::debug!(
            table = M::TABLE_NAME,
            ids = ids.len(),
            error = %error,
            "Releasing cycle load context after failure"
        );
        self.loader.release(session);
    }
}
