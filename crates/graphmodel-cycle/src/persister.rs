//! Entity persister: runs selects through a row source and drives listeners.
//!
//! Every select goes through the same lifecycle:
//!
//! 1. `before_select` on every listener
//! 2. rows fetched from the [`RowSource`], decoded, `on_row` for each row
//! 3. `after_select` on every listener (in the outermost select of a load,
//!    phase 2 of cycle loading happens here and re-enters `select` on this or
//!    another persister)
//! 4. `select_completed` on every listener
//!
//! Any failure after step 1 calls `on_error` on every listener and is
//! returned unchanged. The session's select depth covers all four steps.

use crate::session::LoadSession;
use graphmodel_core::{
    Error, Identifier, LoadErrorKind, Model, ModelRef, Outcome, Result, Row, Value, model_ref,
    read_entity,
};
use indexmap::IndexMap;
use std::sync::{Arc, RwLock};

/// Executes the actual query for a persister.
///
/// `fetch` returns every row of `table` whose primary key is one of `ids`. A
/// source may return several rows for one key (one per related child, for
/// example); they are decoded into a single entity.
pub trait RowSource: Send + Sync {
    fn fetch(&self, table: &'static str, ids: &[Value]) -> Outcome<Vec<Row>, Error>;
}

/// Hooks invoked around every select of an [`EntityPersister`].
pub trait SelectListener<M: Model>: Send + Sync {
    /// Called before the row source is queried.
    #[allow(clippy::result_large_err)]
    fn before_select(&self, session: &mut LoadSession, ids: &[M::Id]) -> Result<()>;

    /// Called for every fetched row, with the entity it decoded into.
    #[allow(clippy::result_large_err)]
    fn on_row(&self, _session: &mut LoadSession, _entity: &ModelRef<M>, _row: &Row) -> Result<()> {
        Ok(())
    }

    /// Called once all rows are consumed. May issue further selects.
    fn after_select(
        &self,
        session: &mut LoadSession,
        persister: &EntityPersister<M>,
        results: &[ModelRef<M>],
    ) -> Outcome<(), Error>;

    /// Called after every listener's `after_select` succeeded.
    fn select_completed(&self, _session: &mut LoadSession) {}

    /// Called when any step of the select failed or was cancelled.
    fn on_error(&self, session: &mut LoadSession, ids: &[M::Id], error: &Error);
}

/// Loads entities of one model type.
pub struct EntityPersister<M: Model> {
    source: Arc<dyn RowSource>,
    listeners: RwLock<Vec<Arc<dyn SelectListener<M>>>>,
}

impl<M: Model> EntityPersister<M> {
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self {
            source,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener; it sees every later select.
    #[allow(clippy::result_large_err)]
    pub fn add_listener(&self, listener: Arc<dyn SelectListener<M>>) -> Result<()> {
        let mut listeners = self.listeners.write().map_err(|_| poisoned())?;
        listeners.push(listener);
        tracing::debug!(
            table = M::TABLE_NAME,
            listeners = listeners.len(),
            "Select listener attached"
        );
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub fn listener_count(&self) -> Result<usize> {
        let listeners = self.listeners.read().map_err(|_| poisoned())?;
        Ok(listeners.len())
    }

    /// Load entities by identifier in a fresh session.
    pub fn load(&self, ids: &[M::Id]) -> Outcome<Vec<ModelRef<M>>, Error> {
        let mut session = LoadSession::new();
        self.select(&mut session, ids)
    }

    /// Load entities by identifier as part of an ongoing load.
    ///
    /// Results follow first-row order; identifiers without a row are absent.
    #[tracing::instrument(level = "debug", skip(self, session, ids), fields(table = M::TABLE_NAME, ids = ids.len()))]
    pub fn select(
        &self,
        session: &mut LoadSession,
        ids: &[M::Id],
    ) -> Outcome<Vec<ModelRef<M>>, Error> {
        session.enter_select();
        let outcome = self.select_with_listeners(session, ids);
        session.leave_select();
        outcome
    }

    fn select_with_listeners(
        &self,
        session: &mut LoadSession,
        ids: &[M::Id],
    ) -> Outcome<Vec<ModelRef<M>>, Error> {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return Outcome::Err(poisoned()),
        };

        for listener in &listeners {
            if let Err(e) = listener.before_select(session, ids) {
                return self.fail(&listeners, session, ids, e);
            }
        }

        match self.run(&listeners, session, ids) {
            Outcome::Ok(results) => {
                for listener in &listeners {
                    listener.select_completed(session);
                }
                tracing::debug!(results = results.len(), "Select complete");
                Outcome::Ok(results)
            }
            Outcome::Err(e) => self.fail(&listeners, session, ids, e),
            Outcome::Cancelled(r) => {
                notify_error(&listeners, session, ids, &Error::Cancelled);
                Outcome::Cancelled(r)
            }
            Outcome::Panicked(p) => {
                let error = Error::Custom(format!("select on {} panicked", M::TABLE_NAME));
                notify_error(&listeners, session, ids, &error);
                Outcome::Panicked(p)
            }
        }
    }

    fn run(
        &self,
        listeners: &[Arc<dyn SelectListener<M>>],
        session: &mut LoadSession,
        ids: &[M::Id],
    ) -> Outcome<Vec<ModelRef<M>>, Error> {
        let keys: Vec<Value> = ids.iter().map(Identifier::to_value).collect();
        let rows = match self.source.fetch(M::TABLE_NAME, &keys) {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::trace!(rows = rows.len(), "Rows fetched");

        let mut entities: IndexMap<M::Id, ModelRef<M>> = IndexMap::with_capacity(rows.len());
        for row in &rows {
            let entity = match decode(&mut entities, row) {
                Ok(entity) => entity,
                Err(e) => return Outcome::Err(e),
            };
            for listener in listeners {
                if let Err(e) = listener.on_row(session, &entity, row) {
                    return Outcome::Err(e);
                }
            }
        }

        let results: Vec<ModelRef<M>> = entities.into_values().collect();
        for listener in listeners {
            match listener.after_select(session, self, &results) {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(results)
    }

    fn fail(
        &self,
        listeners: &[Arc<dyn SelectListener<M>>],
        session: &mut LoadSession,
        ids: &[M::Id],
        error: Error,
    ) -> Outcome<Vec<ModelRef<M>>, Error> {
        tracing::debug!(table = M::TABLE_NAME, error = %error, "Select failed");
        notify_error(listeners, session, ids, &error);
        Outcome::Err(error)
    }
}

impl<M: Model> std::fmt::Debug for EntityPersister<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityPersister")
            .field("table", &M::TABLE_NAME)
            .field("listeners", &self.listener_count().ok())
            .finish_non_exhaustive()
    }
}

fn notify_error<M: Model>(
    listeners: &[Arc<dyn SelectListener<M>>],
    session: &mut LoadSession,
    ids: &[M::Id],
    error: &Error,
) {
    for listener in listeners {
        listener.on_error(session, ids, error);
    }
}

/// Decode `row`, reusing the entity already decoded for its key.
#[allow(clippy::result_large_err)]
fn decode<M: Model>(entities: &mut IndexMap<M::Id, ModelRef<M>>, row: &Row) -> Result<ModelRef<M>> {
    let model = M::from_row(row)?;
    let id = model.id();
    if let Some(existing) = entities.get(&id) {
        return Ok(Arc::clone(existing));
    }
    let entity = model_ref(model);
    entities.insert(id, Arc::clone(&entity));
    Ok(entity)
}

/// Identifier of a loaded entity.
#[allow(clippy::result_large_err)]
pub fn entity_id<M: Model>(entity: &ModelRef<M>) -> Result<M::Id> {
    Ok(read_entity(entity)?.id())
}

fn poisoned() -> Error {
    Error::load(
        LoadErrorKind::LockPoisoned,
        "persister listener list poisoned",
    )
}
