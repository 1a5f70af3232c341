//! Call-scoped state of one top-level load.
//!
//! A `LoadSession` is created by the caller of the outermost select and passed
//! by `&mut` through every select and listener hook that the load triggers,
//! nested phase-2 fetches included. Two loads never share a session, so they
//! never share cycle-loading state, whatever thread or worker runs them.
//!
//! The session also tracks which loaders joined the load. Their phase 2 is
//! driven from the outermost select only; nested selects just record, so the
//! nesting depth of a load never depends on how deep the loaded data is.

use crate::context::CycleLoadRuntimeContext;
use graphmodel_core::{Error, Model, Outcome, Result};
use indexmap::IndexMap;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one cycle loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(u64);

impl LoaderId {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        Self(NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Phase-2 work of one loader, driven by the outermost select of a load.
pub(crate) trait PendingLoad: Send + Sync {
    /// Fetch identifiers nobody asked for yet in one select.
    ///
    /// Returns `true` when a select was issued.
    fn fetch_pending(&self, session: &mut LoadSession) -> Outcome<bool, Error>;

    /// Attach every resolved target to its pending sources.
    #[allow(clippy::result_large_err)]
    fn fix_up(&self, session: &mut LoadSession) -> Result<usize>;

    /// The outermost select has finished (successfully or not).
    fn finish(&self, session: &mut LoadSession);
}

/// Runtime contexts of every cycle loader taking part in one load.
#[derive(Default)]
pub struct LoadSession {
    contexts: HashMap<LoaderId, Box<dyn Any + Send>>,
    depth: usize,
    loads: IndexMap<LoaderId, Arc<dyn PendingLoad>>,
}

impl LoadSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// The context of `loader`, created on first use.
    pub fn context_mut<M: Model>(&mut self, loader: LoaderId) -> &mut CycleLoadRuntimeContext<M> {
        let slot = self
            .contexts
            .entry(loader)
            .or_insert_with(|| Box::new(CycleLoadRuntimeContext::<M>::new()));
        // a loader id is bound to a single model type
        if !slot.is::<CycleLoadRuntimeContext<M>>() {
            *slot = Box::new(CycleLoadRuntimeContext::<M>::new());
        }
        match slot.downcast_mut::<CycleLoadRuntimeContext<M>>() {
            Some(context) => context,
            None => unreachable!("context slot type checked above"),
        }
    }

    /// The context of `loader`, if this session ever used it.
    pub fn context<M: Model>(&self, loader: LoaderId) -> Option<&CycleLoadRuntimeContext<M>> {
        self.contexts
            .get(&loader)
            .and_then(|slot| slot.downcast_ref::<CycleLoadRuntimeContext<M>>())
    }

    /// Number of selects currently running in this session.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether the innermost running select is the outermost one of the load.
    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }

    pub(crate) fn enter_select(&mut self) {
        self.depth += 1;
    }

    /// Leave a select; when the outermost one leaves, every tracked loader is
    /// finished and forgotten.
    pub(crate) fn leave_select(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            let loads = std::mem::take(&mut self.loads);
            for load in loads.values() {
                load.finish(self);
            }
        }
    }

    /// Track a loader for the current load. Returns `true` the first time.
    pub(crate) fn track(
        &mut self,
        loader: LoaderId,
        load: impl FnOnce() -> Arc<dyn PendingLoad>,
    ) -> bool {
        if self.loads.contains_key(&loader) {
            return false;
        }
        self.loads.insert(loader, load());
        true
    }

    /// Loaders tracked by the current load, in the order they joined.
    pub(crate) fn tracked(&self) -> Vec<Arc<dyn PendingLoad>> {
        self.loads.values().cloned().collect()
    }

    /// Number of loaders that have a context in this session.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

impl std::fmt::Debug for LoadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadSession")
            .field("loaders", &self.contexts.keys().collect::<Vec<_>>())
            .field("depth", &self.depth)
            .field("tracked", &self.loads.keys().collect::<Vec<_>>())
            .finish()
    }
}
