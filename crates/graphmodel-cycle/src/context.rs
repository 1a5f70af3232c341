//! Per-load runtime state of one cycle loader.

use crate::storage::EntityRelationStorage;
use graphmodel_core::{EntityHandle, Model, ModelRef};
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};

/// Reentrancy counter plus the relation storages of one cycle loader.
///
/// One context exists per loader per [`LoadSession`](crate::LoadSession). It is
/// shared by the outermost select and every nested select that phase 2
/// triggers. Storages (and resolved instances) are dropped only when the
/// counter returns to zero and no hold is taken, i.e. when the outermost
/// select has unwound.
pub struct CycleLoadRuntimeContext<M: Model> {
    counter: usize,
    held: bool,
    storages: IndexMap<String, EntityRelationStorage<M::Id>>,
    resolved: HashMap<M::Id, ModelRef<M>>,
    requested: HashSet<M::Id>,
    releases: usize,
}

impl<M: Model> Default for CycleLoadRuntimeContext<M> {
    fn default() -> Self {
        Self {
            counter: 0,
            held: false,
            storages: IndexMap::new(),
            resolved: HashMap::new(),
            requested: HashSet::new(),
            releases: 0,
        }
    }
}

impl<M: Model> CycleLoadRuntimeContext<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a select. Returns the new depth.
    pub fn before_select(&mut self) -> usize {
        self.counter += 1;
        self.counter
    }

    /// Leave a select; clears everything when the outermost one leaves.
    ///
    /// Returns `true` when this call released the context.
    pub fn after_select(&mut self) -> bool {
        if self.counter == 0 {
            return false;
        }
        self.counter -= 1;
        if self.counter == 0 && !self.held {
            self.clear();
            true
        } else {
            false
        }
    }

    /// Drop all state regardless of depth.
    ///
    /// Used by the error path. A release is counted only when the context was
    /// active, so a failure unwinding through several nested levels counts once.
    pub fn release(&mut self) {
        if self.counter > 0 || self.held {
            self.counter = 0;
            self.held = false;
            self.clear();
        }
    }

    /// Keep state alive past depth zero until [`unhold`](Self::unhold).
    ///
    /// Taken when a loader first joins a load, so a context entered only by
    /// nested selects survives until the outermost select has finished.
    pub fn hold(&mut self) {
        self.held = true;
    }

    /// Drop the hold; releases when no select is active.
    pub fn unhold(&mut self) -> bool {
        if !self.held {
            return false;
        }
        self.held = false;
        if self.counter == 0 {
            self.clear();
            true
        } else {
            false
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    fn clear(&mut self) {
        self.storages.clear();
        self.resolved.clear();
        self.requested.clear();
        self.releases += 1;
    }

    pub fn add_relation_to_initialize(
        &mut self,
        relation: &str,
        source: EntityHandle,
        target_id: M::Id,
    ) {
        if !self.storages.contains_key(relation) {
            self.storages
                .insert(relation.to_string(), EntityRelationStorage::new());
        }
        if let Some(storage) = self.storages.get_mut(relation) {
            storage.add_relation_to_initialize(source, target_id);
        }
    }

    /// Union of pending identifiers across every relation.
    pub fn give_identifiers_to_load(&self) -> IndexSet<M::Id> {
        self.storages
            .values()
            .flat_map(EntityRelationStorage::identifiers_to_load)
            .collect()
    }

    /// Storage of one relation, if it has anything pending.
    pub fn entities_to_fulfill(&self, relation: &str) -> Option<&EntityRelationStorage<M::Id>> {
        self.storages.get(relation).filter(|s| !s.is_empty())
    }

    pub(crate) fn storage_mut(&mut self, relation: &str) -> Option<&mut EntityRelationStorage<M::Id>> {
        self.storages.get_mut(relation)
    }

    /// Remember an instance observed by any select of the current load.
    ///
    /// The first instance registered for an identifier wins.
    pub fn resolve(&mut self, id: M::Id, instance: ModelRef<M>) {
        self.resolved.entry(id).or_insert(instance);
    }

    pub fn resolved(&self, id: &M::Id) -> Option<&ModelRef<M>> {
        self.resolved.get(id)
    }

    pub fn is_resolved(&self, id: &M::Id) -> bool {
        self.resolved.contains_key(id)
    }

    /// Pending identifiers that no select of this load has returned or been
    /// asked for yet. They are marked as requested.
    ///
    /// A dangling identifier is therefore fetched at most once per load.
    pub fn take_unrequested(&mut self) -> Vec<M::Id> {
        let pending: Vec<M::Id> = self
            .give_identifiers_to_load()
            .into_iter()
            .filter(|id| !self.resolved.contains_key(id) && !self.requested.contains(id))
            .collect();
        self.requested.extend(pending.iter().cloned());
        pending
    }

    /// Whether [`take_unrequested`](Self::take_unrequested) would return
    /// anything.
    pub fn has_unrequested(&self) -> bool {
        self.storages
            .values()
            .flat_map(EntityRelationStorage::identifiers_to_load)
            .any(|id| !self.resolved.contains_key(&id) && !self.requested.contains(&id))
    }

    /// Current reentrancy depth.
    pub fn depth(&self) -> usize {
        self.counter
    }

    pub fn is_idle(&self) -> bool {
        self.counter == 0
            && !self.held
            && self.storages.is_empty()
            && self.resolved.is_empty()
            && self.requested.is_empty()
    }

    /// Number of times this context has been released since creation.
    pub fn releases(&self) -> usize {
        self.releases
    }
}

impl<M: Model> std::fmt::Debug for CycleLoadRuntimeContext<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleLoadRuntimeContext")
            .field("model", &M::TABLE_NAME)
            .field("depth", &self.counter)
            .field("held", &self.held)
            .field("relations", &self.storages.keys().collect::<Vec<_>>())
            .field("resolved", &self.resolved.len())
            .field("releases", &self.releases)
            .finish()
    }
}
