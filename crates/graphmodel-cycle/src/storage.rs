//! Identity-keyed accumulation of pending relation targets.
//!
//! While the rows of a main query are consumed, every source instance that
//! references a not-yet-loaded target records that target's identifier here.
//! Sources are keyed by [`EntityHandle`], i.e. by instance identity: an entity
//! that is still being populated may compare equal to a sibling, or its
//! equality may change as more columns are decoded.

use graphmodel_core::{EntityHandle, Identifier};
use indexmap::{IndexMap, IndexSet};

/// Pending target identifiers per source instance, for one relation.
///
/// Iteration order is the order in which sources were first recorded, so
/// fix-up runs in row order.
#[derive(Debug, Clone)]
pub struct EntityRelationStorage<Id> {
    pending: IndexMap<EntityHandle, IndexSet<Id>>,
}

impl<Id> Default for EntityRelationStorage<Id> {
    fn default() -> Self {
        Self {
            pending: IndexMap::new(),
        }
    }
}

impl<Id: Identifier> EntityRelationStorage<Id> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `source` still needs the target identified by `target_id`.
    pub fn add_relation_to_initialize(&mut self, source: EntityHandle, target_id: Id) {
        self.pending.entry(source).or_default().insert(target_id);
    }

    /// Distinct source instances with at least one pending identifier.
    pub fn entities_to_fulfill(&self) -> impl Iterator<Item = &EntityHandle> {
        self.pending
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(source, _)| source)
    }

    /// Pending identifiers of one source, if it recorded any.
    pub fn relation_to_initialize(&self, source: &EntityHandle) -> Option<&IndexSet<Id>> {
        self.pending.get(source)
    }

    /// Union of pending identifiers across every source.
    pub fn identifiers_to_load(&self) -> IndexSet<Id> {
        self.pending.values().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Take every `(source, identifiers)` pair, leaving the storage empty.
    pub fn drain(&mut self) -> impl Iterator<Item = (EntityHandle, IndexSet<Id>)> + '_ {
        self.pending.drain(..)
    }
}
