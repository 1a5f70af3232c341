//! Diff value types.
//!
//! A `Diff` classifies one element of a collection comparison as added,
//! removed or held. Constructors are the only way to build one, so the
//! presence of `source`/`replacing` always agrees with the state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Change classification of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Present only in the "after" collection.
    Added,
    /// Present only in the "before" collection.
    Removed,
    /// Present on both sides (the two instances may differ on non-identifying fields).
    Held,
}

/// One classified change between a before and an after collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T> {
    state: State,
    source: Option<T>,
    replacing: Option<T>,
}

impl<T> Diff<T> {
    /// An element that only exists after.
    pub fn added(replacing: T) -> Self {
        Self {
            state: State::Added,
            source: None,
            replacing: Some(replacing),
        }
    }

    /// An element that only existed before.
    pub fn removed(source: T) -> Self {
        Self {
            state: State::Removed,
            source: Some(source),
            replacing: None,
        }
    }

    /// An element present on both sides.
    pub fn held(source: T, replacing: T) -> Self {
        Self {
            state: State::Held,
            source: Some(source),
            replacing: Some(replacing),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The "before" instance (absent for `Added`).
    pub fn source(&self) -> Option<&T> {
        self.source.as_ref()
    }

    /// The "after" instance (absent for `Removed`).
    pub fn replacing(&self) -> Option<&T> {
        self.replacing.as_ref()
    }

    /// Whichever instance is present, preferring the "after" one.
    pub fn current(&self) -> &T {
        match (&self.replacing, &self.source) {
            (Some(value), _) | (None, Some(value)) => value,
            // constructors always set at least one side
            (None, None) => unreachable!("diff without any instance"),
        }
    }

    pub fn into_parts(self) -> (State, Option<T>, Option<T>) {
        (self.state, self.source, self.replacing)
    }

    /// Transform both instances, keeping the classification.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Diff<U> {
        Diff {
            state: self.state,
            source: self.source.map(&mut f),
            replacing: self.replacing.map(f),
        }
    }
}

/// A diff over ordered collections, carrying every position the element
/// occupied before and after.
///
/// Several positions are possible because duplicates (by identity) may sit at
/// several indexes of a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDiff<T> {
    diff: Diff<T>,
    source_indexes: BTreeSet<usize>,
    replacer_indexes: BTreeSet<usize>,
}

impl<T> IndexedDiff<T> {
    pub fn added(replacing: T, replacer_indexes: BTreeSet<usize>) -> Self {
        Self {
            diff: Diff::added(replacing),
            source_indexes: BTreeSet::new(),
            replacer_indexes,
        }
    }

    pub fn removed(source: T, source_indexes: BTreeSet<usize>) -> Self {
        Self {
            diff: Diff::removed(source),
            source_indexes,
            replacer_indexes: BTreeSet::new(),
        }
    }

    pub fn held(
        source: T,
        replacing: T,
        source_indexes: BTreeSet<usize>,
        replacer_indexes: BTreeSet<usize>,
    ) -> Self {
        Self {
            diff: Diff::held(source, replacing),
            source_indexes,
            replacer_indexes,
        }
    }

    pub fn state(&self) -> State {
        self.diff.state()
    }

    pub fn source(&self) -> Option<&T> {
        self.diff.source()
    }

    pub fn replacing(&self) -> Option<&T> {
        self.diff.replacing()
    }

    /// Positions in the "before" list.
    pub fn source_indexes(&self) -> &BTreeSet<usize> {
        &self.source_indexes
    }

    /// Positions in the "after" list.
    pub fn replacer_indexes(&self) -> &BTreeSet<usize> {
        &self.replacer_indexes
    }

    /// The unordered part of this diff.
    pub fn as_diff(&self) -> &Diff<T> {
        &self.diff
    }

    /// `true` for a held element whose positions changed.
    pub fn is_moved(&self) -> bool {
        self.diff.state() == State::Held && self.source_indexes != self.replacer_indexes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_by_name() {
        let states = [State::Added, State::Removed, State::Held];
        let json = serde_json::to_string(&states).unwrap();
        assert_eq!(json, r#"["Added","Removed","Held"]"#);
        let back: Vec<State> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, states);
    }

    #[test]
    fn constructors_match_state() {
        let added = Diff::added("a");
        assert_eq!(added.state(), State::Added);
        assert_eq!(added.source(), None);
        assert_eq!(added.replacing(), Some(&"a"));

        let removed = Diff::removed("r");
        assert_eq!(removed.state(), State::Removed);
        assert_eq!(removed.source(), Some(&"r"));
        assert_eq!(removed.replacing(), None);
        assert_eq!(removed.current(), &"r");

        let held = Diff::held("old", "new");
        assert_eq!(held.current(), &"new");
        assert_eq!(held.into_parts(), (State::Held, Some("old"), Some("new")));
    }

    #[test]
    fn map_keeps_state() {
        let held = Diff::held(1, 2).map(|v| v * 10);
        assert_eq!(held.source(), Some(&10));
        assert_eq!(held.replacing(), Some(&20));
        assert_eq!(held.state(), State::Held);
    }

    #[test]
    fn indexed_moved_detection() {
        let still = IndexedDiff::held('a', 'a', BTreeSet::from([0]), BTreeSet::from([0]));
        assert!(!still.is_moved());

        let moved = IndexedDiff::held('a', 'a', BTreeSet::from([0]), BTreeSet::from([2]));
        assert!(moved.is_moved());

        let added = IndexedDiff::added('b', BTreeSet::from([1]));
        assert!(!added.is_moved());
        assert!(added.source_indexes().is_empty());
        assert_eq!(added.as_diff().state(), State::Added);
    }
}
