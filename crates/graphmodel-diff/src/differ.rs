//! Computes what changed between two states of a collection.
//!
//! Elements are matched by a caller-supplied identity function rather than by
//! equality, so two versions of the same entity (same key, different fields)
//! are reported as `Held` instead of one removal plus one addition.

use crate::diff::{Diff, IndexedDiff};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::hash::Hash;

/// Diffs collections by identity.
///
/// # Example
///
/// ```ignore
/// let differ = CollectionDiffer::new(|node: &Node| node.id);
/// for change in differ.diff(&known_children, &current_children) {
///     match change.state() { /* ... */ }
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CollectionDiffer<F> {
    identity: F,
}

/// Positions occupied by one identity on one side of an ordered diff.
struct Occurrences {
    positions: Vec<usize>,
}

impl<F> CollectionDiffer<F> {
    /// Create a differ keyed by `identity`.
    pub fn new(identity: F) -> Self {
        Self { identity }
    }

    /// Diff two unordered collections.
    ///
    /// Every identity of `before` yields either `Held(before, after)` or
    /// `Removed(before)`; every identity found only in `after` yields
    /// `Added(after)`. Duplicates collapse onto their first occurrence. Results
    /// follow encounter order: before-side entries first, then additions.
    #[tracing::instrument(level = "trace", skip_all, fields(before = before.len(), after = after.len()))]
    pub fn diff<T, K>(&self, before: &[T], after: &[T]) -> Vec<Diff<T>>
    where
        F: Fn(&T) -> K,
        K: Eq + Hash,
        T: Clone,
    {
        let before_index = self.index_first(before);
        let after_index = self.index_first(after);

        let mut diffs = Vec::with_capacity(before_index.len() + after_index.len());
        for (key, source) in &before_index {
            match after_index.get(key) {
                Some(replacing) => diffs.push(Diff::held((*source).clone(), (*replacing).clone())),
                None => diffs.push(Diff::removed((*source).clone())),
            }
        }
        for (key, replacing) in &after_index {
            if !before_index.contains_key(key) {
                diffs.push(Diff::added((*replacing).clone()));
            }
        }

        tracing::trace!(diffs = diffs.len(), "Collection diff computed");
        diffs
    }

    /// Diff two lists, tracking the positions each identity occupies.
    ///
    /// Positions of an identity present on both sides are paired one-to-one in
    /// encounter order until either side runs out. Paired positions form one
    /// `Held` diff; leftover before positions form one `Removed` diff and
    /// leftover after positions one `Added` diff for that identity. A pure
    /// reordering therefore yields only `Held` diffs.
    #[tracing::instrument(level = "trace", skip_all, fields(before = before.len(), after = after.len()))]
    pub fn diff_ordered<T, K>(&self, before: &[T], after: &[T]) -> Vec<IndexedDiff<T>>
    where
        F: Fn(&T) -> K,
        K: Eq + Hash,
        T: Clone,
    {
        let before_positions = self.index_positions(before);
        let after_positions = self.index_positions(after);

        let mut diffs = Vec::with_capacity(before_positions.len() + after_positions.len());
        for (key, source) in &before_positions {
            let Some(replacer) = after_positions.get(key) else {
                diffs.push(IndexedDiff::removed(
                    before[source.positions[0]].clone(),
                    source.positions.iter().copied().collect(),
                ));
                continue;
            };

            let paired = source.positions.len().min(replacer.positions.len());
            let (source_paired, source_left) = source.positions.split_at(paired);
            let (replacer_paired, replacer_left) = replacer.positions.split_at(paired);

            diffs.push(IndexedDiff::held(
                before[source_paired[0]].clone(),
                after[replacer_paired[0]].clone(),
                source_paired.iter().copied().collect(),
                replacer_paired.iter().copied().collect(),
            ));
            if let Some(&first) = source_left.first() {
                diffs.push(IndexedDiff::removed(
                    before[first].clone(),
                    source_left.iter().copied().collect::<BTreeSet<_>>(),
                ));
            }
            if let Some(&first) = replacer_left.first() {
                diffs.push(IndexedDiff::added(
                    after[first].clone(),
                    replacer_left.iter().copied().collect::<BTreeSet<_>>(),
                ));
            }
        }
        for (key, replacer) in &after_positions {
            if !before_positions.contains_key(key) {
                diffs.push(IndexedDiff::added(
                    after[replacer.positions[0]].clone(),
                    replacer.positions.iter().copied().collect(),
                ));
            }
        }

        tracing::trace!(diffs = diffs.len(), "Ordered collection diff computed");
        diffs
    }

    fn index_first<'a, T, K>(&self, items: &'a [T]) -> IndexMap<K, &'a T>
    where
        F: Fn(&T) -> K,
        K: Eq + Hash,
    {
        let mut index = IndexMap::with_capacity(items.len());
        for item in items {
            index.entry((self.identity)(item)).or_insert(item);
        }
        index
    }

    fn index_positions<T, K>(&self, items: &[T]) -> IndexMap<K, Occurrences>
    where
        F: Fn(&T) -> K,
        K: Eq + Hash,
    {
        let mut index: IndexMap<K, Occurrences> = IndexMap::with_capacity(items.len());
        for (position, item) in items.iter().enumerate() {
            index
                .entry((self.identity)(item))
                .or_insert_with(|| Occurrences {
                    positions: Vec::new(),
                })
                .positions
                .push(position);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::State;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: u32,
        label: &'static str,
    }

    fn item(id: u32, label: &'static str) -> Item {
        Item { id, label }
    }

    fn by_id() -> CollectionDiffer<fn(&Item) -> u32> {
        CollectionDiffer::new(|i: &Item| i.id)
    }

    fn chars() -> CollectionDiffer<fn(&char) -> char> {
        CollectionDiffer::new(|c: &char| *c)
    }

    fn set(indexes: &[usize]) -> BTreeSet<usize> {
        indexes.iter().copied().collect()
    }

    #[test]
    fn diff_classifies_by_identity() {
        let before = vec![item(1, "a"), item(2, "b"), item(3, "c")];
        let after = vec![item(3, "c2"), item(4, "d"), item(1, "a")];

        let diffs = by_id().diff(&before, &after);
        assert_eq!(diffs.len(), 4);

        assert_eq!(diffs[0], Diff::held(item(1, "a"), item(1, "a")));
        assert_eq!(diffs[1], Diff::removed(item(2, "b")));
        assert_eq!(diffs[2], Diff::held(item(3, "c"), item(3, "c2")));
        assert_eq!(diffs[3], Diff::added(item(4, "d")));
    }

    #[test]
    fn diff_empty_inputs() {
        let none: Vec<Item> = Vec::new();
        assert!(by_id().diff(&none, &none).is_empty());

        let after = vec![item(1, "a")];
        let diffs = by_id().diff(&none, &after);
        assert_eq!(diffs, vec![Diff::added(item(1, "a"))]);

        let diffs = by_id().diff(&after, &none);
        assert_eq!(diffs, vec![Diff::removed(item(1, "a"))]);
    }

    #[test]
    fn diff_held_keeps_both_versions() {
        let before = vec![item(7, "old")];
        let after = vec![item(7, "new")];
        let diffs = by_id().diff(&before, &after);
        assert_eq!(diffs[0].source().map(|i| i.label), Some("old"));
        assert_eq!(diffs[0].replacing().map(|i| i.label), Some("new"));
    }

    #[test]
    fn ordered_identical_lists_are_held_in_place() {
        let list = vec!['a', 'b', 'a'];
        let diffs = chars().diff_ordered(&list, &list);
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(|d| d.state() == State::Held));
        assert!(diffs.iter().all(|d| d.source_indexes() == d.replacer_indexes()));
        assert_eq!(diffs[0].source_indexes(), &set(&[0, 2]));
    }

    #[test]
    fn ordered_permutation_swaps_indexes() {
        let diffs = chars().diff_ordered(&['a', 'b', 'c'], &['c', 'a', 'b']);
        assert_eq!(diffs.len(), 3);
        assert!(diffs.iter().all(|d| d.state() == State::Held));

        let a = &diffs[0];
        assert_eq!(a.source(), Some(&'a'));
        assert_eq!(a.source_indexes(), &set(&[0]));
        assert_eq!(a.replacer_indexes(), &set(&[1]));
        assert!(a.is_moved());

        let c = &diffs[2];
        assert_eq!(c.source_indexes(), &set(&[2]));
        assert_eq!(c.replacer_indexes(), &set(&[0]));
    }

    #[test]
    fn ordered_duplicate_count_shrinks() {
        let diffs = chars().diff_ordered(&['a', 'b', 'a'], &['a']);
        assert_eq!(diffs.len(), 3);

        let held: Vec<_> = diffs.iter().filter(|d| d.state() == State::Held).collect();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].source(), Some(&'a'));
        assert_eq!(held[0].source_indexes(), &set(&[0]));
        assert_eq!(held[0].replacer_indexes(), &set(&[0]));

        let removed: Vec<_> = diffs
            .iter()
            .filter(|d| d.state() == State::Removed)
            .collect();
        assert_eq!(removed.len(), 2);
        assert!(
            removed
                .iter()
                .any(|d| d.source() == Some(&'b') && d.source_indexes() == &set(&[1]))
        );
        assert!(
            removed
                .iter()
                .any(|d| d.source() == Some(&'a') && d.source_indexes() == &set(&[2]))
        );
    }

    #[test]
    fn ordered_duplicate_count_grows() {
        let diffs = chars().diff_ordered(&['a'], &['b', 'a', 'a']);
        assert_eq!(diffs.len(), 3);

        assert_eq!(diffs[0].state(), State::Held);
        assert_eq!(diffs[0].source_indexes(), &set(&[0]));
        assert_eq!(diffs[0].replacer_indexes(), &set(&[1]));

        assert_eq!(diffs[1].state(), State::Added);
        assert_eq!(diffs[1].replacing(), Some(&'a'));
        assert_eq!(diffs[1].replacer_indexes(), &set(&[2]));

        assert_eq!(diffs[2].state(), State::Added);
        assert_eq!(diffs[2].replacing(), Some(&'b'));
        assert_eq!(diffs[2].replacer_indexes(), &set(&[0]));
    }

    #[test]
    fn ordered_uses_identity_not_equality() {
        let before = vec![item(1, "a"), item(2, "b")];
        let after = vec![item(2, "b2"), item(1, "a")];
        let diffs = by_id().diff_ordered(&before, &after);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[1].source().map(|i| i.label), Some("b"));
        assert_eq!(diffs[1].replacing().map(|i| i.label), Some("b2"));
        assert_eq!(diffs[1].replacer_indexes(), &set(&[0]));
    }

    fn small_list() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(0u8..6, 0..12)
    }

    fn positions_of(list: &[u8], key: u8) -> BTreeSet<usize> {
        list.iter()
            .enumerate()
            .filter(|(_, v)| **v == key)
            .map(|(i, _)| i)
            .collect()
    }

    proptest! {
        #[test]
        fn diff_cardinality_matches_set_algebra(before in small_list(), after in small_list()) {
            let differ = CollectionDiffer::new(|v: &u8| *v);
            let diffs = differ.diff(&before, &after);

            let b: HashSet<u8> = before.iter().copied().collect();
            let a: HashSet<u8> = after.iter().copied().collect();

            let count = |state| diffs.iter().filter(|d| d.state() == state).count();
            prop_assert_eq!(count(State::Removed), b.difference(&a).count());
            prop_assert_eq!(count(State::Added), a.difference(&b).count());
            prop_assert_eq!(count(State::Held), b.intersection(&a).count());

            for d in &diffs {
                let key = *d.current();
                match d.state() {
                    State::Added => prop_assert!(a.contains(&key) && !b.contains(&key)),
                    State::Removed => prop_assert!(b.contains(&key) && !a.contains(&key)),
                    State::Held => prop_assert!(a.contains(&key) && b.contains(&key)),
                }
            }
        }

        #[test]
        fn ordered_diff_of_identical_lists_is_all_held(list in small_list()) {
            let differ = CollectionDiffer::new(|v: &u8| *v);
            for d in differ.diff_ordered(&list, &list) {
                prop_assert_eq!(d.state(), State::Held);
                prop_assert_eq!(d.source_indexes(), d.replacer_indexes());
            }
        }

        #[test]
        fn ordered_diff_of_permutation_is_all_held(
            (before, after) in small_list().prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
        ) {
            let differ = CollectionDiffer::new(|v: &u8| *v);
            for d in differ.diff_ordered(&before, &after) {
                prop_assert_eq!(d.state(), State::Held);
                let key = *d.as_diff().current();
                prop_assert_eq!(d.source_indexes(), &positions_of(&before, key));
                prop_assert_eq!(d.replacer_indexes(), &positions_of(&after, key));
            }
        }

        #[test]
        fn ordered_diff_accounts_for_every_position_once(before in small_list(), after in small_list()) {
            let differ = CollectionDiffer::new(|v: &u8| *v);
            let diffs = differ.diff_ordered(&before, &after);

            let mut seen_before = Vec::new();
            let mut seen_after = Vec::new();
            for d in &diffs {
                seen_before.extend(d.source_indexes().iter().copied());
                seen_after.extend(d.replacer_indexes().iter().copied());
                prop_assert_eq!(d.source_indexes().len() > 0, d.source().is_some());
                prop_assert_eq!(d.replacer_indexes().len() > 0, d.replacing().is_some());
            }
            seen_before.sort_unstable();
            seen_after.sort_unstable();
            prop_assert_eq!(seen_before, (0..before.len()).collect::<Vec<_>>());
            prop_assert_eq!(seen_after, (0..after.len()).collect::<Vec<_>>());
        }
    }
}
