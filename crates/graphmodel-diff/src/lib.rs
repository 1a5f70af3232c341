//! Collection diffing for GraphModel Rust.
//!
//! - [`CollectionDiffer`] classifies elements of a before/after comparison as
//!   added, removed or held, by caller-supplied identity
//! - [`CollectionDiffer::diff_ordered`] additionally tracks positions and
//!   tolerates duplicates
//! - [`cascade`] turns diffs into pending write operations

pub mod cascade;
pub mod diff;
pub mod differ;

pub use cascade::{CascadePlan, LinkOp, PendingOp, plan_collection, plan_ordered_links};
pub use diff::{Diff, IndexedDiff, State};
pub use differ::CollectionDiffer;
