//! Core types and traits for GraphModel Rust.
//!
//! This crate provides the foundational abstractions shared by the diff and
//! cycle-loading layers:
//!
//! - `Model` trait for ORM-style struct mapping, `Identifier` for primary keys
//! - `ModelRef` shared entity references and identity-compared `EntityHandle`s
//! - `Row` / `Value` as produced by a row source
//! - `Outcome` re-export from asupersync for cancel-correct row fetching

// Re-export asupersync's tagged result so row sources can report cancellation
pub use asupersync::Outcome;

pub mod error;
pub mod model;
pub mod relationship;
pub mod row;
pub mod value;

pub use error::{
    ConfigError, Error, LoadError, LoadErrorKind, MappingError, MappingErrorKind, QueryError,
    QueryErrorKind, Result, TypeError,
};
pub use model::{
    EntityHandle, Identifier, Model, ModelRef, model_ref, read_entity, write_entity,
};
pub use relationship::{RelationshipInfo, RelationshipKind, find_relationship};
pub use row::{ColumnInfo, Row};
pub use value::Value;
