//! Model trait for ORM-style struct mapping.
//!
//! The `Model` trait defines the contract for structs that can be mapped to
//! database tables, and `Identifier` the contract for their primary keys.
//! Loaded entities are shared as `ModelRef<M>` (`Arc<RwLock<M>>`) so a graph
//! with cycles can point at the same instance from several places.

use crate::Result;
use crate::error::{Error, LoadErrorKind};
use crate::relationship::RelationshipInfo;
use crate::row::Row;
use crate::value::Value;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Primary key contract used by persisters and loaders.
///
/// `from_column` owns the "no relation present" convention of the row
/// pipeline: a NULL column (or one that cannot be decoded as this key type)
/// yields `None` and is never recorded as a pending relation.
pub trait Identifier: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Decode an identifier from a raw column value.
    fn from_column(value: &Value) -> Option<Self>;

    /// Encode this identifier as a value for a row source.
    fn to_value(&self) -> Value;
}

impl Identifier for i64 {
    fn from_column(value: &Value) -> Option<Self> {
        match value {
            Value::BigInt(v) => Some(*v),
            Value::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::BigInt(*self)
    }
}

impl Identifier for i32 {
    fn from_column(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(*v),
            Value::BigInt(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        Value::Int(*self)
    }
}

impl Identifier for String {
    fn from_column(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

/// Trait for types that can be mapped to database tables.
///
/// # Example
///
/// ```ignore
/// impl Model for Node {
///     const TABLE_NAME: &'static str = "nodes";
///     const PRIMARY_KEY: &'static [&'static str] = &["id"];
///     const RELATIONSHIPS: &'static [RelationshipInfo] = &[
///         RelationshipInfo::new("parent", "nodes", RelationshipKind::ManyToOne)
///             .local_key("parent_id"),
///     ];
///     type Id = i64;
///     // ...
/// }
/// ```
pub trait Model: Sized + Send + Sync + 'static {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// The primary key column name(s).
    const PRIMARY_KEY: &'static [&'static str];

    /// Relationship metadata for this model.
    const RELATIONSHIPS: &'static [RelationshipInfo] = &[];

    /// Primary key type.
    type Id: Identifier;

    /// Get the primary key of this instance.
    fn id(&self) -> Self::Id;

    /// Construct a model instance from a database row.
    #[allow(clippy::result_large_err)]
    fn from_row(row: &Row) -> Result<Self>;

    /// Convert this model instance to a row of values.
    fn to_row(&self) -> Vec<(&'static str, Value)>;
}

/// A shared, lockable reference to a loaded entity.
pub type ModelRef<M> = Arc<RwLock<M>>;

/// Wrap a freshly decoded model into a shared reference.
pub fn model_ref<M>(model: M) -> ModelRef<M> {
    Arc::new(RwLock::new(model))
}

/// Acquire a read guard, reporting lock poisoning as a load error.
#[allow(clippy::result_large_err)]
pub fn read_entity<M>(entity: &ModelRef<M>) -> Result<RwLockReadGuard<'_, M>> {
    entity.read().map_err(|_| {
        Error::load(
            LoadErrorKind::LockPoisoned,
            format!("entity lock poisoned: {}", std::any::type_name::<M>()),
        )
    })
}

/// Acquire a write guard, reporting lock poisoning as a load error.
#[allow(clippy::result_large_err)]
pub fn write_entity<M>(entity: &ModelRef<M>) -> Result<RwLockWriteGuard<'_, M>> {
    entity.write().map_err(|_| {
        Error::load(
            LoadErrorKind::LockPoisoned,
            format!("entity lock poisoned: {}", std::any::type_name::<M>()),
        )
    })
}

/// Type-erased handle to a loaded entity, compared by instance identity.
///
/// Two handles are equal only when they point at the same allocation. Field
/// values are never consulted, so instances that are still being populated
/// (or that happen to be field-equal) stay distinct keys.
#[derive(Clone)]
pub struct EntityHandle {
    inner: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl EntityHandle {
    /// Create a handle sharing ownership of `entity`.
    pub fn new<M: Send + Sync + 'static>(entity: &ModelRef<M>) -> Self {
        let inner: Arc<dyn Any + Send + Sync> = Arc::clone(entity) as Arc<dyn Any + Send + Sync>;
        Self {
            inner,
            type_id: TypeId::of::<M>(),
            type_name: std::any::type_name::<M>(),
        }
    }

    /// The `TypeId` of the wrapped model type.
    pub fn model_type_id(&self) -> TypeId {
        self.type_id
    }

    /// The name of the wrapped model type.
    pub fn model_type_name(&self) -> &'static str {
        self.type_name
    }

    /// Check whether the handle wraps a `ModelRef<M>`.
    pub fn is<M: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<M>()
    }

    /// Recover the typed reference, if the handle wraps a `ModelRef<M>`.
    pub fn downcast<M: Send + Sync + 'static>(&self) -> Option<ModelRef<M>> {
        Arc::clone(&self.inner).downcast::<RwLock<M>>().ok()
    }

    /// Check whether this handle points at `entity`.
    pub fn points_to<M: 'static>(&self, entity: &ModelRef<M>) -> bool {
        self.address() == Arc::as_ptr(entity).cast::<()>() as usize
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.inner).cast::<()>() as usize
    }
}

impl PartialEq for EntityHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for EntityHandle {}

impl Hash for EntityHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle")
            .field("type", &self.type_name)
            .field("address", &format_args!("{:#x}", self.address()))
            .finish()
    }
}
