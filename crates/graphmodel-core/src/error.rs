//! Error types for GraphModel operations.

use std::fmt;

/// The primary error type for all GraphModel operations.
#[derive(Debug)]
pub enum Error {
    /// Row source failures (the query itself failed)
    Query(QueryError),
    /// Row decoding errors
    Type(TypeError),
    /// Relation mapping errors, detected at configuration time
    Mapping(MappingError),
    /// Failures while resolving a graph load
    Load(LoadError),
    /// Configuration errors
    Config(ConfigError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub table: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Table not known to the row source
    NotFound,
    /// Connection lost while rows were being fetched
    Disconnected,
    /// Statement timeout
    Timeout,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    pub relation: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// The same relation identifier was registered twice on one loader
    DuplicateRelation,
    /// A relation path registered as cyclic does not lead back to its target
    NotCyclic,
    /// A relation path walks through a table the mapping graph does not know
    UnknownTable,
    /// A relation identifier that no loader registered
    UnknownRelation,
    /// A cycle path in the mapping graph that no loader registered
    UnregisteredCycle,
}

#[derive(Debug)]
pub struct LoadError {
    pub kind: LoadErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// Nested selects on one loader exceeded the configured limit
    ReentrancyLimit,
    /// A pending identifier had no matching instance and the policy forbids skipping it
    MissingTarget,
    /// An entity lock was poisoned by a panicking writer
    LockPoisoned,
    /// The target persister was dropped while a source persister still fed it
    PersisterDropped,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a mapping error for a relation.
    pub fn mapping(
        kind: MappingErrorKind,
        relation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Mapping(MappingError {
            kind,
            relation: relation.into(),
            message: message.into(),
        })
    }

    /// Build a load error.
    pub fn load(kind: LoadErrorKind, message: impl Into<String>) -> Self {
        Error::Load(LoadError {
            kind,
            message: message.into(),
        })
    }

    /// Is this a configuration-time error (mapping or config)?
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Error::Mapping(_) | Error::Config(_))
    }

    /// Get the mapping error kind, if this is a mapping error.
    pub fn mapping_kind(&self) -> Option<MappingErrorKind> {
        match self {
            Error::Mapping(m) => Some(m.kind),
            _ => None,
        }
    }

    /// Get the load error kind, if this is a load error.
    pub fn load_kind(&self) -> Option<LoadErrorKind> {
        match self {
            Error::Load(l) => Some(l.kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Query(e) => {
                if let Some(table) = &e.table {
                    write!(f, "Query error on '{}': {}", table, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Mapping(e) => write!(f, "Mapping error on '{}': {}", e.relation, e.message),
            Error::Load(e) => write!(f, "Load error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.relation, self.message)
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<LoadError> for Error {
    fn from(err: LoadError) -> Self {
        Error::Load(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for GraphModel operations.
pub type Result<T> = std::result::Result<T, Error>;
