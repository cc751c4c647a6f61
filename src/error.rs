// src/error.rs

use thiserror::Error;

/// Core error types for the catalog engine
///
/// Every failure carries one of the stable, wire-visible kinds from
/// [`ErrorKind`]. Callers may wrap an error with extra context via
/// [`Error::context`]; the original kind stays matchable through the
/// chain.
#[derive(Error, Debug)]
pub enum Error {
    /// Unclassified backend failure
    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// Unique or primary-key constraint violation
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Row absent for the given key
    #[error("{0} not found")]
    NotFound(String),

    /// Argument failed a format or required-field check
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Parent catalog missing or mismatched
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),

    /// Parent variant missing or mismatched
    #[error("invalid variant: {0}")]
    InvalidVariant(String),

    /// Tenant scope not bound on the connection
    #[error("tenant id is not set on this connection")]
    MissingTenantId,

    /// Project scope not bound on the connection
    #[error("project id is not set on this connection")]
    MissingProjectId,

    /// Closest-ancestor lookup exhausted without a match
    #[error("no ancestor references found for {0}")]
    NoAncestorReferencesFound(String),

    /// Serialization failure for directory or info documents
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapper adding caller context; the source kind remains matchable
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

/// Stable error kinds exposed over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Database,
    AlreadyExists,
    NotFound,
    InvalidInput,
    InvalidCatalog,
    InvalidVariant,
    MissingTenantId,
    MissingProjectId,
    NoAncestorReferencesFound,
}

impl ErrorKind {
    /// Wire code for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "Database",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::InvalidCatalog => "InvalidCatalog",
            ErrorKind::InvalidVariant => "InvalidVariant",
            ErrorKind::MissingTenantId => "MissingTenantID",
            ErrorKind::MissingProjectId => "MissingProjectID",
            ErrorKind::NoAncestorReferencesFound => "NoAncestorReferencesFound",
        }
    }

    /// HTTP status the outer surface maps this kind to
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Database => 500,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::NotFound => 404,
            _ => 400,
        }
    }
}

impl Error {
    /// Resolve the kind of this error, looking through context wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Database(_) | Error::Serde(_) | Error::Io(_) => ErrorKind::Database,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::InvalidCatalog(_) => ErrorKind::InvalidCatalog,
            Error::InvalidVariant(_) => ErrorKind::InvalidVariant,
            Error::MissingTenantId => ErrorKind::MissingTenantId,
            Error::MissingProjectId => ErrorKind::MissingProjectId,
            Error::NoAncestorReferencesFound(_) => ErrorKind::NoAncestorReferencesFound,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Wrap this error with additional context
    pub fn context<S: Into<String>>(self, message: S) -> Self {
        Error::Context {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Create a NotFound error for the given entity description
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Error::NotFound(what.into())
    }

    /// Create an InvalidInput error with the given message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Error::InvalidInput(message.into())
    }
}

impl From<rusqlite::Error> for Error {
    /// Classify backend errors into stable kinds
    ///
    /// Unique and primary-key constraint violations surface as
    /// `AlreadyExists`; foreign-key violations mean a missing parent row
    /// and surface as `NotFound`. Everything else is `Database`.
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ffi_err, ref msg) = e {
            match ffi_err.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    let detail = msg.clone().unwrap_or_else(|| "row".to_string());
                    return Error::AlreadyExists(detail);
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    let detail = msg.clone().unwrap_or_else(|| "parent row".to_string());
                    return Error::NotFound(detail);
                }
                _ => {}
            }
        }
        Error::Database(e)
    }
}

/// Result type alias using the engine's Error type
pub type Result<T> = std::result::Result<T, Error>;
