use crate::types::RoleId;
use thiserror::Error;

/// Store-layer error type.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// User-facing message surfaced when the catalog, roles or matrix cannot be loaded.
pub const LOAD_FAILURE_MESSAGE: &str = "Failed to load feature configuration";

/// Errors returned by this crate.
///
/// Dependency and core-feature violations are not errors; they are reported
/// through [`ValidationResult`](crate::ValidationResult).
#[derive(Debug, Error)]
pub enum Error {
    /// Store error wrapper.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// Loading the feature configuration failed.
    #[error("failed to load feature configuration: {0}")]
    Load(#[source] StoreError),
    /// The loaded catalog or role list is malformed.
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),
    /// Writing a role's feature set failed.
    #[error("failed to update features for role {role}: {source}")]
    Persistence {
        role: RoleId,
        #[source]
        source: StoreError,
    },
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// Unrecognized event name.
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    /// A flush timer could not be scheduled.
    #[error("no tokio runtime available to schedule a flush")]
    NoRuntime,
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}
