//! Error types for the connection pool

use thiserror::Error;

/// Errors raised by a connection or its driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("No suitable driver found for `{0}`")]
    DriverNotFound(String),

    #[error("Cannot connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Connection is closed")]
    Closed,

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Close failed: {0}")]
    Close(String),

    #[error("Pool rejected the operation: {0}")]
    Pool(String),
}

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Cannot load driver `{driver}`: {source}")]
    Driver {
        driver: String,
        #[source]
        source: ConnectionError,
    },

    #[error("Cannot create connection: {0}")]
    ResourceCreation(#[source] ConnectionError),

    #[error("Cannot commit pending transaction on release: {0}")]
    Commit(#[source] ConnectionError),

    #[error("Cannot close connection: {0}")]
    Close(#[source] ConnectionError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Eviction scheduler unavailable: {0}")]
    Scheduler(String),

    #[error("Metrics export failed: {0}")]
    Metrics(String),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl From<PoolError> for ConnectionError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Commit(source) | PoolError::Close(source) | PoolError::ResourceCreation(source) => source,
            PoolError::Driver { source, .. } => source,
            PoolError::PoolClosed => ConnectionError::Closed,
            other => ConnectionError::Pool(other.to_string()),
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
