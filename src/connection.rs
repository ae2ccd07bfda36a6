//! Capabilities the pool needs from a connection and from the driver that creates it

use crate::config::PoolConfiguration;
use crate::errors::ConnectionError;

/// A live connection to an external system.
///
/// Methods take `&self`: the same connection is shared between the pool's
/// bookkeeping and the caller holding it, so implementations use interior
/// mutability for their state.
pub trait Connection: Send + Sync + 'static {
    /// Whether every statement commits on its own
    fn is_auto_commit(&self) -> bool;

    /// Commit the open transaction
    fn commit(&self) -> Result<(), ConnectionError>;

    /// Physically close the connection
    fn close(&self) -> Result<(), ConnectionError>;

    fn is_closed(&self) -> bool;
}

/// Produces raw connections from a pool configuration.
///
/// Closures of the form `Fn(&PoolConfiguration) -> Result<C, ConnectionError>`
/// are factories that accept every driver.
///
/// # Examples
///
/// ```
/// use sweep_pool::{ConnectionError, ConnectionPool, PoolConfiguration};
/// use sweep_pool::mock::MockConnection;
///
/// let pool = ConnectionPool::new(
///     PoolConfiguration::new().with_min_size(2),
///     |config: &PoolConfiguration| Ok::<_, ConnectionError>(MockConnection::new(&config.url)),
/// )
/// .unwrap();
/// assert_eq!(pool.idle_count(), 2);
/// ```
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    /// Check that the configured driver can be loaded
    fn validate_driver(&self, _driver: &str) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// Open a new connection using the url and credentials in `config`
    fn connect(&self, config: &PoolConfiguration) -> Result<Self::Connection, ConnectionError>;
}

impl<F, C> ConnectionFactory for F
where
    F: Fn(&PoolConfiguration) -> Result<C, ConnectionError> + Send + Sync + 'static,
    C: Connection,
{
    type Connection = C;

    fn connect(&self, config: &PoolConfiguration) -> Result<C, ConnectionError> {
        self(config)
    }
}
