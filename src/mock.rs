//! In-memory driver used by the demo binary, the tests and the benchmarks

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::PoolConfiguration;
use crate::connection::{Connection, ConnectionFactory};
use crate::errors::ConnectionError;

/// Driver identifier accepted by [`MockFactory`]
pub const MOCK_DRIVER: &str = "mock";

static NEXT_MOCK_ID: AtomicUsize = AtomicUsize::new(1);

/// A connection that only records what was done to it
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    url: String,
    auto_commit: AtomicBool,
    closed: AtomicBool,
    fail_commit: AtomicBool,
    fail_close: AtomicBool,
    commits: AtomicUsize,
    statements: AtomicUsize,
    closed_counter: Option<Arc<AtomicUsize>>,
}

impl MockConnection {
    pub fn new(url: &str) -> Self {
        Self {
            id: NEXT_MOCK_ID.fetch_add(1, Ordering::Relaxed),
            url: url.to_string(),
            auto_commit: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
            statements: AtomicUsize::new(0),
            closed_counter: None,
        }
    }

    fn with_closed_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.closed_counter = Some(counter);
        self
    }

    /// Process-unique id of this connection
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run a statement. Fails once the connection is closed.
    pub fn execute(&self, _statement: &str) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.statements.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_auto_commit(&self, auto_commit: bool) {
        self.auto_commit.store(auto_commit, Ordering::Relaxed);
    }

    /// Make every following commit fail
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::Relaxed);
    }

    /// Make every following close fail
    pub fn fail_closes(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::Relaxed);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn statement_count(&self) -> usize {
        self.statements.load(Ordering::Relaxed)
    }
}

impl Connection for MockConnection {
    fn is_auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::Relaxed)
    }

    fn commit(&self) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        if self.fail_commit.load(Ordering::Relaxed) {
            return Err(ConnectionError::Commit(format!("connection {} rejected commit", self.id)));
        }
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<(), ConnectionError> {
        if self.fail_close.load(Ordering::Relaxed) {
            return Err(ConnectionError::Close(format!("connection {} refused to close", self.id)));
        }
        if !self.closed.swap(true, Ordering::AcqRel)
            && let Some(counter) = &self.closed_counter
        {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Factory for [`MockConnection`]s that counts what it creates and what gets closed
///
/// # Examples
///
/// ```
/// use sweep_pool::{ConnectionPool, PoolConfiguration};
/// use sweep_pool::mock::{MockFactory, MOCK_DRIVER};
///
/// let factory = MockFactory::new();
/// let pool = ConnectionPool::new(
///     PoolConfiguration::new().with_driver(MOCK_DRIVER).with_min_size(3),
///     factory.clone(),
/// )
/// .unwrap();
///
/// assert_eq!(factory.created_count(), 3);
/// pool.close();
/// assert_eq!(factory.closed_count(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    created: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    fail_connect: Arc<AtomicBool>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following connect attempt fail
    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// Connections created so far
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Connections physically closed so far
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::Relaxed)
    }

    /// Connections created and not yet closed
    pub fn open_count(&self) -> usize {
        self.created_count().saturating_sub(self.closed_count())
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn validate_driver(&self, driver: &str) -> Result<(), ConnectionError> {
        if driver.is_empty() || driver == MOCK_DRIVER {
            Ok(())
        } else {
            Err(ConnectionError::DriverNotFound(driver.to_string()))
        }
    }

    fn connect(&self, config: &PoolConfiguration) -> Result<MockConnection, ConnectionError> {
        if self.fail_connect.load(Ordering::Relaxed) {
            return Err(ConnectionError::Connect {
                url: config.url.clone(),
                reason: "connection refused".to_string(),
            });
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(MockConnection::new(&config.url).with_closed_counter(Arc::clone(&self.closed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_connection_rejects_statements() {
        let conn = MockConnection::new("mem://test");
        assert!(conn.execute("SELECT 1").is_ok());
        conn.close().unwrap();
        assert_eq!(conn.execute("SELECT 1"), Err(ConnectionError::Closed));
        assert_eq!(conn.statement_count(), 1);
    }

    #[test]
    fn test_factory_rejects_unknown_driver() {
        let factory = MockFactory::new();
        assert!(factory.validate_driver(MOCK_DRIVER).is_ok());
        assert_eq!(
            factory.validate_driver("com.mysql.jdbc.Driver"),
            Err(ConnectionError::DriverNotFound("com.mysql.jdbc.Driver".to_string()))
        );
    }

    #[test]
    fn test_factory_counts_closes_once() {
        let factory = MockFactory::new();
        let conn = factory.connect(&PoolConfiguration::new()).unwrap();
        conn.close().unwrap();
        conn.close().unwrap();
        assert_eq!(factory.created_count(), 1);
        assert_eq!(factory.closed_count(), 1);
        assert_eq!(factory.open_count(), 0);
    }
}
