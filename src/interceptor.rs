//! Connection wrapper that turns the caller's `close` into a return to the pool

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::connection::Connection;
use crate::errors::{ConnectionError, PoolError, PoolResult};
use crate::pool::PoolShared;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A connection handed out by a [`ConnectionPool`](crate::ConnectionPool)
///
/// Dereferences to the raw connection, so every operation of `C` is
/// available unchanged. With `return_on_close` enabled,
/// [`close`](Self::close) gives the connection back to the pool instead of
/// destroying it. The wrapper only holds a weak reference to its pool.
///
/// Clones refer to the same connection and compare equal.
///
/// # Examples
///
/// ```
/// use sweep_pool::{Connection, ConnectionPool, PoolConfiguration};
/// use sweep_pool::mock::MockFactory;
///
/// let pool = ConnectionPool::new(PoolConfiguration::new().with_min_size(1), MockFactory::new()).unwrap();
///
/// let conn = pool.acquire().unwrap();
/// conn.close().unwrap();
/// assert!(!conn.is_closed());
///
/// let again = pool.acquire().unwrap();
/// assert_eq!(conn, again);
/// ```
pub struct PooledConnection<C: Connection> {
    id: u64,
    raw: Arc<C>,
    pool: Weak<PoolShared<C>>,
    intercept: bool,
}

impl<C: Connection> PooledConnection<C> {
    pub(crate) fn new(raw: C, pool: Weak<PoolShared<C>>, intercept: bool) -> Self {
        if intercept {
            tracing::trace!("connection wrapped for return on close");
        }
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            raw: Arc::new(raw),
            pool,
            intercept,
        }
    }

    /// Process-unique id assigned when the pool created the connection
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The raw connection. Closing it directly bypasses the pool.
    pub fn raw(&self) -> &Arc<C> {
        &self.raw
    }

    /// Whether `close` returns the connection to the pool
    pub fn returns_on_close(&self) -> bool {
        self.intercept
    }

    /// Finish using the connection.
    ///
    /// With `return_on_close` on an open pool the connection is released to
    /// the pool, committing a pending transaction first. During an eviction
    /// pass, or when the pool is closed or gone, the raw connection is
    /// physically closed.
    pub fn close(&self) -> PoolResult<()> {
        if self.intercept
            && let Some(pool) = self.pool.upgrade()
            && !pool.is_closed()
        {
            if pool.is_cleaning() {
                tracing::trace!(connection = self.id, "connection closed during eviction pass");
                return pool.discard(self);
            }
            tracing::trace!(connection = self.id, "connection released by interceptor");
            return pool.release(self);
        }
        self.raw.close().map_err(PoolError::Close)
    }
}

impl<C: Connection> Clone for PooledConnection<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            raw: Arc::clone(&self.raw),
            pool: Weak::clone(&self.pool),
            intercept: self.intercept,
        }
    }
}

impl<C: Connection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

impl<C: Connection> Connection for PooledConnection<C> {
    fn is_auto_commit(&self) -> bool {
        self.raw.is_auto_commit()
    }

    fn commit(&self) -> Result<(), ConnectionError> {
        self.raw.commit()
    }

    fn close(&self) -> Result<(), ConnectionError> {
        PooledConnection::close(self).map_err(ConnectionError::from)
    }

    fn is_closed(&self) -> bool {
        self.raw.is_closed()
    }
}

/// Wrappers are equal when they wrap the same raw connection
impl<C: Connection> PartialEq for PooledConnection<C> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.raw, &other.raw)
    }
}

impl<C: Connection> Eq for PooledConnection<C> {}

impl<C: Connection + fmt::Debug> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("intercept", &self.intercept)
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}
