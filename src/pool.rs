//! Core connection pool implementation

use crate::config::PoolConfiguration;
use crate::connection::{Connection, ConnectionFactory};
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{CleanStrategy, EvictionTarget, MinIdleStrategy};
use crate::interceptor::PooledConnection;
use crate::metrics::{MetricsTracker, PoolMetrics, PoolStatus};
#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;
use crate::scheduler;

use crossbeam::queue::ArrayQueue;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a pool, used as its key in the eviction scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(u64);

impl PoolId {
    pub(crate) fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

/// State shared by the pool handles, the connections it handed out and
/// its eviction task
pub(crate) struct PoolShared<C: Connection> {
    id: PoolId,
    config: PoolConfiguration,
    factory: Box<dyn ConnectionFactory<Connection = C>>,
    idle: ArrayQueue<PooledConnection<C>>,
    busy: DashMap<u64, PooledConnection<C>>,
    /// Connections owned by the pool; kept apart from the sets so the hot path stays O(1)
    size: AtomicUsize,
    waiting: AtomicUsize,
    closed: AtomicBool,
    cleaning: AtomicBool,
    /// Guards availability checks of waiting callers against lost wakeups
    signal: Mutex<()>,
    available: Condvar,
    metrics: MetricsTracker,
}

impl<C: Connection> PoolShared<C> {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn is_cleaning(&self) -> bool {
        self.cleaning.load(Ordering::Acquire)
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            idle: self.idle.len(),
            busy: self.busy.len(),
            total: self.size.load(Ordering::Acquire),
            waiting: self.waiting.load(Ordering::Acquire),
            max_size: self.config.max_size,
        }
    }

    /// Open a connection through the factory and wrap it; the caller accounts for it in `size`
    fn open_connection(self: &Arc<Self>) -> PoolResult<PooledConnection<C>> {
        tracing::debug!(
            pool = %self.id,
            size = self.size.load(Ordering::Relaxed),
            "creating connection"
        );
        let raw = self
            .factory
            .connect(&self.config)
            .map_err(PoolError::ResourceCreation)?;
        MetricsTracker::increment(&self.metrics.connections_created);

        let pool = Arc::downgrade(self);
        Ok(PooledConnection::new(raw, pool, self.config.return_on_close))
    }

    fn warm_up(self: &Arc<Self>) -> PoolResult<()> {
        let initial = self.config.min_size;
        for _ in 0..initial {
            let conn = match self.open_connection() {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::error!(pool = %self.id, error = %err, "cannot create initial connections");
                    while let Some(conn) = self.idle.pop() {
                        self.close_connection(&conn);
                    }
                    return Err(err);
                }
            };
            self.size.fetch_add(1, Ordering::AcqRel);
            if let Err(surplus) = self.idle.push(conn) {
                self.close_connection(&surplus);
            }
        }
        tracing::info!(pool = %self.id, count = initial, "created initial connections");
        Ok(())
    }

    /// Move an idle connection to busy
    fn take_idle(&self) -> Option<PooledConnection<C>> {
        let conn = self.idle.pop()?;
        self.busy.insert(conn.id(), conn.clone());
        MetricsTracker::increment(&self.metrics.total_acquired);
        Some(conn)
    }

    pub(crate) fn acquire(self: &Arc<Self>) -> PoolResult<PooledConnection<C>> {
        if let Some(conn) = self.take_idle() {
            tracing::trace!(pool = %self.id, connection = conn.id(), "acquired idle connection");
            return Ok(conn);
        }
        self.borrow()
    }

    /// Slow path of `acquire`: below capacity a connection is created at
    /// once; at capacity the caller waits for a release, and after `max_wait`
    /// creates a connection past capacity.
    fn borrow(self: &Arc<Self>) -> PoolResult<PooledConnection<C>> {
        if self.is_closed() {
            tracing::error!(pool = %self.id, "connection pool closed");
            return Err(PoolError::PoolClosed);
        }

        let started = Instant::now();
        let mut counted_waiting = false;
        let mut guard = self.signal.lock();
        let result = loop {
            if self.is_closed() {
                break Err(PoolError::PoolClosed);
            }
            if let Some(conn) = self.take_idle() {
                break Ok(conn);
            }
            if self.reserve_slot() {
                break MutexGuard::unlocked(&mut guard, || self.open_reserved(false, started));
            }

            let elapsed = started.elapsed();
            if elapsed >= self.config.max_wait {
                self.size.fetch_add(1, Ordering::AcqRel);
                break MutexGuard::unlocked(&mut guard, || self.open_reserved(true, started));
            }

            if !counted_waiting {
                counted_waiting = true;
                let waiting = self.waiting.fetch_add(1, Ordering::AcqRel) + 1;
                MetricsTracker::increment(&self.metrics.wait_events);
                tracing::trace!(pool = %self.id, waiting, "waiting for a connection");
            }
            self.available.wait_for(&mut guard, self.config.max_wait - elapsed);
        };
        drop(guard);

        if counted_waiting {
            self.waiting.fetch_sub(1, Ordering::AcqRel);
        }
        result
    }

    /// Claim one of the `max_size` slots
    fn reserve_slot(&self) -> bool {
        let max_size = self.config.max_size;
        self.size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                (size < max_size).then_some(size + 1)
            })
            .is_ok()
    }

    /// Fill a slot already counted in `size`, giving it back if the factory fails
    fn open_reserved(
        self: &Arc<Self>,
        overflow: bool,
        started: Instant,
    ) -> PoolResult<PooledConnection<C>> {
        match self.open_connection() {
            Ok(conn) => {
                self.busy.insert(conn.id(), conn.clone());
                MetricsTracker::increment(&self.metrics.total_acquired);
                let size = self.size.load(Ordering::Acquire);
                if overflow {
                    MetricsTracker::increment(&self.metrics.overflow_created);
                    tracing::debug!(
                        pool = %self.id,
                        waited_ms = started.elapsed().as_millis() as u64,
                        size,
                        max_size = self.config.max_size,
                        "created connection past capacity"
                    );
                } else {
                    tracing::debug!(pool = %self.id, size, "created connection");
                }
                Ok(conn)
            }
            Err(err) => {
                self.size.fetch_sub(1, Ordering::AcqRel);
                tracing::error!(pool = %self.id, error = %err, "cannot create connection");
                self.notify(false);
                Err(err)
            }
        }
    }

    pub(crate) fn try_acquire(&self) -> Option<PooledConnection<C>> {
        if self.is_closed() {
            return None;
        }
        self.take_idle()
    }

    pub(crate) fn release(&self, conn: &PooledConnection<C>) -> PoolResult<()> {
        if !self.busy.contains_key(&conn.id()) {
            tracing::trace!(pool = %self.id, connection = conn.id(), "ignoring release of untracked connection");
            return Ok(());
        }

        let raw = conn.raw();
        if !raw.is_auto_commit() {
            raw.commit().map_err(PoolError::Commit)?;
        }
        if self.busy.remove(&conn.id()).is_none() {
            return Ok(());
        }
        MetricsTracker::increment(&self.metrics.total_released);

        if !self.is_closed() || self.is_cleaning() {
            if let Err(surplus) = self.idle.push(conn.clone()) {
                tracing::debug!(pool = %self.id, connection = surplus.id(), "idle set is full, closing surplus connection");
                self.close_connection(&surplus);
            }
            tracing::trace!(pool = %self.id, connection = conn.id(), "connection returned to idle");
            self.notify(false);
        } else {
            self.close_connection(conn);
        }
        Ok(())
    }

    /// Destroy a connection its holder closed while an eviction pass runs
    pub(crate) fn discard(&self, conn: &PooledConnection<C>) -> PoolResult<()> {
        let Some((_, tracked)) = self.busy.remove(&conn.id()) else {
            return conn.raw().close().map_err(PoolError::Close);
        };
        self.close_connection(&tracked);
        self.notify(false);
        Ok(())
    }

    /// Physically close a connection the pool no longer tracks.
    ///
    /// The connection is written off even when closing fails.
    fn close_connection(&self, conn: &PooledConnection<C>) -> bool {
        let closed = match conn.raw().close() {
            Ok(()) => {
                MetricsTracker::increment(&self.metrics.connections_closed);
                true
            }
            Err(err) => {
                MetricsTracker::increment(&self.metrics.close_failures);
                tracing::error!(pool = %self.id, connection = conn.id(), error = %err, "cannot close connection");
                false
            }
        };
        let left = self.size.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        tracing::debug!(pool = %self.id, connection = conn.id(), left, "connection closed");
        closed
    }

    pub(crate) fn release_extra(&self, count: usize) -> PoolResult<usize> {
        if count == 0 {
            tracing::error!(pool = %self.id, "cannot release 0 connection(s)");
            return Err(PoolError::InvalidArgument(
                "release_extra needs a positive connection count".to_string(),
            ));
        }
        tracing::debug!(pool = %self.id, count, "releasing extra connections");

        self.cleaning.store(true, Ordering::Release);
        let mut released = 0;
        for _ in 0..count {
            let Some(conn) = self.idle.pop() else {
                break;
            };
            if self.close_connection(&conn) {
                released += 1;
            }
        }
        self.cleaning.store(false, Ordering::Release);

        self.metrics.evicted.fetch_add(released, Ordering::Relaxed);
        tracing::info!(pool = %self.id, released, "connection(s) have been released");
        self.notify(true);
        Ok(released)
    }

    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(pool = %self.id, "pool already closed");
            return;
        }
        scheduler::unregister(self.id);

        while let Some(conn) = self.idle.pop() {
            self.close_connection(&conn);
        }
        tracing::info!(pool = %self.id, "closed idle connections");

        if self.config.force_close {
            let ids: Vec<u64> = self.busy.iter().map(|entry| *entry.key()).collect();
            for id in ids {
                if let Some((_, conn)) = self.busy.remove(&id) {
                    self.close_connection(&conn);
                }
            }
            tracing::info!(pool = %self.id, "closed busy connections");
        }

        self.notify(true);
    }

    /// Wake callers waiting in `acquire`
    fn notify(&self, all: bool) {
        let _guard = self.signal.lock();
        if all {
            self.available.notify_all();
        } else {
            self.available.notify_one();
        }
    }
}

impl<C: Connection> EvictionTarget for PoolShared<C> {
    fn min_size(&self) -> usize {
        self.config.min_size
    }

    fn idle_count(&self) -> usize {
        self.idle.len()
    }

    fn total_count(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn is_closed(&self) -> bool {
        PoolShared::is_closed(self)
    }

    fn release_extra(&self, count: usize) -> PoolResult<usize> {
        PoolShared::release_extra(self, count)
    }
}

/// Thread-safe pool of connections created on demand by a [`ConnectionFactory`]
///
/// The pool is a cheap handle; clones share the same connections. Dropping
/// every handle without calling [`close`](Self::close) leaves the
/// connections to their own `Drop` and cancels the eviction task on its next
/// tick.
///
/// # Examples
///
/// ```
/// use sweep_pool::{ConnectionPool, PoolConfiguration};
/// use sweep_pool::mock::{MockFactory, MOCK_DRIVER};
///
/// let config = PoolConfiguration::new()
///     .with_url("mem://orders")
///     .with_driver(MOCK_DRIVER)
///     .with_min_size(1)
///     .with_max_size(10);
/// let pool = ConnectionPool::new(config, MockFactory::new()).unwrap();
///
/// let conn = pool.acquire().unwrap();
/// conn.execute("SELECT 1").unwrap();
/// // closing hands the connection back to the pool
/// conn.close().unwrap();
/// assert_eq!(pool.idle_count(), 1);
///
/// pool.close();
/// assert!(pool.acquire().is_err());
/// ```
pub struct ConnectionPool<C: Connection> {
    shared: Arc<PoolShared<C>>,
}

impl<C: Connection> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connection> ConnectionPool<C> {
    /// Create a pool evicting idle connections down to `min_size` when the sweeper is enabled
    pub fn new<F>(config: PoolConfiguration, factory: F) -> PoolResult<Self>
    where
        F: ConnectionFactory<Connection = C>,
    {
        Self::with_strategy(config, factory, Box::new(MinIdleStrategy::new()))
    }

    /// Create a pool with the eviction strategy its sweeper runs
    ///
    /// Validates the driver, opens `min_size` connections and, when
    /// `sweeper_enabled` is set, schedules `strategy` every
    /// `eviction_interval`.
    pub fn with_strategy<F>(
        config: PoolConfiguration,
        factory: F,
        strategy: Box<dyn CleanStrategy>,
    ) -> PoolResult<Self>
    where
        F: ConnectionFactory<Connection = C>,
    {
        let config = config.normalized();
        if let Err(source) = factory.validate_driver(&config.driver) {
            tracing::error!(driver = %config.driver, error = %source, "cannot find driver");
            return Err(PoolError::Driver {
                driver: config.driver.clone(),
                source,
            });
        }

        let capacity = config.max_size;
        let shared = Arc::new(PoolShared {
            id: PoolId::next(),
            config,
            factory: Box::new(factory),
            idle: ArrayQueue::new(capacity),
            busy: DashMap::new(),
            size: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            cleaning: AtomicBool::new(false),
            signal: Mutex::new(()),
            available: Condvar::new(),
            metrics: MetricsTracker::new(),
        });
        shared.warm_up()?;

        let pool = Self { shared };
        if pool.shared.config.sweeper_enabled {
            let interval = pool.shared.config.eviction_interval;
            if let Err(err) = pool.register_cleaner(strategy, interval) {
                pool.close();
                return Err(err);
            }
        } else {
            tracing::debug!(pool = %pool.id(), "pool cleaner is disabled");
        }

        tracing::info!(
            pool = %pool.id(),
            min = pool.shared.config.min_size,
            max = pool.shared.config.max_size,
            "connection pool created"
        );
        Ok(pool)
    }

    pub fn id(&self) -> PoolId {
        self.shared.id
    }

    /// The configuration after clamping
    pub fn config(&self) -> &PoolConfiguration {
        &self.shared.config
    }

    /// Get a connection, creating one when none is idle.
    ///
    /// Below `max_size` a connection is created right away. At capacity the
    /// call waits for a release; after `max_wait` it creates a connection
    /// past capacity instead of failing, so the pool may grow beyond
    /// `max_size` under sustained contention. Fails only when the pool is
    /// closed or the factory cannot connect.
    pub fn acquire(&self) -> PoolResult<PooledConnection<C>> {
        self.shared.acquire()
    }

    /// Get an idle connection without waiting or creating one
    pub fn try_acquire(&self) -> Option<PooledConnection<C>> {
        self.shared.try_acquire()
    }

    /// Run [`acquire`](Self::acquire) on tokio's blocking thread pool
    ///
    /// Cancel-safe: when the returned future is dropped before the blocking
    /// acquire finishes, the connection it obtains is released back to the
    /// pool.
    pub async fn acquire_async(&self) -> PoolResult<PooledConnection<C>> {
        let shared = Arc::clone(&self.shared);
        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let result = shared.acquire();
            if let Err(Ok(conn)) = tx.send(result) {
                tracing::debug!(
                    pool = %shared.id,
                    connection = conn.id(),
                    "async acquire cancelled, returning connection"
                );
                if let Err(err) = shared.release(&conn) {
                    tracing::warn!(pool = %shared.id, error = %err, "cannot return abandoned connection");
                }
            }
        });
        rx.await.map_err(|_| PoolError::Cancelled)?
    }

    /// Take back a checked-out connection.
    ///
    /// A pending transaction is committed first; if that fails the error is
    /// returned and the connection stays checked out. Releasing a
    /// connection the pool does not track is a no-op.
    pub fn release(&self, conn: &PooledConnection<C>) -> PoolResult<()> {
        self.shared.release(conn)
    }

    /// Close up to `count` idle connections, returning how many closed cleanly
    ///
    /// # Errors
    ///
    /// [`PoolError::InvalidArgument`] when `count` is zero.
    pub fn release_extra(&self, count: usize) -> PoolResult<usize> {
        self.shared.release_extra(count)
    }

    /// Shut the pool down. Calling it again has no effect.
    ///
    /// Idle connections are closed at once. Checked-out connections are
    /// closed now with `force_close`, otherwise when they are released.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Schedule `strategy` on the shared eviction scheduler, replacing this pool's previous task
    ///
    /// A zero `interval` falls back to [`DEFAULT_EVICTION_INTERVAL`](crate::DEFAULT_EVICTION_INTERVAL).
    pub fn register_cleaner(
        &self,
        strategy: Box<dyn CleanStrategy>,
        interval: Duration,
    ) -> PoolResult<()> {
        let pool: Weak<dyn EvictionTarget> = Arc::downgrade(&self.shared) as Weak<dyn EvictionTarget>;
        scheduler::register(self.shared.id, pool, strategy, interval)
    }

    /// Cancel this pool's eviction task; returns whether one was scheduled
    pub fn unregister_cleaner(&self) -> bool {
        scheduler::unregister(self.shared.id)
    }

    pub fn has_cleaner(&self) -> bool {
        scheduler::is_registered(self.shared.id)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Whether an eviction pass is running
    pub fn is_cleaning(&self) -> bool {
        self.shared.is_cleaning()
    }

    pub fn idle_count(&self) -> usize {
        self.shared.idle.len()
    }

    pub fn busy_count(&self) -> usize {
        self.shared.busy.len()
    }

    /// Connections owned by the pool, idle or checked out
    pub fn total_count(&self) -> usize {
        self.shared.size.load(Ordering::Acquire)
    }

    /// Callers currently waiting in `acquire`
    pub fn waiting_count(&self) -> usize {
        self.shared.waiting.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PoolStatus {
        self.shared.status()
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.shared.metrics.get_metrics(self.shared.status())
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }
}

impl<C: Connection> EvictionTarget for ConnectionPool<C> {
    fn min_size(&self) -> usize {
        self.shared.config.min_size
    }

    fn idle_count(&self) -> usize {
        ConnectionPool::idle_count(self)
    }

    fn total_count(&self) -> usize {
        ConnectionPool::total_count(self)
    }

    fn is_closed(&self) -> bool {
        ConnectionPool::is_closed(self)
    }

    fn release_extra(&self, count: usize) -> PoolResult<usize> {
        ConnectionPool::release_extra(self, count)
    }
}
