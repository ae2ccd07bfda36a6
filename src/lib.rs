//! # sweep_pool
//!
//! Bounded, thread-safe connection pool with soft capacity, return-on-close
//! interception and pluggable eviction of idle connections.
//!
//! ## Features
//!
//! - Connections created on demand up to `max_size`, reused through an idle set
//! - Soft capacity: a caller that waited `max_wait` at capacity gets a new
//!   connection instead of an error
//! - Closing a pooled connection hands it back to the pool (`return_on_close`)
//! - Pending transactions are committed on release
//! - One process-wide scheduler running every pool's eviction strategy
//! - `MinIdleStrategy` and `AverageBusyStrategy`, or your own `CleanStrategy`
//! - Metrics snapshot and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use sweep_pool::{ConnectionPool, PoolConfiguration};
//! use sweep_pool::mock::MockFactory;
//!
//! let config = PoolConfiguration::new().with_min_size(2).with_max_size(10);
//! let pool = ConnectionPool::new(config, MockFactory::new()).unwrap();
//! {
//!     let conn = pool.acquire().unwrap();
//!     conn.execute("SELECT 1").unwrap();
//!     // returned to the pool, not destroyed
//!     conn.close().unwrap();
//! }
//! assert_eq!(pool.idle_count(), 2);
//! pool.close();
//! ```

mod pool;
mod config;
mod metrics;
mod eviction;
mod errors;
mod connection;
mod interceptor;
pub mod scheduler;
pub mod mock;

pub use pool::{ConnectionPool, PoolId};
pub use interceptor::PooledConnection;
pub use config::{PoolConfiguration, DEFAULT_EVICTION_INTERVAL, DEFAULT_MAX_SIZE};
pub use metrics::{PoolMetrics, PoolStatus};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use eviction::{AverageBusyStrategy, CleanStrategy, EvictionTarget, MinIdleStrategy};
pub use connection::{Connection, ConnectionFactory};
pub use errors::{ConnectionError, PoolError, PoolResult};
