//! Metrics collection and export for connection pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::Serialize;

#[cfg(feature = "metrics")]
use crate::errors::{PoolError, PoolResult};

/// Point-in-time occupancy of a pool
///
/// `idle + busy == total` whenever no acquire, release or eviction is in
/// flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolStatus {
    pub idle: usize,
    pub busy: usize,
    pub total: usize,
    /// Callers blocked in `acquire`
    pub waiting: usize,
    pub max_size: usize,
}

impl PoolStatus {
    /// Busy connections relative to `max_size`; above 1.0 after soft overflow
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        self.busy as f64 / self.max_size as f64
    }

    /// Whether the pool grew past `max_size`
    pub fn is_overflowing(&self) -> bool {
        self.total > self.max_size
    }
}

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use sweep_pool::{ConnectionPool, PoolConfiguration};
/// use sweep_pool::mock::MockFactory;
///
/// let pool = ConnectionPool::new(PoolConfiguration::new().with_min_size(2), MockFactory::new()).unwrap();
///
/// let conn = pool.acquire().unwrap();
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.connections_created, 2);
/// assert_eq!(metrics.total_acquired, 1);
/// assert_eq!(metrics.busy_connections, 1);
/// conn.close().unwrap();
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Connections opened through the factory
    pub connections_created: usize,

    /// Connections physically closed without error
    pub connections_closed: usize,

    /// Physical closes that failed (the connection was still written off)
    pub close_failures: usize,

    pub total_acquired: usize,

    pub total_released: usize,

    /// Connections created past `max_size` after waiting `max_wait`
    pub overflow_created: usize,

    /// Idle connections closed by eviction passes
    pub evicted: usize,

    /// Number of times a caller had to wait at capacity
    pub wait_events: usize,

    pub idle_connections: usize,

    pub busy_connections: usize,

    pub total_connections: usize,

    pub waiting_callers: usize,

    /// Busy connections relative to `max_size`
    pub utilization: f64,

    pub max_size: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("connections_created".to_string(), self.connections_created.to_string());
        metrics.insert("connections_closed".to_string(), self.connections_closed.to_string());
        metrics.insert("close_failures".to_string(), self.close_failures.to_string());
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("overflow_created".to_string(), self.overflow_created.to_string());
        metrics.insert("evicted".to_string(), self.evicted.to_string());
        metrics.insert("wait_events".to_string(), self.wait_events.to_string());
        metrics.insert("idle_connections".to_string(), self.idle_connections.to_string());
        metrics.insert("busy_connections".to_string(), self.busy_connections.to_string());
        metrics.insert("total_connections".to_string(), self.total_connections.to_string());
        metrics.insert("waiting_callers".to_string(), self.waiting_callers.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_size".to_string(), self.max_size.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// Every series carries a `pool` label plus one label per tag.
    ///
    /// # Examples
    ///
    /// ```
    /// use sweep_pool::{ConnectionPool, PoolConfiguration};
    /// use sweep_pool::mock::MockFactory;
    /// use std::collections::HashMap;
    ///
    /// let pool = ConnectionPool::new(PoolConfiguration::new().with_min_size(1), MockFactory::new()).unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("orders", Some(&tags)).unwrap();
    /// assert!(output.contains("sweep_pool_connections_idle"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = tags.cloned().unwrap_or_default();
        labels.insert("pool".to_string(), pool_name.to_string());

        let registry = Registry::new();
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let gauges = [
            ("sweep_pool_connections_idle", "Current idle connections", metrics.idle_connections),
            ("sweep_pool_connections_busy", "Current checked-out connections", metrics.busy_connections),
            ("sweep_pool_connections_total", "Current connections owned by the pool", metrics.total_connections),
            ("sweep_pool_callers_waiting", "Callers waiting at capacity", metrics.waiting_callers),
            ("sweep_pool_max_size", "Configured pool capacity", metrics.max_size),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(opts(name, help)).map_err(Self::metrics_error)?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge)).map_err(Self::metrics_error)?;
        }

        let utilization = Gauge::with_opts(opts("sweep_pool_utilization", "Busy connections relative to capacity"))
            .map_err(Self::metrics_error)?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization)).map_err(Self::metrics_error)?;

        let counters = [
            ("sweep_pool_connections_created_total", "Connections opened", metrics.connections_created),
            ("sweep_pool_connections_closed_total", "Connections closed", metrics.connections_closed),
            ("sweep_pool_close_failures_total", "Failed physical closes", metrics.close_failures),
            ("sweep_pool_acquired_total", "Connections handed out", metrics.total_acquired),
            ("sweep_pool_released_total", "Connections returned", metrics.total_released),
            ("sweep_pool_overflow_created_total", "Connections created past capacity", metrics.overflow_created),
            ("sweep_pool_evicted_total", "Idle connections evicted", metrics.evicted),
            ("sweep_pool_wait_events_total", "Acquires that waited at capacity", metrics.wait_events),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help)).map_err(Self::metrics_error)?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter)).map_err(Self::metrics_error)?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(Self::metrics_error)?;
        String::from_utf8(buffer).map_err(|err| PoolError::Metrics(err.to_string()))
    }

    fn metrics_error(err: prometheus::Error) -> PoolError {
        PoolError::Metrics(err.to_string())
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub connections_created: AtomicUsize,
    pub connections_closed: AtomicUsize,
    pub close_failures: AtomicUsize,
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub overflow_created: AtomicUsize,
    pub evicted: AtomicUsize,
    pub wait_events: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, status: PoolStatus) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            overflow_created: self.overflow_created.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            wait_events: self.wait_events.load(Ordering::Relaxed),
            idle_connections: status.idle,
            busy_connections: status.busy,
            total_connections: status.total,
            waiting_callers: status.waiting,
            utilization: status.utilization(),
            max_size: status.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(idle: usize, busy: usize, max_size: usize) -> PoolStatus {
        PoolStatus {
            idle,
            busy,
            total: idle + busy,
            waiting: 0,
            max_size,
        }
    }

    #[test]
    fn test_status_utilization() {
        assert!((status(5, 5, 20).utilization() - 0.25).abs() < f64::EPSILON);
        assert_eq!(status(0, 0, 0).utilization(), 0.0);
    }

    #[test]
    fn test_status_overflow() {
        assert!(!status(2, 8, 10).is_overflowing());
        assert!(status(0, 11, 10).is_overflowing());
    }

    #[test]
    fn test_tracker_snapshot() {
        let tracker = MetricsTracker::new();
        MetricsTracker::increment(&tracker.connections_created);
        MetricsTracker::increment(&tracker.connections_created);
        MetricsTracker::increment(&tracker.evicted);

        let metrics = tracker.get_metrics(status(1, 1, 4));
        assert_eq!(metrics.connections_created, 2);
        assert_eq!(metrics.evicted, 1);
        assert_eq!(metrics.total_connections, 2);

        let exported = metrics.export();
        assert_eq!(exported.get("connections_created").map(String::as_str), Some("2"));
        assert_eq!(exported.get("utilization").map(String::as_str), Some("0.25"));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_labels() {
        let tracker = MetricsTracker::new();
        MetricsTracker::increment(&tracker.overflow_created);
        let metrics = tracker.get_metrics(status(0, 11, 10));

        let output = MetricsExporter::export_prometheus(&metrics, "orders", None).unwrap();
        assert!(output.contains("sweep_pool_overflow_created_total{pool=\"orders\"} 1"));
        assert!(output.contains("sweep_pool_connections_busy{pool=\"orders\"} 11"));
    }
}
