//! Eviction strategies deciding how many idle connections to close per cycle

use crate::errors::PoolResult;

/// The view of a pool an eviction strategy works against
pub trait EvictionTarget: Send + Sync {
    /// Configured floor of the pool
    fn min_size(&self) -> usize;

    fn idle_count(&self) -> usize;

    /// Connections owned by the pool, idle or checked out
    fn total_count(&self) -> usize;

    fn is_closed(&self) -> bool;

    /// Close up to `count` idle connections, returning how many were closed
    fn release_extra(&self, count: usize) -> PoolResult<usize>;
}

/// Policy run by the eviction scheduler on every tick.
///
/// All effects go through [`EvictionTarget::release_extra`]; a strategy never
/// asks for more than the current idle count.
///
/// # Examples
///
/// ```
/// use sweep_pool::{CleanStrategy, ConnectionPool, MinIdleStrategy, PoolConfiguration};
/// use sweep_pool::mock::MockFactory;
///
/// let pool = ConnectionPool::new(
///     PoolConfiguration::new().with_min_size(1).with_max_size(4),
///     MockFactory::new(),
/// )
/// .unwrap();
///
/// let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
/// for conn in &held {
///     conn.close().unwrap();
/// }
/// assert_eq!(pool.idle_count(), 3);
///
/// MinIdleStrategy::new().clean(&pool);
/// assert_eq!(pool.idle_count(), 1);
/// ```
pub trait CleanStrategy: Send {
    fn clean(&mut self, pool: &dyn EvictionTarget);
}

/// Shrinks the idle set back to the pool's minimum size
#[derive(Debug, Clone, Copy, Default)]
pub struct MinIdleStrategy;

impl MinIdleStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl CleanStrategy for MinIdleStrategy {
    fn clean(&mut self, pool: &dyn EvictionTarget) {
        let min_size = pool.min_size();
        let idle = pool.idle_count();
        if idle <= min_size {
            return;
        }

        let count = idle - min_size;
        tracing::debug!(idle, min_size, count, "shrinking idle connections to min_size");
        if let Err(err) = pool.release_extra(count) {
            tracing::warn!(error = %err, "min-idle eviction failed");
        }
    }
}

/// Closes idle connections while the pool is larger than its average use.
///
/// Every tick samples the busy count (`total - idle`) into a running
/// average. When the pool holds more than `min_size` connections, has idle
/// ones, and exceeds the average busy count, the difference (rounded down,
/// capped at the idle count) is evicted.
#[derive(Debug, Clone, Default)]
pub struct AverageBusyStrategy {
    samples: u64,
    busy_sum: u64,
}

impl AverageBusyStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Running average of the sampled busy counts
    pub fn average_busy(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.busy_sum as f64 / self.samples as f64
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }

    fn record(&mut self, busy: usize) {
        self.samples += 1;
        self.busy_sum += busy as u64;
    }
}

impl CleanStrategy for AverageBusyStrategy {
    fn clean(&mut self, pool: &dyn EvictionTarget) {
        let idle = pool.idle_count();
        let total = pool.total_count();
        let busy = total.saturating_sub(idle);
        self.record(busy);

        let min_size = pool.min_size();
        tracing::debug!(idle, total, busy, "sampled pool occupancy");
        if total <= min_size || idle == 0 {
            tracing::trace!(total, min_size, idle, "nothing to evict");
            return;
        }

        let average = self.average_busy();
        if total as f64 <= average {
            tracing::trace!(total, average, "pool is not larger than its average use");
            return;
        }

        let count = ((total as f64 - average).floor() as usize).min(idle);
        if count == 0 {
            return;
        }
        tracing::debug!(total, average, count, "evicting connections above average use");
        if let Err(err) = pool.release_extra(count) {
            tracing::warn!(error = %err, "average-busy eviction failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PoolError;
    use parking_lot::Mutex;

    /// Occupancy numbers set by hand; eviction drains idle and total
    struct FakePool {
        min_size: usize,
        state: Mutex<(usize, usize)>,
        requests: Mutex<Vec<usize>>,
    }

    impl FakePool {
        fn new(min_size: usize, idle: usize, total: usize) -> Self {
            Self {
                min_size,
                state: Mutex::new((idle, total)),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn set(&self, idle: usize, total: usize) {
            *self.state.lock() = (idle, total);
        }

        fn requests(&self) -> Vec<usize> {
            self.requests.lock().clone()
        }
    }

    impl EvictionTarget for FakePool {
        fn min_size(&self) -> usize {
            self.min_size
        }

        fn idle_count(&self) -> usize {
            self.state.lock().0
        }

        fn total_count(&self) -> usize {
            self.state.lock().1
        }

        fn is_closed(&self) -> bool {
            false
        }

        fn release_extra(&self, count: usize) -> PoolResult<usize> {
            if count == 0 {
                return Err(PoolError::InvalidArgument("count".to_string()));
            }
            self.requests.lock().push(count);
            let mut state = self.state.lock();
            let released = count.min(state.0);
            state.0 -= released;
            state.1 -= released;
            Ok(released)
        }
    }

    #[test]
    fn test_min_idle_evicts_down_to_min_size() {
        let pool = FakePool::new(2, 5, 5);
        MinIdleStrategy::new().clean(&pool);
        assert_eq!(pool.requests(), vec![3]);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_min_idle_leaves_small_pool_alone() {
        let pool = FakePool::new(2, 2, 6);
        MinIdleStrategy::new().clean(&pool);
        assert!(pool.requests().is_empty());
    }

    #[test]
    fn test_average_busy_evicts_above_average() {
        let pool = FakePool::new(1, 0, 2);
        let mut strategy = AverageBusyStrategy::new();

        // busy samples 2, 4, 6 with nothing idle
        strategy.clean(&pool);
        pool.set(0, 4);
        strategy.clean(&pool);
        pool.set(0, 6);
        strategy.clean(&pool);
        assert!(pool.requests().is_empty());
        assert!((strategy.average_busy() - 4.0).abs() < f64::EPSILON);

        // busy 4 keeps the average at 4
        pool.set(4, 8);
        strategy.clean(&pool);
        assert!((strategy.average_busy() - 4.0).abs() < f64::EPSILON);
        assert_eq!(pool.requests(), vec![4]);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.total_count(), 4);
    }

    #[test]
    fn test_average_busy_caps_at_idle() {
        let pool = FakePool::new(0, 2, 10);
        let mut strategy = AverageBusyStrategy::new();
        strategy.clean(&pool);
        // average 8, excess 2, idle 2
        assert_eq!(pool.requests(), vec![2]);

        let pool = FakePool::new(0, 3, 3);
        let mut strategy = AverageBusyStrategy::new();
        strategy.clean(&pool);
        // average 0, excess 3, capped at idle 3
        assert_eq!(pool.requests(), vec![3]);
    }

    #[test]
    fn test_average_busy_respects_min_size() {
        let pool = FakePool::new(4, 4, 4);
        let mut strategy = AverageBusyStrategy::new();
        strategy.clean(&pool);
        assert!(pool.requests().is_empty());
        assert_eq!(strategy.sample_count(), 1);
    }

    #[test]
    fn test_average_busy_rounds_down() {
        let pool = FakePool::new(0, 0, 3);
        let mut strategy = AverageBusyStrategy::new();
        strategy.clean(&pool);
        pool.set(0, 4);
        strategy.clean(&pool);
        // samples 3, 4 and now 4 => average 11/3, total 5 => excess 1.33
        pool.set(1, 5);
        strategy.clean(&pool);
        assert_eq!(pool.requests(), vec![1]);
    }
}
