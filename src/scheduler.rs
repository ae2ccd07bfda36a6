//! Process-wide scheduler running the pools' eviction tasks
//!
//! Every pool registers at most one task. The ticker thread is spawned by
//! the first registration and stops once the last task is removed; a later
//! registration starts a fresh one. Tasks only hold a [`Weak`] handle to
//! their pool, so a dropped pool's task cancels itself on its next tick.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::DEFAULT_EVICTION_INTERVAL;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{CleanStrategy, EvictionTarget};
use crate::pool::PoolId;

static SCHEDULER: Lazy<Scheduler> = Lazy::new(Scheduler::new);

struct Scheduler {
    registry: Mutex<Registry>,
    /// Wakes the ticker when the registry changes
    tick: Condvar,
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<PoolId, EvictionTask>,
    /// Generation of the live ticker thread
    ticker: Option<u64>,
    generations: u64,
}

struct EvictionTask {
    pool: Weak<dyn EvictionTarget>,
    strategy: Arc<Mutex<Box<dyn CleanStrategy>>>,
    interval: Duration,
    next_run: Instant,
}

type DueTask = (PoolId, Weak<dyn EvictionTarget>, Arc<Mutex<Box<dyn CleanStrategy>>>);

impl Scheduler {
    fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            tick: Condvar::new(),
        }
    }
}

/// Schedule `strategy` to run against `pool` every `interval`.
///
/// A task already registered for `pool_id` is replaced. The first run happens
/// one interval from now; a zero interval falls back to
/// [`DEFAULT_EVICTION_INTERVAL`].
pub(crate) fn register(
    pool_id: PoolId,
    pool: Weak<dyn EvictionTarget>,
    strategy: Box<dyn CleanStrategy>,
    mut interval: Duration,
) -> PoolResult<()> {
    if interval.is_zero() {
        tracing::warn!(
            pool = %pool_id,
            default_ms = DEFAULT_EVICTION_INTERVAL.as_millis() as u64,
            "eviction interval is zero, using default"
        );
        interval = DEFAULT_EVICTION_INTERVAL;
    }
    let mut registry = SCHEDULER.registry.lock();
    if registry.tasks.remove(&pool_id).is_some() {
        tracing::debug!(pool = %pool_id, "replacing eviction task");
    }
    registry.tasks.insert(
        pool_id,
        EvictionTask {
            pool,
            strategy: Arc::new(Mutex::new(strategy)),
            interval,
            next_run: Instant::now() + interval,
        },
    );

    if registry.ticker.is_none() {
        let generation = registry.generations + 1;
        let spawned = thread::Builder::new()
            .name(format!("pool-cleaner-{generation}"))
            .spawn(move || run_ticker(generation));
        if let Err(err) = spawned {
            registry.tasks.remove(&pool_id);
            tracing::error!(error = %err, "cannot start eviction scheduler");
            return Err(PoolError::Scheduler(err.to_string()));
        }
        registry.generations = generation;
        registry.ticker = Some(generation);
        tracing::info!(generation, "eviction scheduler started");
    }

    SCHEDULER.tick.notify_all();
    tracing::info!(
        pool = %pool_id,
        interval_ms = interval.as_millis() as u64,
        "eviction task scheduled"
    );
    Ok(())
}

/// Cancel the task of `pool_id`; returns whether one was registered.
///
/// Removing the last task stops the ticker thread.
pub(crate) fn unregister(pool_id: PoolId) -> bool {
    let mut registry = SCHEDULER.registry.lock();
    if registry.tasks.remove(&pool_id).is_none() {
        return false;
    }
    tracing::debug!(pool = %pool_id, "eviction task cancelled");

    if registry.tasks.is_empty() {
        registry.ticker = None;
        tracing::info!("eviction scheduler stopped");
    }
    SCHEDULER.tick.notify_all();
    true
}

pub(crate) fn is_registered(pool_id: PoolId) -> bool {
    SCHEDULER.registry.lock().tasks.contains_key(&pool_id)
}

/// Number of eviction tasks currently scheduled in this process
pub fn scheduled_task_count() -> usize {
    SCHEDULER.registry.lock().tasks.len()
}

/// Whether the ticker is alive, which is the case while any task is scheduled
pub fn is_running() -> bool {
    SCHEDULER.registry.lock().ticker.is_some()
}

fn run_ticker(generation: u64) {
    let mut registry = SCHEDULER.registry.lock();
    loop {
        if registry.ticker != Some(generation) {
            break;
        }
        let Some(next_run) = registry.tasks.values().map(|task| task.next_run).min() else {
            break;
        };

        let now = Instant::now();
        if next_run > now {
            SCHEDULER.tick.wait_until(&mut registry, next_run);
            continue;
        }

        let due: Vec<DueTask> = registry
            .tasks
            .iter_mut()
            .filter(|(_, task)| task.next_run <= now)
            .map(|(pool_id, task)| {
                task.next_run += task.interval;
                if task.next_run <= now {
                    task.next_run = now + task.interval;
                }
                (*pool_id, task.pool.clone(), Arc::clone(&task.strategy))
            })
            .collect();

        MutexGuard::unlocked(&mut registry, || {
            for (pool_id, pool, strategy) in due {
                run_task(pool_id, &pool, &strategy);
            }
        });
    }
    tracing::trace!(generation, "eviction ticker exited");
}

fn run_task(pool_id: PoolId, pool: &Weak<dyn EvictionTarget>, strategy: &Mutex<Box<dyn CleanStrategy>>) {
    tracing::trace!(pool = %pool_id, "eviction tick");
    let Some(pool) = pool.upgrade() else {
        tracing::debug!(pool = %pool_id, "pool is gone, cancelling its eviction task");
        unregister(pool_id);
        return;
    };
    if !pool.is_closed() {
        strategy.lock().clean(pool.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStrategy(Arc<AtomicUsize>);

    impl CleanStrategy for CountingStrategy {
        fn clean(&mut self, _pool: &dyn EvictionTarget) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct IdlePool;

    impl EvictionTarget for IdlePool {
        fn min_size(&self) -> usize {
            0
        }

        fn idle_count(&self) -> usize {
            0
        }

        fn total_count(&self) -> usize {
            0
        }

        fn is_closed(&self) -> bool {
            false
        }

        fn release_extra(&self, count: usize) -> PoolResult<usize> {
            Err(PoolError::InvalidArgument(count.to_string()))
        }
    }

    #[test]
    fn test_task_ticks_and_cancels_when_pool_dropped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let pool: Arc<dyn EvictionTarget> = Arc::new(IdlePool);
        let pool_id = PoolId::next();

        register(
            pool_id,
            Arc::downgrade(&pool),
            Box::new(CountingStrategy(Arc::clone(&ticks))),
            Duration::from_millis(20),
        )
        .unwrap();
        assert!(is_registered(pool_id));

        thread::sleep(Duration::from_millis(150));
        assert!(ticks.load(Ordering::SeqCst) >= 2);

        drop(pool);
        thread::sleep(Duration::from_millis(100));
        assert!(!is_registered(pool_id));
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let pool: Arc<dyn EvictionTarget> = Arc::new(IdlePool);
        let pool_id = PoolId::next();

        register(
            pool_id,
            Arc::downgrade(&pool),
            Box::new(CountingStrategy(Arc::clone(&ticks))),
            Duration::ZERO,
        )
        .unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        let interval = SCHEDULER.registry.lock().tasks.get(&pool_id).map(|task| task.interval);
        assert_eq!(interval, Some(DEFAULT_EVICTION_INTERVAL));
        assert!(unregister(pool_id));
    }

    #[test]
    fn test_unregister_unknown_pool() {
        assert!(!unregister(PoolId::next()));
    }
}
