use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sweep_pool::mock::{MockConnection, MockFactory, MOCK_DRIVER};
use sweep_pool::{scheduler, AverageBusyStrategy, Connection, ConnectionPool, MinIdleStrategy, PoolConfiguration};

/// The scheduler is process-wide; tests asserting on its global state run one at a time
static SERIAL: Mutex<()> = parking_lot::const_mutex(());

const TICK: Duration = Duration::from_millis(50);

fn sweeper_config(min_size: usize, max_size: usize) -> PoolConfiguration {
    PoolConfiguration::new()
        .with_url("mem://sweeper")
        .with_driver(MOCK_DRIVER)
        .with_min_size(min_size)
        .with_max_size(max_size)
        .with_sweeper(true)
        .with_eviction_interval(TICK)
}

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn fill_idle(pool: &ConnectionPool<MockConnection>, count: usize) {
    let held: Vec<_> = (0..count).map(|_| pool.acquire().unwrap()).collect();
    for conn in &held {
        conn.close().unwrap();
    }
}

#[test]
fn test_scheduler_lifecycle_follows_registrations() {
    let _serial = SERIAL.lock();
    assert_eq!(scheduler::scheduled_task_count(), 0);
    assert!(!scheduler::is_running());

    let first = ConnectionPool::new(sweeper_config(1, 4), MockFactory::new()).unwrap();
    assert!(first.has_cleaner());
    assert!(scheduler::is_running());

    let second = ConnectionPool::new(sweeper_config(1, 4), MockFactory::new()).unwrap();
    assert_eq!(scheduler::scheduled_task_count(), 2);

    first.close();
    assert!(!first.has_cleaner());
    assert!(scheduler::is_running());

    second.close();
    assert_eq!(scheduler::scheduled_task_count(), 0);
    assert!(!scheduler::is_running());

    // a later registration starts a fresh ticker
    let third = ConnectionPool::new(sweeper_config(1, 4), MockFactory::new()).unwrap();
    assert!(scheduler::is_running());
    third.close();
    assert!(!scheduler::is_running());
}

#[test]
fn test_min_idle_sweeper_shrinks_pool() {
    let _serial = SERIAL.lock();
    let factory = MockFactory::new();
    let pool = ConnectionPool::new(sweeper_config(2, 10), factory.clone()).unwrap();

    fill_idle(&pool, 6);
    assert!(wait_until(Duration::from_secs(3), || pool.idle_count() == 2));
    assert_eq!(pool.total_count(), 2);
    assert_eq!(factory.open_count(), 2);
    assert!(pool.get_metrics().evicted >= 4);

    pool.close();
}

#[test]
fn test_min_idle_sweeper_leaves_busy_connections() {
    let _serial = SERIAL.lock();
    let pool = ConnectionPool::new(sweeper_config(1, 10), MockFactory::new()).unwrap();

    let held: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
    thread::sleep(TICK * 4);
    assert_eq!(pool.busy_count(), 5);
    assert!(held.iter().all(|conn| !conn.raw().is_closed()));

    for conn in &held {
        conn.close().unwrap();
    }
    assert!(wait_until(Duration::from_secs(3), || pool.idle_count() == 1));
    assert_eq!(pool.total_count(), 1);

    pool.close();
}

#[test]
fn test_average_busy_sweeper_shrinks_idle_pool() {
    let _serial = SERIAL.lock();
    let pool = ConnectionPool::with_strategy(
        sweeper_config(0, 10),
        MockFactory::new(),
        Box::new(AverageBusyStrategy::new()),
    )
    .unwrap();

    fill_idle(&pool, 5);
    assert_eq!(pool.total_count(), 5);
    assert!(wait_until(Duration::from_secs(3), || pool.total_count() <= 1));
    assert_eq!(pool.busy_count(), 0);

    pool.close();
}

#[test]
fn test_register_cleaner_replaces_task() {
    let _serial = SERIAL.lock();
    let pool = ConnectionPool::new(sweeper_config(1, 10), MockFactory::new()).unwrap();
    assert_eq!(scheduler::scheduled_task_count(), 1);

    pool.register_cleaner(Box::new(MinIdleStrategy::new()), Duration::from_millis(20))
        .unwrap();
    assert_eq!(scheduler::scheduled_task_count(), 1);

    fill_idle(&pool, 4);
    assert!(wait_until(Duration::from_secs(3), || pool.idle_count() == 1));

    assert!(pool.unregister_cleaner());
    assert!(!pool.unregister_cleaner());
    assert!(!scheduler::is_running());

    // without a cleaner nothing shrinks
    fill_idle(&pool, 3);
    thread::sleep(TICK * 3);
    assert_eq!(pool.idle_count(), 3);

    pool.close();
}

#[test]
fn test_dropped_pool_cancels_its_task() {
    let _serial = SERIAL.lock();
    let factory = MockFactory::new();
    let pool = ConnectionPool::new(sweeper_config(1, 4), factory.clone()).unwrap();
    assert_eq!(scheduler::scheduled_task_count(), 1);

    drop(pool);
    assert!(wait_until(Duration::from_secs(3), || scheduler::scheduled_task_count() == 0));
    assert!(!scheduler::is_running());
}

#[test]
fn test_pool_without_sweeper_is_not_scheduled() {
    let _serial = SERIAL.lock();
    let pool = ConnectionPool::new(
        sweeper_config(1, 4).with_sweeper(false),
        MockFactory::new(),
    )
    .unwrap();
    assert!(!pool.has_cleaner());
    assert_eq!(scheduler::scheduled_task_count(), 0);
    pool.close();
}
