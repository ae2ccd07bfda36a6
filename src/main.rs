// sweep_pool demo
// Drives a sweeper-enabled pool over in-memory mock connections.
// Set RUST_LOG=sweep_pool=debug to watch connections come and go.

use std::thread;
use std::time::Duration;

use sweep_pool::mock::{MockFactory, MOCK_DRIVER};
use sweep_pool::{ConnectionPool, PoolConfiguration, PoolResult};
use tracing_subscriber::EnvFilter;

fn main() -> PoolResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    tracing::info!("system started");
    let config = PoolConfiguration::new()
        .with_url("mem://photostudio")
        .with_driver(MOCK_DRIVER)
        .with_user("test")
        .with_password("secret")
        .with_min_size(1)
        .with_max_size(10)
        .with_max_wait(Duration::from_millis(1000))
        .with_sweeper(true)
        .with_eviction_interval(Duration::from_secs(1))
        .with_force_close(true)
        .with_return_on_close(true);
    println!("{config:?}");

    let factory = MockFactory::new();
    let pool = ConnectionPool::new(config, factory.clone())?;
    let _held = pool.acquire()?;

    for _ in 0..10 {
        let first = pool.acquire()?;
        let second = pool.acquire()?;
        let third = pool.acquire()?;
        pool.release(&first)?;
        pool.release(&second)?;
        pool.release(&third)?;
    }
    println!("After the burst: {:?}", pool.status());

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let pool = pool.clone();
            thread::spawn(move || -> PoolResult<()> {
                let conn = pool.acquire()?;
                println!("  worker {worker} took connection {}", conn.id());
                thread::sleep(Duration::from_millis(100));
                conn.close()?;
                println!("  worker {worker} released connection");
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        if let Ok(Err(err)) = worker.join() {
            tracing::error!(error = %err, "worker failed");
        }
    }

    // let the sweeper shrink the idle set back to min_size
    thread::sleep(Duration::from_secs(3));
    println!("After eviction: {:?}", pool.status());

    tracing::info!("system stopped");
    pool.close();
    println!(
        "Created {} connection(s), {} still open",
        factory.created_count(),
        factory.open_count()
    );
    Ok(())
}
