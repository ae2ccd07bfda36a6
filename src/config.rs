//! Pool configuration options

use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pool size used when the configured maximum is zero.
pub const DEFAULT_MAX_SIZE: usize = 100;

/// Eviction interval used when the configured interval is zero.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for connection pool behavior
///
/// The value is plain data. Clamping of out-of-range sizes and intervals
/// happens when a pool is built from it, see [`PoolConfiguration::normalized`].
///
/// # Examples
///
/// ```
/// use sweep_pool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_url("mem://orders")
///     .with_driver("mock")
///     .with_min_size(1)
///     .with_max_size(10)
///     .with_max_wait(Duration::from_millis(1000))
///     .with_sweeper(true)
///     .with_eviction_interval(Duration::from_secs(1));
///
/// assert_eq!(config.max_size, 10);
/// assert!(config.return_on_close);
/// ```
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Connection URL handed to the factory
    pub url: String,

    pub user: String,

    pub password: String,

    /// Driver identifier, validated by the factory when the pool is built
    pub driver: String,

    /// Connections created eagerly at startup; floor for eviction
    pub min_size: usize,

    /// Capacity of the idle set and threshold for waiting in `acquire`
    pub max_size: usize,

    /// How long a caller waits at capacity before a connection is created past it
    pub max_wait: Duration,

    /// Whether the eviction task is registered at startup
    pub sweeper_enabled: bool,

    /// Period of the eviction task
    pub eviction_interval: Duration,

    /// Physically close checked-out connections on shutdown
    pub force_close: bool,

    /// Wrap acquired connections so that `close` returns them to the pool
    pub return_on_close: bool,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: String::new(),
            password: String::new(),
            driver: String::new(),
            min_size: 0,
            max_size: DEFAULT_MAX_SIZE,
            max_wait: Duration::ZERO,
            sweeper_enabled: false,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            force_close: false,
            return_on_close: true,
        }
    }
}

impl fmt::Debug for PoolConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfiguration")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("driver", &self.driver)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("max_wait", &self.max_wait)
            .field("sweeper_enabled", &self.sweeper_enabled)
            .field("eviction_interval", &self.eviction_interval)
            .field("force_close", &self.force_close)
            .field("return_on_close", &self.return_on_close)
            .finish()
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Set the number of connections created at startup
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set the maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use sweep_pool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_size(50);
    /// assert_eq!(config.max_size, 50);
    /// ```
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    /// Enable or disable the background eviction task
    pub fn with_sweeper(mut self, enabled: bool) -> Self {
        self.sweeper_enabled = enabled;
        self
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Close checked-out connections when the pool shuts down
    pub fn with_force_close(mut self, force: bool) -> Self {
        self.force_close = force;
        self
    }

    /// Return connections to the pool when the caller closes them
    pub fn with_return_on_close(mut self, enabled: bool) -> Self {
        self.return_on_close = enabled;
        self
    }

    /// Apply the pool's clamping rules, logging every adjusted value.
    ///
    /// - `max_size == 0` becomes [`DEFAULT_MAX_SIZE`]
    /// - `max_size < min_size` is raised to `min_size`
    /// - a zero `eviction_interval` becomes [`DEFAULT_EVICTION_INTERVAL`]
    ///
    /// # Examples
    ///
    /// ```
    /// use sweep_pool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new()
    ///     .with_min_size(8)
    ///     .with_max_size(4)
    ///     .normalized();
    /// assert_eq!(config.max_size, 8);
    /// ```
    pub fn normalized(mut self) -> Self {
        if self.max_size < 1 {
            tracing::warn!(
                default = DEFAULT_MAX_SIZE,
                "max_size is smaller than 1, using default"
            );
            self.max_size = DEFAULT_MAX_SIZE;
        }
        if self.max_size < self.min_size {
            tracing::warn!(
                max_size = self.max_size,
                min_size = self.min_size,
                "max_size is smaller than min_size, raising it to min_size"
            );
            self.max_size = self.min_size;
        }
        if self.eviction_interval.is_zero() {
            tracing::warn!(
                default_ms = DEFAULT_EVICTION_INTERVAL.as_millis() as u64,
                "eviction interval is zero, using default"
            );
            self.eviction_interval = DEFAULT_EVICTION_INTERVAL;
        } else if self.eviction_interval < Duration::from_secs(1) {
            tracing::warn!(
                interval_ms = self.eviction_interval.as_millis() as u64,
                "eviction interval is lower than 1 second"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfiguration::default();
        assert_eq!(config.max_size, DEFAULT_MAX_SIZE);
        assert_eq!(config.min_size, 0);
        assert_eq!(config.eviction_interval, DEFAULT_EVICTION_INTERVAL);
        assert!(config.return_on_close);
        assert!(!config.force_close);
        assert!(!config.sweeper_enabled);
    }

    #[test]
    fn test_zero_max_size_uses_default() {
        let config = PoolConfiguration::new().with_max_size(0).normalized();
        assert_eq!(config.max_size, DEFAULT_MAX_SIZE);
    }

    #[test]
    fn test_max_size_raised_to_min_size() {
        let config = PoolConfiguration::new()
            .with_min_size(5)
            .with_max_size(2)
            .normalized();
        assert_eq!(config.max_size, 5);
        assert_eq!(config.min_size, 5);
    }

    #[test]
    fn test_zero_interval_uses_default() {
        let config = PoolConfiguration::new()
            .with_eviction_interval(Duration::ZERO)
            .normalized();
        assert_eq!(config.eviction_interval, DEFAULT_EVICTION_INTERVAL);

        let short = PoolConfiguration::new()
            .with_eviction_interval(Duration::from_millis(200))
            .normalized();
        assert_eq!(short.eviction_interval, Duration::from_millis(200));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = PoolConfiguration::new()
            .with_user("test")
            .with_password("11222333s4v5");
        let rendered = format!("{config:?}");
        assert!(rendered.contains("test"));
        assert!(!rendered.contains("11222333s4v5"));
    }
}
