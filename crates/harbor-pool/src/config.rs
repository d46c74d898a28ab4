//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Keep-alive values below this are accepted but flagged as not recommended.
const KEEP_ALIVE_WARN_FLOOR: Duration = Duration::from_secs(60);

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods starting from [`PoolConfig::new`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Opaque locator forwarded verbatim to the connector.
    pub uri: String,

    /// Minimum number of connections to maintain. Must be greater than zero.
    pub min_size: usize,

    /// Maximum number of connections allowed. Must exceed `min_size`;
    /// defaults to `min_size + 1`.
    pub max_size: usize,

    /// Time to wait for a connection at checkout before timing out.
    pub conn_timeout: Duration,

    /// Nominal lifetime of a connection before its expiry is renewed.
    pub keep_alive: Duration,

    /// Interval between monitor sweeps over idle connections.
    pub check_interval: Duration,

    /// Maximum number of idle connections examined per sweep.
    pub monitor_batch_size: usize,

    /// Multiple of `keep_alive` past creation after which a connection is no
    /// longer considered reusable, even if healthy.
    pub reuse_factor: u32,

    /// Number of concurrent checkout waiters above which the pool signals
    /// the monitor to grow by one connection.
    pub grow_threshold: usize,
}

impl PoolConfig {
    /// Create a configuration for `uri` with default sizing: one connection
    /// minimum, two maximum.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            min_size: 1,
            max_size: 2,
            conn_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(60 * 15),
            check_interval: Duration::from_secs(5),
            monitor_batch_size: 10,
            reuse_factor: 4,
            grow_threshold: 1,
        }
    }

    /// Set the minimum pool size, keeping `max_size` at least one above it.
    #[must_use]
    pub fn min_size(mut self, count: usize) -> Self {
        self.min_size = count;
        if self.max_size <= count {
            self.max_size = count + 1;
        }
        self
    }

    /// Set the maximum pool size.
    #[must_use]
    pub fn max_size(mut self, count: usize) -> Self {
        self.max_size = count;
        self
    }

    /// Set the checkout timeout.
    #[must_use]
    pub fn conn_timeout(mut self, timeout: Duration) -> Self {
        self.conn_timeout = timeout;
        self
    }

    /// Set the nominal connection lifetime.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the monitor sweep interval.
    #[must_use]
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set the number of idle connections examined per sweep.
    #[must_use]
    pub fn monitor_batch_size(mut self, batch_size: usize) -> Self {
        self.monitor_batch_size = batch_size;
        self
    }

    /// Set the reuse slack window as a multiple of `keep_alive`.
    #[must_use]
    pub fn reuse_factor(mut self, factor: u32) -> Self {
        self.reuse_factor = factor;
        self
    }

    /// Set the waiter count above which the growth heuristic fires.
    #[must_use]
    pub fn grow_threshold(mut self, threshold: usize) -> Self {
        self.grow_threshold = threshold;
        self
    }

    /// Validate the configuration.
    ///
    /// Called eagerly by [`Pool::new`]; invalid configurations never reach a
    /// running pool.
    ///
    /// [`Pool::new`]: crate::Pool::new
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.uri.is_empty() {
            return Err(PoolError::Configuration("uri must not be empty".into()));
        }
        if self.min_size == 0 {
            return Err(PoolError::Configuration(
                "min_size must be greater than 0".into(),
            ));
        }
        if self.max_size <= self.min_size {
            return Err(PoolError::Configuration(
                "max_size must be greater than min_size".into(),
            ));
        }
        if self.conn_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "conn_timeout must be greater than 0".into(),
            ));
        }
        if self.keep_alive.is_zero() {
            return Err(PoolError::Configuration(
                "keep_alive must be greater than 0".into(),
            ));
        }
        if self.check_interval.is_zero() {
            return Err(PoolError::Configuration(
                "check_interval must be greater than 0".into(),
            ));
        }
        if self.monitor_batch_size == 0 {
            return Err(PoolError::Configuration(
                "monitor_batch_size must be greater than 0".into(),
            ));
        }
        if self.reuse_factor == 0 {
            return Err(PoolError::Configuration(
                "reuse_factor must be greater than 0".into(),
            ));
        }
        if self.keep_alive < KEEP_ALIVE_WARN_FLOOR {
            tracing::warn!(
                keep_alive = ?self.keep_alive,
                "keep_alive is less than 60 seconds, this is not recommended"
            );
        }
        Ok(())
    }
}
