//! Thread-based adapter over the pool.
//!
//! The pool algorithm is implemented once, async. This module is the thin
//! blocking adapter: it owns a small runtime (one worker thread, which also
//! hosts the monitor) and drives the same [`Pool`](crate::Pool) with
//! `block_on`. Checkout returns the ordinary [`PooledConnection`] guard.
//!
//! Intended for callers without a runtime of their own; do not use it from
//! inside an async context.

use crate::config::PoolConfig;
use crate::connection::Connector;
use crate::error::PoolError;
use crate::pool::{PoolStatus, PooledConnection};

/// Blocking facade over [`crate::Pool`].
pub struct Pool<K: Connector> {
    inner: crate::Pool<K>,
    runtime: tokio::runtime::Runtime,
}

impl<K: Connector> Pool<K> {
    /// Create a blocking pool over `connector` with the given configuration.
    ///
    /// Validates the configuration eagerly and builds the backing runtime;
    /// no connections are made until [`start`](Pool::start).
    pub fn new(connector: K, config: PoolConfig) -> Result<Self, PoolError> {
        // Validate before paying for the runtime.
        let inner = crate::Pool::new(connector, config)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("harbor-pool")
            .enable_all()
            .build()
            .map_err(PoolError::Runtime)?;
        Ok(Self { inner, runtime })
    }

    /// Open the pool. See [`crate::Pool::start`].
    pub fn start(&self) -> Result<(), PoolError> {
        self.runtime.block_on(self.inner.start())
    }

    /// Borrow a connection, blocking up to `conn_timeout`.
    /// See [`crate::Pool::checkout`].
    pub fn checkout(&self) -> Result<PooledConnection<K>, PoolError> {
        self.runtime.block_on(self.inner.checkout())
    }

    /// Close the pool. See [`crate::Pool::stop`].
    pub fn stop(&self) -> Result<(), PoolError> {
        self.runtime.block_on(self.inner.stop())
    }

    /// A point-in-time snapshot of the pool's counters.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    /// Whether the pool is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}
