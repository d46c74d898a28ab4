//! Pool core: start/stop, checkout, and release.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::connection::{Connection, Connector};
use crate::error::PoolError;
use crate::handle::ConnectionHandle;
use crate::monitor::Monitor;
use crate::worker::Worker;

/// Mutable pool state. Every field here is shared between acquirers,
/// releasers, and the monitor, and is only ever touched under the lock.
pub(crate) struct PoolState<C: Connection> {
    pub(crate) idle: VecDeque<ConnectionHandle<C>>,
    pub(crate) size: usize,
    pub(crate) waiting: usize,
    pub(crate) growing: bool,
    pub(crate) opened: bool,
    pub(crate) opening: bool,
}

pub(crate) struct PoolInner<K: Connector> {
    pub(crate) config: PoolConfig,
    pub(crate) connector: K,
    pub(crate) state: Mutex<PoolState<K::Conn>>,
    /// Sole gate on concurrently checked-out handles; `max_size` permits.
    pub(crate) capacity: Arc<Semaphore>,
    /// Single-permit gate: overlapping sweeps cannot double-process handles.
    pub(crate) sweep_gate: Semaphore,
    next_id: AtomicU64,
    worker: Mutex<Option<Worker>>,
    /// Runtime handle captured at `start()`; retired connections are closed
    /// on tasks spawned here, since guard drop cannot suspend.
    runtime: Mutex<Option<tokio::runtime::Handle>>,
}

impl<K: Connector> PoolInner<K> {
    pub(crate) fn is_open(&self) -> bool {
        self.state.lock().opened
    }

    /// Connect and register a new handle. The size increment happens after
    /// the connector succeeds, under the lock.
    pub(crate) async fn create_handle(&self) -> Result<ConnectionHandle<K::Conn>, PoolError> {
        let conn = self
            .connector
            .connect(&self.config.uri)
            .await
            .map_err(|e| PoolError::Connect(Box::new(e)))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle::new(id, conn, self.config.keep_alive, self.config.reuse_factor);
        let size = {
            let mut state = self.state.lock();
            state.size += 1;
            state.size
        };
        tracing::debug!(id, size, "new connection created");
        Ok(handle)
    }

    /// Enqueue a handle, or close it if the pool cannot take it (closed
    /// meanwhile, already at capacity, or no longer reusable).
    pub(crate) async fn admit(&self, handle: ConnectionHandle<K::Conn>) {
        let rejected = {
            let mut state = self.state.lock();
            if state.opened && handle.reusable() && state.size <= self.config.max_size {
                state.idle.push_back(handle);
                None
            } else {
                state.size = state.size.saturating_sub(1);
                Some(handle)
            }
        };
        if let Some(handle) = rejected {
            tracing::debug!(id = handle.id(), "connection not admissible, closing");
            handle.close().await;
        }
    }

    /// Unregister a handle and close its connection in place.
    pub(crate) async fn destroy(&self, handle: ConnectionHandle<K::Conn>) {
        let size = {
            let mut state = self.state.lock();
            state.size = state.size.saturating_sub(1);
            state.size
        };
        tracing::debug!(id = handle.id(), size, "connection removed from pool");
        handle.close().await;
    }

    /// Return a checked-out handle to the pool. Runs from the checkout
    /// guard's `Drop`, so it must not suspend; closing happens on a spawned
    /// task.
    fn release(&self, handle: ConnectionHandle<K::Conn>) {
        let mut state = self.state.lock();
        if handle.conn().in_transaction() {
            // Returning it would leak transaction state to the next
            // borrower.
            state.size = state.size.saturating_sub(1);
            let size = state.size;
            drop(state);
            tracing::warn!(
                id = handle.id(),
                size,
                "connection returned with an open transaction, destroying it"
            );
            self.spawn_close(handle);
        } else if state.opened && handle.reusable() && state.size <= self.config.max_size {
            tracing::trace!(id = handle.id(), "connection returned to idle queue");
            state.idle.push_back(handle);
        } else {
            state.size = state.size.saturating_sub(1);
            drop(state);
            tracing::debug!(id = handle.id(), "connection not reusable on return, destroying it");
            self.spawn_close(handle);
        }
    }

    fn spawn_close(&self, handle: ConnectionHandle<K::Conn>) {
        let runtime = self.runtime.lock().clone();
        match runtime {
            Some(runtime) => {
                runtime.spawn(handle.close());
            }
            None => {
                // Only reachable when the pool never started; nothing can
                // drive the close future.
                tracing::warn!(id = handle.id(), "no runtime to close connection, dropping it");
            }
        }
    }
}

/// A bounded, self-healing pool of stateful connections.
///
/// The pool is cheap to clone; clones share the same state. It is created
/// CLOSED, opened with [`start`](Pool::start), and closed again with
/// [`stop`](Pool::stop). While open, [`checkout`](Pool::checkout) lends
/// connections out under a capacity semaphore, and a background monitor
/// sweeps idle connections on a fixed interval: destroying unhealthy or
/// surplus ones, renewing expired-but-reusable ones, and re-creating lost
/// ones back up to the configured minimum.
pub struct Pool<K: Connector> {
    inner: Arc<PoolInner<K>>,
}

impl<K: Connector> Clone for Pool<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Connector> Pool<K> {
    /// Create a pool over `connector` with the given configuration.
    ///
    /// The configuration is validated eagerly; a pool that constructs
    /// successfully never raises [`PoolError::Configuration`] at runtime.
    /// No connections are made until [`start`](Pool::start).
    pub fn new(connector: K, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let capacity = Arc::new(Semaphore::new(config.max_size));
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                connector,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    size: 0,
                    waiting: 0,
                    growing: false,
                    opened: false,
                    opening: false,
                }),
                capacity,
                sweep_gate: Semaphore::new(1),
                next_id: AtomicU64::new(1),
                worker: Mutex::new(None),
                runtime: Mutex::new(None),
            }),
        })
    }

    /// Open the pool: create exactly `min_size` connections concurrently,
    /// enqueue them, and spawn the monitor.
    ///
    /// # Errors
    ///
    /// [`PoolError::AlreadyStarted`] if the pool is already open, or
    /// [`PoolError::Connect`] if any of the initial connections fails (in
    /// which case the ones that did connect are closed again and the pool
    /// stays closed).
    pub async fn start(&self) -> Result<(), PoolError> {
        {
            let mut state = self.inner.state.lock();
            if state.opened || state.opening {
                tracing::error!("attempted to start an already opened pool");
                return Err(PoolError::AlreadyStarted);
            }
            state.opening = true;
        }

        tracing::info!(min_size = self.inner.config.min_size, "starting connection pool");
        // Captured before any connection can circulate; release-path closes
        // are spawned on this handle.
        *self.inner.runtime.lock() = Some(tokio::runtime::Handle::current());

        let result = self.populate().await;
        self.inner.state.lock().opening = false;
        if let Err(error) = result {
            *self.inner.runtime.lock() = None;
            return Err(error);
        }

        let monitor = Monitor::new(Arc::downgrade(&self.inner));
        let worker = Worker::spawn("pool-monitor", move |stop| monitor.run(stop));
        *self.inner.worker.lock() = Some(worker);

        tracing::info!(
            size = self.inner.config.min_size,
            "connection pool initialized"
        );
        Ok(())
    }

    /// Fan-out creation of the initial `min_size` connections, fan-in
    /// collection. All-or-nothing: on any failure the successes are closed.
    async fn populate(&self) -> Result<(), PoolError> {
        let creations = (0..self.inner.config.min_size).map(|_| self.inner.create_handle());
        let results = join_all(creations).await;

        let mut created = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(handle) => created.push(handle),
                Err(error) => failure = Some(error),
            }
        }

        if let Some(error) = failure {
            tracing::error!(%error, "error during pool initialization");
            join_all(created.into_iter().map(|h| self.inner.destroy(h))).await;
            return Err(error);
        }

        let mut state = self.inner.state.lock();
        state.idle.extend(created);
        state.opened = true;
        Ok(())
    }

    /// Borrow a connection from the pool.
    ///
    /// Waits first on the capacity semaphore and then for an idle handle,
    /// both against a single deadline of `conn_timeout` computed at entry
    /// and never reset. The returned guard re-queues the connection (or
    /// destroys it) on every exit path.
    ///
    /// # Errors
    ///
    /// [`PoolError::PoolClosed`] if the pool is not open, or
    /// [`PoolError::PoolTimeout`] once the deadline is exhausted.
    pub async fn checkout(&self) -> Result<PooledConnection<K>, PoolError> {
        let conn_timeout = self.inner.config.conn_timeout;
        let deadline = Instant::now() + conn_timeout;

        if !self.inner.is_open() {
            return Err(PoolError::PoolClosed);
        }

        let remaining = deadline.duration_since(Instant::now());
        let permit = match tokio::time::timeout(
            remaining,
            Arc::clone(&self.inner.capacity).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::PoolClosed),
            Err(_) => {
                tracing::debug!("timed out waiting for a capacity permit");
                return Err(PoolError::PoolTimeout(conn_timeout));
            }
        };
        let mut permit = Some(permit);

        {
            let mut state = self.inner.state.lock();
            state.waiting += 1;
            // Contention heuristic: more than grow_threshold concurrent
            // waiters signals the monitor to grow the pool by one.
            state.growing =
                state.waiting > self.inner.config.grow_threshold && state.size < self.inner.config.max_size;
        }
        // Decrements `waiting` on success, failure, and cancellation alike.
        let _waiting = WaitingGuard {
            inner: &self.inner,
        };

        loop {
            {
                let mut state = self.inner.state.lock();
                if !state.opened {
                    return Err(PoolError::PoolClosed);
                }
                if let Some(handle) = state.idle.pop_front() {
                    drop(state);
                    tracing::trace!(id = handle.id(), "checked out idle connection");
                    return Ok(PooledConnection {
                        inner: Arc::clone(&self.inner),
                        handle: Some(handle),
                        permit: permit.take(),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("timed out waiting for an idle connection");
                return Err(PoolError::PoolTimeout(conn_timeout));
            }
            let nap = retry_interval().min(deadline - now);
            tokio::time::sleep(nap).await;
        }
    }

    /// Close the pool: drain and close every idle connection, then stop the
    /// monitor and wait for it to finish.
    ///
    /// Checked-out connections are not interrupted; they are destroyed when
    /// their guards drop. A second call is rejected with
    /// [`PoolError::AlreadyClosed`] and closes nothing twice.
    pub async fn stop(&self) -> Result<(), PoolError> {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            if !state.opened {
                tracing::debug!("attempted to stop a pool that is not opened");
                return Err(PoolError::AlreadyClosed);
            }
            state.opened = false;
            state.growing = false;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.size -= drained.len();
            drained
        };

        tracing::info!("stopping connection pool");
        join_all(drained.into_iter().map(ConnectionHandle::close)).await;

        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            worker.finish().await;
        }
        // The runtime handle stays in place: guards still checked out must
        // be able to close their connections when they drop.
        tracing::info!("connection pool stopped");
        Ok(())
    }

    /// A point-in-time snapshot of the pool's counters.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            in_use: state.size.saturating_sub(state.idle.len()),
            size: state.size,
            max_size: self.inner.config.max_size,
        }
    }

    /// Whether the pool is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<PoolInner<K>> {
        &self.inner
    }
}

/// Randomized pause between idle-queue polls during checkout.
fn retry_interval() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(50u64..=200))
}

struct WaitingGuard<'a, K: Connector> {
    inner: &'a PoolInner<K>,
}

impl<K: Connector> Drop for WaitingGuard<'_, K> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.waiting = state.waiting.saturating_sub(1);
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub idle: usize,
    /// Number of connections currently checked out.
    pub in_use: usize,
    /// Total number of connections.
    pub size: usize,
    /// Maximum allowed connections.
    pub max_size: usize,
}

/// A connection checked out from the pool.
///
/// Dereferences to the underlying connection. On drop the connection is
/// returned to the pool, or destroyed if it is no longer reusable or still
/// holds an open transaction. The capacity permit travels with the guard
/// and is released exactly once, when the guard goes away.
pub struct PooledConnection<K: Connector> {
    inner: Arc<PoolInner<K>>,
    handle: Option<ConnectionHandle<K::Conn>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<K: Connector> PooledConnection<K> {
    fn handle(&self) -> &ConnectionHandle<K::Conn> {
        match &self.handle {
            Some(handle) => handle,
            // The slot is only emptied by drop() and detach(), both of
            // which consume the guard.
            None => unreachable!("checkout guard without a handle"),
        }
    }

    /// Identity of the pooled connection, stable across checkouts.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.handle().id()
    }

    /// Take the connection out of the pool permanently.
    ///
    /// The pool forgets the connection (its capacity slot frees up
    /// immediately) and the caller becomes responsible for closing it.
    #[must_use]
    pub fn detach(mut self) -> K::Conn {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => unreachable!("checkout guard without a handle"),
        };
        {
            let mut state = self.inner.state.lock();
            state.size = state.size.saturating_sub(1);
        }
        tracing::debug!(id = handle.id(), "connection detached from pool");
        handle.into_conn()
    }
}

impl<K: Connector> fmt::Debug for PooledConnection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

impl<K: Connector> Deref for PooledConnection<K> {
    type Target = K::Conn;

    fn deref(&self) -> &Self::Target {
        self.handle().conn()
    }
}

impl<K: Connector> DerefMut for PooledConnection<K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.handle {
            Some(handle) => handle.conn_mut(),
            None => unreachable!("checkout guard without a handle"),
        }
    }
}

impl<K: Connector> Drop for PooledConnection<K> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.inner.release(handle);
        }
        // The permit field drops after this, releasing capacity only once
        // the handle is back in the queue (or retired).
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_interval_bounds() {
        for _ in 0..100 {
            let nap = retry_interval();
            assert!(nap >= Duration::from_millis(50));
            assert!(nap <= Duration::from_millis(200));
        }
    }
}
