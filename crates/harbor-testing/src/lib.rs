//! # harbor-testing
//!
//! Test infrastructure for harbor pool development.
//!
//! Provides an in-memory [`MockConnector`]/[`MockConnection`] pair
//! implementing the pool's capability contract, with failure injection,
//! per-connection health and transaction toggles, and connect/close
//! counters. No network involved; connection state is plain atomics so
//! tests can flip it while a connection sits in the pool.
//!
//! ## Example
//!
//! ```rust,ignore
//! let connector = MockConnector::new();
//! let pool = Pool::new(connector.clone(), PoolConfig::new("mock://db"))?;
//! pool.start().await?;
//!
//! connector.control(0).set_healthy(false); // fail the first connection
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use harbor_pool::{Connection, Connector};

/// Error raised by [`MockConnector`] when failure injection is armed.
#[derive(Debug, Error)]
#[error("mock connect refused: {0}")]
pub struct MockConnectError(pub String);

/// Error raised by [`MockConnection::close`]. Never actually produced; the
/// mock close always succeeds.
#[derive(Debug, Error)]
#[error("mock close failed")]
pub struct MockCloseError;

#[derive(Default)]
struct ConnState {
    healthy: AtomicBool,
    connected: AtomicBool,
    in_transaction: AtomicBool,
    closed: AtomicBool,
}

struct Shared {
    connects: AtomicUsize,
    closes: AtomicUsize,
    fail_all: AtomicBool,
    fail_next: AtomicUsize,
    connect_delay: Mutex<Duration>,
    uris: Mutex<Vec<String>>,
    controls: Mutex<Vec<MockControl>>,
}

/// A live mock connection produced by [`MockConnector`].
pub struct MockConnection {
    state: Arc<ConnState>,
    shared: Arc<Shared>,
}

impl Connection for MockConnection {
    type Error = MockCloseError;

    fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn in_transaction(&self) -> bool {
        self.state.in_transaction.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.state.connected.store(false, Ordering::SeqCst);
        let first_close = !self.state.closed.swap(true, Ordering::SeqCst);
        if first_close {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
        async { Ok(()) }
    }
}

/// Remote control over one mock connection, usable while the connection is
/// owned by the pool.
#[derive(Clone)]
pub struct MockControl {
    state: Arc<ConnState>,
}

impl MockControl {
    /// Flip the health probe.
    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Flip the open-transaction probe.
    pub fn set_in_transaction(&self, in_transaction: bool) {
        self.state.in_transaction.store(in_transaction, Ordering::SeqCst);
    }

    /// Sever the simulated transport.
    pub fn disconnect(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
    }

    /// Whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

/// Connector producing [`MockConnection`]s.
///
/// Clones share the same counters and failure settings.
#[derive(Clone)]
pub struct MockConnector {
    shared: Arc<Shared>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Create a connector whose connections start healthy and connected.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                fail_all: AtomicBool::new(false),
                fail_next: AtomicUsize::new(0),
                connect_delay: Mutex::new(Duration::ZERO),
                uris: Mutex::new(Vec::new()),
                controls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Refuse every connection attempt until called again with `false`.
    pub fn fail_connects(&self, fail: bool) {
        self.shared.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Refuse exactly the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.shared.fail_next.store(count, Ordering::SeqCst);
    }

    /// Delay every successful connection attempt by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.shared.connect_delay.lock() = delay;
    }

    /// Total connection attempts, including refused ones.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Total connections closed so far.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// URIs seen by successful connection attempts, in order.
    #[must_use]
    pub fn uris(&self) -> Vec<String> {
        self.shared.uris.lock().clone()
    }

    /// Control handle for the `index`-th connection ever created.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `index + 1` connections have been created.
    #[must_use]
    #[allow(clippy::panic)]
    pub fn control(&self, index: usize) -> MockControl {
        let controls = self.shared.controls.lock();
        match controls.get(index) {
            Some(control) => control.clone(),
            None => panic!(
                "no mock connection {index}; only {} were created",
                controls.len()
            ),
        }
    }

    /// Control handles for every connection created so far.
    #[must_use]
    pub fn controls(&self) -> Vec<MockControl> {
        self.shared.controls.lock().clone()
    }
}

impl Connector for MockConnector {
    type Conn = MockConnection;
    type Error = MockConnectError;

    fn connect(&self, uri: &str) -> impl Future<Output = Result<Self::Conn, Self::Error>> + Send {
        let shared = Arc::clone(&self.shared);
        let uri = uri.to_string();
        async move {
            shared.connects.fetch_add(1, Ordering::SeqCst);

            if shared.fail_all.load(Ordering::SeqCst) {
                return Err(MockConnectError("connection refused".into()));
            }
            if shared
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(MockConnectError("transient connect failure".into()));
            }

            let delay = *shared.connect_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let state = Arc::new(ConnState {
                healthy: AtomicBool::new(true),
                connected: AtomicBool::new(true),
                in_transaction: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            });
            shared.uris.lock().push(uri);
            shared.controls.lock().push(MockControl {
                state: Arc::clone(&state),
            });
            Ok(MockConnection { state, shared })
        }
    }
}
