//! Capability contract between the pool and the connections it manages.
//!
//! The pool is agnostic about what a connection does on the wire. It only
//! needs to create one, close one, and ask two cheap questions: "are you
//! healthy?" and "are you in the middle of a transaction?". Everything else
//! (query execution, parameter binding, result parsing) belongs to the
//! connection's own API, which the pool hands back to callers untouched.

use std::future::Future;

/// A stateful connection that can live inside the pool.
///
/// `is_healthy`, `is_connected` and `in_transaction` must be non-blocking
/// probes of locally cached state; they are called from synchronous contexts
/// such as the checkout guard's `Drop`.
pub trait Connection: Send + 'static {
    /// Error type raised when closing the connection.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether the connection is believed to be usable.
    fn is_healthy(&self) -> bool;

    /// Whether the underlying transport is still established.
    fn is_connected(&self) -> bool;

    /// Whether the connection currently holds an open transaction.
    ///
    /// A connection returned to the pool with an open transaction would leak
    /// transactional state to the next borrower, so the pool destroys it
    /// instead. Connections without transaction semantics can keep the
    /// default.
    fn in_transaction(&self) -> bool {
        false
    }

    /// Close the connection, releasing its resources.
    ///
    /// The returned future must be `Send`: the pool closes retired
    /// connections on background tasks.
    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Factory producing live connections from the pool's opaque URI.
pub trait Connector: Send + Sync + 'static {
    /// The connection type this connector produces.
    type Conn: Connection;

    /// Error type raised when establishing a connection.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish a new live connection to `uri`.
    ///
    /// The URI is forwarded verbatim from [`PoolConfig::uri`]; the pool
    /// attaches no meaning to it.
    ///
    /// [`PoolConfig::uri`]: crate::PoolConfig::uri
    fn connect(&self, uri: &str) -> impl Future<Output = Result<Self::Conn, Self::Error>> + Send;
}
