//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Boxed source error raised by a connector during connection creation.
pub type ConnectError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during pool operations.
///
/// Pool errors are deliberately distinct from whatever error type the
/// underlying connection uses for its own protocol; the only place the two
/// meet is [`PoolError::Connect`], which wraps a creation failure reported
/// by the connector.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Checkout attempted while the pool is not open.
    #[error("pool is closed")]
    PoolClosed,

    /// No handle could be obtained within the connection timeout.
    #[error("timed out after {0:?} waiting for a connection")]
    PoolTimeout(Duration),

    /// `start()` called on a pool that is already open.
    #[error("pool is already started")]
    AlreadyStarted,

    /// `stop()` called on a pool that is not open.
    #[error("pool is already closed")]
    AlreadyClosed,

    /// Invalid pool configuration, raised eagerly at construction.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// The connector failed while creating a connection.
    #[error("failed to create connection: {0}")]
    Connect(#[source] ConnectError),

    /// The blocking adapter failed to build its runtime.
    #[error("runtime error: {0}")]
    Runtime(#[source] std::io::Error),
}
