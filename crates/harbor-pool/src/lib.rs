//! # harbor-pool
//!
//! Self-healing connection pool for stateful network services.
//!
//! The pool creates, lends, reclaims, health-checks, expires, and re-creates
//! a bounded set of connections under concurrent demand, independent of what
//! a "connection" actually does on the wire. Bring any transport that can
//! satisfy the small [`Connection`]/[`Connector`] contract — connect, close,
//! and a pair of non-blocking probes — and the pool handles the rest.
//!
//! ## Features
//!
//! - Bounded capacity: checkouts are gated by a semaphore sized to `max_size`
//! - Scoped checkout: a guard returns (or destroys) the connection on every
//!   exit path, including cancellation
//! - Background monitor: health checks, jittered expiry renewal, shrink back
//!   to capacity, and self-healing growth back to `min_size`
//! - Adaptive growth: sustained checkout contention grows the pool one
//!   connection at a time
//! - Transaction hygiene: a connection returned mid-transaction is destroyed,
//!   never lent out again
//! - One algorithm, two surfaces: the async [`Pool`] and the thread-based
//!   [`blocking::Pool`] adapter
//!
//! ## Example
//!
//! ```rust,ignore
//! use harbor_pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new("db://localhost:5432/app")
//!     .min_size(3)
//!     .max_size(10)
//!     .conn_timeout(Duration::from_secs(10));
//!
//! let pool = Pool::new(MyConnector, config)?;
//! pool.start().await?;
//!
//! {
//!     let conn = pool.checkout().await?;
//!     // Use the connection...
//! } // Returned to the pool here.
//!
//! pool.stop().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod blocking;
pub mod config;
pub mod connection;
pub mod error;
pub mod handle;
pub mod pool;

mod monitor;
mod worker;

// Unit tests cannot use the harbor-testing crate directly: it links against
// the separately compiled harbor-pool library, so its `MockConnector` would
// implement a `Connector` trait distinct from this test build's. Including
// its source as a module makes the mock implement the local trait; the
// `extern crate self` alias lets its `use harbor_pool::...` imports resolve.
#[cfg(test)]
extern crate self as harbor_pool;

#[cfg(test)]
#[path = "../../harbor-testing/src/lib.rs"]
#[allow(missing_docs)]
mod harbor_testing;

pub use config::PoolConfig;
pub use connection::{Connection, Connector};
pub use error::PoolError;
pub use handle::ConnectionHandle;
pub use pool::{Pool, PoolStatus, PooledConnection};
