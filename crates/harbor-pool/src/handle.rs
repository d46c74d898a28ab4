//! Bookkeeping wrapper around one pooled connection.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::connection::Connection;

/// Maximum fraction shaved off `keep_alive` when drawing an expiry time.
///
/// Each handle expires 0–5% early so that handles created together do not
/// all come due in the same sweep.
const EXPIRY_JITTER_PC: f64 = 0.05;

/// One live connection plus the metadata the pool needs to manage it.
///
/// A handle owns its connection exclusively. It has no concurrency of its
/// own; only the pool's synchronized operations (and the monitor, under the
/// pool's lock) ever touch it.
pub struct ConnectionHandle<C: Connection> {
    id: u64,
    conn: C,
    created_at: Instant,
    expires_at: Instant,
    keep_alive: Duration,
    reuse_factor: u32,
}

impl<C: Connection> ConnectionHandle<C> {
    pub(crate) fn new(id: u64, conn: C, keep_alive: Duration, reuse_factor: u32) -> Self {
        let now = Instant::now();
        Self {
            id,
            conn,
            created_at: now,
            expires_at: now + jittered(keep_alive),
            keep_alive,
            reuse_factor,
        }
    }

    /// Identity of this handle within its pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn conn(&self) -> &C {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    pub(crate) fn into_conn(self) -> C {
        self.conn
    }

    /// Whether the connection's own probe reports it usable.
    pub(crate) fn healthy(&self) -> bool {
        self.conn.is_healthy()
    }

    /// Whether the handle may be lent out again.
    ///
    /// Healthy, still connected, and within the reuse slack window of
    /// `keep_alive * reuse_factor` past creation. The slack deliberately
    /// extends well beyond nominal expiry; an expired-but-reusable handle is
    /// renewed by the monitor rather than destroyed.
    pub(crate) fn reusable(&self) -> bool {
        let cutoff = self.created_at + self.keep_alive * self.reuse_factor;
        self.healthy() && self.conn.is_connected() && cutoff > Instant::now()
    }

    pub(crate) fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Push the expiry forward by another jittered `keep_alive`.
    pub(crate) fn renew_expires_at(&mut self) {
        self.expires_at = Instant::now() + jittered(self.keep_alive);
    }

    /// Close the underlying connection and retire the handle.
    ///
    /// The handle is consumed; a closed handle never re-enters the pool.
    pub(crate) async fn close(mut self) {
        let open_for = self.created_at.elapsed();
        if let Err(error) = self.conn.close().await {
            tracing::warn!(id = self.id, %error, "error closing connection");
        }
        tracing::debug!(id = self.id, ?open_for, "connection retired");
    }
}

/// `keep_alive` shortened by a random 0–5%.
fn jittered(keep_alive: Duration) -> Duration {
    let pc: f64 = rand::thread_rng().gen_range(-EXPIRY_JITTER_PC..0.0);
    keep_alive.mul_f64(1.0 + pc)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct StubConn {
        healthy: bool,
        connected: bool,
    }

    impl Connection for StubConn {
        type Error = std::convert::Infallible;

        fn is_healthy(&self) -> bool {
            self.healthy
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send {
            async { Ok(()) }
        }
    }

    fn handle(healthy: bool, connected: bool, keep_alive: Duration) -> ConnectionHandle<StubConn> {
        ConnectionHandle::new(1, StubConn { healthy, connected }, keep_alive, 4)
    }

    #[test]
    fn test_jitter_is_always_below_keep_alive() {
        let keep_alive = Duration::from_secs(900);
        for _ in 0..100 {
            let value = jittered(keep_alive);
            assert!(value < keep_alive);
            assert!(value >= keep_alive.mul_f64(1.0 - EXPIRY_JITTER_PC));
        }
    }

    #[test]
    fn test_new_handle_is_reusable_and_not_expired() {
        let handle = handle(true, true, Duration::from_secs(900));
        assert!(handle.reusable());
        assert!(!handle.expired());
    }

    #[test]
    fn test_unhealthy_or_disconnected_is_not_reusable() {
        assert!(!handle(false, true, Duration::from_secs(900)).reusable());
        assert!(!handle(true, false, Duration::from_secs(900)).reusable());
    }

    #[test]
    fn test_expired_handle_within_slack_is_still_reusable() {
        let keep_alive = Duration::from_millis(10);
        let handle = handle(true, true, keep_alive);
        std::thread::sleep(keep_alive * 2);
        // Past nominal expiry, but well inside keep_alive * 4 since creation.
        assert!(handle.expired());
        assert!(handle.reusable());
    }

    #[test]
    fn test_renew_pushes_expiry_forward() {
        let keep_alive = Duration::from_millis(10);
        let mut handle = handle(true, true, keep_alive);
        std::thread::sleep(keep_alive * 2);
        assert!(handle.expired());
        handle.renew_expires_at();
        assert!(!handle.expired());
    }

    #[test]
    fn test_handle_past_slack_window_is_not_reusable() {
        let keep_alive = Duration::from_millis(5);
        let handle = handle(true, true, keep_alive);
        std::thread::sleep(keep_alive * 5);
        assert!(!handle.reusable());
    }
}
