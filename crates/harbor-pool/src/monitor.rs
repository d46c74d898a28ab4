//! Periodic sweep over idle connections.

use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use tokio::sync::watch;

use crate::connection::Connector;
use crate::pool::PoolInner;

/// Background maintainer of the pool.
///
/// Holds a non-owning reference to the pool internals: the pool owns the
/// monitor's worker and stops it before tearing itself down, and a failed
/// upgrade simply ends the loop. Each tick drains a batch of idle handles,
/// destroys the unhealthy or surplus ones, renews the merely expired ones,
/// and then drives the pool size back toward its floor (or one step up when
/// checkout contention has flagged growth).
pub(crate) struct Monitor<K: Connector> {
    pool: Weak<PoolInner<K>>,
}

impl<K: Connector> Monitor<K> {
    pub(crate) fn new(pool: Weak<PoolInner<K>>) -> Self {
        Self { pool }
    }

    pub(crate) async fn run(self, mut stop: watch::Receiver<bool>) {
        tracing::info!("monitor started");
        loop {
            let Some(pool) = self.pool.upgrade() else {
                break;
            };
            if !pool.is_open() {
                break;
            }

            {
                // Sweep-in-flight gate; a sweep never overlaps another.
                let Ok(_permit) = pool.sweep_gate.acquire().await else {
                    break;
                };
                sweep(&pool).await;
            }

            let check_interval = pool.config.check_interval;
            drop(pool);

            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(check_interval) => {}
            }
        }
        tracing::info!("monitor stopped");
    }
}

async fn sweep<K: Connector>(pool: &Arc<PoolInner<K>>) {
    // The batch is drained up front, so a handle examined this tick can
    // never be popped again within the same tick after re-enqueueing.
    let batch: Vec<_> = {
        let mut state = pool.state.lock();
        let count = state.idle.len().min(pool.config.monitor_batch_size);
        state.idle.drain(..count).collect()
    };

    for mut handle in batch {
        let over_capacity = pool.state.lock().size > pool.config.max_size;
        if over_capacity {
            tracing::debug!(id = handle.id(), "pool size is above maximum, closing connection");
            pool.destroy(handle).await;
        } else if !handle.healthy() || !handle.reusable() {
            tracing::debug!(id = handle.id(), "connection is unhealthy, closing");
            pool.destroy(handle).await;
        } else if handle.expired() {
            tracing::debug!(id = handle.id(), "connection has expired, renewing");
            handle.renew_expires_at();
            // Admission re-checks that the pool is still open; close() may
            // have drained the queue while this handle was out of it.
            pool.admit(handle).await;
        } else {
            tracing::trace!(id = handle.id(), "reusing healthy connection");
            pool.admit(handle).await;
        }
    }

    let deficit = {
        let state = pool.state.lock();
        if state.opened {
            pool.config.min_size.saturating_sub(state.size)
        } else {
            0
        }
    };

    if deficit > 0 {
        // Self-healing floor. Failures are logged and retried next tick;
        // the sweep loop never dies over them.
        tracing::debug!(deficit, "pool size is below minimum, creating new connections");
        let results = join_all((0..deficit).map(|_| pool.create_handle())).await;
        for result in results {
            match result {
                Ok(handle) => pool.admit(handle).await,
                Err(error) => {
                    tracing::warn!(%error, "failed to create connection during self-healing");
                }
            }
        }
    } else {
        let grow = {
            let mut state = pool.state.lock();
            if state.growing && state.size < pool.config.max_size {
                state.growing = false;
                true
            } else {
                false
            }
        };
        if grow {
            // Single-step adaptive growth, never a burst.
            tracing::debug!("checkout contention detected, growing pool by one");
            match pool.create_handle().await {
                Ok(handle) => pool.admit(handle).await,
                Err(error) => {
                    tracing::warn!(%error, "failed to create connection while growing");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::harbor_testing::MockConnector;

    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::Pool;

    /// A pool with `count` idle handles, opened by hand so no monitor task
    /// competes with the direct sweep calls below.
    async fn opened(config: PoolConfig, count: usize) -> (Pool<MockConnector>, MockConnector) {
        let connector = MockConnector::new();
        let pool = Pool::new(connector.clone(), config).unwrap();
        for _ in 0..count {
            let handle = pool.inner().create_handle().await.unwrap();
            pool.inner().state.lock().idle.push_back(handle);
        }
        pool.inner().state.lock().opened = true;
        (pool, connector)
    }

    #[tokio::test]
    async fn test_sweep_retires_a_handle_when_the_pool_closed_under_it() {
        let (pool, connector) = opened(PoolConfig::new("mock://sweep"), 1).await;

        // The pool closes while the handle is still in flight through the
        // sweep, as when stop() lands between the drain and the re-enqueue.
        pool.inner().state.lock().opened = false;

        sweep(pool.inner()).await;

        let status = pool.status();
        assert_eq!(status.idle, 0, "a closed pool must not hold idle handles");
        assert_eq!(status.size, 0);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_one_sweep_destroys_heals_and_requeues_in_a_single_pass() {
        let config = PoolConfig::new("mock://sweep")
            .min_size(3)
            .max_size(5)
            .monitor_batch_size(10);
        let (pool, connector) = opened(config, 3).await;
        connector.control(1).set_healthy(false);

        sweep(pool.inner()).await;

        // One destroyed, the deficit healed, the healthy two requeued once.
        assert_eq!(connector.closes(), 1);
        assert_eq!(connector.connects(), 4);
        let status = pool.status();
        assert_eq!(status.idle, 3);
        assert_eq!(status.size, 3);
    }

    #[tokio::test]
    async fn test_sweep_examines_at_most_the_batch_size() {
        let config = PoolConfig::new("mock://sweep")
            .min_size(3)
            .max_size(5)
            .monitor_batch_size(2);
        let (pool, connector) = opened(config, 3).await;
        // Third in the queue, beyond this tick's batch.
        connector.control(2).set_healthy(false);

        sweep(pool.inner()).await;

        assert_eq!(connector.closes(), 0);
        assert_eq!(pool.status().idle, 3);
    }
}
