//! Supervision of background pool tasks.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long `finish()` waits for a task to observe its stop signal before
/// aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A supervised background task with cooperative shutdown.
///
/// The task receives a [`watch::Receiver`] that flips to `true` when the
/// worker is asked to finish; it is expected to observe the signal between
/// units of work and exit on its own. [`Worker::finish`] never interrupts
/// the task mid-unit within the grace window, so a monitor sweep is never
/// cut off while it holds partially-mutated pool state.
pub(crate) struct Worker {
    name: &'static str,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Worker {
    /// Spawn `make`'s future on the current runtime under supervision.
    pub(crate) fn spawn<F, Fut>(name: &'static str, make: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, stop_rx) = watch::channel(false);
        tracing::debug!(worker = name, "worker starting");
        let task = tokio::spawn(make(stop_rx));
        Self { name, stop, task }
    }

    /// Signal the task to stop and wait (bounded) for it to exit.
    pub(crate) async fn finish(mut self) {
        tracing::debug!(worker = self.name, "worker finishing");
        let _ = self.stop.send(true);
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await {
            Ok(Ok(())) => tracing::debug!(worker = self.name, "worker finished"),
            Ok(Err(error)) => {
                tracing::warn!(worker = self.name, %error, "worker task failed");
            }
            Err(_) => {
                tracing::warn!(worker = self.name, "worker did not stop in time, aborting");
                self.task.abort();
            }
        }
    }
}
