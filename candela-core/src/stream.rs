//! Handle abstraction for long-lived streaming session tasks.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Abstraction over a task handle that can be polled for completion and
/// force-cancelled. Split out so drop-time logic is testable under loom.
pub trait Abortable {
    /// Abort the underlying task if it is still running.
    fn abort(&mut self);
    /// Return `true` if the underlying task has completed.
    fn is_finished(&self) -> bool;
}

impl Abortable for JoinHandle<()> {
    fn abort(&mut self) {
        // JoinHandle::abort takes &self
        Self::abort(self);
    }

    fn is_finished(&self) -> bool {
        Self::is_finished(self)
    }
}

/// Abstraction over a one-shot graceful-stop signal.
pub trait Stoppable {
    /// Send a best-effort stop signal.
    fn send(self);
}

impl Stoppable for oneshot::Sender<()> {
    fn send(self) {
        let _ = Self::send(self, ());
    }
}

/// Drop-time logic for stream handles: signal a stop if one is available,
/// then abort the task if it has not finished.
pub fn drop_impl<H, S>(inner: &mut Option<H>, stop_tx: &mut Option<S>)
where
    H: Abortable,
    S: Stoppable,
{
    if let Some(tx) = stop_tx.take() {
        tx.send();
    }
    if let Some(mut h) = inner.take()
        && !h.is_finished()
    {
        h.abort();
    }
}

/// Handle to a spawned stream session.
///
/// Lifecycle contract:
/// - [`stop`](StreamHandle::stop) requests a graceful shutdown and awaits
///   completion; prefer it.
/// - [`abort`](StreamHandle::abort) cancels immediately.
/// - Dropping the handle sends a best-effort stop signal and then aborts;
///   the task may not observe the signal before the abort lands.
#[derive(Debug)]
pub struct StreamHandle {
    inner: Option<JoinHandle<()>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl StreamHandle {
    /// Wrap a session task together with its graceful-stop sender.
    #[must_use]
    pub const fn new(inner: JoinHandle<()>, stop_tx: oneshot::Sender<()>) -> Self {
        Self {
            inner: Some(inner),
            stop_tx: Some(stop_tx),
        }
    }

    /// Wrap a session task that supports no cooperative shutdown; stopping
    /// or dropping the handle force-cancels it.
    #[must_use]
    pub const fn new_abort_only(inner: JoinHandle<()>) -> Self {
        Self {
            inner: Some(inner),
            stop_tx: None,
        }
    }

    /// Request a graceful stop and await the session task. Task errors are
    /// ignored.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(inner) = self.inner.take() {
            let _ = inner.await;
        }
    }

    /// Cancel the session task without waiting.
    pub fn abort(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.abort();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        drop_impl(&mut self.inner, &mut self.stop_tx);
    }
}
