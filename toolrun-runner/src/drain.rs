//! Cancellable drain workers.
//!
//! A drain runs a read-to-completion action on its own tokio task and hands
//! back a [`DrainHandle`]. The coordinating task later calls
//! [`DrainHandle::wait`] to collect the result, or [`DrainHandle::cancel`] to
//! abort the worker and block until it has actually stopped. A handle that is
//! dropped before completion aborts its worker, so no read is ever left
//! running on a pipe the launcher is about to close.

use std::future::Future;
use std::io;

use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use toolrun_core::{StreamKind, ToolrunError};
use tracing::debug;

/// Why a drain worker produced no value
#[derive(Debug, Error)]
pub enum DrainError {
    /// The action itself failed while reading or writing.
    #[error(transparent)]
    Io(io::Error),
    /// The worker panicked, was cancelled, or its result was already taken.
    #[error("{0}")]
    Aborted(String),
}

/// A failed drain, tagged with the stream it was reading
#[derive(Debug, Error)]
#[error("{stream} drain failed: {error}")]
pub struct DrainFailure {
    pub stream: StreamKind,
    pub error: DrainError,
}

/// Wait handle for one drain worker
pub struct DrainHandle<T> {
    stream: StreamKind,
    handle: JoinHandle<io::Result<T>>,
    finished: bool,
}

/// Start `action` on an independent worker and return immediately.
pub fn drain<F, T>(stream: StreamKind, action: F) -> DrainHandle<T>
where
    F: Future<Output = io::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    debug!(%stream, "starting drain worker");
    DrainHandle {
        stream,
        handle: tokio::spawn(action),
        finished: false,
    }
}

impl<T> DrainHandle<T> {
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub fn is_finished(&self) -> bool {
        self.finished || self.handle.is_finished()
    }

    /// Suspend until the action finishes and return its result or failure.
    pub async fn wait(&mut self) -> Result<T, DrainError> {
        if self.finished {
            return Err(DrainError::Aborted("drain result already taken".to_string()));
        }
        let joined = (&mut self.handle).await;
        self.finished = true;
        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(DrainError::Io(err)),
            Err(err) => Err(DrainError::from(err)),
        }
    }

    /// Abort the worker and suspend until its future has been dropped.
    pub async fn cancel(mut self) {
        if self.finished {
            return;
        }
        debug!(stream = %self.stream, "cancelling drain worker");
        self.handle.abort();
        // Resolves only after the task has stopped, whether it was cancelled
        // or had already completed.
        let _ = (&mut self.handle).await;
        self.finished = true;
    }
}

impl<T> Drop for DrainHandle<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.handle.abort();
        }
    }
}

/// Wait on two drains concurrently.
///
/// Whichever worker finishes first is inspected first. If it failed, the
/// sibling is cancelled and confirmed stopped before the failure is returned.
pub async fn join_pair<A, B>(
    mut first: DrainHandle<A>,
    mut second: DrainHandle<B>,
) -> Result<(A, B), DrainFailure> {
    tokio::select! {
        res = first.wait() => {
            let a = match res {
                Ok(a) => a,
                Err(error) => {
                    let stream = first.stream();
                    second.cancel().await;
                    return Err(DrainFailure { stream, error });
                }
            };
            let b = second.wait().await.map_err(|error| DrainFailure {
                stream: second.stream(),
                error,
            })?;
            Ok((a, b))
        }
        res = second.wait() => {
            let b = match res {
                Ok(b) => b,
                Err(error) => {
                    let stream = second.stream();
                    first.cancel().await;
                    return Err(DrainFailure { stream, error });
                }
            };
            let a = first.wait().await.map_err(|error| DrainFailure {
                stream: first.stream(),
                error,
            })?;
            Ok((a, b))
        }
    }
}

impl DrainFailure {
    /// Attach the invocation that owned the drained stream.
    pub fn into_error(self, executable: &str, args: &[String]) -> ToolrunError {
        match self.error {
            DrainError::Io(source) => ToolrunError::StreamIo {
                executable: executable.to_string(),
                args: args.to_vec(),
                stream: self.stream,
                source,
            },
            DrainError::Aborted(reason) => ToolrunError::DrainAborted {
                executable: executable.to_string(),
                args: args.to_vec(),
                stream: self.stream,
                reason,
            },
        }
    }
}

impl From<JoinError> for DrainError {
    fn from(err: JoinError) -> Self {
        if err.is_panic() {
            DrainError::Aborted("drain worker panicked".to_string())
        } else {
            DrainError::Aborted("drain worker cancelled".to_string())
        }
    }
}
