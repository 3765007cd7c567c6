use crate::error::{ErrorKind, Result};
use futures::channel::oneshot;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Completion handle for a submitted job.
///
/// Await it from async code, or call [`wait()`](Self::wait) from a plain
/// thread. Dropping the handle does not cancel the job.
#[derive(Debug)]
#[must_use = "dropping a JobHandle discards the job's result"]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T>>) -> Self {
        Self { rx }
    }

    /// Block the current thread until the job finishes.
    ///
    /// Don't call this from inside an async runtime's worker thread; await
    /// the handle instead.
    pub fn wait(self) -> Result<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(exn::Exn::from(ErrorKind::Dropped))),
            Poll::Pending => Poll::Pending,
        }
    }
}
