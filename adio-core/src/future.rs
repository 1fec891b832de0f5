//! Future adapter over the callback capability.
//!
//! Completes a oneshot channel from the per-request callback so callers
//! can `.await` a submission instead of implementing [`AioCallback`]. A
//! poller must still be running somewhere (see
//! [`spawn_poller`](crate::engine::spawn_poller)); the future resolves
//! when that loop dispatches the completion. There is no per-request
//! cancellation: dropping the future does not recall the kernel request.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::callback::AioCallback;
use crate::engine::{FileEngine, OpKind};
use crate::error::{CompletionError, Result};

type Outcome = std::result::Result<(), CompletionError>;

struct OneshotCallback(oneshot::Sender<Outcome>);

impl AioCallback for OneshotCallback {
    fn on_success(self: Box<Self>) {
        let _ = self.0.send(Ok(()));
    }

    fn on_error(self: Box<Self>, code: i64, message: String) {
        let _ = self.0.send(Err(CompletionError { code, message }));
    }
}

/// Resolves when the submitted request completes.
pub struct IoFuture {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for IoFuture {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The callback was dropped undelivered: the engine went away
            // with the request still parked.
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(CompletionError {
                code: -(libc::ECANCELED as i64),
                message: "engine dropped before completion".to_string(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FileEngine {
    /// Submits a read and returns a future for its completion.
    ///
    /// # Safety
    ///
    /// See [`submit`](Self::submit): `buf` must stay valid and aligned
    /// until the returned future resolves.
    pub unsafe fn read_async(&self, position: u64, len: usize, buf: *mut u8) -> Result<IoFuture> {
        let (tx, rx) = oneshot::channel();
        unsafe { self.submit(OpKind::Read, position, len, buf, Box::new(OneshotCallback(tx))) }?;
        Ok(IoFuture { rx })
    }

    /// Submits a write and returns a future for its completion.
    ///
    /// # Safety
    ///
    /// See [`submit`](Self::submit): `buf` must stay valid and aligned
    /// until the returned future resolves.
    pub unsafe fn write_async(
        &self,
        position: u64,
        len: usize,
        buf: *const u8,
    ) -> Result<IoFuture> {
        let (tx, rx) = oneshot::channel();
        unsafe {
            self.submit(
                OpKind::Write,
                position,
                len,
                buf as *mut u8,
                Box::new(OneshotCallback(tx)),
            )
        }?;
        Ok(IoFuture { rx })
    }
}
