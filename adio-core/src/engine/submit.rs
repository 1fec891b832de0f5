//! Request submission with bounded retry under backpressure.
//!
//! The kernel queue has a hard capacity; a full queue comes back as
//! `EAGAIN`. Rather than fail fast on transient pressure or block the
//! caller forever, submission sleeps and retries, escalating to a logged
//! warning and finally to an error naming the likely misconfiguration.

use std::io;
use std::thread;

use crate::aio::sys;
use crate::callback::AioCallback;
use crate::engine::request::{InFlight, STOP_TOKEN};
use crate::engine::{EngineConfig, FileEngine, OpKind};
use crate::error::{EngineError, Result};

impl FileEngine {
    /// Submits a request against the file.
    ///
    /// The call returns once the request is queued in the kernel; the
    /// outcome reaches `callback` later, on the poller thread. A full
    /// queue is retried per the engine configuration; any other kernel
    /// rejection fails immediately and the callback never fires.
    ///
    /// # Safety
    ///
    /// `buf` must point to at least `len` bytes, aligned for direct I/O
    /// ([`crate::buffer::ALIGNMENT`]), and must stay valid until the
    /// completion has been delivered to `callback`.
    pub unsafe fn submit(
        &self,
        kind: OpKind,
        position: u64,
        len: usize,
        buf: *mut u8,
        callback: Box<dyn AioCallback>,
    ) -> Result<()> {
        self.ensure_open()?;

        let id = self.arena.register(InFlight {
            kind,
            offset: position,
            len,
            callback,
        });

        let mut cb = match kind {
            OpKind::Read => sys::prep_pread(self.fd, buf, len, position, id),
            OpKind::Write => sys::prep_pwrite(self.fd, buf, len, position, id),
        };

        let result = submit_with_retry(&self.config, self.queue.depth(), || unsafe {
            self.queue.submit(&mut cb)
        });
        if result.is_err() {
            // Synchronous failure: withdraw the entry so the callback is
            // dropped undelivered rather than leaked.
            let _ = self.arena.take(id);
        }
        result
    }

    /// Submits a read of `len` bytes at `position` into `buf`.
    ///
    /// # Safety
    ///
    /// See [`submit`](Self::submit).
    pub unsafe fn read(
        &self,
        position: u64,
        len: usize,
        buf: *mut u8,
        callback: Box<dyn AioCallback>,
    ) -> Result<()> {
        unsafe { self.submit(OpKind::Read, position, len, buf, callback) }
    }

    /// Submits a write of `len` bytes from `buf` at `position`.
    ///
    /// # Safety
    ///
    /// See [`submit`](Self::submit).
    pub unsafe fn write(
        &self,
        position: u64,
        len: usize,
        buf: *const u8,
        callback: Box<dyn AioCallback>,
    ) -> Result<()> {
        unsafe { self.submit(OpKind::Write, position, len, buf as *mut u8, callback) }
    }

    /// Submits the stop sentinel: a zero-length write tagged with the
    /// reserved token, pushed through the same retry-guarded path as real
    /// requests so it sees the same backpressure handling.
    pub(crate) fn submit_sentinel(&self) -> Result<()> {
        let mut cb = sys::prep_pwrite(self.fd, std::ptr::null_mut(), 0, 0, STOP_TOKEN);
        submit_with_retry(&self.config, self.queue.depth(), || unsafe {
            self.queue.submit(&mut cb)
        })
    }
}

/// Runs `attempt` until it succeeds, the error is not `EAGAIN`, or the
/// retry budget is spent.
///
/// Generic over the enqueue attempt so the policy is testable without a
/// kernel queue behind it.
pub(crate) fn submit_with_retry<F>(
    config: &EngineConfig,
    queue_depth: usize,
    mut attempt: F,
) -> Result<()>
where
    F: FnMut() -> io::Result<()>,
{
    let mut tries: u32 = 0;
    loop {
        match attempt() {
            Ok(()) => return Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::EAGAIN) => {
                tries += 1;
                if tries > config.max_retries {
                    return Err(EngineError::RetriesExhausted {
                        retries: config.max_retries,
                        queue_depth,
                    });
                }
                if tries > config.warn_retries {
                    tracing::warn!(
                        tries,
                        queue_depth,
                        "kernel AIO queue saturated; consider raising the queue depth"
                    );
                }
                thread::sleep(config.retry_delay);
            }
            Err(err) => return Err(EngineError::Submit(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quick_config(warn_retries: u32, max_retries: u32) -> EngineConfig {
        EngineConfig {
            queue_depth: 4,
            retry_delay: Duration::ZERO,
            warn_retries,
            max_retries,
        }
    }

    fn eagain() -> io::Error {
        io::Error::from_raw_os_error(libc::EAGAIN)
    }

    #[test]
    fn test_first_attempt_succeeds() {
        let mut attempts = 0;
        let result = submit_with_retry(&quick_config(0, 500), 4, || {
            attempts += 1;
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_full_queue_is_retried_until_it_drains() {
        let mut attempts = 0;
        let result = submit_with_retry(&quick_config(0, 500), 4, || {
            attempts += 1;
            if attempts <= 3 {
                Err(eagain())
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(attempts, 4);
    }

    #[test]
    fn test_retry_budget_exhaustion() {
        let mut attempts = 0;
        let result = submit_with_retry(&quick_config(0, 5), 4, || {
            attempts += 1;
            Err(eagain())
        });
        match result {
            Err(EngineError::RetriesExhausted {
                retries,
                queue_depth,
            }) => {
                assert_eq!(retries, 5);
                assert_eq!(queue_depth, 4);
            }
            other => panic!("expected RetriesExhausted, got {:?}", other.err()),
        }
        // The initial attempt plus the full retry budget.
        assert_eq!(attempts, 6);
    }

    #[test]
    fn test_non_retryable_error_fails_fast() {
        let mut attempts = 0;
        let result = submit_with_retry(&quick_config(0, 500), 4, || {
            attempts += 1;
            Err(io::Error::from_raw_os_error(libc::EINVAL))
        });
        assert!(matches!(result, Err(EngineError::Submit(_))));
        assert_eq!(attempts, 1);
    }
}
