//! Error types for the direct-I/O engine.
//!
//! Resource and validation failures are synchronous: they come back as
//! [`EngineError`] from the call that triggered them. Completion-time
//! failures are asynchronous and reach only the callback bound to the
//! failed request, as a code plus a human-readable message.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Creating the kernel AIO context failed.
    #[error("failed to create kernel AIO queue: {0}")]
    QueueInit(#[source] io::Error),

    /// Opening the target file for direct I/O failed.
    #[error("failed to open {} for direct I/O: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reserving the completion event slots failed.
    #[error("failed to reserve {depth} completion event slots")]
    EventAlloc { depth: usize },

    /// A length was not a positive multiple of the direct-I/O alignment unit.
    #[error("length {len} is not a positive multiple of {alignment} bytes")]
    UnalignedLength { len: usize, alignment: usize },

    /// Allocating an aligned buffer failed.
    #[error("failed to allocate aligned buffer of {len} bytes")]
    BufferAlloc { len: usize },

    /// Repositioning the file during preallocation failed.
    #[error("seek failed during preallocation: {0}")]
    Seek(#[source] io::Error),

    /// Writing a preallocation block failed.
    #[error("write failed during preallocation: {0}")]
    PreallocWrite(#[source] io::Error),

    /// Querying the file size failed.
    #[error("failed to stat file: {0}")]
    Size(#[source] io::Error),

    /// The kernel rejected a submission for a reason other than a full queue.
    #[error("submission failed: {0}")]
    Submit(#[source] io::Error),

    /// The kernel queue stayed full past the configured retry budget.
    #[error(
        "submission still rejected after {retries} retries; \
         the queue depth ({queue_depth}) is likely too small for this workload"
    )]
    RetriesExhausted { retries: u32, queue_depth: usize },

    /// Waiting for completions failed.
    #[error("wait for completions failed: {0}")]
    Poll(#[source] io::Error),

    /// The completion poller still holds the run lock.
    #[error("completion poller is still running")]
    PollerActive,

    /// The engine was already closed.
    #[error("engine already closed")]
    Closed,

    /// Releasing the AIO context failed during teardown.
    #[error("failed to release kernel AIO queue: {0}")]
    QueueRelease(#[source] io::Error),

    /// Closing the file descriptor failed during teardown.
    #[error("failed to close file descriptor: {0}")]
    FileClose(#[source] io::Error),

    /// Both teardown steps failed; both are reported.
    #[error("teardown failed twice: {0}; {1}")]
    Teardown(Box<EngineError>, Box<EngineError>),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error value delivered to a completion callback.
///
/// `code` is the negative errno reported by the kernel for the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct CompletionError {
    pub code: i64,
    pub message: String,
}

/// Maps a negative completion result to a human-readable message.
///
/// `-ENOSYS` gets its own text: it means the running kernel has no native
/// AIO at all, which is worth distinguishing from a per-request failure.
pub fn completion_message(code: i64) -> String {
    if code == -(libc::ENOSYS as i64) {
        "AIO not supported by this kernel".to_string()
    } else {
        Errno::from_i32((-code) as i32).desc().to_string()
    }
}
