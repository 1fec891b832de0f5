//! adio-core — asynchronous direct-I/O file engine.
//!
//! Submits read and write requests against one `O_DIRECT` descriptor to
//! the Linux kernel AIO facility, tracks in-flight requests, and delivers
//! every completion exactly once to its callback from a dedicated polling
//! loop. Linux-only.
//!
//! The usual shape of a session:
//!
//! 1. [`FileEngine::open`] the file with a queue depth;
//! 2. [`spawn_poller`] one thread for the completion loop;
//! 3. submit requests with [`FileEngine::read`] / [`FileEngine::write`]
//!    against caller-owned [`AlignedBuf`] buffers;
//! 4. [`FileEngine::request_stop`], then [`FileEngine::close`].

/// Linux kernel AIO layer
mod aio;

/// Aligned buffer allocation for direct I/O
pub mod buffer;

/// Per-request completion callbacks
pub mod callback;

/// The file engine: open/close, submission, completion polling
pub mod engine;

/// Synchronous error taxonomy and completion-error mapping
pub mod error;

/// Future adapter over the callback capability
#[cfg(feature = "async")]
pub mod future;

pub use buffer::{AlignedBuf, ALIGNMENT};
pub use callback::AioCallback;
pub use engine::{spawn_poller, EngineConfig, FileEngine, OpKind, PollerHandle};
pub use error::{completion_message, CompletionError, EngineError, Result};

#[cfg(feature = "async")]
pub use future::IoFuture;
