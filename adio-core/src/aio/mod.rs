//! Linux kernel AIO layer.
//!
//! Thin wrappers over the native AIO syscalls (`io_setup`, `io_submit`,
//! `io_getevents`, `io_destroy`) plus the queue resource that owns one
//! kernel context for its whole lifetime.

mod queue;
pub(crate) mod sys;

pub(crate) use queue::AioQueue;
