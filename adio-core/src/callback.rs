//! Completion callbacks.
//!
//! Every submitted request carries one callback handle; the poller delivers
//! exactly one of `on_success` / `on_error` to it and nothing afterwards.
//! Both methods consume the box, so a second delivery is unrepresentable.

use crate::error::CompletionError;

/// Per-request completion capability.
///
/// Implementations must be `Send`: the callback is invoked on the poller
/// thread, not on the thread that submitted the request.
pub trait AioCallback: Send {
    /// The request completed with a non-negative result.
    fn on_success(self: Box<Self>);

    /// The request completed with a negative result.
    ///
    /// `code` is the negative errno from the kernel; `message` is its
    /// human-readable description.
    fn on_error(self: Box<Self>, code: i64, message: String);
}

struct FnCallback<F>(F);

impl<F> AioCallback for FnCallback<F>
where
    F: FnOnce(std::result::Result<(), CompletionError>) + Send,
{
    fn on_success(self: Box<Self>) {
        (self.0)(Ok(()))
    }

    fn on_error(self: Box<Self>, code: i64, message: String) {
        (self.0)(Err(CompletionError { code, message }))
    }
}

/// Wraps a closure as a callback handle.
///
/// Handy when the caller only wants a single completion value rather than a
/// full trait implementation:
///
/// ```
/// let (tx, rx) = std::sync::mpsc::channel();
/// let cb = adio_core::callback::from_fn(move |outcome| {
///     let _ = tx.send(outcome);
/// });
/// # drop(cb);
/// # drop(rx);
/// ```
pub fn from_fn<F>(f: F) -> Box<dyn AioCallback>
where
    F: FnOnce(std::result::Result<(), CompletionError>) + Send + 'static,
{
    Box::new(FnCallback(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_from_fn_success() {
        let (tx, rx) = mpsc::channel();
        let cb = from_fn(move |outcome| tx.send(outcome).unwrap());
        cb.on_success();
        assert_eq!(rx.recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_from_fn_error_carries_code_and_message() {
        let (tx, rx) = mpsc::channel();
        let cb = from_fn(move |outcome| tx.send(outcome).unwrap());
        cb.on_error(-5, "I/O error".to_string());

        let err = rx.recv().unwrap().unwrap_err();
        assert_eq!(err.code, -5);
        assert_eq!(err.message, "I/O error");
    }
}
