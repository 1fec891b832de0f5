//! In-flight request tracking.
//!
//! Each submitted request is parked in an arena keyed by a monotonically
//! increasing id; the id rides along as the kernel's opaque `aio_data` and
//! comes back in the completion event. The submitter inserts, the poller
//! removes: one ownership transfer, one dispatch, never two.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::callback::AioCallback;

/// Reserved `aio_data` token marking the stop sentinel.
///
/// Never handed out by the arena, so a sentinel completion can always be
/// told apart from a real request.
pub(crate) const STOP_TOKEN: u64 = u64::MAX;

/// Kind of file operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Read from the file into the caller's buffer.
    Read,

    /// Write the caller's buffer to the file.
    Write,
}

/// A request handed to the kernel and awaiting completion.
pub(crate) struct InFlight {
    pub kind: OpKind,
    pub offset: u64,
    pub len: usize,
    pub callback: Box<dyn AioCallback>,
}

// Safety: arena entries are only ever moved in (register) and moved out
// (take); no shared reference to one crosses a thread boundary, so the
// callback's lack of Sync is never observable.
unsafe impl Sync for InFlight {}

/// Arena of in-flight requests.
pub(crate) struct RequestArena {
    entries: DashMap<u64, InFlight>,
    next_id: AtomicU64,
}

impl RequestArena {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
            // Ids start at 1; 0 is never a valid key and STOP_TOKEN is
            // unreachable for any realistic request count.
            next_id: AtomicU64::new(1),
        }
    }

    /// Parks a request and returns the id to hand to the kernel.
    pub(crate) fn register(&self, request: InFlight) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, request);
        id
    }

    /// Removes and returns the request for `id`, if still parked.
    pub(crate) fn take(&self, id: u64) -> Option<InFlight> {
        self.entries.remove(&id).map(|(_, request)| request)
    }

    /// Number of requests currently awaiting completion.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::from_fn;

    fn dummy(kind: OpKind) -> InFlight {
        InFlight {
            kind,
            offset: 0,
            len: 512,
            callback: from_fn(|_| {}),
        }
    }

    #[test]
    fn test_ids_are_monotonic_and_nonzero() {
        let arena = RequestArena::new();
        let a = arena.register(dummy(OpKind::Write));
        let b = arena.register(dummy(OpKind::Read));
        assert!(a >= 1);
        assert!(b > a);
        assert_ne!(a, STOP_TOKEN);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_take_is_single_shot() {
        let arena = RequestArena::new();
        let id = arena.register(dummy(OpKind::Read));

        let taken = arena.take(id).unwrap();
        assert_eq!(taken.kind, OpKind::Read);
        assert_eq!(taken.len, 512);

        // A second take for the same id finds nothing: a completion can
        // never be dispatched twice.
        assert!(arena.take(id).is_none());
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn test_take_unknown_id() {
        let arena = RequestArena::new();
        assert!(arena.take(7).is_none());
    }
}
