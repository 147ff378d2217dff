//! Multiplexed-connection manager.
//!
//! One secured transport carries many logical streams. The manager hands
//! out [`MuxStream`]s with client-initiated ids (odd, increasing by 2),
//! tracks how many are open, and notifies its owner when it closes so the
//! per-destination table can drop the key. Frame-level multiplexing is the
//! protocol layer's job, not this crate's: streams move bytes through the
//! shared transport as-is.
//!
//! The manager is context-confined: it is only created and touched from
//! code scheduled on the owning affinity context, so shared state is
//! `Rc<RefCell>` rather than locked.

use std::cell::RefCell;
use std::rc::Rc;
use std::task::{Context, Poll};

use wireline::{BoxTransport, BufList, Sink, Source, StreamError};

use crate::error::HttpError;
use crate::metrics;

struct MuxState {
    transport: BoxTransport,
    /// Next client-initiated stream id. Starts at 1, always odd.
    next_stream_id: u32,
    open_streams: usize,
    alive: bool,
    on_close: Vec<Box<dyn FnOnce()>>,
}

/// Shared handle to one multiplexed transport.
#[derive(Clone)]
pub struct MuxManager {
    shared: Rc<RefCell<MuxState>>,
}

impl MuxManager {
    /// Take ownership of a secured transport and manage streams over it.
    pub fn new(transport: BoxTransport) -> Self {
        metrics::MANAGERS_LIVE.increment();
        MuxManager {
            shared: Rc::new(RefCell::new(MuxState {
                transport,
                next_stream_id: 1,
                open_streams: 0,
                alive: true,
                on_close: Vec::new(),
            })),
        }
    }

    /// Open a new logical stream. Fails with
    /// [`HttpError::ConnectionClosed`] once the manager is closed.
    pub fn open_stream(&self) -> Result<MuxStream, HttpError> {
        let mut state = self.shared.borrow_mut();
        if !state.alive {
            return Err(HttpError::ConnectionClosed);
        }
        let id = state.next_stream_id;
        state.next_stream_id += 2;
        state.open_streams += 1;
        metrics::STREAMS_OPENED.increment();
        Ok(MuxStream {
            id,
            shared: self.shared.clone(),
        })
    }

    /// True while the underlying transport is usable.
    pub fn is_alive(&self) -> bool {
        self.shared.borrow().alive
    }

    /// Number of streams currently open.
    pub fn open_streams(&self) -> usize {
        self.shared.borrow().open_streams
    }

    /// Register a callback for when the manager closes. Used by the
    /// destination table to evict the key.
    pub fn on_close(&self, callback: impl FnOnce() + 'static) {
        let mut state = self.shared.borrow_mut();
        if state.alive {
            state.on_close.push(Box::new(callback));
        } else {
            drop(state);
            callback();
        }
    }

    /// Tear the manager down. Idempotent. Existing streams observe
    /// end-of-stream; close callbacks run once.
    pub fn close(&self) {
        let callbacks = {
            let mut state = self.shared.borrow_mut();
            if !state.alive {
                return;
            }
            state.alive = false;
            metrics::MANAGERS_LIVE.decrement();
            std::mem::take(&mut state.on_close)
        };
        for callback in callbacks {
            callback();
        }
    }

    /// True if both handles refer to the same manager instance.
    pub fn same_manager(&self, other: &MuxManager) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

/// One logical stream on a [`MuxManager`].
pub struct MuxStream {
    id: u32,
    shared: Rc<RefCell<MuxState>>,
}

impl MuxStream {
    /// Stream id. Client-initiated ids are odd.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// True if both streams ride the same manager instance.
    pub fn same_connection(&self, other: &MuxStream) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Source for MuxStream {
    fn poll_pull(
        &mut self,
        cx: &mut Context<'_>,
        out: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        let mut state = self.shared.borrow_mut();
        if !state.alive {
            return Poll::Ready(Ok(false));
        }
        state.transport.poll_pull(cx, out)
    }
}

impl Sink for MuxStream {
    fn poll_push(
        &mut self,
        cx: &mut Context<'_>,
        data: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        let mut state = self.shared.borrow_mut();
        if !state.alive {
            return Poll::Ready(Err(StreamError::PipeClosed));
        }
        state.transport.poll_push(cx, data)
    }

    fn poll_shutdown(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        // Shutting down one logical stream leaves the shared transport
        // open for its siblings.
        Poll::Ready(Ok(()))
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        let mut state = self.shared.borrow_mut();
        state.open_streams = state.open_streams.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn manager() -> MuxManager {
        let (a, _b) = wireline::duplex(64);
        MuxManager::new(Box::new(a))
    }

    #[test]
    fn stream_ids_are_odd_and_increasing() {
        let manager = manager();
        let s1 = manager.open_stream().unwrap();
        let s2 = manager.open_stream().unwrap();
        let s3 = manager.open_stream().unwrap();
        assert_eq!((s1.id(), s2.id(), s3.id()), (1, 3, 5));
    }

    #[test]
    fn open_count_tracks_stream_lifetime() {
        let manager = manager();
        let s1 = manager.open_stream().unwrap();
        let s2 = manager.open_stream().unwrap();
        assert_eq!(manager.open_streams(), 2);
        drop(s1);
        assert_eq!(manager.open_streams(), 1);
        drop(s2);
        assert_eq!(manager.open_streams(), 0);
    }

    #[test]
    fn close_runs_callbacks_once_and_refuses_streams() {
        let manager = manager();
        let fired = Rc::new(Cell::new(0));
        let count = fired.clone();
        manager.on_close(move || count.set(count.get() + 1));

        manager.close();
        manager.close();
        assert_eq!(fired.get(), 1);
        assert!(!manager.is_alive());
        assert!(matches!(
            manager.open_stream(),
            Err(HttpError::ConnectionClosed)
        ));
    }

    #[test]
    fn on_close_after_close_fires_immediately() {
        let manager = manager();
        manager.close();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        manager.on_close(move || flag.set(true));
        assert!(fired.get());
    }

    #[test]
    fn clones_share_one_instance() {
        let manager = manager();
        let other = manager.clone();
        assert!(manager.same_manager(&other));
        let s1 = manager.open_stream().unwrap();
        let s2 = other.open_stream().unwrap();
        assert!(s1.same_connection(&s2));
        assert_ne!(s1.id(), s2.id());
    }

    #[test]
    fn closed_stream_observes_eos() {
        let manager = manager();
        let mut stream = manager.open_stream().unwrap();
        manager.close();

        let mut cx = Context::from_waker(std::task::Waker::noop());
        let mut out = BufList::new();
        assert!(matches!(
            stream.poll_pull(&mut cx, &mut out),
            Poll::Ready(Ok(false))
        ));
        let mut data = BufList::from(&b"x"[..]);
        assert!(matches!(
            stream.poll_push(&mut cx, &mut data),
            Poll::Ready(Err(StreamError::PipeClosed))
        ));
    }
}
