//! Backpressure pipe bridging a producer to a cooperative consumer.
//!
//! The producer side may live on a dedicated blocking thread; the consumer
//! side is pulled from an affinity context. The two sides share exactly one
//! synchronization point: the drain signal a consumer fires when it empties
//! the buffer while a producer is waiting.
//!
//! Capacity is a soft bound. A write is always accepted while the pipe is
//! open; the returned `bool` tells the producer whether to keep going or
//! wait for the signal.

use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};

use crate::buffer::BufList;
use crate::config::PipeConfig;
use crate::error::StreamError;
use crate::metrics;
use crate::stream::{Sink, Source};

struct PipeState {
    buffered: BufList,
    capacity: usize,
    /// Producer saw `false` and is waiting for the drain signal.
    producer_waiting: bool,
    producer_waker: Option<Waker>,
    reader_waker: Option<Waker>,
    ended: bool,
    error: Option<StreamError>,
    reader_closed: bool,
}

struct PipeShared {
    state: Mutex<PipeState>,
    drained: Condvar,
}

/// Create a pipe with the given soft capacity bound in bytes.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    debug_assert!(capacity > 0, "pipe capacity must be > 0");
    let shared = Arc::new(PipeShared {
        state: Mutex::new(PipeState {
            buffered: BufList::new(),
            capacity,
            producer_waiting: false,
            producer_waker: None,
            reader_waker: None,
            ended: false,
            error: None,
            reader_closed: false,
        }),
        drained: Condvar::new(),
    });
    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

/// Create a pipe from a [`PipeConfig`].
pub fn pipe_with(config: &PipeConfig) -> (PipeWriter, PipeReader) {
    pipe(config.capacity)
}

/// Producer half of a pipe.
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

impl PipeWriter {
    /// Move `data` into the pipe.
    ///
    /// Returns `true` while the pipe stays under capacity, `false` once the
    /// write left it at or over capacity (wait for the drain signal before
    /// writing again). Fails with [`StreamError::PipeClosed`] after `end()`
    /// or after the reader closed.
    pub fn write(&self, data: &mut BufList) -> Result<bool, StreamError> {
        let mut state = self.shared.lock();
        if state.ended || state.reader_closed {
            return Err(StreamError::PipeClosed);
        }
        let had_bytes = !data.is_empty();
        data.move_all_into(&mut state.buffered);
        metrics::PIPE_WRITES.increment();

        let under = state.buffered.remaining() < state.capacity;
        if !under {
            state.producer_waiting = true;
            metrics::PIPE_STALLS.increment();
        }
        let waker = if had_bytes {
            state.reader_waker.take()
        } else {
            None
        };
        drop(state);
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(under)
    }

    /// Block until the drain signal fires or the pipe closes.
    ///
    /// Returns `true` if the pipe is still writable. Intended for producers
    /// on dedicated blocking threads; async producers use the [`Sink`] impl.
    pub fn wait_writable(&self) -> bool {
        let mut state = self.shared.lock();
        while state.producer_waiting && !state.reader_closed && !state.ended {
            state = match self.shared.drained.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        !(state.reader_closed || state.ended)
    }

    /// Mark the pipe ended. The consumer drains buffered bytes, then
    /// observes end-of-stream. Returns `false` if the pipe was already
    /// closed.
    pub fn end(&self) -> bool {
        self.end_inner(None)
    }

    /// Mark the pipe failed. The consumer drains buffered bytes, then
    /// observes the error exactly once. Returns `false` if the pipe was
    /// already closed (the error is dropped).
    pub fn end_error(&self, error: StreamError) -> bool {
        self.end_inner(Some(error))
    }

    fn end_inner(&self, error: Option<StreamError>) -> bool {
        let mut state = self.shared.lock();
        if state.ended || state.reader_closed {
            return false;
        }
        state.ended = true;
        state.error = error;
        state.producer_waiting = false;
        let waker = state.reader_waker.take();
        drop(state);
        self.shared.drained.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

impl Sink for PipeWriter {
    fn poll_push(
        &mut self,
        cx: &mut Context<'_>,
        data: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        {
            let mut state = self.shared.lock();
            if state.producer_waiting && !state.ended && !state.reader_closed {
                state.producer_waker = Some(cx.waker().clone());
                return Poll::Pending;
            }
        }
        Poll::Ready(self.write(data).map(|_| true))
    }

    fn poll_shutdown(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        self.end();
        Poll::Ready(Ok(()))
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.end();
    }
}

/// Consumer half of a pipe. Pulled from the owning affinity context.
pub struct PipeReader {
    shared: Arc<PipeShared>,
}

impl PipeReader {
    /// Close the consumer side. Idempotent. Buffered bytes are dropped, a
    /// waiting producer is unblocked, and later writes fail with
    /// [`StreamError::PipeClosed`].
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if state.reader_closed {
            return;
        }
        state.reader_closed = true;
        state.buffered.clear();
        state.error = None;
        state.producer_waiting = false;
        let waker = state.producer_waker.take();
        drop(state);
        self.shared.drained.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl Source for PipeReader {
    fn poll_pull(
        &mut self,
        cx: &mut Context<'_>,
        out: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        let mut state = self.shared.lock();
        if state.reader_closed {
            return Poll::Ready(Ok(false));
        }
        if !state.buffered.is_empty() {
            state.buffered.move_all_into(out);

            let signal = state.producer_waiting;
            let waker = if signal {
                state.producer_waiting = false;
                metrics::PIPE_WAKES.increment();
                state.producer_waker.take()
            } else {
                None
            };
            drop(state);
            if signal {
                self.shared.drained.notify_all();
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
            return Poll::Ready(Ok(true));
        }
        if let Some(error) = state.error.take() {
            return Poll::Ready(Err(error));
        }
        if state.ended {
            return Poll::Ready(Ok(false));
        }
        state.reader_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl PipeShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, PipeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ── In-memory duplex transport ───────────────────────────────────

/// One end of an in-memory bidirectional transport.
pub struct DuplexStream {
    writer: PipeWriter,
    reader: PipeReader,
}

/// Create a connected pair of in-memory transports, one pipe per
/// direction, each with the given soft capacity.
pub fn duplex(capacity: usize) -> (DuplexStream, DuplexStream) {
    let (a_to_b_w, a_to_b_r) = pipe(capacity);
    let (b_to_a_w, b_to_a_r) = pipe(capacity);
    (
        DuplexStream {
            writer: a_to_b_w,
            reader: b_to_a_r,
        },
        DuplexStream {
            writer: b_to_a_w,
            reader: a_to_b_r,
        },
    )
}

impl DuplexStream {
    /// The producer half feeding the peer.
    pub fn writer(&self) -> &PipeWriter {
        &self.writer
    }

    /// Close the read side without touching the write side.
    pub fn close_read(&self) {
        self.reader.close();
    }
}

impl Source for DuplexStream {
    fn poll_pull(
        &mut self,
        cx: &mut Context<'_>,
        out: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        self.reader.poll_pull(cx, out)
    }
}

impl Sink for DuplexStream {
    fn poll_push(
        &mut self,
        cx: &mut Context<'_>,
        data: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        self.writer.poll_push(cx, data)
    }

    fn poll_shutdown(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        self.writer.poll_shutdown(cx)
    }
}
