//! Byte-producing and byte-consuming operations.
//!
//! Every filter boundary in this crate exposes the same shape: given a
//! mutable [`BufList`] to fill (or drain), attempt one step of I/O and report
//! whether more steps remain. Filters compose by wrapping one source (or
//! sink) in another; a terminal transport implements both directions.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;

use crate::buffer::BufList;
use crate::error::StreamError;

/// A byte producer.
pub trait Source {
    /// Attempt one read step, appending whatever is available to `out`.
    ///
    /// `Ok(true)` means more data may follow. `Ok(false)` means the stream is
    /// exhausted; bytes may still have been appended on that final call.
    /// `Pending` registers the caller's waker for when data arrives.
    fn poll_pull(
        &mut self,
        cx: &mut Context<'_>,
        out: &mut BufList,
    ) -> Poll<Result<bool, StreamError>>;
}

/// A byte consumer.
pub trait Sink {
    /// Attempt one write step, moving bytes out of `data` into the sink.
    ///
    /// `Ok(true)` means `data` was fully drained and the sink accepts more.
    /// `Ok(false)` means the sink accepts nothing further. `Pending`
    /// registers the caller's waker for when the sink can make progress.
    fn poll_push(
        &mut self,
        cx: &mut Context<'_>,
        data: &mut BufList,
    ) -> Poll<Result<bool, StreamError>>;

    /// Flush anything buffered and mark the write side finished.
    fn poll_shutdown(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), StreamError>>;
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn poll_pull(
        &mut self,
        cx: &mut Context<'_>,
        out: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        (**self).poll_pull(cx, out)
    }
}

impl<S: Source + ?Sized> Source for &mut S {
    fn poll_pull(
        &mut self,
        cx: &mut Context<'_>,
        out: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        (**self).poll_pull(cx, out)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn poll_push(
        &mut self,
        cx: &mut Context<'_>,
        data: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        (**self).poll_push(cx, data)
    }

    fn poll_shutdown(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        (**self).poll_shutdown(cx)
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn poll_push(
        &mut self,
        cx: &mut Context<'_>,
        data: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        (**self).poll_push(cx, data)
    }

    fn poll_shutdown(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        (**self).poll_shutdown(cx)
    }
}

/// Both directions of a terminal transport.
pub trait Transport: Source + Sink {}

impl<T: Source + Sink + ?Sized> Transport for T {}

/// A boxed transport that can move between threads.
pub type BoxTransport = Box<dyn Transport + Send>;

// ── Async sugar ──────────────────────────────────────────────────

/// Future returned by [`SourceExt::pull`].
pub struct Pull<'a, S: ?Sized> {
    source: &'a mut S,
    out: &'a mut BufList,
}

impl<S: Source + ?Sized> Future for Pull<'_, S> {
    type Output = Result<bool, StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.source.poll_pull(cx, this.out)
    }
}

/// Future returned by [`SinkExt::push`].
pub struct Push<'a, S: ?Sized> {
    sink: &'a mut S,
    data: &'a mut BufList,
}

impl<S: Sink + ?Sized> Future for Push<'_, S> {
    type Output = Result<bool, StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.sink.poll_push(cx, this.data)
    }
}

/// Future returned by [`SinkExt::shutdown`].
pub struct Shutdown<'a, S: ?Sized> {
    sink: &'a mut S,
}

impl<S: Sink + ?Sized> Future for Shutdown<'_, S> {
    type Output = Result<(), StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().sink.poll_shutdown(cx)
    }
}

/// Awaitable adapters for [`Source`].
pub trait SourceExt: Source {
    /// One read step as a future: `source.pull(&mut out).await`.
    fn pull<'a>(&'a mut self, out: &'a mut BufList) -> Pull<'a, Self> {
        Pull { source: self, out }
    }
}

impl<S: Source + ?Sized> SourceExt for S {}

/// Awaitable adapters for [`Sink`].
pub trait SinkExt: Sink {
    /// One write step as a future: `sink.push(&mut data).await`.
    fn push<'a>(&'a mut self, data: &'a mut BufList) -> Push<'a, Self> {
        Push { sink: self, data }
    }

    /// Finish the write side: `sink.shutdown().await`.
    fn shutdown(&mut self) -> Shutdown<'_, Self> {
        Shutdown { sink: self }
    }
}

impl<S: Sink + ?Sized> SinkExt for S {}

/// Pull a source to exhaustion, collecting everything into `out`.
pub async fn pull_to_end<S: Source + ?Sized>(
    source: &mut S,
    out: &mut BufList,
) -> Result<(), StreamError> {
    while source.pull(out).await? {}
    Ok(())
}

// ── In-memory endpoints ──────────────────────────────────────────

/// A source that yields a scripted sequence of bursts, one per pull.
///
/// Empty bursts yield a successful pull that appends nothing, which is how
/// upstream producers with nothing to say at the moment look to a filter.
pub struct BurstSource {
    bursts: VecDeque<Bytes>,
}

impl BurstSource {
    /// Script a source from a list of bursts.
    pub fn new<I>(bursts: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        Self {
            bursts: bursts.into_iter().map(Into::into).collect(),
        }
    }

    /// A source over one contiguous payload.
    pub fn single(data: impl Into<Bytes>) -> Self {
        Self::new([data.into()])
    }

    /// A source that is exhausted from the start.
    pub fn empty() -> Self {
        Self::new(Vec::<Bytes>::new())
    }
}

impl Source for BurstSource {
    fn poll_pull(
        &mut self,
        _cx: &mut Context<'_>,
        out: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        match self.bursts.pop_front() {
            Some(burst) => {
                out.push(burst);
                Poll::Ready(Ok(!self.bursts.is_empty()))
            }
            None => Poll::Ready(Ok(false)),
        }
    }
}

/// A sink that collects everything pushed into it.
#[derive(Default)]
pub struct CollectSink {
    /// Everything pushed so far.
    pub data: BufList,
    /// True once `poll_shutdown` ran.
    pub finished: bool,
}

impl CollectSink {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sink for CollectSink {
    fn poll_push(
        &mut self,
        _cx: &mut Context<'_>,
        data: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        if self.finished {
            return Poll::Ready(Ok(false));
        }
        data.move_all_into(&mut self.data);
        Poll::Ready(Ok(true))
    }

    fn poll_shutdown(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        self.finished = true;
        Poll::Ready(Ok(()))
    }
}
