//! Buffered scanning over a [`Source`].
//!
//! A [`StreamReader`] holds the bytes a source has produced but a parser has
//! not yet consumed. Parsers work the pending list synchronously (scan for a
//! delimiter, take an exact count) and refill from the source only when the
//! pending bytes run out.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Buf;

use crate::buffer::BufList;
use crate::error::StreamError;
use crate::stream::Source;

/// A source wrapper with a pending buffer and parse helpers.
pub struct StreamReader<S> {
    source: S,
    pending: BufList,
    eos: bool,
}

impl<S: Source> StreamReader<S> {
    /// Wrap a source. The pending buffer starts empty.
    pub fn new(source: S) -> Self {
        Self {
            source,
            pending: BufList::new(),
            eos: false,
        }
    }

    /// Bytes produced but not yet consumed.
    pub fn pending(&self) -> &BufList {
        &self.pending
    }

    /// True once the source reported end-of-stream. Pending bytes may still
    /// be waiting to be consumed.
    pub fn is_eos(&self) -> bool {
        self.eos
    }

    /// Unwrap into the source and any unconsumed bytes.
    pub fn into_parts(self) -> (S, BufList) {
        (self.source, self.pending)
    }

    /// Pull once from the source into the pending buffer.
    ///
    /// `Ok(true)` means the source may produce more; `Ok(false)` means
    /// end-of-stream (the final pull may still have appended bytes). Callers
    /// should re-run their parse step after every fill, whatever the result.
    pub fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<Result<bool, StreamError>> {
        if self.eos {
            return Poll::Ready(Ok(false));
        }
        match self.source.poll_pull(cx, &mut self.pending) {
            Poll::Ready(Ok(more)) => {
                if !more {
                    self.eos = true;
                }
                Poll::Ready(Ok(more))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// `poll_fill` as a future: `reader.fill().await`.
    pub fn fill(&mut self) -> Fill<'_, S> {
        Fill { reader: self }
    }

    /// Scan the pending bytes for CRLF. On a hit, detaches and returns the
    /// bytes before the delimiter and consumes the delimiter itself. `None`
    /// means no delimiter yet; fill and retry.
    pub fn scan_crlf(&mut self) -> Option<BufList> {
        let at = self.find_crlf()?;
        let line = self.pending.split_to(at);
        self.pending.advance(2);
        Some(line)
    }

    /// Detach exactly `n` pending bytes, or `None` if fewer are buffered.
    pub fn read_exact(&mut self, n: usize) -> Option<BufList> {
        if self.pending.remaining() < n {
            return None;
        }
        Some(self.pending.split_to(n))
    }

    /// Copy the first `n` pending bytes without consuming them, or `None`
    /// if fewer are buffered.
    pub fn peek(&self, n: usize) -> Option<Vec<u8>> {
        if self.pending.remaining() < n {
            return None;
        }
        Some(self.pending.iter_bytes().take(n).collect())
    }

    fn find_crlf(&self) -> Option<usize> {
        let mut prev_cr = false;
        for (i, b) in self.pending.iter_bytes().enumerate() {
            if prev_cr && b == b'\n' {
                return Some(i - 1);
            }
            prev_cr = b == b'\r';
        }
        None
    }
}

/// Future returned by [`StreamReader::fill`].
pub struct Fill<'a, S> {
    reader: &'a mut StreamReader<S>,
}

impl<S: Source> Future for Fill<'_, S> {
    type Output = Result<bool, StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().reader.poll_fill(cx)
    }
}
