//! Ordered chunk list used at every filter boundary.
//!
//! A [`BufList`] owns a sequence of [`Bytes`] chunks and tracks the total
//! remaining byte count. Chunks move between lists by ownership transfer,
//! never by copying; a chunk belongs to exactly one list at a time.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// An ordered sequence of byte chunks with O(1) move-out.
#[derive(Default)]
pub struct BufList {
    chunks: VecDeque<Bytes>,
    remaining: usize,
}

impl BufList {
    /// Create an empty list.
    pub fn new() -> Self {
        BufList {
            chunks: VecDeque::new(),
            remaining: 0,
        }
    }

    /// Total bytes remaining across all chunks.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// True if no bytes remain.
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Number of chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Append a chunk. Empty chunks are dropped so the list never holds
    /// zero-length entries.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.remaining += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Freeze and append a filled mutable buffer.
    pub fn push_mut(&mut self, chunk: BytesMut) {
        self.push(chunk.freeze());
    }

    /// Copy a slice into a fresh chunk and append it.
    pub fn push_slice(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.push(Bytes::copy_from_slice(data));
    }

    /// Put a chunk back at the front (unconsumed remainder after parsing).
    pub fn unshift(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.remaining += chunk.len();
        self.chunks.push_front(chunk);
    }

    /// Detach the front chunk.
    pub fn pop(&mut self) -> Option<Bytes> {
        let chunk = self.chunks.pop_front()?;
        self.remaining -= chunk.len();
        Some(chunk)
    }

    /// Copy up to `dst.len()` bytes out, advancing cursors and dropping
    /// exhausted chunks. Returns the number of bytes copied.
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dst.len() {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let n = (dst.len() - copied).min(front.len());
            dst[copied..copied + n].copy_from_slice(&front[..n]);
            front.advance(n);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            self.remaining -= n;
            copied += n;
        }
        copied
    }

    /// Move every chunk into `other`, leaving this list empty. No bytes are
    /// copied.
    pub fn move_all_into(&mut self, other: &mut BufList) {
        other.remaining += self.remaining;
        other.chunks.append(&mut self.chunks);
        self.remaining = 0;
    }

    /// Detach all chunks as a new list, leaving this one empty.
    pub fn take(&mut self) -> BufList {
        let mut out = BufList::new();
        self.move_all_into(&mut out);
        out
    }

    /// Split off the first `n` bytes as a new list. Whole chunks move
    /// without copying; at most one chunk is split at the boundary.
    ///
    /// # Panics
    ///
    /// Debug builds panic if `n` exceeds the remaining byte count.
    pub fn split_to(&mut self, n: usize) -> BufList {
        debug_assert!(
            n <= self.remaining,
            "split_to({n}) exceeds remaining {}",
            self.remaining
        );
        let mut out = BufList::new();
        let mut need = n.min(self.remaining);
        while need > 0 {
            let Some(mut chunk) = self.chunks.pop_front() else {
                break;
            };
            self.remaining -= chunk.len();
            if chunk.len() <= need {
                need -= chunk.len();
                out.push(chunk);
            } else {
                let head = chunk.split_to(need);
                need = 0;
                self.remaining += chunk.len();
                out.push(head);
                self.chunks.push_front(chunk);
            }
        }
        out
    }

    /// Copy all remaining bytes into a `Vec` without consuming them.
    pub fn copy_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.remaining);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Iterate over the chunks front to back.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.chunks.iter()
    }

    /// Iterate over the remaining bytes front to back.
    pub fn iter_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.chunks.iter().flat_map(|c| c.iter().copied())
    }

    /// Discard everything.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.remaining = 0;
    }
}

impl Buf for BufList {
    fn remaining(&self) -> usize {
        self.remaining
    }

    fn chunk(&self) -> &[u8] {
        self.chunks.front().map(|c| c.as_ref()).unwrap_or(&[])
    }

    fn advance(&mut self, mut cnt: usize) {
        debug_assert!(
            cnt <= self.remaining,
            "advance({cnt}) exceeds remaining {}",
            self.remaining
        );
        while cnt > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let n = cnt.min(front.len());
            front.advance(n);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            self.remaining -= n;
            cnt -= n;
        }
    }

    fn copy_to_bytes(&mut self, len: usize) -> Bytes {
        // Zero-copy when the front chunk covers the request.
        if let Some(front) = self.chunks.front_mut()
            && front.len() >= len
        {
            let out = front.split_to(len);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            self.remaining -= len;
            return out;
        }
        let mut out = BytesMut::with_capacity(len);
        let mut need = len;
        while need > 0 {
            let chunk = self.chunk();
            assert!(!chunk.is_empty(), "copy_to_bytes past end of list");
            let n = need.min(chunk.len());
            out.extend_from_slice(&chunk[..n]);
            self.advance(n);
            need -= n;
        }
        out.freeze()
    }
}

impl From<Bytes> for BufList {
    fn from(chunk: Bytes) -> Self {
        let mut list = BufList::new();
        list.push(chunk);
        list
    }
}

impl From<&[u8]> for BufList {
    fn from(data: &[u8]) -> Self {
        let mut list = BufList::new();
        list.push_slice(data);
        list
    }
}

impl std::fmt::Debug for BufList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufList")
            .field("chunks", &self.chunks.len())
            .field("remaining", &self.remaining)
            .finish()
    }
}
