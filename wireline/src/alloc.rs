//! Adaptive chunk allocator.
//!
//! Chunk sizes follow a feedback loop: after every successful read the hint
//! becomes twice the bytes actually read, clamped to the configured bounds.
//! Small readers stop over-allocating, bursty readers stop re-allocating on
//! every call.

use bytes::BytesMut;

use crate::config::AllocConfig;
use crate::metrics;

/// Chooses buffer chunk sizes from prior read sizes.
pub struct ChunkAllocator {
    min_alloc: usize,
    max_alloc: usize,
    current_hint: usize,
}

impl ChunkAllocator {
    /// Create an allocator with the given bounds. The hint starts at
    /// `min_alloc`.
    pub fn new(config: &AllocConfig) -> Self {
        debug_assert!(
            config.min_alloc > 0 && config.min_alloc <= config.max_alloc,
            "alloc bounds not validated"
        );
        Self {
            min_alloc: config.min_alloc,
            max_alloc: config.max_alloc,
            current_hint: config.min_alloc,
        }
    }

    /// Allocate a chunk sized by the current hint.
    pub fn allocate(&self) -> BytesMut {
        self.allocate_with(self.current_hint)
    }

    /// Allocate a chunk for an explicit hint, clamped to the bounds.
    pub fn allocate_with(&self, hint: usize) -> BytesMut {
        let size = hint.clamp(self.min_alloc, self.max_alloc);
        metrics::CHUNKS_ALLOCATED.increment();
        metrics::ALLOC_BYTES.add(size as u64);
        BytesMut::with_capacity(size)
    }

    /// Record a completed read. The next hint is double the bytes read,
    /// clamped to the bounds.
    pub fn track(&mut self, bytes_read: usize) {
        self.current_hint = bytes_read
            .saturating_mul(2)
            .clamp(self.min_alloc, self.max_alloc);
    }

    /// The size the next `allocate()` call will use.
    pub fn current_hint(&self) -> usize {
        self.current_hint
    }
}

impl Default for ChunkAllocator {
    fn default() -> Self {
        Self::new(&AllocConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_uses_min() {
        let alloc = ChunkAllocator::default();
        assert_eq!(alloc.current_hint(), 4096);
        assert_eq!(alloc.allocate().capacity(), 4096);
    }

    #[test]
    fn track_doubles_with_clamp() {
        let mut alloc = ChunkAllocator::default();

        // Small read: 2 * 1000 clamps up to min_alloc.
        alloc.track(1000);
        assert_eq!(alloc.current_hint(), 4096);
        assert_eq!(alloc.allocate().capacity(), 4096);

        // Mid-range read doubles exactly.
        alloc.track(8000);
        assert_eq!(alloc.current_hint(), 16000);
        assert_eq!(alloc.allocate().capacity(), 16000);

        // Large read clamps down to max_alloc.
        alloc.track(1 << 20);
        assert_eq!(alloc.current_hint(), 65536);
        assert_eq!(alloc.allocate().capacity(), 65536);
    }

    #[test]
    fn explicit_hint_is_clamped() {
        let alloc = ChunkAllocator::new(&AllocConfig {
            min_alloc: 1024,
            max_alloc: 4096,
        });
        assert_eq!(alloc.allocate_with(10).capacity(), 1024);
        assert_eq!(alloc.allocate_with(2048).capacity(), 2048);
        assert_eq!(alloc.allocate_with(1 << 30).capacity(), 4096);
    }

    #[test]
    fn hint_stays_in_bounds_after_every_update() {
        let mut alloc = ChunkAllocator::default();
        for read in [0usize, 1, 4095, 4096, 32768, 65536, usize::MAX / 2 + 1] {
            alloc.track(read);
            assert!(alloc.current_hint() >= 4096);
            assert!(alloc.current_hint() <= 65536);
        }
    }
}
