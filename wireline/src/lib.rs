//! wireline — affinity-scheduled byte transport with backpressure pipes
//! and chunked framing.
//!
//! wireline moves bytes between a producer (possibly on a blocking thread)
//! and cooperative consumer tasks without copying: data travels as
//! [`BufList`] aggregates of reference-counted chunks, sized by an
//! adaptive [`ChunkAllocator`]. A [`pipe`] bridges the two worlds under a
//! soft capacity bound; codecs such as [`ChunkDecoder`] and
//! [`ChunkEncoder`] stack on top as filter stages. Scheduling discipline
//! comes from the [`Affinity`] contract: state is owned by exactly one
//! [`AffinityContext`] and operations prove they run on it instead of
//! locking.
//!
//! # Quick Start
//!
//! ```rust
//! use wireline::{BufList, BurstSource, ChunkDecoder, SourceExt, block_on};
//!
//! fn main() -> Result<(), wireline::StreamError> {
//!     let wire = BurstSource::single(&b"5\r\nhello\r\n0\r\n\r\n"[..]);
//!     let mut decoder = ChunkDecoder::new(wire);
//!
//!     let mut body = BufList::new();
//!     block_on(async {
//!         while decoder.pull(&mut body).await? {}
//!         Ok::<_, wireline::StreamError>(())
//!     })?;
//!
//!     assert_eq!(body.copy_to_vec(), b"hello");
//!     Ok(())
//! }
//! ```

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod alloc;
pub(crate) mod buffer;
pub(crate) mod chunked;
pub(crate) mod metrics;
pub(crate) mod pipe;
pub(crate) mod reader;
pub(crate) mod runtime;
pub(crate) mod stream;

// ── Public modules ──────────────────────────────────────────────────────
pub mod config;
pub mod error;

// ── Re-exports: Buffers & allocation ────────────────────────────────────

/// Adaptive chunk allocator tracking observed burst sizes.
pub use alloc::ChunkAllocator;
/// Ordered aggregate of reference-counted byte chunks.
pub use buffer::BufList;

// ── Re-exports: Streams & codecs ────────────────────────────────────────

/// Boxed transport for type-erased stream stacks.
pub use stream::BoxTransport;
/// Source yielding a fixed sequence of bursts (tests, replays).
pub use stream::BurstSource;
/// Sink collecting everything pushed into it (tests).
pub use stream::CollectSink;
/// Pull-side of a byte stream: fills a [`BufList`] per call.
pub use stream::Source;
/// Extension methods for [`Source`] (`pull`).
pub use stream::SourceExt;
/// Push-side of a byte stream: drains a [`BufList`] per call.
pub use stream::Sink;
/// Extension methods for [`Sink`] (`push`, `shutdown`).
pub use stream::SinkExt;
/// Marker for bidirectional streams, blanket-implemented.
pub use stream::Transport;
/// Drain a source to end-of-stream into one aggregate.
pub use stream::pull_to_end;

/// Buffering reader with delimiter scan and exact-length takes.
pub use reader::StreamReader;

/// Decoder for hex-length chunked framing.
pub use chunked::ChunkDecoder;
/// Encoder producing hex-length chunked framing.
pub use chunked::ChunkEncoder;

// ── Re-exports: Pipes ───────────────────────────────────────────────────

/// One end of an in-memory bidirectional transport.
pub use pipe::DuplexStream;
/// Consumer half of a pipe.
pub use pipe::PipeReader;
/// Producer half of a pipe.
pub use pipe::PipeWriter;
/// Create a connected pair of in-memory transports.
pub use pipe::duplex;
/// Create a backpressure pipe with the given soft capacity.
pub use pipe::pipe;
/// Create a backpressure pipe from a [`PipeConfig`].
pub use pipe::pipe_with;

// ── Re-exports: Runtime ─────────────────────────────────────────────────

/// Cloneable cross-thread handle to an [`AffinityContext`].
pub use runtime::Affinity;
/// Single-threaded cooperative executor owning a slab of tasks.
pub use runtime::AffinityContext;
/// Builder for a context running on its own named thread.
pub use runtime::ContextBuilder;
/// Handle to a context thread; joins it on shutdown.
pub use runtime::ContextHandle;
/// Future returned by [`Affinity::await_affinity`].
pub use runtime::Hop;
/// Opaque handle for a task spawned onto a context.
pub use runtime::TaskId;
/// Drive a future to completion on the current thread, outside any context.
pub use runtime::block_on;

// ── Re-exports: Config & errors ─────────────────────────────────────────

/// Allocator bounds.
pub use config::AllocConfig;
/// Top-level configuration.
pub use config::Config;
/// Builder for [`Config`] with discoverable methods and `build()` validation.
pub use config::ConfigBuilder;
/// Context/executor settings.
pub use config::ContextConfig;
/// Pipe capacity settings.
pub use config::PipeConfig;
/// Error returned when a configuration value is out of range.
pub use error::InvalidConfig;
/// Errors produced by transport streams, codecs, and pipes.
pub use error::StreamError;
