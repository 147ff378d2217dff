//! wireline transport metrics.
//!
//! Static counters for allocator, pipe, codec, and context activity.
//! Registered with metriken; exposition is up to the embedding application.

use metriken::{Counter, Gauge, metric};

// ── Allocator ────────────────────────────────────────────────────

#[metric(name = "wireline/alloc/chunks", description = "Chunks handed out")]
pub static CHUNKS_ALLOCATED: Counter = Counter::new();

#[metric(
    name = "wireline/alloc/bytes",
    description = "Total bytes of chunk capacity handed out"
)]
pub static ALLOC_BYTES: Counter = Counter::new();

// ── Pipe ─────────────────────────────────────────────────────────

#[metric(name = "wireline/pipe/writes", description = "Pipe writes accepted")]
pub static PIPE_WRITES: Counter = Counter::new();

#[metric(
    name = "wireline/pipe/stalls",
    description = "Writes that crossed the capacity bound"
)]
pub static PIPE_STALLS: Counter = Counter::new();

#[metric(
    name = "wireline/pipe/wakes",
    description = "Drain signals delivered to waiting producers"
)]
pub static PIPE_WAKES: Counter = Counter::new();

// ── Chunked codec ────────────────────────────────────────────────

#[metric(
    name = "wireline/chunked/frames_decoded",
    description = "Chunk frames decoded, terminal frames included"
)]
pub static FRAMES_DECODED: Counter = Counter::new();

#[metric(
    name = "wireline/chunked/frames_encoded",
    description = "Chunk frames encoded, terminal frames included"
)]
pub static FRAMES_ENCODED: Counter = Counter::new();

// ── Context ──────────────────────────────────────────────────────

#[metric(
    name = "wireline/context/tasks_spawned",
    description = "Tasks spawned onto contexts"
)]
pub static TASKS_SPAWNED: Counter = Counter::new();

#[metric(
    name = "wireline/context/cross_posts",
    description = "Jobs posted to a context from a foreign thread"
)]
pub static CROSS_POSTS: Counter = Counter::new();

#[metric(
    name = "wireline/context/affinity_violations",
    description = "Failed affinity hops"
)]
pub static AFFINITY_VIOLATIONS: Counter = Counter::new();

#[metric(name = "wireline/context/active", description = "Live contexts")]
pub static CONTEXTS_ACTIVE: Gauge = Gauge::new();
