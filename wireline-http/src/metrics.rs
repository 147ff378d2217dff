//! Protocol-layer metrics.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "wireline/http/handshakes",
    description = "TLS handshakes attempted"
)]
pub static HANDSHAKES: Counter = Counter::new();

#[metric(
    name = "wireline/http/handshake_failures",
    description = "TLS handshakes that failed"
)]
pub static HANDSHAKE_FAILURES: Counter = Counter::new();

#[metric(
    name = "wireline/http/managers_opened",
    description = "Multiplexed connection managers created"
)]
pub static MANAGERS_OPENED: Counter = Counter::new();

#[metric(
    name = "wireline/http/manager_reuses",
    description = "Connects served by an existing manager"
)]
pub static MANAGER_REUSES: Counter = Counter::new();

#[metric(
    name = "wireline/http/managers_live",
    description = "Managers currently alive"
)]
pub static MANAGERS_LIVE: Gauge = Gauge::new();

#[metric(
    name = "wireline/http/streams_opened",
    description = "Logical streams opened on multiplexed managers"
)]
pub static STREAMS_OPENED: Counter = Counter::new();
