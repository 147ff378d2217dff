//! TLS-ALPN protocol negotiation and connection reuse over wireline
//! transports.
//!
//! Once a secure channel is negotiated, the ALPN result decides which wire
//! protocol governs the rest of the connection: `h2` transports are handed
//! to a per-destination [`MuxManager`] shared by later connects to the
//! same `host:port`, while `http/1.1` (or no ALPN at all) uses the secured
//! transport directly for a single request/response.
//!
//! # Architecture
//!
//! [`Client`] walks an ordered list of connect stages. [`AlpnMiddleware`]
//! installs at position 0 and claims secure destinations: dial through the
//! caller-supplied [`Connector`], drive a [`TlsEngine`] handshake offering
//! `["h2", "http/1.1"]`, then branch on [`NegotiatedProtocol`].
//! [`RustlsEngine`] (feature `tls`, on by default) adapts rustls client
//! and server sessions; anything that cannot introspect ALPN degrades to
//! plain.
//!
//! # Example
//!
//! ```rust,ignore
//! use wireline_http::{AlpnMiddleware, Client, Destination};
//!
//! async fn example(mut client: Client) -> Result<(), wireline_http::HttpError> {
//!     let conn = client.connect(&Destination::tls("example.com", 443)).await?;
//!     if conn.is_multiplexed() {
//!         // Later connects to example.com:443 share this manager.
//!     }
//!     Ok(())
//! }
//! ```

pub mod alpn;
pub mod client;
pub mod error;
pub(crate) mod metrics;
pub mod mux;
pub mod tls;

pub use alpn::{AlpnMiddleware, EngineFactory};
pub use client::{Client, ConnectFuture, ConnectStage, Connection, Connector, Destination};
pub use error::HttpError;
pub use mux::{MuxManager, MuxStream};
pub use tls::{NegotiatedProtocol, PlainEngine, TlsEngine, alpn_preferences, handshake};

#[cfg(feature = "tls")]
pub use tls::RustlsEngine;
