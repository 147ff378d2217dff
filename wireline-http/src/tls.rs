//! TLS engine capability and the rustls adapter.
//!
//! The engine is the narrow interface the ALPN middleware drives: set the
//! protocol preference list, pump the handshake over a [`Transport`], then
//! read the negotiated protocol as a tagged [`NegotiatedProtocol`] rather
//! than downcasting to a concrete engine. Engines without ALPN
//! introspection report [`NegotiatedProtocol::Plain`] and no h2 upgrade is
//! attempted.

use std::task::{Context, Poll};

use wireline::Transport;

use crate::error::HttpError;

/// ALPN identifier for HTTP/2.
pub const ALPN_H2: &[u8] = b"h2";
/// ALPN identifier for HTTP/1.1.
pub const ALPN_HTTP1: &[u8] = b"http/1.1";

/// The preference list offered on every handshake, most preferred first.
pub fn alpn_preferences() -> Vec<Vec<u8>> {
    vec![ALPN_H2.to_vec(), ALPN_HTTP1.to_vec()]
}

/// Application protocol negotiated during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedProtocol {
    /// No ALPN result; the connection is used as-is.
    Plain,
    /// Explicitly negotiated `http/1.1`.
    Http1,
    /// Negotiated `h2`; the connection multiplexes.
    Http2,
}

impl NegotiatedProtocol {
    /// Map an ALPN identifier to its tag. Unknown or absent identifiers
    /// are plain.
    pub fn from_alpn(protocol: Option<&[u8]>) -> Self {
        match protocol {
            Some(ALPN_H2) => NegotiatedProtocol::Http2,
            Some(ALPN_HTTP1) => NegotiatedProtocol::Http1,
            _ => NegotiatedProtocol::Plain,
        }
    }

    /// True for protocols carried by a shared multiplexed manager.
    pub fn is_multiplexed(self) -> bool {
        matches!(self, NegotiatedProtocol::Http2)
    }
}

/// A secure-channel engine driven over a [`Transport`].
pub trait TlsEngine {
    /// Set the ALPN preference list, most preferred first. Must be called
    /// before the handshake starts; later calls are ignored.
    fn set_alpn_preferences(&mut self, protocols: &[Vec<u8>]);

    /// Advance the handshake: flush engine output into the transport, feed
    /// peer bytes back in. `Ready(Ok(()))` once the channel is established.
    fn poll_handshake(
        &mut self,
        cx: &mut Context<'_>,
        transport: &mut dyn Transport,
    ) -> Poll<Result<(), HttpError>>;

    /// The protocol agreed during the handshake. [`NegotiatedProtocol::Plain`]
    /// before completion or when the engine cannot introspect ALPN.
    fn negotiated(&self) -> NegotiatedProtocol;
}

/// Drive an engine's handshake to completion.
pub async fn handshake(
    engine: &mut dyn TlsEngine,
    transport: &mut dyn Transport,
) -> Result<(), HttpError> {
    std::future::poll_fn(|cx| engine.poll_handshake(cx, transport)).await
}

/// Engine for destinations that need no secure channel. The handshake is a
/// no-op and the negotiation result is always plain.
#[derive(Default)]
pub struct PlainEngine;

impl TlsEngine for PlainEngine {
    fn set_alpn_preferences(&mut self, _protocols: &[Vec<u8>]) {}

    fn poll_handshake(
        &mut self,
        _cx: &mut Context<'_>,
        _transport: &mut dyn Transport,
    ) -> Poll<Result<(), HttpError>> {
        Poll::Ready(Ok(()))
    }

    fn negotiated(&self) -> NegotiatedProtocol {
        NegotiatedProtocol::Plain
    }
}

#[cfg(feature = "tls")]
pub use self::rustls_engine::RustlsEngine;

#[cfg(feature = "tls")]
mod rustls_engine {
    use std::io;
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use rustls::pki_types::ServerName;
    use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};

    use wireline::{BufList, Transport};

    use super::{NegotiatedProtocol, TlsEngine};
    use crate::error::HttpError;
    use crate::metrics;

    enum Session {
        /// Client session not yet created; ALPN can still be adjusted.
        ClientPending {
            config: Arc<ClientConfig>,
            name: ServerName<'static>,
        },
        /// Server session not yet created.
        ServerPending { config: Arc<ServerConfig> },
        Active(rustls::Connection),
    }

    /// [`TlsEngine`] backed by a rustls client or server session.
    ///
    /// The session is created lazily on the first handshake poll so the
    /// preference list set by the middleware lands in the config before
    /// rustls pins it.
    pub struct RustlsEngine {
        session: Session,
        inbound: BufList,
        outbound: BufList,
        complete: bool,
    }

    impl RustlsEngine {
        /// Outbound engine for `name`, verified against `config`'s roots.
        pub fn client(config: Arc<ClientConfig>, name: ServerName<'static>) -> Self {
            Self::new(Session::ClientPending { config, name })
        }

        /// Inbound engine serving `config`'s certificate.
        pub fn server(config: Arc<ServerConfig>) -> Self {
            Self::new(Session::ServerPending { config })
        }

        fn new(session: Session) -> Self {
            RustlsEngine {
                session,
                inbound: BufList::new(),
                outbound: BufList::new(),
                complete: false,
            }
        }

        /// True once the handshake finished.
        pub fn is_complete(&self) -> bool {
            self.complete
        }

        fn start(&mut self) -> Result<(), HttpError> {
            let conn = match &self.session {
                Session::ClientPending { config, name } => rustls::Connection::Client(
                    ClientConnection::new(config.clone(), name.clone())?,
                ),
                Session::ServerPending { config } => {
                    rustls::Connection::Server(ServerConnection::new(config.clone())?)
                }
                Session::Active(_) => return Ok(()),
            };
            self.session = Session::Active(conn);
            Ok(())
        }
    }

    impl TlsEngine for RustlsEngine {
        fn set_alpn_preferences(&mut self, protocols: &[Vec<u8>]) {
            match &mut self.session {
                Session::ClientPending { config, .. } => {
                    Arc::make_mut(config).alpn_protocols = protocols.to_vec();
                }
                Session::ServerPending { config } => {
                    Arc::make_mut(config).alpn_protocols = protocols.to_vec();
                }
                // rustls pins ALPN when the session is created.
                Session::Active(_) => {}
            }
        }

        fn poll_handshake(
            &mut self,
            cx: &mut Context<'_>,
            transport: &mut dyn Transport,
        ) -> Poll<Result<(), HttpError>> {
            if self.complete {
                return Poll::Ready(Ok(()));
            }
            if let Err(e) = self.start() {
                metrics::HANDSHAKE_FAILURES.increment();
                return Poll::Ready(Err(e));
            }
            let RustlsEngine {
                session,
                inbound,
                outbound,
                complete,
            } = self;
            let Session::Active(conn) = session else {
                unreachable!("start() installs the active session");
            };

            loop {
                // Ciphertext queued by rustls goes out before anything else;
                // handshake responses and alerts must not sit behind a read.
                stage_outbound(conn, outbound);
                while !outbound.is_empty() {
                    match transport.poll_push(cx, outbound) {
                        Poll::Ready(Ok(true)) => {}
                        Poll::Ready(Ok(false)) => {
                            metrics::HANDSHAKE_FAILURES.increment();
                            return Poll::Ready(Err(HttpError::Handshake(
                                "transport closed during handshake".into(),
                            )));
                        }
                        Poll::Ready(Err(e)) => {
                            metrics::HANDSHAKE_FAILURES.increment();
                            return Poll::Ready(Err(e.into()));
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                }

                if !conn.is_handshaking() {
                    *complete = true;
                    return Poll::Ready(Ok(()));
                }

                if inbound.is_empty() {
                    match transport.poll_pull(cx, inbound) {
                        Poll::Ready(Ok(true)) => {}
                        Poll::Ready(Ok(false)) => {
                            if inbound.is_empty() {
                                metrics::HANDSHAKE_FAILURES.increment();
                                return Poll::Ready(Err(HttpError::Handshake(
                                    "stream ended during handshake".into(),
                                )));
                            }
                        }
                        Poll::Ready(Err(e)) => {
                            metrics::HANDSHAKE_FAILURES.increment();
                            return Poll::Ready(Err(e.into()));
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                    if inbound.is_empty() {
                        continue;
                    }
                }

                if let Err(e) = feed_inbound(conn, inbound) {
                    // Flush the alert rustls queued before surfacing.
                    stage_outbound(conn, outbound);
                    while !outbound.is_empty() {
                        match transport.poll_push(cx, outbound) {
                            Poll::Ready(Ok(true)) => {}
                            _ => break,
                        }
                    }
                    metrics::HANDSHAKE_FAILURES.increment();
                    return Poll::Ready(Err(e));
                }
            }
        }

        fn negotiated(&self) -> NegotiatedProtocol {
            match &self.session {
                Session::Active(conn) if self.complete => {
                    NegotiatedProtocol::from_alpn(conn.alpn_protocol())
                }
                _ => NegotiatedProtocol::Plain,
            }
        }
    }

    /// Move all ciphertext rustls wants to send into `outbound`.
    fn stage_outbound(conn: &mut rustls::Connection, outbound: &mut BufList) {
        let mut buf = Vec::new();
        while conn.wants_write() {
            // Writing into a Vec cannot fail.
            if conn.write_tls(&mut buf).is_err() {
                break;
            }
        }
        if !buf.is_empty() {
            outbound.push_slice(&buf);
        }
    }

    /// Feed peer ciphertext into rustls and run its state machine.
    fn feed_inbound(conn: &mut rustls::Connection, inbound: &mut BufList) -> Result<(), HttpError> {
        let bytes = inbound.copy_to_vec();
        inbound.clear();
        let mut cursor = io::Cursor::new(&bytes[..]);
        while (cursor.position() as usize) < bytes.len() {
            let read = conn
                .read_tls(&mut cursor)
                .map_err(|e| HttpError::Handshake(e.to_string()))?;
            if read == 0 {
                break;
            }
            conn.process_new_packets()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_mapping() {
        assert_eq!(
            NegotiatedProtocol::from_alpn(Some(b"h2")),
            NegotiatedProtocol::Http2
        );
        assert_eq!(
            NegotiatedProtocol::from_alpn(Some(b"http/1.1")),
            NegotiatedProtocol::Http1
        );
        assert_eq!(
            NegotiatedProtocol::from_alpn(Some(b"spdy/3")),
            NegotiatedProtocol::Plain
        );
        assert_eq!(
            NegotiatedProtocol::from_alpn(None),
            NegotiatedProtocol::Plain
        );
    }

    #[test]
    fn preference_order_is_h2_first() {
        assert_eq!(alpn_preferences(), vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
    }

    #[test]
    fn only_h2_multiplexes() {
        assert!(NegotiatedProtocol::Http2.is_multiplexed());
        assert!(!NegotiatedProtocol::Http1.is_multiplexed());
        assert!(!NegotiatedProtocol::Plain.is_multiplexed());
    }

    #[test]
    fn plain_engine_completes_immediately() {
        let mut engine = PlainEngine;
        let (mut a, _b) = wireline::duplex(64);
        let done = wireline::block_on(handshake(&mut engine, &mut a));
        assert!(done.is_ok());
        assert_eq!(engine.negotiated(), NegotiatedProtocol::Plain);
    }
}
