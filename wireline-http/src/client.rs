//! Client connect pipeline.
//!
//! A [`Client`] walks a list of [`ConnectStage`]s in order; the first
//! stage that claims the destination produces the [`Connection`]. The
//! ALPN middleware sits at position 0 when installed, so it classifies a
//! connection before any stage that assumes cleartext. Raw transports come
//! from a caller-supplied [`Connector`]; real sockets stay outside this
//! crate.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use wireline::{BoxTransport, BufList, Sink, Source, StreamError};

use crate::alpn::AlpnMiddleware;
use crate::error::HttpError;
use crate::mux::MuxStream;
use crate::tls::NegotiatedProtocol;

/// Where to connect, and whether the destination needs a secure channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Destination {
    /// A destination reached over a TLS handshake.
    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Destination {
            host: host.into(),
            port,
            secure: true,
        }
    }

    /// A cleartext destination.
    pub fn plain(host: impl Into<String>, port: u16) -> Self {
        Destination {
            host: host.into(),
            port,
            secure: false,
        }
    }

    /// Connection-reuse key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Future returned by a [`Connector`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<BoxTransport, HttpError>>>>;

/// Caller-supplied transport factory: dial `(host, port)` and hand back
/// the raw transport.
pub type Connector = Box<dyn Fn(&str, u16) -> ConnectFuture>;

enum ConnKind {
    Mux(MuxStream),
    Stream(BoxTransport),
}

/// An established connection: destination, negotiated protocol, and
/// either a multiplexed stream or the transport itself.
pub struct Connection {
    host: String,
    port: u16,
    protocol: NegotiatedProtocol,
    kind: ConnKind,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn mux(dest: &Destination, stream: MuxStream) -> Self {
        Connection {
            host: dest.host.clone(),
            port: dest.port,
            protocol: NegotiatedProtocol::Http2,
            kind: ConnKind::Mux(stream),
        }
    }

    pub(crate) fn direct(
        dest: &Destination,
        protocol: NegotiatedProtocol,
        transport: BoxTransport,
    ) -> Self {
        Connection {
            host: dest.host.clone(),
            port: dest.port,
            protocol,
            kind: ConnKind::Stream(transport),
        }
    }

    /// Protocol governing the rest of the connection.
    pub fn protocol(&self) -> NegotiatedProtocol {
        self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// True when the connection rides a shared multiplexed manager.
    pub fn is_multiplexed(&self) -> bool {
        matches!(self.kind, ConnKind::Mux(_))
    }

    /// The multiplexed stream, when there is one.
    pub fn mux_stream(&self) -> Option<&MuxStream> {
        match &self.kind {
            ConnKind::Mux(stream) => Some(stream),
            ConnKind::Stream(_) => None,
        }
    }
}

impl Source for Connection {
    fn poll_pull(
        &mut self,
        cx: &mut Context<'_>,
        out: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        match &mut self.kind {
            ConnKind::Mux(stream) => stream.poll_pull(cx, out),
            ConnKind::Stream(transport) => transport.poll_pull(cx, out),
        }
    }
}

impl Sink for Connection {
    fn poll_push(
        &mut self,
        cx: &mut Context<'_>,
        data: &mut BufList,
    ) -> Poll<Result<bool, StreamError>> {
        match &mut self.kind {
            ConnKind::Mux(stream) => stream.poll_push(cx, data),
            ConnKind::Stream(transport) => transport.poll_push(cx, data),
        }
    }

    fn poll_shutdown(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), StreamError>> {
        match &mut self.kind {
            ConnKind::Mux(stream) => stream.poll_shutdown(cx),
            ConnKind::Stream(transport) => transport.poll_shutdown(cx),
        }
    }
}

/// One stage of the connect pipeline, tried in order.
pub enum ConnectStage {
    /// TLS handshake, ALPN branch, per-destination manager reuse.
    Alpn(AlpnMiddleware),
    /// Dial the destination as-is.
    Direct,
}

impl ConnectStage {
    /// `Ok(None)` passes the destination to the next stage.
    async fn connect(
        &self,
        connector: &Connector,
        dest: &Destination,
    ) -> Result<Option<Connection>, HttpError> {
        match self {
            ConnectStage::Alpn(middleware) => {
                if !dest.secure {
                    return Ok(None);
                }
                middleware.connect(connector, dest).await.map(Some)
            }
            ConnectStage::Direct => {
                let transport = connector(&dest.host, dest.port).await?;
                Ok(Some(Connection::direct(
                    dest,
                    NegotiatedProtocol::Plain,
                    transport,
                )))
            }
        }
    }

    fn is_alpn(&self) -> bool {
        matches!(self, ConnectStage::Alpn(_))
    }
}

/// Connects to destinations through an ordered stage list.
pub struct Client {
    connector: Connector,
    stages: Vec<ConnectStage>,
}

impl Client {
    /// A client that dials every destination directly.
    pub fn new(connector: Connector) -> Self {
        Client {
            connector,
            stages: vec![ConnectStage::Direct],
        }
    }

    /// A client with an explicit stage list.
    pub fn with_stages(connector: Connector, stages: Vec<ConnectStage>) -> Self {
        Client { connector, stages }
    }

    /// Install the ALPN middleware at position 0, ahead of stages that
    /// assume a cleartext or already-classified connection. Installing
    /// twice keeps the first instance.
    pub fn install_alpn(&mut self, middleware: AlpnMiddleware) {
        if self.stages.iter().any(ConnectStage::is_alpn) {
            return;
        }
        self.stages.insert(0, ConnectStage::Alpn(middleware));
    }

    /// Number of stages in the pipeline.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Walk the stages in order. Fails with [`HttpError::NoRoute`] when no
    /// stage claims the destination.
    pub async fn connect(&self, dest: &Destination) -> Result<Connection, HttpError> {
        for stage in &self.stages {
            if let Some(connection) = stage.connect(&self.connector, dest).await? {
                return Ok(connection);
            }
        }
        Err(HttpError::NoRoute)
    }
}
