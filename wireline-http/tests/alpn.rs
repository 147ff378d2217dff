#![cfg(feature = "tls")]
//! Integration tests: rustls handshakes over in-memory transports, the
//! ALPN branch, and per-destination manager reuse.
//!
//! Each dial hands the client half of a `duplex()` pair to the middleware
//! and spawns a server engine task on the same context for the other
//! half, so the whole negotiation runs without sockets.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use wireline::{Affinity, AffinityContext, BoxTransport, ContextConfig, duplex};
use wireline_http::{
    AlpnMiddleware, Client, Connector, Destination, EngineFactory, HttpError, NegotiatedProtocol,
    RustlsEngine, TlsEngine,
};

struct TestPki {
    cert_der: rustls::pki_types::CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
}

fn pki() -> TestPki {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
    TestPki {
        cert_der: cert.cert.der().clone(),
        key: PrivateKeyDer::from(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der())),
    }
}

impl TestPki {
    /// Server config offering the given ALPN identifiers.
    fn server_config(&self, alpn: &[&[u8]]) -> Arc<ServerConfig> {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![self.cert_der.clone()], self.key.clone_key())
            .unwrap();
        config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
        Arc::new(config)
    }

    /// Client config trusting the test certificate.
    fn client_config(&self) -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.add(self.cert_der.clone()).unwrap();
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }
}

/// Connector that dials an in-memory pair and runs a rustls server engine
/// for the far half on the context.
fn connector_with_server(
    affinity: Affinity,
    server_config: Arc<ServerConfig>,
    dials: Rc<Cell<usize>>,
) -> Connector {
    Box::new(move |_host, _port| {
        dials.set(dials.get() + 1);
        let (near, mut far) = duplex(4096);
        let config = server_config.clone();
        affinity.spawn(async move {
            let mut engine = RustlsEngine::server(config);
            // ALPN selection comes from the server config; a failed
            // handshake surfaces on the client side.
            let _ = std::future::poll_fn(|cx| engine.poll_handshake(cx, &mut far)).await;
        });
        let near: BoxTransport = Box::new(near);
        Box::pin(async move { Ok(near) })
    })
}

fn client_engines(config: Arc<ClientConfig>) -> EngineFactory {
    Box::new(move |host, _port| {
        let name = ServerName::try_from(host.to_string())
            .map_err(|e| HttpError::Handshake(e.to_string()))?;
        Ok(Box::new(RustlsEngine::client(config.clone(), name)) as Box<dyn TlsEngine>)
    })
}

#[test]
fn h2_server_yields_multiplexed_connection_and_reuse() {
    let pki = pki();
    let mut ctx = AffinityContext::new(&ContextConfig::default());
    let dials = Rc::new(Cell::new(0));
    let mut client = Client::new(connector_with_server(
        ctx.affinity(),
        pki.server_config(&[b"h2", b"http/1.1"]),
        dials.clone(),
    ));
    client.install_alpn(AlpnMiddleware::new(client_engines(pki.client_config())));

    let dest = Destination::tls("localhost", 443);
    let (first, second) = ctx.run_until(async {
        let first = client.connect(&dest).await.unwrap();
        let second = client.connect(&dest).await.unwrap();
        (first, second)
    });

    assert_eq!(first.protocol(), NegotiatedProtocol::Http2);
    assert!(first.is_multiplexed());
    assert!(second.is_multiplexed());
    assert!(
        first
            .mux_stream()
            .unwrap()
            .same_connection(second.mux_stream().unwrap())
    );
    // Odd stream ids, increasing by 2.
    assert_eq!(first.mux_stream().unwrap().id(), 1);
    assert_eq!(second.mux_stream().unwrap().id(), 3);
    // The second connect reused the manager rather than dialing.
    assert_eq!(dials.get(), 1);
}

#[test]
fn http1_only_server_yields_direct_connections() {
    let pki = pki();
    let mut ctx = AffinityContext::new(&ContextConfig::default());
    let dials = Rc::new(Cell::new(0));
    let mut client = Client::new(connector_with_server(
        ctx.affinity(),
        pki.server_config(&[b"http/1.1"]),
        dials.clone(),
    ));
    client.install_alpn(AlpnMiddleware::new(client_engines(pki.client_config())));

    let dest = Destination::tls("localhost", 443);
    let (first, second) = ctx.run_until(async {
        let first = client.connect(&dest).await.unwrap();
        let second = client.connect(&dest).await.unwrap();
        (first, second)
    });

    assert_eq!(first.protocol(), NegotiatedProtocol::Http1);
    assert!(!first.is_multiplexed());
    assert!(!second.is_multiplexed());
    // Nothing to reuse: every connect dials its own transport.
    assert_eq!(dials.get(), 2);
}

#[test]
fn distinct_destinations_use_distinct_managers() {
    let pki = pki();
    let mut ctx = AffinityContext::new(&ContextConfig::default());
    let dials = Rc::new(Cell::new(0));
    let mut client = Client::new(connector_with_server(
        ctx.affinity(),
        pki.server_config(&[b"h2"]),
        dials.clone(),
    ));
    client.install_alpn(AlpnMiddleware::new(client_engines(pki.client_config())));

    let near = Destination::tls("localhost", 443);
    let far = Destination::tls("localhost", 8443);
    let (first, second) = ctx.run_until(async {
        let first = client.connect(&near).await.unwrap();
        let second = client.connect(&far).await.unwrap();
        (first, second)
    });

    assert!(first.is_multiplexed());
    assert!(second.is_multiplexed());
    assert!(
        !first
            .mux_stream()
            .unwrap()
            .same_connection(second.mux_stream().unwrap())
    );
    assert_eq!(dials.get(), 2);
}

#[test]
fn untrusted_server_fails_the_handshake() {
    let server_pki = pki();
    let mut ctx = AffinityContext::new(&ContextConfig::default());
    let dials = Rc::new(Cell::new(0));
    let mut client = Client::new(connector_with_server(
        ctx.affinity(),
        server_pki.server_config(&[b"h2"]),
        dials.clone(),
    ));
    // The client trusts a different certificate entirely.
    let client_pki = pki();
    client.install_alpn(AlpnMiddleware::new(client_engines(client_pki.client_config())));

    let dest = Destination::tls("localhost", 443);
    let err = ctx
        .run_until(async { client.connect(&dest).await })
        .unwrap_err();
    assert!(matches!(err, HttpError::Tls(_) | HttpError::Handshake(_)));

    // The failure released the key: a retry dials again (and fails again).
    let err = ctx
        .run_until(async { client.connect(&dest).await })
        .unwrap_err();
    assert!(matches!(err, HttpError::Tls(_) | HttpError::Handshake(_)));
    assert_eq!(dials.get(), 2);
}
