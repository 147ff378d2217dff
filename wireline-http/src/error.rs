use thiserror::Error;

use wireline::StreamError;

/// Errors produced by the TLS, ALPN, and client layers.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Secure-channel establishment failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The connection was closed while still in use.
    #[error("connection closed")]
    ConnectionClosed,
    /// No connect stage claimed the destination.
    #[error("no route to destination")]
    NoRoute,
    /// Transport-level error from the underlying stream.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
    /// Error from the rustls engine.
    #[cfg(feature = "tls")]
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            HttpError::Handshake("peer hung up".into()).to_string(),
            "handshake failed: peer hung up"
        );
        assert_eq!(HttpError::ConnectionClosed.to_string(), "connection closed");
        assert_eq!(HttpError::NoRoute.to_string(), "no route to destination");
    }

    #[test]
    fn stream_errors_convert() {
        let err: HttpError = StreamError::PipeClosed.into();
        assert!(matches!(err, HttpError::Stream(StreamError::PipeClosed)));
    }
}
