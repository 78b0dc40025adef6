//! The low-level byte stream: plain TCP or TLS-over-TCP, unified behind one
//! `AsyncRead + AsyncWrite` enum so the connection loop doesn't care which.
//!
//! TLS trust is relaxed per-connection, not globally: `selfSigned` and
//! `certExpired` each tolerate exactly the certificate-validation failure
//! they name and nothing else, via a custom `ServerCertVerifier` that
//! delegates to the normal webpki verifier and inspects the specific
//! rejection before deciding whether to let it through.

use std::{
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};

#[cfg(feature = "tls-native")]
use tokio_native_tls::TlsStream;
#[cfg(feature = "tls-rustls")]
use tokio_rustls::client::TlsStream;

#[derive(Debug)]
// Boxed to keep the enum's size independent of which TLS backend is
// compiled in; the native-tls and rustls stream types differ a lot in size.
pub(crate) enum Stream {
    TcpStream(Box<TcpStream>),
    TlsStream(Box<TlsStream<TcpStream>>),
}

#[cfg(feature = "tls-native")]
pub(crate) type TlsError = native_tls::Error;
#[cfg(feature = "tls-rustls")]
pub(crate) type TlsError = tokio_rustls::rustls::Error;

#[derive(Debug)]
pub(crate) enum StreamError {
    TlsError(TlsError),
    IoError(std::io::Error),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::TlsError(e) => write!(f, "tls error: {e}"),
            StreamError::IoError(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<TlsError> for StreamError {
    fn from(err: TlsError) -> Self {
        StreamError::TlsError(err)
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::IoError(err)
    }
}

/// Which certificate problems to tolerate on this connection. Anything not
/// named here aborts the handshake.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TlsTrust {
    pub(crate) self_signed: bool,
    pub(crate) cert_expired: bool,
}

impl Stream {
    pub(crate) async fn new_tcp(addr: SocketAddr) -> Result<Stream, StreamError> {
        Ok(Stream::TcpStream(TcpStream::connect(addr).await?.into()))
    }

    #[cfg(feature = "tls-native")]
    pub(crate) async fn new_tls(
        addr: SocketAddr,
        host_name: &str,
        trust: TlsTrust,
    ) -> Result<Stream, StreamError> {
        let tcp_stream = TcpStream::connect(addr).await?;
        let mut builder = native_tls::TlsConnector::builder();
        // native-tls has no per-failure-class knob; any requested relaxation
        // falls back to accepting the certificate outright.
        if trust.self_signed || trust.cert_expired {
            builder.danger_accept_invalid_certs(true);
        }
        let connector = tokio_native_tls::TlsConnector::from(
            builder
                .build()
                .map_err(|e| StreamError::TlsError(e))?,
        );
        let tls_stream = connector.connect(host_name, tcp_stream).await?;
        Ok(Stream::TlsStream(tls_stream.into()))
    }

    #[cfg(feature = "tls-rustls")]
    pub(crate) async fn new_tls(
        addr: SocketAddr,
        host_name: &str,
        trust: TlsTrust,
    ) -> Result<Stream, StreamError> {
        let tcp_stream = TcpStream::connect(addr).await?;
        let config = rustls_client_config(trust)?;
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
        let server_name = tokio_rustls::rustls::pki_types::ServerName::try_from(host_name.to_owned())
            .map_err(|e| StreamError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        let tls_stream = connector.connect(server_name, tcp_stream).await?;
        Ok(Stream::TlsStream(tls_stream.into()))
    }
}

#[cfg(feature = "tls-rustls")]
fn rustls_client_config(
    trust: TlsTrust,
) -> Result<tokio_rustls::rustls::ClientConfig, StreamError> {
    use tokio_rustls::rustls::ClientConfig;

    if !trust.self_signed && !trust.cert_expired {
        let mut roots = tokio_rustls::rustls::RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            let _ = roots.add(cert);
        }
        return Ok(ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth());
    }

    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    let verifier = relaxed_verifier::RelaxedVerifier::new(roots, trust)?;
    Ok(ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth())
}

#[cfg(feature = "tls-rustls")]
mod relaxed_verifier {
    use super::{StreamError, TlsTrust};
    use std::sync::Arc;
    use tokio_rustls::rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use tokio_rustls::rustls::client::WebPkiServerVerifier;
    use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use tokio_rustls::rustls::{CertificateError, DigitallySignedStruct, Error, RootCertStore, SignatureScheme};

    /// Delegates to the standard webpki verifier, then lets through exactly
    /// the certificate errors the caller opted into tolerating.
    #[derive(Debug)]
    pub(super) struct RelaxedVerifier {
        inner: Arc<WebPkiServerVerifier>,
        trust: TlsTrust,
    }

    impl RelaxedVerifier {
        pub(super) fn new(roots: RootCertStore, trust: TlsTrust) -> Result<Self, StreamError> {
            let inner = WebPkiServerVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| StreamError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            Ok(RelaxedVerifier { inner, trust })
        }

        fn tolerated(&self, err: &Error) -> bool {
            match err {
                Error::InvalidCertificate(CertificateError::UnknownIssuer) => self.trust.self_signed,
                Error::InvalidCertificate(CertificateError::Expired) => self.trust.cert_expired,
                _ => false,
            }
        }
    }

    impl ServerCertVerifier for RelaxedVerifier {
        fn verify_server_cert(
            &self,
            end_entity: &CertificateDer<'_>,
            intermediates: &[CertificateDer<'_>],
            server_name: &ServerName<'_>,
            ocsp_response: &[u8],
            now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            match self.inner.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ) {
                Ok(ok) => Ok(ok),
                Err(err) if self.tolerated(&err) => Ok(ServerCertVerified::assertion()),
                Err(err) => Err(err),
            }
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            self.inner.verify_tls12_signature(message, cert, dss)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            self.inner.verify_tls13_signature(message, cert, dss)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.inner.supported_verify_schemes()
        }
    }
}

//
// Boilerplate
//

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf,
    ) -> Poll<Result<(), std::io::Error>> {
        match *self {
            Stream::TcpStream(ref mut tcp_stream) => Pin::new(tcp_stream).poll_read(cx, buf),
            Stream::TlsStream(ref mut tls_stream) => Pin::new(tls_stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match *self {
            Stream::TcpStream(ref mut tcp_stream) => Pin::new(tcp_stream).poll_write(cx, buf),
            Stream::TlsStream(ref mut tls_stream) => Pin::new(tls_stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), std::io::Error>> {
        match *self {
            Stream::TcpStream(ref mut tcp_stream) => Pin::new(tcp_stream).poll_flush(cx),
            Stream::TlsStream(ref mut tls_stream) => Pin::new(tls_stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Result<(), std::io::Error>> {
        match *self {
            Stream::TcpStream(ref mut tcp_stream) => Pin::new(tcp_stream).poll_shutdown(cx),
            Stream::TlsStream(ref mut tls_stream) => Pin::new(tls_stream).poll_shutdown(cx),
        }
    }
}
