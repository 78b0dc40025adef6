//! Owns the socket and surfaces its lifecycle as `TransportEvent`s: `Open`,
//! `Data(bytes)`, `Close`, `Error(err)`. Read timeouts are never set — a
//! long-lived IRC connection can sit idle for minutes between server PINGs,
//! and a client-side timeout would tear down a perfectly healthy session.

use std::net::{SocketAddr, ToSocketAddrs};

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::stream::{Stream, StreamError, TlsTrust};

#[derive(Debug)]
pub(crate) enum TransportEvent {
    Data(Vec<u8>),
    Close,
    Error(StreamError),
}

pub(crate) struct TlsOptions {
    pub(crate) host_name: String,
    pub(crate) trust: TlsTrust,
}

/// Resolve `host:port` to candidate addresses. Synchronous (as `getaddrinfo`
/// is), matching the spec's treatment of DNS resolution as a one-shot
/// blocking step before the async connection attempt begins.
pub(crate) fn resolve_addr(host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
    (host, port).to_socket_addrs().map(Iterator::collect)
}

pub(crate) async fn connect(
    addr: SocketAddr,
    tls: Option<&TlsOptions>,
) -> Result<Stream, StreamError> {
    match tls {
        None => Stream::new_tcp(addr).await,
        #[cfg(any(feature = "tls-native", feature = "tls-rustls"))]
        Some(opts) => Stream::new_tls(addr, &opts.host_name, opts.trust).await,
        #[cfg(not(any(feature = "tls-native", feature = "tls-rustls")))]
        Some(_) => Err(StreamError::IoError(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "no TLS backend compiled in",
        ))),
    }
}

/// The write half plus the bookkeeping `SendQueue` needs: once a disconnect
/// has been requested, further writes are silently dropped rather than
/// erroring (the socket may already be half-closed).
pub(crate) struct TransportWriter {
    write_half: WriteHalf<Stream>,
    requested_disconnect: bool,
}

impl TransportWriter {
    pub(crate) fn new(write_half: WriteHalf<Stream>) -> Self {
        TransportWriter {
            write_half,
            requested_disconnect: false,
        }
    }

    pub(crate) fn request_disconnect(&mut self) {
        self.requested_disconnect = true;
    }

    pub(crate) fn requested_disconnect(&self) -> bool {
        self.requested_disconnect
    }

    pub(crate) async fn write(&mut self, bytes: &[u8]) -> Result<(), std::io::Error> {
        if self.requested_disconnect {
            return Ok(());
        }
        self.write_half.write_all(bytes).await
    }

    pub(crate) async fn shutdown(&mut self) {
        let _ = self.write_half.shutdown().await;
    }
}

pub(crate) struct TransportReader {
    read_half: ReadHalf<Stream>,
}

impl TransportReader {
    pub(crate) fn new(read_half: ReadHalf<Stream>) -> Self {
        TransportReader { read_half }
    }

    /// Read one chunk. `Ok(TransportEvent::Close)` on EOF, `Err` never
    /// returned directly — transport errors are folded into
    /// `TransportEvent::Error` so the caller has one event stream to select
    /// over rather than a `Result` plus an event enum.
    pub(crate) async fn next_event(&mut self) -> TransportEvent {
        let mut buf = vec![0u8; 8 * 1024];
        match self.read_half.read(&mut buf).await {
            Ok(0) => TransportEvent::Close,
            Ok(n) => {
                buf.truncate(n);
                TransportEvent::Data(buf)
            }
            Err(e) => TransportEvent::Error(StreamError::IoError(e)),
        }
    }
}

pub(crate) fn split(stream: Stream) -> (TransportReader, TransportWriter) {
    let (read_half, write_half) = tokio::io::split(stream);
    (TransportReader::new(read_half), TransportWriter::new(write_half))
}
