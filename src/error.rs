//! The crate's own error type. Only the error kinds that are observable as
//! `Result` values cross this boundary: transport failures (surfaced as
//! `Event::NetError` and fed to the reconnect supervisor) and a session-fatal
//! event-handler panic re-raise. Protocol/validation/flow errors are policy,
//! not `Result`s (see `events` and `handler`): they're logged and surfaced as
//! ordinary events, never as `Err`.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "tls-rustls")]
    #[error("tls error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    #[cfg(feature = "tls-native")]
    #[error("tls error: {0}")]
    NativeTls(#[from] native_tls::Error),

    #[error("couldn't resolve address {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("event handler for `{event}` panicked: {message}")]
    HandlerPanic { event: String, message: String },
}

/// A display-only wrapper used when re-raising a caught event-handler panic;
/// `Box<dyn Any>` payloads from `std::panic::catch_unwind` don't implement
/// `std::error::Error` themselves.
#[derive(Debug)]
pub struct HandlerPanicMessage(pub String);

impl fmt::Display for HandlerPanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
