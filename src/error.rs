//! Error and close-reason types for the connection core.
//!
//! Two families cover the whole lifecycle:
//!
//! - [`HandshakeError`]: why an upgrade request was refused before the
//!   protocol switch. Every variant maps to the same bare 400 response.
//! - [`CloseReason`]: why an upgraded connection ended. Handed to
//!   `Handler::terminate` and classified as normal or error by
//!   [`CloseReason::is_normal`].
//!
//! Nothing in either family escapes the connection that produced it; the
//! worker thread absorbs all of them.

use std::fmt;
use std::io;

/// Why an upgrade request was rejected before the protocol switch.
#[derive(Debug)]
pub enum HandshakeError {
    /// A required header is absent from the request.
    MissingHeader(&'static str),
    /// A required header is present but does not carry the exact expected
    /// value token.
    InvalidHeader(&'static str),
    /// A numeric key has no space characters, no digits, or a value that
    /// does not fit the 4-byte challenge field.
    MalformedKey,
    /// The request line could not be split into method and path.
    BadRequestLine,
    /// Reading the request head or the 8 raw key bytes failed.
    Io(io::Error),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::MissingHeader(name) => write!(f, "missing required header {}", name),
            HandshakeError::InvalidHeader(name) => write!(f, "invalid value for header {}", name),
            HandshakeError::MalformedKey => write!(f, "malformed numeric key"),
            HandshakeError::BadRequestLine => write!(f, "malformed request line"),
            HandshakeError::Io(e) => write!(f, "request read failed: {}", e),
        }
    }
}

impl std::error::Error for HandshakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HandshakeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for HandshakeError {
    fn from(e: io::Error) -> Self {
        HandshakeError::Io(e)
    }
}

/// Why an upgraded connection is closing.
///
/// Passed by reference to `Handler::terminate` so handlers can distinguish
/// orderly shutdown from failure without the core interpreting their state.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer sent the 0xFF 0x00 closing sentinel.
    Remote,
    /// The handler returned a shutdown outcome.
    Shutdown,
    /// The idle timeout elapsed with no traffic and no events.
    Timeout,
    /// The transport reached end-of-stream without a closing sentinel.
    Dropped,
    /// The peer sent a frame with an unsupported marker byte.
    BadFrame,
    /// A handler call panicked; the panic message is retained verbatim.
    HandlerCrash(String),
    /// The transport failed mid-connection.
    Transport(io::Error),
}

impl CloseReason {
    /// Whether this close counts as normal rather than an error.
    ///
    /// Peer-requested close, handler shutdown, and idle timeout are the
    /// normal endings; everything else is a failure of some party.
    pub fn is_normal(&self) -> bool {
        matches!(
            self,
            CloseReason::Remote | CloseReason::Shutdown | CloseReason::Timeout
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Remote => write!(f, "peer requested close"),
            CloseReason::Shutdown => write!(f, "handler requested shutdown"),
            CloseReason::Timeout => write!(f, "idle timeout expired"),
            CloseReason::Dropped => write!(f, "connection dropped"),
            CloseReason::BadFrame => write!(f, "unsupported frame marker"),
            CloseReason::HandlerCrash(msg) => write!(f, "handler crashed: {}", msg),
            CloseReason::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for CloseReason {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CloseReason::Transport(e) => Some(e),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_close_classification() {
        assert!(CloseReason::Remote.is_normal());
        assert!(CloseReason::Shutdown.is_normal());
        assert!(CloseReason::Timeout.is_normal());
        assert!(!CloseReason::Dropped.is_normal());
        assert!(!CloseReason::BadFrame.is_normal());
        assert!(!CloseReason::HandlerCrash("boom".to_string()).is_normal());
        assert!(!CloseReason::Transport(io::Error::new(io::ErrorKind::Other, "x")).is_normal());
    }

    #[test]
    fn test_handshake_error_display_names_header() {
        let e = HandshakeError::MissingHeader("Sec-WebSocket-Key1");
        assert!(e.to_string().contains("Sec-WebSocket-Key1"));
    }

    #[test]
    fn test_crash_reason_retains_panic_message() {
        let reason = CloseReason::HandlerCrash("index out of bounds".to_string());
        assert!(reason.to_string().contains("index out of bounds"));
    }
}
