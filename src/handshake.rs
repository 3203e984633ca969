//! Upgrade handshake validation and response writing.
//!
//! The draft's handshake is a plain HTTP exchange. The client sends an
//! upgrade request with two digit-and-space keys in headers and 8 raw key
//! bytes in the body; the server answers 101 with an MD5 challenge as the
//! response body, or a bare 400 on any failure. Validation is
//! all-or-nothing: the first missing or mismatched field refuses the
//! connection and no partial handshake state survives.
//!
//! Header validation ([`validate_upgrade`]) is separate from challenge
//! completion ([`UpgradeKeys::complete`]) so the caller can refuse a bad
//! request before blocking on the body bytes.
//!
//! - [`validate_upgrade`]: exact-token header checks
//! - [`UpgradeKeys`]: header fields carried between the two phases
//! - [`Handshake`]: the validated context (origin + challenge)
//! - [`write_accept_response`]: the 101 protocol-switch response
//! - [`write_bad_request`]: the bare refusal used for every failure
//! - [`location`]: the advertised ws/wss location URI

use std::io::{self, Write};

use crate::challenge::challenge;
use crate::error::HandshakeError;
use crate::request::Request;
use crate::transport::TransportKind;

/// Header fields extracted by [`validate_upgrade`], awaiting the raw key.
#[derive(Debug)]
pub struct UpgradeKeys {
    origin: String,
    key1: String,
    key2: String,
}

impl UpgradeKeys {
    /// Fold in the 8 raw body bytes and produce the validated handshake.
    ///
    /// Fails if either numeric key is malformed (no spaces, no digits, or
    /// a quotient that overflows the 4-byte challenge field).
    pub fn complete(self, key3: &[u8; 8]) -> Result<Handshake, HandshakeError> {
        let challenge = challenge(&self.key1, &self.key2, key3)?;
        Ok(Handshake {
            origin: self.origin,
            challenge,
        })
    }
}

/// A validated handshake: the echoed origin and the computed challenge.
#[derive(Debug)]
pub struct Handshake {
    origin: String,
    challenge: [u8; 16],
}

impl Handshake {
    /// The Origin header value, echoed back in the 101 response.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The 16-byte challenge sent as the 101 response body.
    pub fn challenge(&self) -> &[u8; 16] {
        &self.challenge
    }
}

/// Require `name` to carry exactly `want`. The name lookup is
/// case-insensitive; the value comparison is not.
fn require_exact(request: &Request, name: &'static str, want: &str) -> Result<(), HandshakeError> {
    match request.header(name) {
        Some(value) if value == want => Ok(()),
        Some(_) => Err(HandshakeError::InvalidHeader(name)),
        None => Err(HandshakeError::MissingHeader(name)),
    }
}

/// Require `name` to be present, whatever its value.
fn require_present<'a>(
    request: &'a Request,
    name: &'static str,
) -> Result<&'a str, HandshakeError> {
    request
        .header(name)
        .ok_or(HandshakeError::MissingHeader(name))
}

/// Validate the upgrade headers of `request`.
///
/// `Connection: Upgrade` and `Upgrade: WebSocket` must match those value
/// tokens byte for byte. `websocket` in any other casing belongs to a
/// different protocol revision and is refused here. Origin and both
/// numeric keys must be present; their contents are checked later, when
/// the challenge is computed.
pub fn validate_upgrade(request: &Request) -> Result<UpgradeKeys, HandshakeError> {
    require_exact(request, "Connection", "Upgrade")?;
    require_exact(request, "Upgrade", "WebSocket")?;
    let origin = require_present(request, "Origin")?.to_string();
    let key1 = require_present(request, "Sec-WebSocket-Key1")?.to_string();
    let key2 = require_present(request, "Sec-WebSocket-Key2")?.to_string();
    Ok(UpgradeKeys { origin, key1, key2 })
}

/// Format the advertised location URI: scheme from the transport variant,
/// then host, port, and the request path, verbatim. No normalization and
/// no default-port elision; the port always appears.
pub fn location(kind: TransportKind, host: &str, port: u16, path: &str) -> String {
    format!("{}://{}:{}{}", kind.scheme(), host, port, path)
}

/// Write the 101 protocol-switch response.
///
/// The head carries the upgrade tokens, the advertised location, and the
/// echoed origin; the body is the raw 16-byte challenge. Once these bytes
/// are flushed the stream speaks frames, not HTTP.
pub fn write_accept_response<W: Write>(
    writer: &mut W,
    handshake: &Handshake,
    location: &str,
) -> io::Result<()> {
    write!(
        writer,
        "HTTP/1.1 101 WebSocket Protocol Handshake\r\n\
         Connection: Upgrade\r\n\
         Upgrade: WebSocket\r\n\
         Sec-WebSocket-Location: {}\r\n\
         Sec-WebSocket-Origin: {}\r\n\
         \r\n",
        location,
        handshake.origin()
    )?;
    writer.write_all(handshake.challenge())?;
    writer.flush()
}

/// Write the refusal response: the status line alone, no headers, no
/// body. Used for every pre-switch failure; the caller closes the stream
/// right after.
pub fn write_bad_request<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n")?;
    writer.flush()
}

// ---------------------------------------------------------------------------
