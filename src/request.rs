//! Upgrade request reading and header access.
//!
//! The handshake needs the request line, the header list, and then exactly
//! 8 raw key bytes from the body. Clients of this protocol revision
//! pipeline the raw key (and sometimes early frames) straight behind the
//! blank line, so lines are read one byte at a time rather than through a
//! buffered reader: nothing past the line being read may be pulled out of
//! the stream.
//!
//! - [`Request`]: parsed method, path, and headers
//! - [`read_request`]: head parsing up to (and including) the blank line
//! - [`read_key3`]: the 8 raw body bytes that follow the head

use std::io::{self, Read};

use crate::error::HandshakeError;

/// A parsed upgrade request: method, path, and headers in arrival order.
///
/// Handlers receive an owned `Request` at initialization and may hand back
/// a rewritten one; the connection then threads that value through every
/// later handler call.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl Request {
    /// Assemble a request from parts (rewrites, tests).
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        headers: Vec<(String, String)>,
    ) -> Self {
        Request {
            method: method.into(),
            path: path.into(),
            headers,
        }
    }

    /// The request method, verbatim.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request path, verbatim and unnormalized.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Look up a header value; the name comparison is case-insensitive,
    /// the returned value is untouched. First match in arrival order wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All headers in arrival order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// Read one CRLF-terminated line, one byte at a time.
fn read_line<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Read and parse the request line and headers from `reader`.
///
/// Consumption stops exactly at the blank line; the raw key bytes and any
/// pipelined frame data stay in the stream. Header lines without a colon
/// are skipped.
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request, HandshakeError> {
    // 1. Request line: "GET /path HTTP/1.1"
    let request_line = read_line(reader)?;
    let parts: Vec<&str> = request_line.splitn(3, ' ').collect();
    if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(HandshakeError::BadRequestLine);
    }
    let method = parts[0].to_string();
    let path = parts[1].to_string();

    // 2. Headers until the blank line
    let mut headers: Vec<(String, String)> = Vec::new();
    loop {
        let line = read_line(reader)?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(Request { method, path, headers })
}

/// Read exactly the 8 raw key bytes that follow the request head.
pub fn read_key3<R: Read>(reader: &mut R) -> Result<[u8; 8], HandshakeError> {
    let mut key3 = [0u8; 8];
    reader.read_exact(&mut key3)?;
    Ok(key3)
}

// ---------------------------------------------------------------------------
