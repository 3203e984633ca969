//! Legacy WebSocket frame codec (draft-76 framing).
//!
//! Frames carry one payload between a 0x00 start marker and a 0xFF
//! terminator. There is no length field, no masking, and no frame type
//! beyond the single delimited kind; a graceful close is the two-byte
//! sentinel 0xFF 0x00 instead of a frame.
//!
//! - [`encode_frame`]: wrap a payload in frame delimiters
//! - [`decode_frame`]: ordered-check decoder over the pending bytes
//! - [`PendingBuffer`]: received-but-unconsumed bytes between reads
//!
//! A payload containing 0xFF cannot be represented; the framing has no
//! escape mechanism. That limit is inherent to this protocol revision and
//! is not worked around here.

/// Marker byte opening every supported frame.
pub const FRAME_START: u8 = 0x00;
/// Terminator byte ending every supported frame.
pub const FRAME_END: u8 = 0xFF;
/// Two-byte sequence signaling a graceful close in either direction.
pub const CLOSING_SENTINEL: [u8; 2] = [0xFF, 0x00];

/// Outcome of one decode pass over the front of the pending buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame: its payload, and how many buffered bytes it spans
    /// (start marker + payload + terminator).
    Frame { payload: Vec<u8>, consumed: usize },
    /// Not enough bytes to decide; read more and retry.
    Incomplete,
    /// The peer sent the closing sentinel.
    Close,
    /// The leading byte is not a supported frame marker.
    Malformed(u8),
}

/// Decode at most one frame from the front of `buf`.
///
/// Checks apply in a fixed order:
///
/// 1. A buffer beginning 0xFF 0x00 is a peer close, regardless of length
///    or anything after the sentinel.
/// 2. Fewer than 3 bytes cannot hold a decodable frame: incomplete.
/// 3. A 0x00 marker: scan for the first 0xFF after it. No terminator yet
///    means the peer may still be streaming the frame, so the result is
///    incomplete, never an error. The scan is unbounded; a peer that
///    never sends 0xFF grows the buffer without limit.
/// 4. Any other leading byte is malformed. No other frame type exists in
///    this protocol revision, so there is nothing to skip to.
pub fn decode_frame(buf: &[u8]) -> Decoded {
    if buf.starts_with(&CLOSING_SENTINEL) {
        return Decoded::Close;
    }
    if buf.len() < 3 {
        return Decoded::Incomplete;
    }
    match buf[0] {
        FRAME_START => match buf[1..].iter().position(|&b| b == FRAME_END) {
            Some(offset) => {
                // Index of the terminator within `buf`.
                let end = 1 + offset;
                Decoded::Frame {
                    payload: buf[1..end].to_vec(),
                    consumed: end + 1,
                }
            }
            None => Decoded::Incomplete,
        },
        marker => Decoded::Malformed(marker),
    }
}

/// Wrap `payload` in frame delimiters: 0x00, the payload bytes, 0xFF.
///
/// No escaping is performed; see the module docs for the 0xFF limit.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(FRAME_START);
    frame.extend_from_slice(payload);
    frame.push(FRAME_END);
    frame
}

/// Bytes received from the transport but not yet consumed as frames.
///
/// Grows by whole reads and shrinks only at frame boundaries, so a frame
/// split across reads reassembles and a read carrying several frames
/// drains one decode at a time. Unbounded while a terminator is
/// outstanding (see [`decode_frame`]).
#[derive(Debug, Default)]
pub struct PendingBuffer {
    bytes: Vec<u8>,
}

impl PendingBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        PendingBuffer { bytes: Vec::new() }
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// The unconsumed bytes, for decoding.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Drop `n` consumed bytes from the front (a decoded frame's span).
    pub fn consume(&mut self, n: usize) {
        self.bytes.drain(..n);
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wraps_payload() {
        assert_eq!(encode_frame(b"hi"), vec![0x00, b'h', b'i', 0xFF]);
    }

    #[test]
    fn test_encode_empty_payload() {
        assert_eq!(encode_frame(b""), vec![0x00, 0xFF]);
    }

    #[test]
    fn test_decode_recovers_encoded_payload() {
        // Every byte value except the terminator can ride in a payload,
        // including 0x00.
        let payload: Vec<u8> = (0x00..=0xFE).collect();
        let wire = encode_frame(&payload);
        match decode_frame(&wire) {
            Decoded::Frame { payload: got, consumed } => {
                assert_eq!(got, payload);
                assert_eq!(consumed, wire.len());
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_short_buffers_are_incomplete() {
        // Under 3 bytes nothing is decodable, not even a lone bad marker
        // or a start-terminator pair.
        assert_eq!(decode_frame(&[]), Decoded::Incomplete);
        assert_eq!(decode_frame(&[0x00]), Decoded::Incomplete);
        assert_eq!(decode_frame(&[0x7F]), Decoded::Incomplete);
        assert_eq!(decode_frame(&[0x00, 0xFF]), Decoded::Incomplete);
    }

    #[test]
    fn test_closing_sentinel_detected() {
        assert_eq!(decode_frame(&[0xFF, 0x00]), Decoded::Close);
    }

    #[test]
    fn test_closing_sentinel_wins_over_length_check() {
        // Exactly two bytes, still a close; and trailing bytes after the
        // sentinel change nothing.
        assert_eq!(decode_frame(&CLOSING_SENTINEL), Decoded::Close);
        assert_eq!(decode_frame(&[0xFF, 0x00, 0x00, b'x', 0xFF]), Decoded::Close);
    }

    #[test]
    fn test_unterminated_frame_is_incomplete() {
        assert_eq!(decode_frame(&[0x00, b'a', b'b', b'c']), Decoded::Incomplete);
    }

    #[test]
    fn test_unsupported_marker_is_malformed() {
        assert_eq!(decode_frame(&[0x01, b'a', 0xFF]), Decoded::Malformed(0x01));
        // 0xFF not followed by 0x00 is not the sentinel, and not a frame.
        assert_eq!(decode_frame(&[0xFF, 0x01, 0x00]), Decoded::Malformed(0xFF));
    }

    #[test]
    fn test_decode_leaves_following_frame_untouched() {
        let mut wire = encode_frame(b"one");
        wire.extend_from_slice(&encode_frame(b"two"));
        match decode_frame(&wire) {
            Decoded::Frame { payload, consumed } => {
                assert_eq!(payload, b"one");
                assert_eq!(
                    decode_frame(&wire[consumed..]),
                    Decoded::Frame { payload: b"two".to_vec(), consumed: 5 }
                );
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_frame_decodes_once_length_allows() {
        // 0x00 0xFF alone sits under the length floor; a third byte makes
        // the empty frame decodable and stays in the buffer.
        match decode_frame(&[0x00, 0xFF, 0x42]) {
            Decoded::Frame { payload, consumed } => {
                assert!(payload.is_empty());
                assert_eq!(consumed, 2);
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_pending_buffer_reassembles_split_frame() {
        let mut pending = PendingBuffer::new();
        pending.extend(&[0x00]);
        assert_eq!(decode_frame(pending.as_slice()), Decoded::Incomplete);
        pending.extend(b"hi");
        assert_eq!(decode_frame(pending.as_slice()), Decoded::Incomplete);
        pending.extend(&[0xFF]);
        match decode_frame(pending.as_slice()) {
            Decoded::Frame { payload, consumed } => {
                assert_eq!(payload, b"hi");
                pending.consume(consumed);
                assert!(pending.is_empty());
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn test_pending_buffer_drains_in_frame_steps() {
        let mut pending = PendingBuffer::new();
        let mut wire = encode_frame(b"a");
        wire.extend_from_slice(&encode_frame(b"b"));
        pending.extend(&wire);
        assert_eq!(pending.len(), 6);
        pending.consume(3);
        assert_eq!(
            decode_frame(pending.as_slice()),
            Decoded::Frame { payload: b"b".to_vec(), consumed: 3 }
        );
    }
}
