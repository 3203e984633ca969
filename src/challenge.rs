//! Numeric-key challenge computation for the draft-76 handshake.
//!
//! The client proves protocol support with three keys: two header strings
//! carrying decimal digits and spaces, and 8 raw bytes from the request
//! body. Each header key reduces to a 32-bit word (its digits divided by
//! its space count); the server's proof is the MD5 digest of both words
//! and the raw key, sent back as the 101 response body.
//!
//! - [`key_to_integer`]: digits-and-spaces reduction of one header key
//! - [`challenge`]: the full 16-byte response body

use md5::{Digest, Md5};

use crate::error::HandshakeError;

/// Reduce one textual key to its 32-bit value.
///
/// Concatenates the decimal digits of `key` in order, divides by the
/// number of space characters (integer division, remainder discarded),
/// and returns the quotient. Every other character is ignored. A key with
/// no spaces, no digits, or a quotient too large for the 4-byte challenge
/// field is malformed.
pub fn key_to_integer(key: &str) -> Result<u32, HandshakeError> {
    let mut digits: u64 = 0;
    let mut saw_digit = false;
    let mut spaces: u64 = 0;
    for c in key.chars() {
        if let Some(d) = c.to_digit(10) {
            saw_digit = true;
            digits = digits
                .checked_mul(10)
                .and_then(|n| n.checked_add(u64::from(d)))
                .ok_or(HandshakeError::MalformedKey)?;
        } else if c == ' ' {
            spaces += 1;
        }
    }
    if spaces == 0 || !saw_digit {
        return Err(HandshakeError::MalformedKey);
    }
    u32::try_from(digits / spaces).map_err(|_| HandshakeError::MalformedKey)
}

/// Compute the 16-byte handshake challenge.
///
/// Both key quotients are encoded as 4-byte big-endian words and digested
/// together with the raw 8-byte third key. Distinct keys can reduce to the
/// same quotient (the division truncates); the proof is bitwise equality
/// of the digest, nothing stronger.
pub fn challenge(key1: &str, key2: &str, key3: &[u8; 8]) -> Result<[u8; 16], HandshakeError> {
    let part1 = key_to_integer(key1)?;
    let part2 = key_to_integer(key2)?;

    let mut hasher = Md5::new();
    hasher.update(part1.to_be_bytes());
    hasher.update(part2.to_be_bytes());
    hasher.update(key3);
    Ok(hasher.finalize().into())
}

// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_reduction_examples() {
        // "1 2 3": digits 123, two spaces, quotient 61.
        assert_eq!(key_to_integer("1 2 3").unwrap(), 61);
        // "4 0 2": digits 402, two spaces, quotient 201.
        assert_eq!(key_to_integer("4 0 2").unwrap(), 201);
    }

    #[test]
    fn test_key_reduction_ignores_other_characters() {
        // Letters and punctuation contribute nothing; only digits and
        // spaces count, in order.
        assert_eq!(key_to_integer("A1 bc2!3 z").unwrap(), 61);
    }

    #[test]
    fn test_key_without_spaces_is_malformed() {
        assert!(matches!(
            key_to_integer("123"),
            Err(HandshakeError::MalformedKey)
        ));
    }

    #[test]
    fn test_key_without_digits_is_malformed() {
        assert!(matches!(
            key_to_integer("   "),
            Err(HandshakeError::MalformedKey)
        ));
    }

    #[test]
    fn test_digit_overflow_is_malformed() {
        let key = format!("{} ", "9".repeat(30));
        assert!(matches!(
            key_to_integer(&key),
            Err(HandshakeError::MalformedKey)
        ));
    }

    #[test]
    fn test_quotient_must_fit_four_bytes() {
        // 5000000000 / 1 exceeds u32.
        assert!(matches!(
            key_to_integer("5000000000 "),
            Err(HandshakeError::MalformedKey)
        ));
    }

    #[test]
    fn test_division_truncates() {
        // 154/1 and 309/2 reduce to the same quotient.
        assert_eq!(
            key_to_integer("154 ").unwrap(),
            key_to_integer("309  ").unwrap()
        );
    }

    #[test]
    fn test_challenge_digest_layout() {
        // Quotients 61 and 201 encode as 00 00 00 3D and 00 00 00 C9; the
        // challenge must be the MD5 of those words plus the raw key.
        let key3 = *b"12345678";
        let got = challenge("1 2 3", "4 0 2", &key3).unwrap();

        let mut hasher = Md5::new();
        hasher.update([0x00, 0x00, 0x00, 0x3D]);
        hasher.update([0x00, 0x00, 0x00, 0xC9]);
        hasher.update(key3);
        let expected: [u8; 16] = hasher.finalize().into();

        assert_eq!(got, expected);
    }

    #[test]
    fn test_challenge_uses_raw_key_bytes() {
        // key3 is digested verbatim, including non-printable bytes.
        let a = challenge("1 2 3", "4 0 2", b"\x00\x01\x02\x03\x04\x05\x06\x07").unwrap();
        let b = challenge("1 2 3", "4 0 2", b"\x00\x01\x02\x03\x04\x05\x06\x08").unwrap();
        assert_ne!(a, b, "different raw keys must change the digest");
    }

    #[test]
    fn test_challenge_propagates_malformed_keys() {
        assert!(challenge("no-spaces", "4 0 2", b"12345678").is_err());
        assert!(challenge("1 2 3", "no-spaces", b"12345678").is_err());
    }
}
