//! Content fingerprinting using BLAKE3
//!
//! Pool entries are addressed by the BLAKE3 hash of their bytes. Two files
//! with equal fingerprints are required to have equal contents, so the
//! fingerprint doubles as the deduplication key.

use std::fmt;
use std::io::{self, Read};

/// Length of a hex-encoded fingerprint.
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// A 256-bit BLAKE3 content fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash a byte slice.
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash everything a reader yields.
    ///
    /// Reads in 64 KiB chunks until the reader reports end of stream.
    pub fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        let mut buffer = [0u8; 64 * 1024];

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(Self(*hasher.finalize().as_bytes()))
    }

    /// Parse a 64-character hex string.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != FINGERPRINT_HEX_LEN {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Some(Self(bytes))
    }

    /// Hex-encode the fingerprint.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(FINGERPRINT_HEX_LEN);
        for b in &self.0 {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Fingerprint({})", &hex[..16])
    }
}

// Display prints the full hex form: the fingerprint is embedded in pool
// identifiers and must round-trip through them.
impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = Fingerprint::from_bytes(b"hello");
        let b = Fingerprint::from_bytes(b"hello");
        assert_eq!(a, b);

        let c = Fingerprint::from_bytes(b"Hello");
        assert_ne!(a, c);
    }

    #[test]
    fn test_hex_round_trip() {
        let fp = Fingerprint::from_bytes(b"round trip");
        let hex = fp.to_hex();
        assert_eq!(hex.len(), FINGERPRINT_HEX_LEN);
        assert_eq!(Fingerprint::from_hex(&hex), Some(fp));
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(Fingerprint::from_hex("abc").is_none());
        assert!(Fingerprint::from_hex(&"zz".repeat(32)).is_none());
    }

    #[test]
    fn test_from_reader_matches_from_bytes() {
        let data = vec![0xABu8; 200 * 1024];
        let mut cursor = std::io::Cursor::new(data.clone());
        let streamed = Fingerprint::from_reader(&mut cursor).unwrap();
        assert_eq!(streamed, Fingerprint::from_bytes(&data));
    }
}
