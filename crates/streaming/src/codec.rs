//! Frame codec: DEFLATE-compress raster bytes, then base64.
//!
//! The wire payload carries no image MIME prefix; the client prepends the
//! data-URL prefix after decompression. Raster quality is baked in at the
//! screenshot step, so the codec treats the input as an opaque blob.

use std::io::{Read, Write};

use {
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder},
};

use crate::error::{Error, Result};

/// Fixed moderate compression level.
const COMPRESSION_LEVEL: u32 = 6;

/// An encoded frame payload plus the compressed byte length (pre-base64).
#[derive(Debug, Clone)]
pub struct Encoded {
    pub payload: String,
    pub byte_len: usize,
}

/// Compress `raw` with zlib DEFLATE and base64-encode the result.
pub fn encode(raw: &[u8]) -> Result<Encoded> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(raw.len() / 2),
        Compression::new(COMPRESSION_LEVEL),
    );
    encoder.write_all(raw)?;
    let compressed = encoder.finish()?;
    let byte_len = compressed.len();
    Ok(Encoded {
        payload: BASE64.encode(compressed),
        byte_len,
    })
}

/// Inverse of [`encode`]: base64-decode, then inflate.
pub fn decode(payload: &str) -> Result<Vec<u8>> {
    let compressed = BASE64.decode(payload)?;
    let mut decoder = ZlibDecoder::new(&compressed[..]);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| Error::Codec(format!("inflate failed: {e}")))?;
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_simple() {
        let raw = b"\xff\xd8\xff\xe0 jpeg-ish bytes \x00\x01\x02";
        let encoded = encode(raw).unwrap();
        assert!(encoded.byte_len > 0);
        assert_eq!(decode(&encoded.payload).unwrap(), raw);
    }

    #[test]
    fn round_trip_empty() {
        let encoded = encode(b"").unwrap();
        assert_eq!(decode(&encoded.payload).unwrap(), b"");
    }

    #[test]
    fn round_trip_single_byte() {
        let encoded = encode(&[0x7f]).unwrap();
        assert_eq!(decode(&encoded.payload).unwrap(), vec![0x7f]);
    }

    #[test]
    fn round_trip_large_repetitive() {
        // Repetitive data compresses well below the input size.
        let raw: Vec<u8> = (0..64 * 1024).map(|i| (i % 7) as u8).collect();
        let encoded = encode(&raw).unwrap();
        assert!(encoded.byte_len < raw.len());
        assert_eq!(decode(&encoded.payload).unwrap(), raw);
    }

    #[test]
    fn round_trip_all_byte_values() {
        let raw: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let encoded = encode(&raw).unwrap();
        assert_eq!(decode(&encoded.payload).unwrap(), raw);
    }

    #[test]
    fn payload_is_base64() {
        let encoded = encode(b"hello").unwrap();
        assert!(BASE64.decode(&encoded.payload).is_ok());
        // No data-URL prefix on the wire.
        assert!(!encoded.payload.starts_with("data:"));
    }

    #[test]
    fn decode_rejects_bad_base64() {
        match decode("not base64 at all!!!") {
            Err(Error::Codec(_)) => {},
            other => panic!("expected codec error, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_non_zlib() {
        // Valid base64 of bytes that are not a zlib stream.
        let bogus = BASE64.encode(b"plain text, not compressed");
        assert!(decode(&bogus).is_err());
    }
}
