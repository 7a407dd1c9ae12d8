//! Framing for journal files.
//!
//! Each record is a self-checking frame:
//!
//! ```text
//! [version: 1 byte][length: 4 bytes LE][payload: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! Files start with a 4-byte magic and a version byte.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

const FRAME_VERSION: u8 = 1;

/// Magic bytes identifying term journal files.
pub const MAGIC: [u8; 4] = *b"TRMJ";

/// Frames larger than this are treated as corruption.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Bytes added around every payload.
pub const FRAME_OVERHEAD: usize = 1 + 4 + 4;

/// Bytes taken by the file header.
pub const HEADER_LEN: u64 = 5;

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn invalid(message: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, message)
}

/// Encodes a value as one frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let payload =
        serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(invalid(format!(
            "frame of {} bytes exceeds maximum {MAX_FRAME_BYTES}",
            payload.len()
        )));
    }
    let len =
        u32::try_from(payload.len()).map_err(|_| invalid("frame length overflow".to_string()))?;

    let mut out = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    out.push(FRAME_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&checksum(&payload).to_le_bytes());
    Ok(out)
}

/// Decodes one frame, returning the value and the number of bytes consumed.
///
/// A frame cut short by end of file yields `ErrorKind::UnexpectedEof`;
/// a damaged frame yields `ErrorKind::InvalidData`.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<(T, u64)> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != FRAME_VERSION {
        return Err(invalid(format!(
            "unsupported frame version: {} (expected {FRAME_VERSION})",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(invalid(format!("frame size {len} exceeds maximum {MAX_FRAME_BYTES}")));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&payload);
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    let value = serde_json::from_slice(&payload)
        .map_err(|e| invalid(format!("deserialization failed: {e}")))?;
    Ok((value, (FRAME_OVERHEAD + len) as u64))
}

pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FRAME_VERSION])
}

/// Reads and validates the file header, returning its version byte.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(invalid(format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}")));
    }
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    Ok(version[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_reports_consumed_bytes() {
        let encoded = encode(&vec!["cat", "dog"]).unwrap();
        let mut cursor = Cursor::new(encoded.clone());
        let (decoded, consumed): (Vec<String>, u64) = decode(&mut cursor).unwrap();
        assert_eq!(decoded, vec!["cat".to_string(), "dog".to_string()]);
        assert_eq!(consumed, encoded.len() as u64);
    }

    #[test]
    fn test_detects_flipped_payload_byte() {
        let mut encoded = encode(&"some term text").unwrap();
        encoded[7] ^= 0xFF;
        let err = decode::<String>(&mut Cursor::new(encoded)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_short_frame_is_eof() {
        let encoded = encode(&"abc").unwrap();
        let cut = encoded[..encoded.len() - 2].to_vec();
        let err = decode::<String>(&mut Cursor::new(cut)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_rejects_oversized_length() {
        let mut bad = vec![FRAME_VERSION];
        bad.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = decode::<String>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header_rejects_foreign_file() {
        let err = read_header(&mut Cursor::new(b"WAL0\x01".to_vec())).unwrap_err();
        assert!(err.to_string().contains("invalid magic"));

        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        assert_eq!(read_header(&mut Cursor::new(buf)).unwrap(), FRAME_VERSION);
    }
}
