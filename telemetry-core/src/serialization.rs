//! Canonical CBOR for the envelope container.
//!
//! Two encoders given the same envelope must produce the same bytes, so the
//! output is checked against RFC 8949 §4.2 deterministic encoding:
//! - no indefinite-length items
//! - every length and integer head in its shortest form
//!
//! Decoding rejects trailing bytes after the top-level item.

use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use thiserror::Error;

/// Nesting deeper than this is rejected.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("CBOR encoding error: {0}")]
    Encode(#[from] ciborium::ser::Error<io::Error>),

    #[error("CBOR decoding error: {0}")]
    Decode(#[from] ciborium::de::Error<io::Error>),

    #[error("Non-canonical CBOR: {0}")]
    NonCanonical(&'static str),

    #[error("Trailing bytes after CBOR item: {0}")]
    TrailingBytes(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SerializationError>;

/// Serialize a value to canonical CBOR bytes.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)?;
    verify_canonical(&buf)?;
    Ok(buf)
}

/// Deserialize a value from canonical CBOR bytes.
pub fn from_canonical_cbor<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    verify_canonical(bytes)?;
    let value = ciborium::from_reader(bytes)?;
    Ok(value)
}

/// Check that `bytes` holds exactly one item in canonical form.
pub fn verify_canonical(bytes: &[u8]) -> Result<()> {
    let mut cursor = io::Cursor::new(bytes);
    verify_item(&mut cursor, 0)?;
    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
        return Err(SerializationError::TrailingBytes(bytes.len() - consumed));
    }
    Ok(())
}

fn verify_item<R: Read>(reader: &mut R, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(SerializationError::NonCanonical("nesting too deep"));
    }

    let mut head = [0u8; 1];
    reader.read_exact(&mut head)?;
    let major_type = head[0] >> 5;
    let additional_info = head[0] & 0x1F;

    if additional_info == 31 {
        return Err(SerializationError::NonCanonical("indefinite-length item"));
    }

    // Major type 7 carries floats and simple values, not lengths.
    if major_type == 7 {
        let skip = match additional_info {
            24 => 1,
            25 => 2,
            26 => 4,
            27 => 8,
            _ => 0,
        };
        io::copy(&mut reader.by_ref().take(skip), &mut io::sink())?;
        return Ok(());
    }

    let argument = read_argument(reader, additional_info)?;

    match major_type {
        0 | 1 => {}
        2 | 3 => {
            let len = usize::try_from(argument)
                .map_err(|_| SerializationError::NonCanonical("string too long"))?;
            let copied = io::copy(&mut reader.by_ref().take(argument), &mut io::sink())?;
            if copied as usize != len {
                return Err(SerializationError::Io(io::ErrorKind::UnexpectedEof.into()));
            }
        }
        4 => {
            for _ in 0..argument {
                verify_item(reader, depth + 1)?;
            }
        }
        5 => {
            for _ in 0..argument {
                verify_item(reader, depth + 1)?;
                verify_item(reader, depth + 1)?;
            }
        }
        6 => verify_item(reader, depth + 1)?,
        _ => {}
    }

    Ok(())
}

/// Read an item's argument, rejecting heads longer than necessary.
fn read_argument<R: Read>(reader: &mut R, additional_info: u8) -> Result<u64> {
    let (value, minimum) = match additional_info {
        0..=23 => return Ok(u64::from(additional_info)),
        24 => {
            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf)?;
            (u64::from(buf[0]), 24)
        }
        25 => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf)?;
            (u64::from(u16::from_be_bytes(buf)), 0x100)
        }
        26 => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            (u64::from(u32::from_be_bytes(buf)), 0x1_0000)
        }
        27 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            (u64::from_be_bytes(buf), 0x1_0000_0000)
        }
        _ => return Err(SerializationError::NonCanonical("reserved additional info")),
    };
    if value < minimum {
        return Err(SerializationError::NonCanonical("non-minimal length"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Frame {
        kind: String,
        seq: u64,
        #[serde(with = "crate::types::serde_byte_buf")]
        body: Vec<u8>,
    }

    fn frame() -> Frame {
        Frame {
            kind: "DEVICE_DATA".to_string(),
            seq: 70_000,
            body: vec![0xde, 0xad, 0xbe, 0xef],
        }
    }

    #[test]
    fn test_deterministic_and_decodable() {
        let bytes1 = to_canonical_cbor(&frame()).unwrap();
        let bytes2 = to_canonical_cbor(&frame()).unwrap();
        assert_eq!(bytes1, bytes2);

        let decoded: Frame = from_canonical_cbor(&bytes1).unwrap();
        assert_eq!(decoded, frame());
    }

    #[test]
    fn test_bytes_encoded_as_byte_string() {
        let bytes = to_canonical_cbor(&frame()).unwrap();
        // major type 2, length 4
        assert!(bytes.windows(5).any(|w| w == [0x44, 0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_rejects_indefinite_length() {
        // indefinite-length array [1]
        let result = verify_canonical(&[0x9f, 0x01, 0xff]);
        assert!(matches!(result, Err(SerializationError::NonCanonical(_))));
    }

    #[test]
    fn test_rejects_non_minimal_head() {
        // 10 encoded with a one-byte argument instead of inline
        let result = verify_canonical(&[0x18, 0x0a]);
        assert!(matches!(result, Err(SerializationError::NonCanonical("non-minimal length"))));
        assert!(verify_canonical(&[0x18, 0x18]).is_ok());
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = to_canonical_cbor(&frame()).unwrap();
        bytes.push(0x00);
        assert!(matches!(
            from_canonical_cbor::<Frame>(&bytes),
            Err(SerializationError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_rejects_truncated_input() {
        let bytes = to_canonical_cbor(&frame()).unwrap();
        assert!(verify_canonical(&bytes[..bytes.len() - 2]).is_err());
    }
}
