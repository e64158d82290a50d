//! Minimal RLP encoder/decoder
//!
//! Implements the subset of RLP the legacy transaction format needs:
//! byte strings, unsigned integers and flat lists. Decoding is strict:
//! every non-canonical encoding of a valid value is rejected with a
//! [`CodecError`] instead of being silently accepted, since two byte
//! representations of the same transaction would hash (and therefore
//! sign) differently.

use thiserror::Error;

/// Errors raised while encoding or decoding wire bytes
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Truncated input at byte {at}: {context}")]
    Truncated { at: usize, context: &'static str },
    #[error("Non-canonical encoding at byte {at}: {reason}")]
    NonCanonical { at: usize, reason: &'static str },
    #[error("Field `{field}` overflows its bound of {max_bytes} bytes")]
    IntegerOverflow {
        field: &'static str,
        max_bytes: usize,
    },
    #[error("Field `{field}` has invalid length {got}")]
    InvalidFieldLength { field: &'static str, got: usize },
    #[error("Expected a list of {expected} items, got {got}")]
    WrongItemCount { expected: usize, got: usize },
    #[error("{count} trailing bytes after the end of the payload")]
    TrailingBytes { count: usize },
    #[error("Missing replay protection: v={v} predates EIP-155")]
    MissingReplayProtection { v: u64 },
    #[error("Expected a list, found a string item")]
    ExpectedList,
    #[error("Expected a string item, found a list")]
    ExpectedString,
}

// --- encoding ---------------------------------------------------------

/// Minimal big-endian representation of an integer (empty for zero)
fn trim_be(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn encode_length(len: usize, short_offset: u8) -> Vec<u8> {
    if len <= 55 {
        vec![short_offset + len as u8]
    } else {
        let len_bytes = trim_be(&len.to_be_bytes()).to_vec();
        let mut out = vec![short_offset + 55 + len_bytes.len() as u8];
        out.extend_from_slice(&len_bytes);
        out
    }
}

/// Encode a byte string
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        return vec![data[0]];
    }
    let mut out = encode_length(data.len(), 0x80);
    out.extend_from_slice(data);
    out
}

/// Encode an unsigned integer as its minimal big-endian byte string
pub fn encode_u64(value: u64) -> Vec<u8> {
    encode_bytes(trim_be(&value.to_be_bytes()))
}

/// Encode an unsigned 128-bit integer
pub fn encode_u128(value: u128) -> Vec<u8> {
    encode_bytes(trim_be(&value.to_be_bytes()))
}

/// Encode a list from already-encoded items
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(Vec::len).sum();
    let mut out = encode_length(payload_len, 0xc0);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

// --- decoding ---------------------------------------------------------

/// Strict sequential decoder over an RLP byte buffer
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Decoder { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                at: self.pos,
                context,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Decode a length that follows a long-form prefix, rejecting
    /// leading zeros and values that fit the short form.
    fn long_length(&mut self, len_of_len: usize, context: &'static str) -> Result<usize, CodecError> {
        let at = self.pos;
        let len_bytes = self.take(len_of_len, context)?;
        if len_bytes[0] == 0 {
            return Err(CodecError::NonCanonical {
                at,
                reason: "length has leading zero bytes",
            });
        }
        if len_bytes.len() > std::mem::size_of::<usize>() {
            return Err(CodecError::Truncated { at, context });
        }
        let mut len: usize = 0;
        for &b in len_bytes {
            len = (len << 8) | b as usize;
        }
        if len <= 55 {
            return Err(CodecError::NonCanonical {
                at,
                reason: "long-form length fits short form",
            });
        }
        Ok(len)
    }

    /// Decode the next item as a byte string
    pub fn next_bytes(&mut self, field: &'static str) -> Result<&'a [u8], CodecError> {
        let at = self.pos;
        let prefix = self.take(1, field)?[0];
        match prefix {
            0x00..=0x7f => Ok(&self.data[at..at + 1]),
            0x80..=0xb7 => {
                let len = (prefix - 0x80) as usize;
                let payload = self.take(len, field)?;
                if len == 1 && payload[0] < 0x80 {
                    return Err(CodecError::NonCanonical {
                        at,
                        reason: "single byte below 0x80 must encode as itself",
                    });
                }
                Ok(payload)
            }
            0xb8..=0xbf => {
                let len = self.long_length((prefix - 0xb7) as usize, field)?;
                self.take(len, field)
            }
            _ => Err(CodecError::ExpectedString),
        }
    }

    /// Decode the next item as an unsigned integer of at most
    /// `max_bytes` bytes, rejecting leading zeros
    fn next_uint(&mut self, field: &'static str, max_bytes: usize) -> Result<u128, CodecError> {
        let at = self.pos;
        let bytes = self.next_bytes(field)?;
        if !bytes.is_empty() && bytes[0] == 0 {
            return Err(CodecError::NonCanonical {
                at,
                reason: "integer has leading zero bytes",
            });
        }
        if bytes.len() > max_bytes {
            return Err(CodecError::IntegerOverflow { field, max_bytes });
        }
        let mut value: u128 = 0;
        for &b in bytes {
            value = (value << 8) | b as u128;
        }
        Ok(value)
    }

    pub fn next_u64(&mut self, field: &'static str) -> Result<u64, CodecError> {
        Ok(self.next_uint(field, 8)? as u64)
    }

    pub fn next_u128(&mut self, field: &'static str) -> Result<u128, CodecError> {
        self.next_uint(field, 16)
    }

    /// Decode the header of a list, returning a decoder scoped to its
    /// payload and leaving this decoder positioned after the list
    pub fn next_list(&mut self, context: &'static str) -> Result<Decoder<'a>, CodecError> {
        let prefix = self.take(1, context)?[0];
        let len = match prefix {
            0xc0..=0xf7 => (prefix - 0xc0) as usize,
            0xf8..=0xff => self.long_length((prefix - 0xf7) as usize, context)?,
            _ => return Err(CodecError::ExpectedList),
        };
        let payload = self.take(len, context)?;
        Ok(Decoder::new(payload))
    }

    /// Advance past one item of any kind
    fn skip_item(&mut self, context: &'static str) -> Result<(), CodecError> {
        let prefix = self.take(1, context)?[0];
        let len = match prefix {
            0x00..=0x7f => 0,
            0x80..=0xb7 => (prefix - 0x80) as usize,
            0xb8..=0xbf => self.long_length((prefix - 0xb7) as usize, context)?,
            0xc0..=0xf7 => (prefix - 0xc0) as usize,
            0xf8..=0xff => self.long_length((prefix - 0xf7) as usize, context)?,
        };
        self.take(len, context)?;
        Ok(())
    }

    /// Count the items in the remaining payload without consuming them
    pub fn item_count(&self) -> Result<usize, CodecError> {
        let mut scan = Decoder::new(&self.data[self.pos..]);
        let mut count = 0;
        while !scan.is_empty() {
            scan.skip_item("item count")?;
            count += 1;
        }
        Ok(count)
    }

    /// Fail if any input remains
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                count: self.remaining(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_small_values() {
        assert_eq!(encode_u64(0), vec![0x80]);
        assert_eq!(encode_u64(1), vec![0x01]);
        assert_eq!(encode_u64(0x7f), vec![0x7f]);
        assert_eq!(encode_u64(0x80), vec![0x81, 0x80]);
        assert_eq!(encode_u64(1024), vec![0x82, 0x04, 0x00]);
    }

    #[test]
    fn test_encode_strings() {
        assert_eq!(encode_bytes(b""), vec![0x80]);
        assert_eq!(encode_bytes(b"a"), vec![b'a']);
        assert_eq!(
            encode_bytes(b"dog"),
            vec![0x83, b'd', b'o', b'g']
        );
        // 56-byte string crosses into long form
        let long = vec![0xaa; 56];
        let encoded = encode_bytes(&long);
        assert_eq!(&encoded[..2], &[0xb8, 56]);
        assert_eq!(encoded.len(), 58);
    }

    #[test]
    fn test_encode_list_shapes() {
        // [ "cat", "dog" ]
        let encoded = encode_list(&[encode_bytes(b"cat"), encode_bytes(b"dog")]);
        assert_eq!(
            encoded,
            vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']
        );
        // empty list
        assert_eq!(encode_list(&[]), vec![0xc0]);
    }

    #[test]
    fn test_round_trip_values() {
        for value in [0u64, 1, 127, 128, 256, 1024, u64::MAX] {
            let encoded = encode_list(&[encode_u64(value)]);
            let mut outer = Decoder::new(&encoded);
            let mut list = outer.next_list("test").unwrap();
            assert_eq!(list.next_u64("value").unwrap(), value);
            list.finish().unwrap();
            outer.finish().unwrap();
        }
    }

    #[test]
    fn test_item_count_spans_mixed_items() {
        let bytes = encode_list(&[
            encode_u64(7),
            encode_bytes(&[0xaa; 56]),
            encode_list(&[encode_bytes(b"cat")]),
        ]);
        let mut outer = Decoder::new(&bytes);
        let list = outer.next_list("test").unwrap();
        assert_eq!(list.item_count().unwrap(), 3);

        // Counting does not consume
        assert_eq!(list.remaining(), bytes.len() - 2);
    }

    #[test]
    fn test_rejects_leading_zero_integer() {
        // 0x82 0x00 0x01 is a non-minimal encoding of 1
        let bytes = encode_list(&[vec![0x82, 0x00, 0x01]]);
        let mut outer = Decoder::new(&bytes);
        let mut list = outer.next_list("test").unwrap();
        assert!(matches!(
            list.next_u64("value"),
            Err(CodecError::NonCanonical { .. })
        ));
    }

    #[test]
    fn test_rejects_wrapped_single_byte() {
        // 0x81 0x05 must be just 0x05
        let bytes = encode_list(&[vec![0x81, 0x05]]);
        let mut outer = Decoder::new(&bytes);
        let mut list = outer.next_list("test").unwrap();
        assert!(matches!(
            list.next_bytes("value"),
            Err(CodecError::NonCanonical { .. })
        ));
    }

    #[test]
    fn test_rejects_long_form_that_fits_short() {
        // 0xb8 0x03 "dog" should be 0x83 "dog"
        let bytes = encode_list(&[vec![0xb8, 0x03, b'd', b'o', b'g']]);
        let mut outer = Decoder::new(&bytes);
        let mut list = outer.next_list("test").unwrap();
        assert!(matches!(
            list.next_bytes("value"),
            Err(CodecError::NonCanonical { .. })
        ));
    }

    #[test]
    fn test_rejects_truncation() {
        let mut bytes = encode_list(&[encode_bytes(&[0xaa; 40])]);
        bytes.truncate(bytes.len() - 3);
        let mut outer = Decoder::new(&bytes);
        assert!(matches!(
            outer.next_list("test"),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = encode_list(&[encode_u64(7)]);
        bytes.push(0x00);
        let mut outer = Decoder::new(&bytes);
        let mut list = outer.next_list("test").unwrap();
        list.next_u64("value").unwrap();
        assert!(matches!(
            outer.finish(),
            Err(CodecError::TrailingBytes { count: 1 })
        ));
    }

    #[test]
    fn test_integer_overflow_reports_field() {
        let bytes = encode_list(&[encode_bytes(&[0xff; 9])]);
        let mut outer = Decoder::new(&bytes);
        let mut list = outer.next_list("test").unwrap();
        assert_eq!(
            list.next_u64("nonce"),
            Err(CodecError::IntegerOverflow {
                field: "nonce",
                max_bytes: 8
            })
        );
    }
}
