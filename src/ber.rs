//! Minimal BER primitives for the dereference control grammar.
//!
//! Only the handful of tags used by the control values are supported: universal
//! SEQUENCE, SET and OCTET STRING, plus constructed context-specific tags.
//! Lengths are definite, short or long form.

use std::fmt::Write as _;

use bytes::{Buf, Bytes};

/// Primitive OCTET STRING
pub const TAG_OCTET_STRING: u8 = 0x04;
/// Constructed SEQUENCE / SEQUENCE OF
pub const TAG_SEQUENCE: u8 = 0x30;
/// Constructed SET / SET OF
pub const TAG_SET: u8 = 0x31;
/// Constructed context-specific tag [0]
pub const TAG_CONTEXT_0: u8 = 0xA0;

const MAX_LENGTH_OCTETS: usize = 4;

/// BER encoding and decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BerError {
    #[error("input truncated at offset {offset}, {needed} more byte(s) needed")]
    Truncated { offset: usize, needed: usize },
    #[error("unexpected tag 0x{actual:02X} at offset {offset}, expected 0x{expected:02X}")]
    UnexpectedTag { offset: usize, expected: u8, actual: u8 },
    #[error("indefinite length at offset {offset} is not supported")]
    IndefiniteLength { offset: usize },
    #[error("length at offset {offset} uses {octets} octets")]
    LengthOverflow { offset: usize, octets: usize },
    #[error("element at offset {offset} ends at {end}, past the end of its container at {limit}")]
    Overrun { offset: usize, end: usize, limit: usize },
    #[error("unbalanced constructed element")]
    Unbalanced,
}

impl BerError {
    /// Returns true if the input ended before the element was complete
    pub fn is_truncated(&self) -> bool {
        matches!(self, BerError::Truncated { .. })
    }

    /// Byte offset of the failure, if it happened while reading
    pub fn offset(&self) -> Option<usize> {
        match self {
            BerError::Truncated { offset, .. }
            | BerError::UnexpectedTag { offset, .. }
            | BerError::IndefiniteLength { offset }
            | BerError::LengthOverflow { offset, .. }
            | BerError::Overrun { offset, .. } => Some(*offset),
            BerError::Unbalanced => None,
        }
    }
}

fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let mut encoded = Vec::with_capacity(1 + bytes.len() - skip);
    encoded.push(0x80 | (bytes.len() - skip) as u8);
    encoded.extend_from_slice(&bytes[skip..]);
    encoded
}

/// BER encoder producing definite-length output.
///
/// Constructed elements are opened with [`BerWriter::begin`] and closed with [`BerWriter::end`];
/// the length is patched in when the element is closed.
#[derive(Debug, Default)]
pub struct BerWriter {
    buf: Vec<u8>,
    open: Vec<usize>,
}

impl BerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a constructed element with the given tag
    pub fn begin(&mut self, tag: u8) {
        self.buf.push(tag);
        self.open.push(self.buf.len());
    }

    /// Open a SEQUENCE
    pub fn begin_sequence(&mut self) {
        self.begin(TAG_SEQUENCE);
    }

    /// Open a SET
    pub fn begin_set(&mut self) {
        self.begin(TAG_SET);
    }

    /// Close the innermost open element
    pub fn end(&mut self) -> Result<(), BerError> {
        let start = self.open.pop().ok_or(BerError::Unbalanced)?;
        let header = encode_length(self.buf.len() - start);
        self.buf.splice(start..start, header);
        Ok(())
    }

    /// Write a primitive OCTET STRING
    pub fn write_octets(&mut self, value: &[u8]) {
        self.buf.push(TAG_OCTET_STRING);
        self.buf.extend(encode_length(value.len()));
        self.buf.extend_from_slice(value);
    }

    /// Write a UTF-8 string as OCTET STRING
    pub fn write_string(&mut self, value: &str) {
        self.write_octets(value.as_bytes());
    }

    /// Return the encoded buffer. Fails if some element was left open
    pub fn finish(self) -> Result<Bytes, BerError> {
        if !self.open.is_empty() {
            return Err(BerError::Unbalanced);
        }
        Ok(self.buf.into())
    }
}

/// Bounds-checked BER decoder over a borrowed buffer
#[derive(Debug, Clone)]
pub struct BerReader<'a> {
    data: &'a [u8],
    buf: &'a [u8],
}

impl<'a> BerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, buf: data }
    }

    /// Current offset from the start of the buffer
    pub fn position(&self) -> usize {
        self.data.len() - self.buf.remaining()
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Next tag byte without consuming it
    pub fn peek_tag(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    fn truncated(&self, needed: usize) -> BerError {
        BerError::Truncated {
            offset: self.position(),
            needed,
        }
    }

    fn read_tag(&mut self, expected: u8) -> Result<(), BerError> {
        let offset = self.position();
        let actual = self.peek_tag().ok_or_else(|| self.truncated(1))?;
        if actual != expected {
            return Err(BerError::UnexpectedTag {
                offset,
                expected,
                actual,
            });
        }
        self.buf.advance(1);
        Ok(())
    }

    fn read_length(&mut self) -> Result<usize, BerError> {
        let offset = self.position();
        if !self.buf.has_remaining() {
            return Err(self.truncated(1));
        }
        let first = self.buf.get_u8();
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }

        let octets = (first & 0x7F) as usize;
        if octets == 0 {
            return Err(BerError::IndefiniteLength { offset });
        }
        if octets > MAX_LENGTH_OCTETS {
            return Err(BerError::LengthOverflow { offset, octets });
        }
        if self.buf.remaining() < octets {
            return Err(self.truncated(octets - self.buf.remaining()));
        }
        Ok(self.buf.get_uint(octets) as usize)
    }

    /// Consume the tag and length of a constructed element, returning the content length.
    ///
    /// The content itself is not checked against the buffer size here, so a truncated
    /// container can still be walked element by element.
    pub fn read_header(&mut self, tag: u8) -> Result<usize, BerError> {
        self.read_tag(tag)?;
        self.read_length()
    }

    /// Consume the header of a constructed element nested in a container ending at `limit`,
    /// returning the end position of the element content
    pub fn read_nested(&mut self, tag: u8, limit: usize) -> Result<usize, BerError> {
        let offset = self.position();
        let len = self.read_header(tag)?;
        let end = self.position().saturating_add(len);
        if end > limit {
            return Err(BerError::Overrun { offset, end, limit });
        }
        Ok(end)
    }

    /// Read a primitive OCTET STRING
    pub fn read_octets(&mut self) -> Result<&'a [u8], BerError> {
        self.read_tag(TAG_OCTET_STRING)?;
        let len = self.read_length()?;
        if self.buf.remaining() < len {
            return Err(self.truncated(len - self.buf.remaining()));
        }
        let (value, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(value)
    }

    /// Read an OCTET STRING as UTF-8, replacing invalid sequences
    pub fn read_string(&mut self) -> Result<String, BerError> {
        Ok(String::from_utf8_lossy(self.read_octets()?).into_owned())
    }

    /// Read an OCTET STRING which must end before `limit`
    pub fn read_string_within(&mut self, limit: usize) -> Result<String, BerError> {
        let offset = self.position();
        let value = self.read_string()?;
        let end = self.position();
        if end > limit {
            return Err(BerError::Overrun { offset, end, limit });
        }
        Ok(value)
    }

    /// Advance the cursor to an absolute position. Positions behind the cursor are ignored
    pub fn skip_to(&mut self, position: usize) -> Result<(), BerError> {
        let count = position.saturating_sub(self.position());
        if count > self.buf.remaining() {
            return Err(self.truncated(count - self.buf.remaining()));
        }
        self.buf.advance(count);
        Ok(())
    }
}

pub(crate) fn hex_dump(data: &[u8]) -> String {
    let mut dump = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            dump.push(if i % 16 == 0 { '\n' } else { ' ' });
        }
        let _ = write!(dump, "{:02x}", b);
    }
    dump
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_long_lengths() {
        assert_eq!(encode_length(0), vec![0x00]);
        assert_eq!(encode_length(0x7f), vec![0x7f]);
        assert_eq!(encode_length(0x80), vec![0x81, 0x80]);
        assert_eq!(encode_length(0x1234), vec![0x82, 0x12, 0x34]);
    }

    #[test]
    fn test_writer_nested_sequences() {
        let mut writer = BerWriter::new();
        writer.begin_sequence();
        writer.write_string("cn");
        writer.begin_set();
        writer.write_string("a");
        writer.end().unwrap();
        writer.end().unwrap();

        let encoded = writer.finish().unwrap();
        assert_eq!(
            &encoded[..],
            &[0x30, 0x09, 0x04, 0x02, b'c', b'n', 0x31, 0x03, 0x04, 0x01, b'a']
        );
    }

    #[test]
    fn test_writer_long_form_patch() {
        let value = "x".repeat(200);
        let mut writer = BerWriter::new();
        writer.begin_sequence();
        writer.write_string(&value);
        writer.end().unwrap();
        let encoded = writer.finish().unwrap();

        // 0x04 0x81 0xc8 + 200 bytes of content
        assert_eq!(&encoded[..3], &[0x30, 0x81, 203]);
        assert_eq!(&encoded[3..6], &[0x04, 0x81, 200]);
        assert_eq!(encoded.len(), 206);
    }

    #[test]
    fn test_writer_unbalanced() {
        let mut writer = BerWriter::new();
        assert_eq!(writer.end(), Err(BerError::Unbalanced));

        let mut writer = BerWriter::new();
        writer.begin_sequence();
        assert_eq!(writer.finish(), Err(BerError::Unbalanced));
    }

    #[test]
    fn test_reader_walks_elements() {
        let data = [0x30, 0x09, 0x04, 0x02, b'c', b'n', 0x31, 0x03, 0x04, 0x01, b'a'];
        let mut reader = BerReader::new(&data);

        assert_eq!(reader.peek_tag(), Some(TAG_SEQUENCE));
        assert_eq!(reader.read_header(TAG_SEQUENCE).unwrap(), 9);
        assert_eq!(reader.read_string().unwrap(), "cn");
        assert_eq!(reader.read_header(TAG_SET).unwrap(), 3);
        assert_eq!(reader.position(), 8);
        assert_eq!(reader.read_octets().unwrap(), b"a");
        assert_eq!(reader.remaining(), 0);
        assert_eq!(reader.peek_tag(), None);
    }

    #[test]
    fn test_reader_long_length() {
        let mut data = vec![0x04, 0x82, 0x01, 0x00];
        data.extend(std::iter::repeat(b'z').take(256));
        let mut reader = BerReader::new(&data);
        assert_eq!(reader.read_octets().unwrap().len(), 256);
    }

    #[test]
    fn test_reader_errors() {
        let mut reader = BerReader::new(&[0x04, 0x05, b'a']);
        assert_eq!(
            reader.read_octets(),
            Err(BerError::Truncated { offset: 2, needed: 4 })
        );

        let mut reader = BerReader::new(&[0x31, 0x00]);
        assert_eq!(
            reader.read_header(TAG_SEQUENCE),
            Err(BerError::UnexpectedTag {
                offset: 0,
                expected: TAG_SEQUENCE,
                actual: TAG_SET
            })
        );

        let mut reader = BerReader::new(&[0x30, 0x80]);
        assert_eq!(
            reader.read_header(TAG_SEQUENCE),
            Err(BerError::IndefiniteLength { offset: 1 })
        );

        let mut reader = BerReader::new(&[0x30, 0x85, 1, 2, 3, 4, 5]);
        assert_eq!(
            reader.read_header(TAG_SEQUENCE),
            Err(BerError::LengthOverflow { offset: 1, octets: 5 })
        );

        let mut reader = BerReader::new(&[0x30, 0x82, 0x01]);
        let err = reader.read_header(TAG_SEQUENCE).unwrap_err();
        assert!(err.is_truncated());
        assert_eq!(err.offset(), Some(2));

        let mut reader = BerReader::new(&[]);
        assert_eq!(reader.read_string(), Err(BerError::Truncated { offset: 0, needed: 1 }));
    }

    #[test]
    fn test_reader_header_does_not_require_content() {
        let mut reader = BerReader::new(&[0x30, 0x7f, 0x04]);
        assert_eq!(reader.read_header(TAG_SEQUENCE).unwrap(), 0x7f);
        assert_eq!(reader.remaining(), 1);
    }

    #[test]
    fn test_reader_nested_bounds() {
        let data = [0x30, 0x06, 0x31, 0x02, 0x04, 0x00, 0x04, 0x00];
        let mut reader = BerReader::new(&data);
        let end = reader.read_nested(TAG_SEQUENCE, data.len()).unwrap();
        assert_eq!(end, 8);
        assert_eq!(reader.read_nested(TAG_SET, end).unwrap(), 6);
        assert_eq!(reader.read_string_within(6).unwrap(), "");
        assert_eq!(
            reader.read_string_within(7),
            Err(BerError::Overrun {
                offset: 6,
                end: 8,
                limit: 7
            })
        );

        let mut reader = BerReader::new(&data);
        let err = reader.read_nested(TAG_SEQUENCE, 5).unwrap_err();
        assert_eq!(err, BerError::Overrun { offset: 0, end: 8, limit: 5 });
        assert!(!err.is_truncated());
    }

    #[test]
    fn test_reader_nested_huge_length() {
        let mut reader = BerReader::new(&[0x30, 0x84, 0xff, 0xff, 0xff, 0xff]);
        let err = reader.read_nested(TAG_SEQUENCE, 6).unwrap_err();
        assert_eq!(err.offset(), Some(0));
        assert!(matches!(err, BerError::Overrun { limit: 6, .. }));
    }

    #[test]
    fn test_skip_to() {
        let mut reader = BerReader::new(&[1, 2, 3, 4]);
        reader.skip_to(3).unwrap();
        assert_eq!(reader.peek_tag(), Some(4));
        reader.skip_to(1).unwrap();
        assert_eq!(reader.position(), 3);
        assert!(reader.skip_to(10).unwrap_err().is_truncated());
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x30, 0x0a, 0xff]), "30 0a ff");
        assert_eq!(hex_dump(&[0u8; 17]).lines().count(), 2);
    }
}
