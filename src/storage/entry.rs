//! Binary record layout of the attribute store.
//!
//! ```text
//! [u8 key_len][key bytes][u8 value_len][value bytes][u32 usage][u32 next]
//! ```
//!
//! Integers are little-endian. Strings are UTF-8, at most 255 bytes each.

use crate::error::{IndexError, Result};
use bytes::{BufMut, BytesMut};
use std::io::Read;

/// Reserved bytes at the start of every store file.
pub const HEADER_LEN: u32 = 2;

/// Longest encodable key or value, in bytes.
pub const MAX_STRING_BYTES: usize = u8::MAX as usize;

/// Two length bytes plus the usage and next fields.
const FIXED_FIELDS_LEN: usize = 1 + 1 + 4 + 4;

/// One stored (key, value) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
    /// Reserved usage counter; always written as zero.
    pub usage: u32,
    /// Offset of the next record in the same chain, or 0 at the chain end.
    pub next: u32,
}

impl Entry {
    /// Build a fresh chain tail, truncating both strings to the encodable size.
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: truncate(key).to_owned(),
            value: truncate(value).to_owned(),
            usage: 0,
            next: 0,
        }
    }

    /// Total size of the record on disk.
    pub fn encoded_len(&self) -> usize {
        FIXED_FIELDS_LEN + self.key.len() + self.value.len()
    }

    /// Position of the `next` field relative to the start of the record.
    pub fn next_field_position(&self) -> usize {
        1 + self.key.len() + 1 + self.value.len() + 4
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        put_string(buf, &self.key);
        put_string(buf, &self.value);
        buf.put_u32_le(self.usage);
        buf.put_u32_le(self.next);
    }

    /// Decode the record starting at the reader's position. `offset` is only
    /// used for error reporting.
    pub(crate) fn read_from<R: Read>(reader: &mut R, offset: u32) -> Result<Self> {
        let key = read_string(reader, offset)?;
        let value = read_string(reader, offset)?;
        let usage = read_u32(reader)?;
        let next = read_u32(reader)?;

        Ok(Self {
            key,
            value,
            usage,
            next,
        })
    }
}

/// Longest prefix of `s` that fits in [`MAX_STRING_BYTES`] without splitting
/// a character.
pub fn truncate(s: &str) -> &str {
    if s.len() <= MAX_STRING_BYTES {
        return s;
    }
    let mut end = MAX_STRING_BYTES;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn put_string(buf: &mut BytesMut, s: &str) {
    debug_assert!(s.len() <= MAX_STRING_BYTES);
    buf.put_u8(s.len() as u8);
    buf.put_slice(s.as_bytes());
}

fn read_string<R: Read>(reader: &mut R, offset: u32) -> Result<String> {
    let mut len = [0u8; 1];
    reader.read_exact(&mut len)?;

    let mut bytes = vec![0u8; usize::from(len[0])];
    reader.read_exact(&mut bytes)?;

    String::from_utf8(bytes).map_err(|_| IndexError::CorruptRecord { offset })
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_layout() {
        let mut entry = Entry::new("highway", "primary");
        entry.next = 0x0102_0304;

        let mut buf = BytesMut::new();
        entry.encode(&mut buf);

        assert_eq!(buf.len(), entry.encoded_len());
        assert_eq!(buf[0], 7);
        assert_eq!(&buf[1..8], b"highway");
        assert_eq!(buf[8], 7);
        assert_eq!(&buf[9..16], b"primary");
        assert_eq!(&buf[16..20], &[0, 0, 0, 0]);
        assert_eq!(&buf[20..24], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(entry.next_field_position(), 20);
    }

    #[test]
    fn test_decode_encoded_record() {
        let mut entry = Entry::new("name", "Straße des 17. Juni");
        entry.next = 42;

        let mut buf = BytesMut::new();
        entry.encode(&mut buf);

        let decoded = Entry::read_from(&mut Cursor::new(buf.to_vec()), 2).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let raw = vec![2, 0xff, 0xfe, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let result = Entry::read_from(&mut Cursor::new(raw), 17);
        assert!(matches!(result, Err(IndexError::CorruptRecord { offset: 17 })));
    }

    #[test]
    fn test_decode_truncated_record_is_io_error() {
        let raw = vec![5, b'a', b'b'];
        let result = Entry::read_from(&mut Cursor::new(raw), 2);
        assert!(matches!(result, Err(IndexError::Io(_))));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let ascii = "x".repeat(300);
        assert_eq!(truncate(&ascii).len(), 255);

        // 'é' is two bytes, so 255 bytes would split the 128th character.
        let accented = "é".repeat(200);
        let cut = truncate(&accented);
        assert_eq!(cut.len(), 254);
        assert_eq!(cut.chars().count(), 127);

        assert_eq!(truncate("short"), "short");
    }
}
