use crate::u29::read_u29_at;
use crate::{Amf3Error, Result};

/// Bounded cursor over an immutable byte slice.
///
/// Every read checks the remaining length first and reports
/// [`Amf3Error::TruncatedInput`] with the absolute offset instead of panicking.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    /// Rewind or advance to an absolute offset already inside the buffer.
    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.bytes.len());
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub(crate) fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Amf3Error::TruncatedInput {
                offset: self.pos,
                need: n,
                remaining: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.bytes[start..self.pos])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let raw = self.read_exact(N)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(raw);
        Ok(buf)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_u29(&mut self) -> Result<u32> {
        let (value, used) = read_u29_at(self.bytes, self.pos)?;
        self.pos += used;
        Ok(value)
    }

    /// Read `len` bytes as UTF-8 text.
    pub(crate) fn read_utf8(&mut self, len: usize) -> Result<String> {
        let offset = self.pos;
        let raw = self.read_exact(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| Amf3Error::MalformedUtf8 {
                offset: offset + e.valid_up_to(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_are_big_endian() {
        let bytes = [0x00, 0x00, 0x01, 0x00, 0xff, 0xff, 0xff, 0xfe];
        let mut cursor = Cursor::new(&bytes);
        assert_eq!(cursor.read_u32().unwrap(), 256);
        assert_eq!(cursor.read_i32().unwrap(), -2);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_read_past_end_reports_offset() {
        let bytes = [0x3f, 0xf0, 0x00];
        let mut cursor = Cursor::new(&bytes);
        cursor.read_u8().unwrap();
        match cursor.read_f64() {
            Err(Amf3Error::TruncatedInput {
                offset,
                need,
                remaining,
            }) => {
                assert_eq!(offset, 1);
                assert_eq!(need, 8);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
        // a failed read does not move the cursor
        assert_eq!(cursor.pos(), 1);
    }

    #[test]
    fn test_read_utf8_rejects_invalid_bytes() {
        let bytes = [b'o', b'k', 0xc3, 0x28];
        let mut cursor = Cursor::new(&bytes);
        match cursor.read_utf8(4) {
            Err(Amf3Error::MalformedUtf8 { offset }) => assert_eq!(offset, 2),
            other => panic!("expected utf-8 error, got {:?}", other),
        }
    }
}
