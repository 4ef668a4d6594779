//! Little-endian readers and writers for HCI parameter blocks

use heapless::Vec;

use crate::Error;

/// Cursor over a received parameter block
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
}

impl<'a> ByteReader<'a> {
    /// Wrap a parameter block
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Bytes not yet consumed
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }

    /// Whether every byte has been consumed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume `len` bytes
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if fewer than `len` bytes remain
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.data.len() < len {
            return Err(Error::Truncated);
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    /// Consume a fixed-size array
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if fewer than `N` bytes remain
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Consume one byte
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] at the end of the block
    pub fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    /// Consume one signed byte
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] at the end of the block
    pub fn i8(&mut self) -> Result<i8, Error> {
        Ok(i8::from_le_bytes([self.u8()?]))
    }

    /// Consume a little-endian `u16`
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if fewer than two bytes remain
    pub fn u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Consume a little-endian 24-bit value
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if fewer than three bytes remain
    pub fn u24(&mut self) -> Result<u32, Error> {
        let [a, b, c] = self.array()?;
        Ok(u32::from_le_bytes([a, b, c, 0]))
    }

    /// Consume a little-endian `u32`
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if fewer than four bytes remain
    pub fn u32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.array()?))
    }
}

/// Appends little-endian fields to a bounded buffer
#[derive(Debug, Default)]
pub struct ByteWriter<const N: usize> {
    buf: Vec<u8, N>,
}

impl<const N: usize> ByteWriter<N> {
    /// Start an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append raw bytes
    ///
    /// # Errors
    /// Returns [`Error::BufferFull`] if the bytes do not fit
    pub fn bytes(&mut self, data: &[u8]) -> Result<&mut Self, Error> {
        self.buf
            .extend_from_slice(data)
            .map_err(|()| Error::BufferFull)?;
        Ok(self)
    }

    /// Append one byte
    ///
    /// # Errors
    /// Returns [`Error::BufferFull`] if the buffer is full
    pub fn u8(&mut self, value: u8) -> Result<&mut Self, Error> {
        self.buf.push(value).map_err(|_| Error::BufferFull)?;
        Ok(self)
    }

    /// Append a signed byte
    ///
    /// # Errors
    /// Returns [`Error::BufferFull`] if the buffer is full
    pub fn i8(&mut self, value: i8) -> Result<&mut Self, Error> {
        self.bytes(&value.to_le_bytes())
    }

    /// Append a little-endian `u16`
    ///
    /// # Errors
    /// Returns [`Error::BufferFull`] if the value does not fit
    pub fn u16(&mut self, value: u16) -> Result<&mut Self, Error> {
        self.bytes(&value.to_le_bytes())
    }

    /// Append the low three bytes of `value`, little-endian
    ///
    /// # Errors
    /// Returns [`Error::BufferFull`] if the value does not fit
    pub fn u24(&mut self, value: u32) -> Result<&mut Self, Error> {
        self.bytes(&value.to_le_bytes()[..3])
    }

    /// Append a little-endian `u32`
    ///
    /// # Errors
    /// Returns [`Error::BufferFull`] if the value does not fit
    pub fn u32(&mut self, value: u32) -> Result<&mut Self, Error> {
        self.bytes(&value.to_le_bytes())
    }

    /// Bytes written so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the finished buffer
    #[must_use]
    pub fn finish(self) -> Vec<u8, N> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_consumes_little_endian_fields() {
        let data = [0x01, 0x34, 0x12, 0xAA, 0xBB, 0xCC, 0xFF];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.u8(), Ok(0x01));
        assert_eq!(reader.u16(), Ok(0x1234));
        assert_eq!(reader.u24(), Ok(0x00CC_BBAA));
        assert_eq!(reader.i8(), Ok(-1));
        assert!(reader.is_empty());
        assert_eq!(reader.u8(), Err(Error::Truncated));
    }

    #[test]
    fn test_reader_truncation_leaves_cursor() {
        let data = [0x01, 0x02, 0x03];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.u32(), Err(Error::Truncated));
        assert_eq!(reader.remaining(), &data);
    }

    #[test]
    fn test_writer_reports_overflow() {
        let mut writer: ByteWriter<3> = ByteWriter::new();
        writer.u16(0xBEEF).unwrap();
        assert_eq!(writer.u16(0x0102).err(), Some(Error::BufferFull));
        writer.u8(0x7F).unwrap();
        assert_eq!(writer.finish().as_slice(), &[0xEF, 0xBE, 0x7F]);
    }
}
