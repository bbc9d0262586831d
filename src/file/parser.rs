//! Cursor-based binary parser for metadata images and CIL byte streams.
//!
//! [`Parser`] keeps a position inside a borrowed byte slice and offers bounds-checked reads
//! of primitives, ECMA-335 compressed integers and length-prefixed UTF-8 strings. Every read
//! advances the cursor; a failed read leaves it unchanged.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::Parser;
//!
//! let data = [0x2A, 0x03, b'a', b'b', b'c'];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_le::<u8>()?, 0x2A);
//! assert_eq!(parser.read_prefixed_string_utf8()?, "abc");
//! assert!(!parser.has_more_data());
//! # Ok::<(), dotpatch::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilIO},
    Result,
};

/// A bounds-checked reading cursor over a byte slice.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` while unread bytes remain.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current cursor position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move the cursor to `pos`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// The byte at the cursor, without advancing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(out_of_bounds_error!())
    }

    /// Advance the cursor to the next multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the padding runs past the data.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - (self.position % alignment)) % alignment;
        if self.position + padding > self.data.len() {
            return Err(out_of_bounds_error!());
        }
        self.position += padding;
        Ok(())
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Read a little-endian primitive and advance past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value would extend past the data.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read an ECMA-335 II.23.2 compressed unsigned integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input and
    /// [`crate::Error::Malformed`] on an invalid leading byte.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let start = self.position;
        let result = self.read_compressed_uint_inner();
        if result.is_err() {
            self.position = start;
        }
        result
    }

    fn read_compressed_uint_inner(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        // 4-byte encoding: 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            return Ok(((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed count and make sure the remaining data could hold that many
    /// entries of at least `min_entry_size` bytes each.
    ///
    /// Keeps corrupt counts from triggering huge allocations before the actual reads fail.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the count cannot possibly fit.
    pub fn read_count(&mut self, min_entry_size: usize) -> Result<usize> {
        let count = self.read_compressed_uint()? as usize;
        if count.saturating_mul(min_entry_size.max(1)) > self.remaining() {
            return Err(malformed_error!(
                "Count {} at offset {} exceeds the remaining {} bytes",
                count,
                self.position,
                self.remaining()
            ));
        }
        Ok(count)
    }

    /// Read a compressed-length prefixed UTF-8 string.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the string is truncated and
    /// [`crate::Error::Malformed`] if it is not valid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let start = self.position;
        let length = self.read_compressed_uint()? as usize;

        let bytes = match self.read_bytes(length) {
            Ok(bytes) => bytes,
            Err(error) => {
                self.position = start;
                return Err(error);
            }
        };

        String::from_utf8(bytes.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                start,
                self.position,
                e.utf8_error()
            )
        })
    }

    /// Read `length` raw bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(out_of_bounds_error!())?;

        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn compressed_uint() {
        let test_cases = vec![
            (vec![0x03], 3),
            (vec![0x7F], 0x7F),
            (vec![0x80, 0x80], 0x80),
            (vec![0xAE, 0x57], 0x2E57),
            (vec![0xBF, 0xFF], 0x3FFF),
            (vec![0xC0, 0x00, 0x40, 0x00], 0x4000),
            (vec![0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_compressed_uint().unwrap(), expected);
            assert!(!parser.has_more_data());
        }
    }

    #[test]
    fn compressed_uint_invalid_prefix() {
        let mut parser = Parser::new(&[0xE0, 0x00, 0x00, 0x00]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::Malformed { .. })
        ));
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn compressed_uint_truncated_restores_position() {
        let mut parser = Parser::new(&[0xC0, 0x00]);
        assert!(matches!(
            parser.read_compressed_uint(),
            Err(Error::OutOfBounds)
        ));
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn prefixed_string() {
        let data = [0x05, b'h', b'e', b'l', b'l', b'o', 0x00];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_prefixed_string_utf8().unwrap(), "hello");
        assert_eq!(parser.read_prefixed_string_utf8().unwrap(), "");
        assert!(!parser.has_more_data());
    }

    #[test]
    fn prefixed_string_truncated() {
        let data = [0x05, b'h', b'e'];
        let mut parser = Parser::new(&data);

        assert!(matches!(
            parser.read_prefixed_string_utf8(),
            Err(Error::OutOfBounds)
        ));
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn prefixed_string_invalid_utf8() {
        let data = [0x02, 0xC3, 0x28];
        let mut parser = Parser::new(&data);

        assert!(matches!(
            parser.read_prefixed_string_utf8(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn read_count_rejects_oversized() {
        let data = [0x7F, 0x00, 0x00];
        let mut parser = Parser::new(&data);

        assert!(matches!(parser.read_count(4), Err(Error::Malformed { .. })));
    }

    #[test]
    fn seek_peek_align() {
        let data = [1, 2, 3, 4, 5, 6];
        let mut parser = Parser::new(&data);

        parser.seek(1).unwrap();
        assert_eq!(parser.peek_byte().unwrap(), 2);
        assert_eq!(parser.pos(), 1);

        parser.align(4).unwrap();
        assert_eq!(parser.read_le::<u8>().unwrap(), 5);
        parser.align(4).unwrap_err();

        parser.seek(6).unwrap();
        assert!(matches!(parser.peek_byte(), Err(Error::OutOfBounds)));
        assert!(parser.seek(7).is_err());
    }

    #[test]
    fn read_bytes_bounds() {
        let data = [1, 2, 3, 4];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_bytes(3).unwrap(), &[1, 2, 3]);
        assert_eq!(parser.remaining(), 1);
        assert!(matches!(parser.read_bytes(2), Err(Error::OutOfBounds)));
        assert_eq!(parser.read_bytes(1).unwrap(), &[4]);
    }
}
