//! Read access to the `#Strings`, `#US` and `#Blob` heaps.

use widestring::U16Str;

use crate::{Error::OutOfBounds, Parser, Result};

/// The heaps of one metadata root, borrowed from the image bytes.
#[derive(Clone, Copy)]
pub(crate) struct Heaps<'a> {
    pub strings: &'a [u8],
    pub user_strings: &'a [u8],
    pub blob: &'a [u8],
}

impl<'a> Heaps<'a> {
    /// The NUL terminated identifier at `index` of `#Strings`.
    pub(crate) fn string(&self, index: u32) -> Result<&'a str> {
        let data = self.strings.get(index as usize..).ok_or(OutOfBounds)?;
        let end = data
            .iter()
            .position(|&byte| byte == 0)
            .ok_or_else(|| malformed_error!("Unterminated string at #Strings offset {}", index))?;

        std::str::from_utf8(&data[..end])
            .map_err(|_| malformed_error!("Invalid UTF-8 at #Strings offset {}", index))
    }

    /// The length prefixed blob at `index` of `#Blob`.
    pub(crate) fn blob(&self, index: u32) -> Result<&'a [u8]> {
        let data = self.blob.get(index as usize..).ok_or(OutOfBounds)?;
        let mut parser = Parser::new(data);
        let length = parser.read_compressed_uint()? as usize;
        parser.read_bytes(length)
    }

    /// The user string at `index` of `#US`.
    pub(crate) fn user_string(&self, index: u32) -> Result<String> {
        let data = self.user_strings.get(index as usize..).ok_or(OutOfBounds)?;
        decode_user_string(&mut Parser::new(data))
    }

    /// Every user string with its heap offset, in heap order.
    pub(crate) fn all_user_strings(&self) -> Result<Vec<(u32, String)>> {
        let mut parser = Parser::new(self.user_strings);
        let mut strings = Vec::new();

        // Offset 0 is the empty entry every heap starts with.
        if parser.has_more_data() {
            let _empty = parser.read_le::<u8>()?;
        }
        while parser.has_more_data() {
            let offset = parser.pos() as u32;
            // Heaps are padded to four bytes with zeros, which read as empty entries.
            if self.user_strings[parser.pos()] == 0 {
                let _padding = parser.read_le::<u8>()?;
                continue;
            }
            strings.push((offset, decode_user_string(&mut parser)?));
        }
        Ok(strings)
    }
}

/// Decode one `#US` entry: a compressed byte length, UTF-16LE code units and a trailing
/// flag byte.
fn decode_user_string(parser: &mut Parser) -> Result<String> {
    let length = parser.read_compressed_uint()? as usize;
    let bytes = parser.read_bytes(length)?;

    let units: Vec<u16> = bytes[..length - length % 2]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    U16Str::from_slice(&units)
        .to_string()
        .map_err(|_| malformed_error!("Invalid UTF-16 user string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    const USER_STRINGS: [u8; 24] = [
        0x00,
        0x0B, b'H', 0x00, b'e', 0x00, b'l', 0x00, b'l', 0x00, b'o', 0x00, 0x00,
        0x05, b'S', 0x00, b't', 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    fn heaps() -> Heaps<'static> {
        Heaps {
            strings: b"\0Celeste\0Stats\0",
            user_strings: &USER_STRINGS,
            blob: &[0x00, 0x03, 0x06, 0x08, 0x00, 0x01],
        }
    }

    #[test]
    fn strings() {
        let heaps = heaps();
        assert_eq!(heaps.string(0).unwrap(), "");
        assert_eq!(heaps.string(1).unwrap(), "Celeste");
        assert_eq!(heaps.string(9).unwrap(), "Stats");
        assert!(heaps.string(100).is_err());
    }

    #[test]
    fn blobs() {
        let heaps = heaps();
        assert_eq!(heaps.blob(0).unwrap(), &[] as &[u8]);
        assert_eq!(heaps.blob(1).unwrap(), &[0x06, 0x08, 0x00]);
        assert!(heaps.blob(5).is_err());
    }

    #[test]
    fn user_strings() {
        let heaps = heaps();
        assert_eq!(heaps.user_string(1).unwrap(), "Hello");
        assert_eq!(heaps.user_string(13).unwrap(), "St");
        assert_eq!(
            heaps.all_user_strings().unwrap(),
            [(1, "Hello".to_string()), (13, "St".to_string())]
        );
    }
}
