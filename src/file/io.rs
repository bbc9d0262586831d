//! Little-endian primitive reading and writing for metadata images.
//!
//! Everything in a metadata image and in a CIL byte stream is little-endian. The
//! [`CilIO`] trait gives the parser and the writers one bounds-checked entry point for all
//! primitive widths, and the `*_compressed_uint` helpers implement the ECMA-335 II.23.2
//! compressed integer encoding used for counts and lengths.

use crate::{Error::OutOfBounds, Result};

/// Primitive types that can be read from and written to little-endian byte buffers.
pub trait CilIO: Sized + Copy {
    /// The fixed-size byte array backing this type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode a value from little-endian bytes.
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode a value as little-endian bytes.
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cilio {
    ($($ty:ty => $size:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $size];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cilio! {
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4, f32 => 4,
    u64 => 8, i64 => 8, f64 => 8,
}

/// Read a `T` at `offset` and advance the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let end = offset
        .checked_add(std::mem::size_of::<T>())
        .ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(bytes) = T::Bytes::try_from(&data[*offset..end]) else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(bytes))
}

/// Read a `T` from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is too short.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0;
    read_le_at(data, &mut offset)
}

/// Append `value` to `out` in little-endian order.
pub fn write_le<T: CilIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Overwrite the bytes at `offset` with `value` and advance the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `value` does not fit before the end of `data`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let end = offset
        .checked_add(std::mem::size_of::<T>())
        .ok_or(OutOfBounds)?;
    let target = data.get_mut(*offset..end).ok_or(OutOfBounds)?;

    target.copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;
    Ok(())
}

/// Append `value` using the ECMA-335 compressed unsigned integer encoding.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for values above `0x1FFF_FFFF`, which the encoding
/// cannot represent.
pub fn write_compressed_uint(out: &mut Vec<u8>, value: u32) -> Result<()> {
    match value {
        0..=0x7F => out.push(value as u8),
        0x80..=0x3FFF => {
            out.push(0x80 | (value >> 8) as u8);
            out.push(value as u8);
        }
        0x4000..=0x1FFF_FFFF => {
            out.push(0xC0 | (value >> 24) as u8);
            out.push((value >> 16) as u8);
            out.push((value >> 8) as u8);
            out.push(value as u8);
        }
        _ => {
            return Err(malformed_error!(
                "Value {:#x} is too large for a compressed integer",
                value
            ))
        }
    }
    Ok(())
}

/// Append a compressed-length prefixed UTF-8 string.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the string is longer than a compressed integer
/// can describe.
pub fn write_prefixed_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let length = u32::try_from(value.len())
        .map_err(|_| malformed_error!("String of {} bytes is too long", value.len()))?;
    write_compressed_uint(out, length)?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Append a count using the compressed integer encoding.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if `count` does not fit the encoding.
pub fn write_count(out: &mut Vec<u8>, count: usize) -> Result<()> {
    let count =
        u32::try_from(count).map_err(|_| malformed_error!("Count {} is too large", count))?;
    write_compressed_uint(out, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn read_primitives() {
        let data = [0x78, 0x56, 0x34, 0x12, 0xFF];
        let mut offset = 0;

        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 0x1234_5678);
        assert_eq!(offset, 4);
        assert_eq!(read_le_at::<i8>(&data, &mut offset).unwrap(), -1);
        assert_eq!(offset, 5);
    }

    #[test]
    fn read_past_end() {
        let data = [0x01, 0x02];
        let mut offset = 1;

        assert!(matches!(
            read_le_at::<u16>(&data, &mut offset),
            Err(Error::OutOfBounds)
        ));
        assert_eq!(offset, 1);
    }

    #[test]
    fn write_primitives() {
        let mut out = Vec::new();
        write_le(&mut out, 0xBEEFu16);
        write_le(&mut out, -2i32);

        assert_eq!(out, vec![0xEF, 0xBE, 0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(read_le::<u16>(&out).unwrap(), 0xBEEF);
    }

    #[test]
    fn overwrite_in_place() {
        let mut data = [0u8; 6];
        let mut offset = 1;

        write_le_at(&mut data, &mut offset, 0x0102_0304u32).unwrap();
        assert_eq!(offset, 5);
        assert_eq!(data, [0x00, 0x04, 0x03, 0x02, 0x01, 0x00]);

        assert!(matches!(
            write_le_at(&mut data, &mut offset, 0u16),
            Err(Error::OutOfBounds)
        ));
        assert_eq!(offset, 5);
    }

    #[test]
    fn compressed_uint_encodings() {
        let cases: [(u32, &[u8]); 5] = [
            (0x03, &[0x03]),
            (0x7F, &[0x7F]),
            (0x80, &[0x80, 0x80]),
            (0x2E57, &[0xAE, 0x57]),
            (0x4000, &[0xC0, 0x00, 0x40, 0x00]),
        ];

        for (value, expected) in cases {
            let mut out = Vec::new();
            write_compressed_uint(&mut out, value).unwrap();
            assert_eq!(out, expected, "encoding of {value:#x}");
        }
    }

    #[test]
    fn compressed_uint_too_large() {
        let mut out = Vec::new();
        assert!(matches!(
            write_compressed_uint(&mut out, 0x2000_0000),
            Err(Error::Malformed { .. })
        ));
    }
}
