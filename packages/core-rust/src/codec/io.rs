//! Big-endian primitive reads and writes.
//!
//! Strings are a `u32` byte length followed by UTF-8 bytes. Booleans are one
//! byte; any non-zero byte reads back as `true`.

use std::io::{ErrorKind, Read, Write};

use crate::error::CodecError;

pub fn write_bool<W: Write>(out: &mut W, value: bool) -> Result<(), CodecError> {
    out.write_all(&[u8::from(value)])?;
    Ok(())
}

pub fn write_i8<W: Write>(out: &mut W, value: i8) -> Result<(), CodecError> {
    out.write_all(&value.to_be_bytes())?;
    Ok(())
}

pub fn write_i16<W: Write>(out: &mut W, value: i16) -> Result<(), CodecError> {
    out.write_all(&value.to_be_bytes())?;
    Ok(())
}

pub fn write_i32<W: Write>(out: &mut W, value: i32) -> Result<(), CodecError> {
    out.write_all(&value.to_be_bytes())?;
    Ok(())
}

pub fn write_i64<W: Write>(out: &mut W, value: i64) -> Result<(), CodecError> {
    out.write_all(&value.to_be_bytes())?;
    Ok(())
}

pub fn write_f32<W: Write>(out: &mut W, value: f32) -> Result<(), CodecError> {
    out.write_all(&value.to_be_bytes())?;
    Ok(())
}

pub fn write_f64<W: Write>(out: &mut W, value: f64) -> Result<(), CodecError> {
    out.write_all(&value.to_be_bytes())?;
    Ok(())
}

pub fn write_str<W: Write>(out: &mut W, value: &str) -> Result<(), CodecError> {
    let bytes = value.as_bytes();
    let len = u32::try_from(bytes.len()).map_err(|_| {
        CodecError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            "string longer than u32::MAX bytes",
        ))
    })?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(bytes)?;
    Ok(())
}

fn read_array<R: Read + ?Sized, const N: usize>(input: &mut R) -> Result<[u8; N], CodecError> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_bool<R: Read + ?Sized>(input: &mut R) -> Result<bool, CodecError> {
    Ok(read_array::<R, 1>(input)?[0] != 0)
}

pub fn read_i8<R: Read + ?Sized>(input: &mut R) -> Result<i8, CodecError> {
    Ok(i8::from_be_bytes(read_array(input)?))
}

pub fn read_i16<R: Read + ?Sized>(input: &mut R) -> Result<i16, CodecError> {
    Ok(i16::from_be_bytes(read_array(input)?))
}

pub fn read_i32<R: Read + ?Sized>(input: &mut R) -> Result<i32, CodecError> {
    Ok(i32::from_be_bytes(read_array(input)?))
}

pub fn read_i64<R: Read + ?Sized>(input: &mut R) -> Result<i64, CodecError> {
    Ok(i64::from_be_bytes(read_array(input)?))
}

pub fn read_f32<R: Read + ?Sized>(input: &mut R) -> Result<f32, CodecError> {
    Ok(f32::from_be_bytes(read_array(input)?))
}

pub fn read_f64<R: Read + ?Sized>(input: &mut R) -> Result<f64, CodecError> {
    Ok(f64::from_be_bytes(read_array(input)?))
}

pub fn read_str<R: Read + ?Sized>(input: &mut R) -> Result<String, CodecError> {
    let len = u32::from_be_bytes(read_array(input)?);
    // Read through `take` so a damaged length cannot force a huge allocation.
    let mut buf = Vec::new();
    Read::take(&mut *input, u64::from(len)).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(CodecError::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "string payload truncated",
        )));
    }
    String::from_utf8(buf).map_err(|_| CodecError::corrupt("string is not valid UTF-8"))
}

/// Reads an `i32`, distinguishing a clean end of stream (`Ok(None)`) from a
/// stream that ends part-way through the integer (an error).
pub fn read_i32_or_eof<R: Read + ?Sized>(input: &mut R) -> Result<Option<i32>, CodecError> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(CodecError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "row position truncated",
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(i32::from_be_bytes(buf)))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut buf = Vec::new();
        write_i32(&mut buf, 1).unwrap();
        write_i16(&mut buf, -2).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 1, 0xFF, 0xFE]);
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut buf = Vec::new();
        write_str(&mut buf, "h\u{e9}").unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, b'h', 0xC3, 0xA9]);
        assert_eq!(read_str(&mut Cursor::new(buf)).unwrap(), "h\u{e9}");
    }

    #[test]
    fn truncated_string_is_an_error() {
        let buf = vec![0, 0, 0, 10, b'a'];
        let err = read_str(&mut Cursor::new(buf)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn invalid_utf8_is_corrupt() {
        let buf = vec![0, 0, 0, 1, 0xFF];
        assert!(matches!(
            read_str(&mut Cursor::new(buf)),
            Err(CodecError::Corrupt { .. })
        ));
    }

    #[test]
    fn eof_before_position_is_clean() {
        assert_eq!(read_i32_or_eof(&mut Cursor::new(Vec::new())).unwrap(), None);
        assert_eq!(
            read_i32_or_eof(&mut Cursor::new(vec![0, 0, 0, 7])).unwrap(),
            Some(7)
        );
    }

    #[test]
    fn eof_inside_position_is_an_error() {
        let err = read_i32_or_eof(&mut Cursor::new(vec![0, 0])).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn any_nonzero_byte_reads_as_true() {
        assert!(read_bool(&mut Cursor::new(vec![2])).unwrap());
        assert!(!read_bool(&mut Cursor::new(vec![0])).unwrap());
    }
}
