//! Length-prefixed string framing.
//!
//! Each frame is a UTF-8 string preceded by its byte length encoded as a
//! 7-bit varint (low groups first, high bit = continuation). This is the
//! string primitive both ends of the connection read and write.

use std::io::{self, Read, Write};

/// A varint for a 32-bit length never needs more than five bytes.
const MAX_PREFIX_BYTES: usize = 5;

/// Write one frame.
pub fn write_frame<W: Write>(writer: &mut W, text: &str) -> io::Result<()> {
    let bytes = text.as_bytes();
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too long"))?;

    let mut prefix = [0u8; MAX_PREFIX_BYTES];
    let mut n = 0;
    let mut value = len;
    while value >= 0x80 {
        prefix[n] = (value as u8) | 0x80;
        value >>= 7;
        n += 1;
    }
    prefix[n] = value as u8;
    n += 1;

    writer.write_all(&prefix[..n])?;
    writer.write_all(bytes)?;
    writer.flush()
}

/// Read one frame, blocking until it is complete.
///
/// A clean end-of-stream before the first prefix byte surfaces as
/// `UnexpectedEof`, like any other truncated read. Invalid UTF-8 is
/// replaced rather than rejected so the frame still reaches the codec.
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> io::Result<String> {
    let len = read_prefix(reader)? as usize;
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit of {} bytes", len, max_len),
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;

    match String::from_utf8(buf) {
        Ok(text) => Ok(text),
        Err(e) => Ok(String::from_utf8_lossy(e.as_bytes()).into_owned()),
    }
}

fn read_prefix<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut value: u32 = 0;
    for i in 0..MAX_PREFIX_BYTES {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        let byte = byte[0];

        // The fifth group only has room for the top four bits.
        if i == MAX_PREFIX_BYTES - 1 && byte > 0x0f {
            break;
        }

        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "bad length prefix"))
}
