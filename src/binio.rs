//! Little-endian primitives shared by the timeline, catalog and feature codecs.

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Current version of every on-disk format in this crate.
pub const FORMAT_VERSION: u32 = 1;

pub fn read_array<const N: usize, R: Read>(r: &mut R, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(|e| Error::from_read(e, what))?;
    Ok(buf)
}

pub fn read_u8<R: Read>(r: &mut R, what: &str) -> Result<u8> {
    Ok(read_array::<1, _>(r, what)?[0])
}

pub fn read_u16<R: Read>(r: &mut R, what: &str) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array(r, what)?))
}

pub fn read_u32<R: Read>(r: &mut R, what: &str) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(r, what)?))
}

pub fn read_u64<R: Read>(r: &mut R, what: &str) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(r, what)?))
}

pub fn read_bytes<R: Read>(r: &mut R, len: usize, what: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| Error::from_read(e, what))?;
    Ok(buf)
}

/// Read a `u16`-length-prefixed UTF-8 string.
pub fn read_string<R: Read>(r: &mut R, what: &str) -> Result<String> {
    let len = read_u16(r, what)? as usize;
    let bytes = read_bytes(r, len, what)?;
    String::from_utf8(bytes).map_err(|_| Error::corrupt(format!("{what}: invalid UTF-8")))
}

/// Check the 4-byte magic and the format version that open every file.
pub fn read_preamble<R: Read>(r: &mut R, magic: &[u8; 4], what: &str) -> Result<()> {
    let found: [u8; 4] = read_array(r, what)?;
    if &found != magic {
        return Err(Error::corrupt(format!("{what}: bad magic {found:?}")));
    }
    let version = read_u32(r, what)?;
    if version != FORMAT_VERSION {
        return Err(Error::corrupt(format!(
            "{what}: unsupported format version {version} (expected {FORMAT_VERSION})"
        )));
    }
    Ok(())
}

pub fn write_preamble<W: Write>(w: &mut W, magic: &[u8; 4]) -> Result<()> {
    w.write_all(magic)?;
    w.write_all(&FORMAT_VERSION.to_le_bytes())?;
    Ok(())
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| Error::InvalidState(format!("string too long for u16 prefix: {} bytes", s.len())))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}
