//! Binary encoding helpers shared by the wire protocol and the on-disk log.
//!
//! Two conventions coexist and must not be mixed:
//!
//! # Wire encoding
//!
//! The binary network protocol is big-endian. Multi-byte integers are
//! read/written through [`bytes::Buf`]/[`bytes::BufMut`], strings are
//! length-prefixed: topic names with a `u16` length, message payloads and
//! error strings with a `u32` length.
//!
//! # Disk encoding
//!
//! The structural fields of a topic's `data.log`, `index.idx`, and
//! `metadata.meta` files are written in the host's native byte order through
//! [`std::io::Read`]/[`std::io::Write`]. This is a single-node local format,
//! not a wire format; the appender, the read path, and the recovery scan all
//! use the same convention.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};

// --- Wire helpers (big-endian, length-prefixed) ---

/// Reads a `u8`, failing on an exhausted buffer.
pub fn get_u8<B: Buf>(buf: &mut B) -> Result<u8> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

/// Reads a big-endian `u16`.
pub fn get_u16<B: Buf>(buf: &mut B) -> Result<u16> {
    ensure_remaining(buf, 2)?;
    Ok(buf.get_u16())
}

/// Reads a big-endian `u32`.
pub fn get_u32<B: Buf>(buf: &mut B) -> Result<u32> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_u32())
}

/// Reads a big-endian `u64`.
pub fn get_u64<B: Buf>(buf: &mut B) -> Result<u64> {
    ensure_remaining(buf, 8)?;
    Ok(buf.get_u64())
}

/// Reads a `u16`-length-prefixed UTF-8 string (topic names).
pub fn get_name<B: Buf>(buf: &mut B) -> Result<String> {
    let len = get_u16(buf)? as usize;
    ensure_remaining(buf, len)?;
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| Error::Decode("string is not valid UTF-8".to_string()))
}

/// Reads a `u32`-length-prefixed byte string (message payloads).
pub fn get_blob<B: Buf>(buf: &mut B) -> Result<Bytes> {
    let len = get_u32(buf)? as usize;
    ensure_remaining(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

/// Writes a `u16`-length-prefixed UTF-8 string (topic names).
pub fn put_name<B: BufMut>(buf: &mut B, name: &str) -> Result<()> {
    let len = u16::try_from(name.len())
        .map_err(|_| Error::Decode("string too long for u16 length prefix".to_string()))?;
    buf.put_u16(len);
    buf.put_slice(name.as_bytes());
    Ok(())
}

/// Writes a `u32`-length-prefixed byte string (message payloads).
pub fn put_blob<B: BufMut>(buf: &mut B, blob: &[u8]) -> Result<()> {
    let len = u32::try_from(blob.len())
        .map_err(|_| Error::Decode("payload too long for u32 length prefix".to_string()))?;
    buf.put_u32(len);
    buf.put_slice(blob);
    Ok(())
}

fn ensure_remaining<B: Buf>(buf: &B, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(Error::Decode(format!(
            "buffer exhausted: need {} more bytes, have {}",
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

// --- Disk helpers (native order, stream-based) ---

/// Writes a native-order `u64` structural field.
pub fn write_disk_u64<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_ne_bytes())
}

/// Writes a native-order `u32` structural field.
pub fn write_disk_u32<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_ne_bytes())
}

/// Reads a native-order `u64` structural field.
///
/// A short read surfaces as [`io::ErrorKind::UnexpectedEof`], which recovery
/// treats as the end of usable data.
pub fn read_disk_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut raw = [0u8; 8];
    reader.read_exact(&mut raw)?;
    Ok(u64::from_ne_bytes(raw))
}

/// Reads a native-order `u32` structural field.
pub fn read_disk_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw)?;
    Ok(u32::from_ne_bytes(raw))
}
