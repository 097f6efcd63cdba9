//! Checked reads over `bytes::Buf` and LEB128 varints for the binary wire formats.
//!
//! `Buf::get_*` panics on short input, every read here checks the remaining length first.

use bytes::{Buf, BufMut};

use crate::Error;

const DATA_BITS_MASK: u8 = 0x7F;
const CONTINUATION_BIT_MASK: u8 = 0x80;
const DATA_BITS_PER_BYTE: usize = 7;

/// Encodes the value as an unsigned LEB128 varint.
pub fn write_varint(value: u64, buf: &mut impl BufMut) {
    let mut val = value;
    while val >= CONTINUATION_BIT_MASK as u64 {
        buf.put_u8((val as u8) | CONTINUATION_BIT_MASK);
        val >>= DATA_BITS_PER_BYTE;
    }
    buf.put_u8(val as u8);
}

/// Decodes an unsigned LEB128 varint, rejecting encodings that overflow `u64`.
pub fn read_varint(buf: &mut impl Buf) -> Result<u64, Error> {
    let mut result = 0u64;
    let mut shift = 0;
    loop {
        let byte = read_u8(buf, "varint")?;
        // the 10th byte may only carry the single remaining bit
        if shift == 63 && byte > 1 {
            return Err(Error::VarintOverflow);
        }
        result |= ((byte & DATA_BITS_MASK) as u64) << shift;
        if byte & CONTINUATION_BIT_MASK == 0 {
            return Ok(result);
        }
        shift += DATA_BITS_PER_BYTE;
    }
}

fn ensure(buf: &impl Buf, len: usize, what: &'static str) -> Result<(), Error> {
    if buf.remaining() < len {
        return Err(Error::LengthMismatch { what, expected: len, got: buf.remaining() });
    }
    Ok(())
}

pub fn read_u8(buf: &mut impl Buf, what: &'static str) -> Result<u8, Error> {
    ensure(buf, 1, what)?;
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut impl Buf, what: &'static str) -> Result<u16, Error> {
    ensure(buf, 2, what)?;
    Ok(buf.get_u16())
}

pub fn read_bytes(buf: &mut impl Buf, len: usize, what: &'static str) -> Result<Vec<u8>, Error> {
    ensure(buf, len, what)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

pub fn read_array<const N: usize>(buf: &mut impl Buf, what: &'static str) -> Result<[u8; N], Error> {
    ensure(buf, N, what)?;
    let mut bytes = [0u8; N];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

/// Writes `bytes` prefixed with its length as a varint.
pub fn write_prefixed(bytes: &[u8], buf: &mut impl BufMut) {
    write_varint(bytes.len() as u64, buf);
    buf.put_slice(bytes);
}

/// Reads a varint-length-prefixed byte string of at most `max` bytes.
pub fn read_prefixed(buf: &mut impl Buf, max: usize, what: &'static str) -> Result<Vec<u8>, Error> {
    let len = read_varint(buf)?;
    if len > max as u64 {
        return Err(Error::LengthMismatch { what, expected: max, got: len as usize });
    }
    read_bytes(buf, len as usize, what)
}

/// Fails if anything is left in the buffer.
pub fn finish(buf: &impl Buf) -> Result<(), Error> {
    match buf.remaining() {
        0 => Ok(()),
        overage => Err(Error::Overage(overage)),
    }
}
