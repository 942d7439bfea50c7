//! The two wire primitives everything else is built from: a length-prefixed
//! NUL-terminated string, and a key/value pair made of two such strings.
//!
//! The length prefix is a big-endian u32 counting the payload bytes *plus* the
//! trailing NUL, so the empty string is `[00 00 00 01 00]` and a length below
//! one is malformed.

use crate::framing::S2sError;
use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::io::{Read, Write};

/// Wire size of one encoded string: length word, payload, NUL.
pub(crate) fn encoded_len(s: &str) -> u32 {
    4 + s.len() as u32 + 1
}

pub fn encode_string(w: &mut impl Write, s: &str) -> Result<(), S2sError> {
    w.write_u32::<BE>(s.len() as u32 + 1)?;
    w.write_all(s.as_bytes())?;
    w.write_u8(0)?;
    Ok(())
}

/// Decode one string as raw bytes, without the terminator.
///
/// The wire format does not promise UTF-8; this is the byte-exact form.
pub fn decode_bytes(r: &mut impl Read) -> Result<Vec<u8>, S2sError> {
    let len = r.read_u32::<BE>()?;
    if len < 1 {
        return Err(S2sError::BadStringLength(len));
    }
    let mut buf = vec![0u8; len as usize - 1];
    r.read_exact(&mut buf)?;
    let terminator = r.read_u8()?;
    if terminator != 0 {
        return Err(S2sError::BadTerminator(terminator));
    }
    Ok(buf)
}

/// Decode one string, replacing any invalid UTF-8 with U+FFFD.
pub fn decode_string(r: &mut impl Read) -> Result<String, S2sError> {
    let buf = decode_bytes(r)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn encode_key_value(w: &mut impl Write, key: &str, value: &str) -> Result<(), S2sError> {
    encode_string(w, key)?;
    encode_string(w, value)
}

pub fn decode_key_value(r: &mut impl Read) -> Result<(String, String), S2sError> {
    let key = decode_string(r)?;
    let value = decode_string(r)?;
    Ok((key, value))
}
