//! # Framing Codec
//!
//! Wire format of every payload datagram on the data channel:
//!
//! ```text
//! [ seq: u32 be ][ len: u32 be ][ bytes... ]
//! ```
//!
//! Total datagram length must equal `8 + len`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Header size in bytes: 4-byte big-endian `seq` + 4-byte big-endian `len`.
pub const HEADER_LEN: usize = 8;

/// Encodes a chunk frame: `seq` followed by the payload, length-prefixed.
///
/// Fails if `8 + bytes.len() > max_message_size`.
pub fn encode(seq: u32, bytes: &[u8], max_message_size: usize) -> Result<Bytes> {
    let total = HEADER_LEN + bytes.len();
    if total > max_message_size {
        return Err(Error::MalformedFrame(format!(
            "encoded frame of {total} bytes exceeds max_message_size {max_message_size}"
        )));
    }
    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32(seq);
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
    Ok(buf.freeze())
}

/// Decodes a chunk frame, returning `(seq, payload)`.
///
/// Fails with [`Error::MalformedFrame`] if the datagram is shorter than
/// [`HEADER_LEN`] or if `datagram.len() != HEADER_LEN + len`.
pub fn decode(datagram: &[u8]) -> Result<(u32, Bytes)> {
    if datagram.len() < HEADER_LEN {
        return Err(Error::MalformedFrame(format!(
            "datagram of {} bytes shorter than {HEADER_LEN}-byte header",
            datagram.len()
        )));
    }
    let seq = u32::from_be_bytes(datagram[0..4].try_into().unwrap());
    let len = u32::from_be_bytes(datagram[4..8].try_into().unwrap()) as usize;
    if datagram.len() != HEADER_LEN + len {
        return Err(Error::MalformedFrame(format!(
            "datagram length {} does not equal header + len ({})",
            datagram.len(),
            HEADER_LEN + len
        )));
    }
    Ok((seq, Bytes::copy_from_slice(&datagram[HEADER_LEN..])))
}
