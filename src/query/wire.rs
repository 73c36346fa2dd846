//! Minimal VarInt-framed packet plumbing for the server list ping.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SEGMENT_BITS: u32 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;
const MAX_VARINT_BYTES: usize = 5;

pub(crate) fn push_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        let mut byte = (value & SEGMENT_BITS) as u8;
        value >>= 7;
        if value != 0 {
            byte |= CONTINUE_BIT;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

pub(crate) fn push_string(buf: &mut Vec<u8>, value: &str) {
    push_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

pub(crate) async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<i32> {
    let mut value: u32 = 0;
    for position in 0..MAX_VARINT_BYTES {
        let byte = reader.read_u8().await?;
        value |= ((byte & SEGMENT_BITS as u8) as u32) << (7 * position);
        if byte & CONTINUE_BIT == 0 {
            return Ok(value as i32);
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "VarInt too long"))
}

pub(crate) async fn read_string<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> io::Result<String> {
    let len = read_varint(reader).await?;
    if len < 0 || len as usize > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("String length {len} out of bounds"),
        ));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes).await?;
    String::from_utf8(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

/// Write one length-prefixed packet: the payload already starts with the
/// packet id.
pub(crate) async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> io::Result<()> {
    let mut frame = Vec::with_capacity(payload.len() + MAX_VARINT_BYTES);
    push_varint(&mut frame, payload.len() as i32);
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Read one length-prefixed packet body.
pub(crate) async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> io::Result<Vec<u8>> {
    let len = read_varint(reader).await?;
    if len < 0 || len as usize > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Packet length {len} out of bounds"),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}
