//! Frame and datagram codec for the simulation wire protocol.
//!
//! Stream frame format (TCP and RPC channel):
//! ```text
//! ┌──────────┬──────────┬────────────────────────┐
//! │ len (4B) │ type(1B) │   msgpack payload      │
//! │ u32 BE   │ u8       │                        │
//! └──────────┴──────────┴────────────────────────┘
//! ```
//! Length = sizeof(type byte) + sizeof(payload), NOT including the 4-byte prefix.
//!
//! Datagrams (UDP) carry the same type byte and payload without the length
//! prefix; one datagram is one message.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::types::{Error, Result};

/// Message type: encoded `Request`.
pub const MSG_REQUEST: u8 = 0x01;
/// Message type: encoded `Reply`.
pub const MSG_RESPONSE: u8 = 0x02;
/// Message type: RPC envelope request.
pub const MSG_RPC_REQUEST: u8 = 0x05;
/// Message type: RPC envelope response.
pub const MSG_RPC_RESPONSE: u8 = 0x06;
/// Message type: protocol error (malformed or unexpected message).
pub const MSG_ERROR: u8 = 0xFF;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// Read one frame from the stream.
///
/// Returns `(msg_type, payload_bytes)`. Returns `None` on clean EOF.
/// `max_frame_bytes` caps the maximum accepted payload size.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> std::io::Result<Option<(u8, Vec<u8>)>> {
    // Read 4-byte length prefix
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let frame_len = u32::from_be_bytes(len_buf);
    if frame_len > max_frame_bytes {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", frame_len),
        ));
    }
    if frame_len < 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Frame too short: missing type byte",
        ));
    }

    // Read type byte + payload
    let mut frame_data = vec![0u8; frame_len as usize];
    reader.read_exact(&mut frame_data).await?;

    let msg_type = frame_data[0];
    let payload = frame_data[1..].to_vec();

    Ok(Some((msg_type, payload)))
}

/// Write one frame to the stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
) -> std::io::Result<()> {
    let frame_len = u32::try_from(payload.len() + 1).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "payload exceeds u32 frame length")
    })?;
    writer.write_all(&frame_len.to_be_bytes()).await?;
    writer.write_all(&[msg_type]).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Build a datagram: type byte followed by payload.
pub fn encode_datagram(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(payload.len() + 1);
    datagram.push(msg_type);
    datagram.extend_from_slice(payload);
    datagram
}

/// Split a datagram into `(msg_type, payload)`.
pub fn decode_datagram(datagram: &[u8]) -> Result<(u8, &[u8])> {
    match datagram.split_first() {
        Some((msg_type, payload)) => Ok((*msg_type, payload)),
        None => Err(Error::protocol("empty datagram")),
    }
}

/// Encode a value as named-field msgpack.
pub fn encode_msgpack<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| {
        tracing::error!("Msgpack encoding failed: {}", e);
        Error::from(e)
    })
}

/// Decode a msgpack payload.
pub fn decode_msgpack<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(payload)?)
}
