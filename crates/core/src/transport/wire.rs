//! Signaling relay wire format.
//!
//! Every frame is a 4-byte big-endian length followed by a JSON body.
//! Link payloads (see [`crate::protocol`]) travel inside `data` frames as
//! UTF-8 text.

use crate::error::{Error, Result};
use crate::transport::link::LinkId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body size (1 MB).
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Frames sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Claim an address. Must be the first frame on a connection.
    Register { address: String },
    /// Open a link to another registered address.
    Dial { link_id: LinkId, to: String },
    /// Payload for the other end of a link.
    Data { link_id: LinkId, payload: String },
    /// Close a link.
    Close { link_id: LinkId },
}

/// Frames sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Registration accepted.
    Registered { address: String },
    /// Another client opened a link to us.
    Incoming { link_id: LinkId, from: String },
    /// Our dial succeeded.
    Opened { link_id: LinkId },
    /// Our dial failed.
    DialFailed { link_id: LinkId, reason: String },
    /// Payload from the other end of a link.
    Data { link_id: LinkId, payload: String },
    /// The other end closed the link.
    Closed { link_id: LinkId },
    /// Request rejected.
    Error { message: String },
}

/// Encode a frame (length-prefixed JSON).
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(frame)?;
    if json.len() > MAX_FRAME_SIZE as usize {
        return Err(Error::Protocol(format!("frame too large: {} bytes", json.len())));
    }
    let len = json.len() as u32;
    let mut buf = Vec::with_capacity(4 + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Decode a frame body (length prefix already stripped).
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| Error::Protocol(format!("invalid frame: {}", e)))
}

/// Write one frame.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = encode(frame)?;
    writer
        .write_all(&encoded)
        .await
        .map_err(|e| Error::Io(format!("send failed: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Io(format!("flush failed: {}", e)))?;
    Ok(())
}

/// Read one frame. Returns `None` on a clean end of stream.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Io(format!("recv length failed: {}", e))),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!("frame too large: {} bytes", len)));
    }

    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| Error::Io(format!("recv body failed: {}", e)))?;

    decode(&buf).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = ClientFrame::Register {
            address: "abhi-chat-khusbu-2025".to_string(),
        };
        let encoded = encode(&frame).unwrap();

        // First 4 bytes are length
        let len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len as usize, encoded.len() - 4);

        let json: serde_json::Value = serde_json::from_slice(&encoded[4..]).unwrap();
        assert_eq!(json["type"], "register");
        assert_eq!(json["address"], "abhi-chat-khusbu-2025");
    }

    #[test]
    fn test_server_frame_tags() {
        let frame = ServerFrame::DialFailed {
            link_id: LinkId("l1".to_string()),
            reason: "peer unavailable".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"dial_failed\""));
        assert!(json.contains("\"link_id\":\"l1\""));
    }

    #[tokio::test]
    async fn test_read_write_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let frame = ServerFrame::Data {
            link_id: LinkId("l1".to_string()),
            payload: r#"{"type":"typing","isTyping":true,"user":"Khusbu"}"#.to_string(),
        };

        write_frame(&mut server, &frame).await.unwrap();
        drop(server);

        let read: Option<ServerFrame> = read_frame(&mut client).await.unwrap();
        assert_eq!(read, Some(frame));
        let end: Option<ServerFrame> = read_frame(&mut client).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server
            .write_all(&(MAX_FRAME_SIZE + 1).to_be_bytes())
            .await
            .unwrap();

        let result: Result<Option<ClientFrame>> = read_frame(&mut client).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
