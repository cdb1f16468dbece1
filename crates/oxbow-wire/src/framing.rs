//! Length-prefixed framing over an async byte stream.
//!
//! Each frame is a 4-byte big-endian length followed by the CBOR body.
//! [`MAX_FRAME_LEN`] bounds the body to prevent allocation attacks from a
//! hostile peer.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::cbor;
use crate::messages::Frame;
use crate::WireError;

/// Maximum CBOR body size of a single frame.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Write one frame to the stream and flush it.
///
/// # Errors
///
/// Returns [`WireError::Serialization`] if the frame cannot be encoded,
/// [`WireError::ProtocolViolation`] if the encoded body exceeds
/// [`MAX_FRAME_LEN`], and [`WireError::Io`] on stream failure.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let body = cbor::to_vec(frame)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(WireError::ProtocolViolation(format!(
            "frame too large: {} bytes, max {MAX_FRAME_LEN}",
            body.len()
        )));
    }
    let len = (body.len() as u32).to_be_bytes();
    writer
        .write_all(&len)
        .await
        .map_err(|e| WireError::Io(e.to_string()))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| WireError::Io(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| WireError::Io(e.to_string()))?;
    Ok(())
}

/// Read one frame from the stream.
///
/// # Errors
///
/// Returns [`WireError::Io`] on stream failure (including a peer closing
/// mid-frame), [`WireError::ProtocolViolation`] if the declared length
/// exceeds [`MAX_FRAME_LEN`], and [`WireError::Deserialization`] if the body
/// is not a valid [`Frame`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| WireError::Io(e.to_string()))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::ProtocolViolation(format!(
            "frame too large: {len} bytes, max {MAX_FRAME_LEN}"
        )));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| WireError::Io(e.to_string()))?;
    cbor::from_slice(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Operation, RpcRequest};
    use oxbow_types::{Key, PeerInfo};
    use std::net::SocketAddr;

    fn request_frame() -> Frame {
        Frame::Request(RpcRequest {
            request_id: 1,
            operation: Operation::FindPeer,
            sender: PeerInfo::new(
                Key::compute(b"a"),
                SocketAddr::from(([127, 0, 0, 1], 4100)),
            ),
            target: Key::compute(b"b"),
            data: None,
        })
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &request_frame()).await.expect("write");

        let mut cursor = buf.as_slice();
        let frame = read_frame(&mut cursor).await.expect("read");
        match frame {
            Frame::Request(req) => assert_eq!(req.operation, Operation::FindPeer),
            Frame::Response(_) => unreachable!("expected a request frame"),
        }
    }

    #[tokio::test]
    async fn test_two_frames_back_to_back() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &request_frame()).await.expect("write");
        write_frame(&mut buf, &request_frame()).await.expect("write");

        let mut cursor = buf.as_slice();
        read_frame(&mut cursor).await.expect("first");
        read_frame(&mut cursor).await.expect("second");
        assert!(cursor.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        let mut cursor = buf.as_slice();
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(WireError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_truncated_body_is_io_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &request_frame()).await.expect("write");
        buf.truncate(buf.len() - 3);

        let mut cursor = buf.as_slice();
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(WireError::Io(_))));
    }
}
