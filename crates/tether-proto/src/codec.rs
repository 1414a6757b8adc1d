//! Length-prefixed frame codec for async streams

use crate::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload size accepted by default (8 MiB)
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Codec for `[4-byte big-endian length][payload]` frames.
///
/// The decoder accumulates transport chunks of whatever size the stream
/// produces until a full frame is buffered; a read never assumes the
/// transport delivers a frame in one piece. The codec holds no state across
/// frames apart from its read buffer, so one instance per direction per
/// connection is enough.
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum payload size allowed
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec with the default frame size limit
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a codec with a custom frame size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Encode a payload into a length-prefixed frame
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, ProtocolError> {
        if payload.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);

        Ok(buf.freeze())
    }

    /// Write one frame to an async writer
    pub async fn write_frame<W>(&self, writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode(payload)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame payload from an async reader.
    ///
    /// Returns `Ok(None)` when the peer closes the connection at a frame
    /// boundary. A close in the middle of a frame is a
    /// [`ProtocolError::ShortRead`].
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(payload) = self.try_decode()? {
                return Ok(Some(payload));
            }

            let mut chunk = [0u8; 8192];
            let n = reader.read(&mut chunk).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::ShortRead);
            }

            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Try to decode one frame from the buffered bytes
    pub fn try_decode(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.read_buf.len() < 4 {
            return Ok(None);
        }

        // Peek the length prefix without consuming it
        let frame_len = (&self.read_buf[..4]).get_u32() as usize;

        if frame_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        if self.read_buf.len() < 4 + frame_len {
            return Ok(None);
        }

        self.read_buf.advance(4);
        Ok(Some(self.read_buf.split_to(frame_len).freeze()))
    }

    /// Number of bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }
}
