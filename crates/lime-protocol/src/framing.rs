//! Length-prefixed framing for stream transports.
//!
//! Each envelope travels as a 4-byte big-endian length followed by the
//! UTF-8 JSON payload:
//!
//! ```text
//! +----------------+------------------+
//! | length (4 BE)  |  JSON payload    |
//! +----------------+------------------+
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_ENVELOPE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};

/// Prepends the length prefix to a payload.
pub fn encode_frame(payload: &[u8], max: u32) -> ProtocolResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    if len > max {
        return Err(ProtocolError::MessageTooLarge { size: len, max });
    }
    if len == 0 {
        return Err(ProtocolError::EmptyMessage);
    }

    let mut buffer = Vec::with_capacity(4 + payload.len());
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

/// Splits one complete frame off the front of `data`.
///
/// Returns the payload and the number of bytes consumed.
pub fn decode_frame(data: &[u8], max: u32) -> ProtocolResult<(&[u8], usize)> {
    let Some(len_bytes) = data.get(0..4) else {
        return Err(ProtocolError::IncompleteMessage {
            expected: 4,
            received: data.len(),
        });
    };
    let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]);

    if len > max {
        return Err(ProtocolError::MessageTooLarge { size: len, max });
    }
    if len == 0 {
        return Err(ProtocolError::EmptyMessage);
    }

    let end = 4 + len as usize;
    match data.get(4..end) {
        Some(payload) => Ok((payload, end)),
        None => Err(ProtocolError::IncompleteMessage {
            expected: end,
            received: data.len(),
        }),
    }
}

/// Reads framed payloads from an async byte stream.
///
/// `read_frame` is not cancel-safe: dropping it mid-frame loses the
/// partially read bytes. Callers that need cancellation run the reader in
/// its own task.
pub struct FrameReader<R> {
    reader: R,
    max: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a reader using the default size limit.
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, MAX_ENVELOPE_SIZE)
    }

    /// Creates a reader rejecting frames above `max` bytes.
    pub fn with_limit(reader: R, max: u32) -> Self {
        Self { reader, max }
    }

    /// Reads a single frame payload.
    ///
    /// Returns `Ok(None)` on a clean end of stream (no bytes of a new frame).
    /// A stream ending inside a frame is an `IncompleteMessage` error.
    pub async fn read_frame(&mut self) -> ProtocolResult<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        let read = self.fill(&mut len_buf).await?;
        if read == 0 {
            return Ok(None);
        }
        if read < len_buf.len() {
            return Err(ProtocolError::IncompleteMessage {
                expected: 4,
                received: read,
            });
        }

        let len = u32::from_be_bytes(len_buf);
        if len > self.max {
            return Err(ProtocolError::MessageTooLarge {
                size: len,
                max: self.max,
            });
        }
        if len == 0 {
            return Err(ProtocolError::EmptyMessage);
        }

        let mut payload = vec![0u8; len as usize];
        let read = self.fill(&mut payload).await?;
        if read < payload.len() {
            return Err(ProtocolError::IncompleteMessage {
                expected: payload.len(),
                received: read,
            });
        }
        Ok(Some(payload))
    }

    async fn fill(&mut self, buf: &mut [u8]) -> ProtocolResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Returns a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Unwraps this FrameReader, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes framed payloads to an async byte stream.
pub struct FrameWriter<W> {
    writer: W,
    max: u32,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Creates a writer using the default size limit.
    pub fn new(writer: W) -> Self {
        Self::with_limit(writer, MAX_ENVELOPE_SIZE)
    }

    /// Creates a writer rejecting payloads above `max` bytes.
    pub fn with_limit(writer: W, max: u32) -> Self {
        Self { writer, max }
    }

    /// Writes and flushes a single frame.
    pub async fn write_frame(&mut self, payload: &[u8]) -> ProtocolResult<()> {
        let data = encode_frame(payload, self.max)?;
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shuts down the write half of the stream.
    pub async fn shutdown(&mut self) -> ProtocolResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Returns a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Unwraps this FrameWriter, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
