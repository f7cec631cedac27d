//! Length-prefixed framing for the chat TCP stream.
//!
//! Every message on the wire is a length-prefixed frame:
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length does **not** include the 4 prefix bytes themselves. The payload
//! is one JSON object (see [`crate::messages`]).
//!
//! Socket reads hand arbitrary chunks to a [`FrameDecoder`], which carries
//! partial frames across reads and yields complete ones lazily.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 1 MB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn check_len(len: usize, config: &FrameConfig) -> Result<u32, FrameError> {
    let size = u32::try_from(len).unwrap_or(u32::MAX);
    if size > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size,
            max: config.max_payload_size,
        });
    }
    Ok(size)
}

/// Prefix `payload` with its length. Pure; the result is what goes on the wire.
pub fn frame_payload(payload: &[u8], config: &FrameConfig) -> Result<Vec<u8>, FrameError> {
    let len = check_len(payload.len(), config)?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Read a single length-prefixed frame from the stream.
///
/// Returns the payload bytes. Waits until the full frame is available.
/// Returns [`FrameError::ConnectionClosed`] if the peer closes the connection
/// before the frame is complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let payload_len = u32::from_le_bytes(len_buf);
    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::ConnectionClosed
            } else {
                FrameError::Io(e)
            }
        })?;
    }

    Ok(payload)
}

/// Write a single length-prefixed frame to the stream and flush it.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let frame = frame_payload(payload, config)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Incremental decoder
// ---------------------------------------------------------------------------

/// Accumulates raw stream bytes and splits them into complete frame payloads.
///
/// A chunk may hold zero, one or many frames, and a frame may span any number
/// of chunks. Bytes of an incomplete frame stay buffered until the rest
/// arrives.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_payload_size: u32,
}

impl FrameDecoder {
    /// Create a decoder enforcing the limits in `config`.
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            max_payload_size: config.max_payload_size,
        }
    }

    /// Append a chunk read from the stream.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Split off the next complete payload, if one is buffered.
    ///
    /// An oversized length prefix is reported as
    /// [`FrameError::PayloadTooLarge`]; the stream cannot be resynchronised
    /// after that and the decoder should be discarded.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_SIZE]);
        let payload_len = u32::from_le_bytes(prefix);
        if payload_len > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: self.max_payload_size,
            });
        }

        let frame_len = LENGTH_PREFIX_SIZE + payload_len as usize;
        if self.buffer.len() < frame_len {
            self.buffer.reserve(frame_len - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buffer.split_to(payload_len as usize).freeze()))
    }

    /// Lazily drain every complete frame currently buffered.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            decoder: self,
            failed: false,
        }
    }

    /// Number of bytes held for a frame that is not complete yet.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Iterator returned by [`FrameDecoder::frames`].
///
/// Stops after the first error.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
    failed: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Bytes, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.decoder.next_frame().transpose();
        self.failed = matches!(next, Some(Err(_)));
        next
    }
}
