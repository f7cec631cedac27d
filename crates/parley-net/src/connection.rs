//! TCP connection to a chat server.
//!
//! A [`Connection`] owns both halves of the socket plus the incremental
//! [`FrameDecoder`]. It is driven by the engine worker only: the worker awaits
//! [`Connection::recv_frames`] for socket readiness and writes requests with
//! [`Connection::send`]. The observable lifecycle state lives in a
//! [`ConnectionStateWatch`], written by the worker and read by anyone.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::framing::{FrameConfig, FrameDecoder, FrameError};
use crate::messages::{Message, MessageError, encode_frame};
use crate::state::StateWatch;

/// Connection lifecycle state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and no attempt in progress.
    #[default]
    Disconnected,
    /// Attempting to establish a TCP connection.
    Connecting,
    /// TCP connection established, ready for communication.
    Connected,
    /// Graceful close initiated, waiting for the peer.
    Stopping,
}

/// Connection state as seen by everyone but the worker.
pub type ConnectionStateWatch = StateWatch<ConnectionState>;

/// Frames completed by one socket read.
#[derive(Debug, Default)]
pub struct ReceivedFrames {
    /// Complete payloads in arrival order.
    pub frames: Vec<Bytes>,
    /// Set when the bytes after `frames` cannot be framed. The stream is
    /// unusable from that point on.
    pub error: Option<FrameError>,
}

/// Errors raised by an open or opening connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connect attempt did not finish in time.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// `host:port` that was dialled.
        addr: String,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// The peer closed its side of the stream.
    #[error("connection closed by peer")]
    Closed,

    /// An outbound message could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] MessageError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a [`Connection::close`] ended. Both count as a completed stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The peer acknowledged the close within the grace period.
    Graceful,
    /// The grace period elapsed (or the close failed) and the socket was dropped.
    Forced,
}

/// An established TCP connection speaking the framed chat protocol.
pub struct Connection {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: FrameDecoder,
    frame_config: FrameConfig,
    read_buf: Vec<u8>,
    peer: SocketAddr,
}

impl Connection {
    /// Connect to `host:port`, giving up after `connect_timeout`.
    ///
    /// Sets `TCP_NODELAY` and splits the stream.
    pub async fn open(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        frame_config: FrameConfig,
        read_buffer_size: usize,
    ) -> Result<Self, ConnectionError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout {
                addr: format!("{host}:{port}"),
                timeout: connect_timeout,
            })??;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer,
            decoder: FrameDecoder::new(&frame_config),
            frame_config,
            read_buf: vec![0u8; read_buffer_size.max(1)],
            peer,
        })
    }

    /// Address of the server.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Encode `msg` and write the whole frame.
    pub async fn send(&mut self, msg: &Message) -> Result<(), ConnectionError> {
        let frame = encode_frame(msg, &self.frame_config)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        tracing::trace!(tag = %msg.tag(), bytes = frame.len(), "Frame written");
        Ok(())
    }

    /// Wait for the next chunk of bytes and return every frame it completes.
    ///
    /// The frames may be empty when the chunk only extended a partial frame.
    /// Frames that precede an unframeable prefix in the same chunk are still
    /// returned, alongside the error.
    /// Cancel-safe: bytes are only consumed once the read has completed.
    pub async fn recv_frames(&mut self) -> Result<ReceivedFrames, ConnectionError> {
        let n = self.reader.read(&mut self.read_buf).await?;
        if n == 0 {
            return Err(ConnectionError::Closed);
        }
        tracing::trace!(bytes = n, "Chunk received");

        self.decoder.extend(&self.read_buf[..n]);
        let mut received = ReceivedFrames::default();
        for frame in self.decoder.frames() {
            match frame {
                Ok(frame) => received.frames.push(frame),
                Err(e) => {
                    received.error = Some(e);
                    break;
                }
            }
        }
        Ok(received)
    }

    /// Close the connection.
    ///
    /// Shuts down the write half, then waits up to `grace` for the peer to
    /// close its side. Any bytes still arriving are discarded. If the bound
    /// elapses the socket is dropped anyway.
    pub async fn close(self, grace: Duration) -> CloseOutcome {
        let Self {
            mut reader,
            mut writer,
            peer,
            ..
        } = self;

        if let Err(e) = writer.shutdown().await {
            tracing::debug!(%peer, "Shutdown failed: {e}");
            return CloseOutcome::Forced;
        }

        let drain = async {
            let mut buf = [0u8; 1024];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => return true,
                    Ok(_) => continue,
                    Err(_) => return false,
                }
            }
        };

        match tokio::time::timeout(grace, drain).await {
            Ok(true) => CloseOutcome::Graceful,
            Ok(false) => CloseOutcome::Forced,
            Err(_) => {
                tracing::debug!(%peer, "Peer did not close within {grace:?}, forcing");
                CloseOutcome::Forced
            }
        }
    }
}
