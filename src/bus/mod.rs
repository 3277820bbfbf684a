//! Bus Transport
//!
//! Length-framed, multi-part messages over any duplex byte stream.
//!
//! ## Design
//!
//! - A message is framed in memory and written with a single `write_all`
//! - A connection is marked broken *before* each send or receive and cleared
//!   only when the whole frame went through. An I/O error or a dropped
//!   (cancelled) future therefore leaves it broken, and every later call on
//!   it fails with [`BusError::Broken`]
//! - No multiplexing: one request/response exchange owns the connection
//!
//! ```rust
//! use ytclient::bus::Bus;
//!
//! # async fn example() -> Result<(), ytclient::bus::BusError> {
//! let (a, b) = tokio::io::duplex(1024);
//! let (mut client, mut server) = (Bus::new(a), Bus::new(b));
//! client.send(&[b"header".as_slice(), b"".as_slice()]).await?;
//! assert_eq!(server.receive().await?, vec![b"header".to_vec(), Vec::new()]);
//! # Ok(())
//! # }
//! ```

pub mod frame;

pub use frame::{decode_frame, encode_frame, MAX_PARTS};

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default limit for a single frame (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Bus framing and connection errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// Peer closed the connection between frames
    #[error("connection closed by peer")]
    Closed,

    /// Underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An earlier send or receive did not complete
    #[error("connection is broken")]
    Broken,

    /// Frame exceeds the configured size limit
    #[error("frame of {size} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    /// Message has more parts than a frame can describe
    #[error("message has {0} parts")]
    TooManyParts(usize),

    /// Frame structure is inconsistent
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Frame checksum does not match its content
    #[error("frame checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl BusError {
    /// Whether the connection this error came from is unusable.
    pub fn is_connection_error(&self) -> bool {
        match self {
            BusError::Closed | BusError::Broken | BusError::Io(_) => true,
            BusError::Malformed(_) | BusError::ChecksumMismatch { .. } => true,
            BusError::FrameTooLarge { .. } | BusError::TooManyParts(_) => false,
        }
    }

    /// Whether the peer had already gone away: the connection closed or reset
    /// before a reply frame arrived.
    pub fn is_peer_gone(&self) -> bool {
        match self {
            BusError::Closed => true,
            BusError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Framed connection over a duplex stream.
#[derive(Debug)]
pub struct Bus<S> {
    stream: S,
    max_frame_size: usize,
    broken: bool,
}

impl<S> Bus<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(stream: S, max_frame_size: usize) -> Self {
        Bus {
            stream,
            max_frame_size,
            broken: false,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Send one message. Oversized messages are rejected before anything is
    /// written and leave the connection usable.
    pub async fn send<P: AsRef<[u8]>>(&mut self, parts: &[P]) -> Result<(), BusError> {
        if self.broken {
            return Err(BusError::Broken);
        }
        let frame = encode_frame(parts, self.max_frame_size)?;

        self.broken = true;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        self.broken = false;
        Ok(())
    }

    /// Wait for the next message.
    pub async fn receive(&mut self) -> Result<Vec<Vec<u8>>, BusError> {
        if self.broken {
            return Err(BusError::Broken);
        }
        self.broken = true;

        let mut prefix = [0u8; frame::LENGTH_PREFIX_SIZE];
        if let Err(err) = self.stream.read_exact(&mut prefix).await {
            return Err(if err.kind() == io::ErrorKind::UnexpectedEof {
                BusError::Closed
            } else {
                BusError::Io(err)
            });
        }

        let total = u32::from_le_bytes(prefix) as usize;
        if total > self.max_frame_size {
            return Err(BusError::FrameTooLarge {
                size: total,
                limit: self.max_frame_size,
            });
        }

        let mut body = vec![0u8; total];
        self.stream.read_exact(&mut body).await?;
        let parts = frame::decode_body(&body)?;

        self.broken = false;
        Ok(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_send_receive() {
        let (a, b) = duplex(4096);
        let mut client = Bus::new(a);
        let mut server = Bus::new(b);

        client.send(&[b"one".as_slice(), b"two".as_slice()]).await.unwrap();
        client.send::<&[u8]>(&[]).await.unwrap();

        assert_eq!(server.receive().await.unwrap(), vec![b"one".to_vec(), b"two".to_vec()]);
        assert!(server.receive().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receive_after_peer_close() {
        let (a, b) = duplex(64);
        drop(a);
        let mut server = Bus::new(b);
        let err = server.receive().await.unwrap_err();
        assert!(matches!(err, BusError::Closed));
        assert!(err.is_peer_gone());
        assert!(server.is_broken());
        assert!(matches!(server.receive().await, Err(BusError::Broken)));
    }

    #[tokio::test]
    async fn test_truncated_frame_breaks_connection() {
        let (mut a, b) = duplex(4096);
        let frame = encode_frame(&[b"payload"], DEFAULT_MAX_FRAME_SIZE).unwrap();
        a.write_all(&frame[..frame.len() - 3]).await.unwrap();
        drop(a);

        let mut server = Bus::new(b);
        let err = server.receive().await.unwrap_err();
        assert!(err.is_connection_error());
        // Part of a reply arrived, so the peer was still there.
        assert!(!err.is_peer_gone());
        assert!(server.is_broken());
    }

    #[tokio::test]
    async fn test_oversized_send_keeps_connection() {
        let (a, _b) = duplex(4096);
        let mut client = Bus::with_max_frame_size(a, 32);
        let err = client.send(&[vec![0u8; 64]]).await.unwrap_err();
        assert!(matches!(err, BusError::FrameTooLarge { .. }));
        assert!(!err.is_connection_error());
        assert!(!client.is_broken());
    }

    #[tokio::test]
    async fn test_oversized_receive_is_rejected() {
        let (a, b) = duplex(4096);
        let mut client = Bus::new(a);
        let mut server = Bus::with_max_frame_size(b, 16);
        client.send(&[vec![1u8; 64]]).await.unwrap();
        assert!(matches!(server.receive().await, Err(BusError::FrameTooLarge { .. })));
    }
}
