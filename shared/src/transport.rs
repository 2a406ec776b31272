//! Bidirectional line-framed connection used identically by client and server
//!
//! A [`Connection`] wraps one TCP stream. The server splits it right after
//! accept so that a dedicated writer task owns the [`FrameWriter`] while the
//! dispatcher's read loop owns the [`FrameReader`]. Framing errors are
//! reported per frame and leave the stream usable; I/O errors are fatal.

use crate::codec::{self, FrameError, MAX_FRAME_LEN};
use crate::protocol::Envelope;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl TransportError {
    /// Framing errors only cost the offending frame; everything else kills the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Frame(_))
    }
}

/// Reads newline-delimited envelopes from any async byte source.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            line: Vec::with_capacity(512),
        }
    }

    /// Waits for the next frame. `Ok(None)` means the peer closed the stream.
    ///
    /// Cancel safe: the bytes of a partly read frame stay buffered and the
    /// next call picks up where this one stopped.
    pub async fn receive(&mut self) -> Result<Option<Envelope>, TransportError> {
        let limit = (MAX_FRAME_LEN + 1).saturating_sub(self.line.len()) as u64;
        let read = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut self.line)
            .await?;

        if read == 0 && self.line.is_empty() {
            return Ok(None);
        }

        let frame = self.finish_frame().await;
        self.line.clear();
        frame
    }

    async fn finish_frame(&mut self) -> Result<Option<Envelope>, TransportError> {
        if self.line.last() != Some(&b'\n') {
            if self.line.len() > MAX_FRAME_LEN {
                self.discard_rest_of_line().await?;
                return Err(FrameError::TooLong.into());
            }
            // Stream ended mid-frame; the next call reports EOF.
            return Err(FrameError::MissingTerminator.into());
        }

        let text = std::str::from_utf8(&self.line).map_err(|_| FrameError::InvalidUtf8)?;
        Ok(Some(codec::decode(text)?))
    }

    async fn discard_rest_of_line(&mut self) -> io::Result<()> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            if let Some(pos) = available.iter().position(|b| *b == b'\n') {
                self.inner.consume(pos + 1);
                return Ok(());
            }
            let len = available.len();
            self.inner.consume(len);
        }
    }
}

/// Writes envelopes as newline-terminated frames.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let frame = codec::encode(envelope)?;
        self.inner.write_all(frame.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Flushes and shuts down the write side. Safe to call on a dead stream.
    pub async fn close(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

/// One TCP connection carrying envelopes in both directions.
pub struct Connection {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl Connection {
    /// Client side: connects to `host:port`.
    pub async fn open(host: &str, port: u16) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| TransportError::Connect {
                addr: format!("{}:{}", host, port),
                source,
            })?;
        Self::from_stream(stream)
    }

    /// Server side: wraps an accepted stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        self.writer.send(envelope).await
    }

    pub async fn receive(&mut self) -> Result<Option<Envelope>, TransportError> {
        self.reader.receive().await
    }

    pub async fn close(mut self) {
        self.writer.close().await;
    }

    pub fn into_split(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}
