//! Stream I/O
//!
//! Two co-existing framings over one TCP stream: newline-delimited UTF-8
//! text for handshake and control lines, and a 4-byte little-endian
//! length prefix for binary frames. One reader task and externally
//! serialized writers per session; each half sits behind its own lock.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::net::session::SessionMetrics;
use crate::net::wire::MAX_FRAME_LEN;
use crate::net::NetError;

/// Message-oriented I/O over a session's TCP stream.
///
/// Constructed exactly once per connection; the session reuses this
/// instance for its whole lifetime.
pub struct StreamIo {
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    metrics: Arc<SessionMetrics>,
}

impl StreamIo {
    /// Wrap a freshly accepted stream.
    pub fn new(stream: TcpStream, metrics: Arc<SessionMetrics>) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
            metrics,
        }
    }

    /// Read one UTF-8 line, stripping the trailing newline (and carriage
    /// return, for tolerant clients). Returns [`NetError::Closed`] on EOF.
    pub async fn read_line(&self) -> Result<String, NetError> {
        let mut line = String::new();
        let n = self.reader.lock().await.read_line(&mut line).await?;
        if n == 0 {
            return Err(NetError::Closed);
        }
        self.metrics.record_stream_received(n as u64);

        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Write one line, appending the newline terminator.
    pub async fn write_line(&self, line: &str) -> Result<(), NetError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        self.metrics.record_stream_sent(line.len() as u64 + 1);
        Ok(())
    }

    /// Read one binary frame: a `u32` little-endian length prefix followed
    /// by exactly that many payload bytes. Lengths of zero or above
    /// [`MAX_FRAME_LEN`] are framing violations and the caller drops the
    /// session.
    pub async fn read_frame(&self) -> Result<Vec<u8>, NetError> {
        let mut reader = self.reader.lock().await;

        let mut prefix = [0u8; 4];
        reader.read_exact(&mut prefix).await.map_err(map_eof)?;
        let len = u32::from_le_bytes(prefix);

        if len == 0 {
            return Err(NetError::EmptyFrame);
        }
        if len > MAX_FRAME_LEN {
            return Err(NetError::FrameTooLarge(len));
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await.map_err(map_eof)?;
        drop(reader);

        self.metrics.record_stream_received(4 + len as u64);
        Ok(payload)
    }

    /// Write one binary frame with its length prefix.
    pub async fn write_frame(&self, payload: &[u8]) -> Result<(), NetError> {
        if payload.is_empty() {
            return Err(NetError::EmptyFrame);
        }
        if payload.len() as u64 > MAX_FRAME_LEN as u64 {
            return Err(NetError::FrameTooLarge(payload.len() as u32));
        }

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        drop(writer);

        self.metrics.record_stream_sent(4 + payload.len() as u64);
        Ok(())
    }

    /// Close the write half. Further writes fail; the peer observes EOF.
    pub async fn shutdown(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// `read_exact` reports a clean close as `UnexpectedEof`; fold it into the
/// `Closed` variant the rest of the stack expects.
fn map_eof(e: std::io::Error) -> NetError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        NetError::Closed
    } else {
        NetError::Io(e)
    }
}
