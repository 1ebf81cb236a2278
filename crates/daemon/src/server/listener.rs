//! TCP listener and line-framed connections.

use std::net::SocketAddr;

use protocol::Envelope;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use super::ServerError;

/// Longest line a connection accepts by default, newline included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// The file manager's TCP listener.
pub struct FileManagerListener {
    listener: TcpListener,
}

impl FileManagerListener {
    /// Bind to `addr`. Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the next connection.
    pub async fn accept(&self) -> Result<(Connection, SocketAddr), ServerError> {
        let (stream, peer) = self.listener.accept().await?;
        Ok((Connection::new(stream), peer))
    }
}

/// One JSON-lines connection, used on both ends.
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    max_line_len: usize,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            max_line_len: MAX_LINE_LEN,
        }
    }

    /// Accept lines up to `max_line_len` bytes instead of [`MAX_LINE_LEN`].
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    /// Read one raw line. Returns `None` once the peer has disconnected.
    ///
    /// A line longer than the limit fails with [`ServerError::LineTooLong`]
    /// after at most one byte past the limit has been buffered. The
    /// connection is out of sync afterwards and should be closed.
    pub async fn read_line(&mut self) -> Result<Option<String>, ServerError> {
        let mut line = String::new();
        let limit = self.max_line_len as u64 + 1;
        let bytes_read = (&mut self.reader).take(limit).read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        if bytes_read > self.max_line_len {
            return Err(ServerError::LineTooLong(self.max_line_len));
        }
        Ok(Some(line))
    }

    /// Read and decode the next envelope.
    pub async fn read_envelope(&mut self) -> Result<Option<Envelope>, ServerError> {
        match self.read_line().await? {
            Some(line) => Ok(Some(Envelope::from_json(&line)?)),
            None => Ok(None),
        }
    }

    /// Encode and send one envelope.
    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), ServerError> {
        let mut json = envelope.to_json()?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
