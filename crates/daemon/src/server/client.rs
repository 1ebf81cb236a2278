//! Client for a running file manager daemon.

use std::time::Duration;

use protocol::messages::{CheckRequest, CheckResponse, ListRequest, ListResponse, MountInfo};
use protocol::{Envelope, FileFlags, Message};
use tokio::net::{TcpStream, ToSocketAddrs};

use super::{Connection, ServerError};

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Responses carry whole listings, so they get more room than requests.
const MAX_RESPONSE_LINE_LEN: usize = 16 * 1024 * 1024;

/// A client speaking the file manager protocol.
pub struct FileManagerClient {
    connection: Connection,
    timeout: Duration,
    next_sequence: u64,
}

impl FileManagerClient {
    /// Connect to the daemon at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established. This
    /// typically indicates that the daemon is not running.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ServerError> {
        Self::connect_with_timeout(addr, Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await
    }

    /// Connect with a custom timeout, used for the connection attempt and
    /// every later request.
    pub async fn connect_with_timeout<A: ToSocketAddrs>(
        addr: A,
        timeout: Duration,
    ) -> Result<Self, ServerError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ServerError::Timeout("connection timed out".to_string()))??;

        Ok(Self {
            connection: Connection::new(stream).with_max_line_len(MAX_RESPONSE_LINE_LEN),
            timeout,
            next_sequence: 1,
        })
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request and wait for the matching response.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails or times out, if the daemon
    /// answers with an error message, or if the response carries another
    /// sequence number.
    pub async fn send(&mut self, request: Message) -> Result<Message, ServerError> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let timeout = self.timeout;
        let reply = tokio::time::timeout(timeout, self.exchange(Envelope::new(sequence, request)))
            .await
            .map_err(|_| ServerError::Timeout("operation timed out".to_string()))??;

        if reply.sequence != sequence {
            return Err(ServerError::UnexpectedResponse(format!(
                "sequence {} for request {}",
                reply.sequence, sequence
            )));
        }
        match reply.payload {
            Message::Error(error) => Err(ServerError::Remote {
                code: error.code,
                message: error.message,
            }),
            payload => Ok(payload),
        }
    }

    async fn exchange(&mut self, envelope: Envelope) -> Result<Envelope, ServerError> {
        self.connection.send_envelope(&envelope).await?;
        self.connection
            .read_envelope()
            .await?
            .ok_or(ServerError::ConnectionClosed)
    }

    /// Check whether the daemon is responsive.
    pub async fn ping(&mut self) -> Result<bool, ServerError> {
        let response = self.send(Message::Ping).await?;
        Ok(matches!(response, Message::Pong))
    }

    /// Mounted filesystems.
    pub async fn mounts(&mut self) -> Result<Vec<MountInfo>, ServerError> {
        match self.send(Message::MountsRequest).await? {
            Message::MountsResponse(response) => Ok(response.mounts),
            other => Err(unexpected(other)),
        }
    }

    /// Ask whether `flags` may be applied to `path` on `mount`.
    pub async fn check(
        &mut self,
        mount: &str,
        path: &str,
        flags: FileFlags,
    ) -> Result<CheckResponse, ServerError> {
        let request = CheckRequest::new(mount, path, flags);
        match self.send(Message::CheckRequest(request)).await? {
            Message::CheckResponse(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    /// List a directory.
    pub async fn list(&mut self, mount: &str, path: &str) -> Result<ListResponse, ServerError> {
        let request = ListRequest {
            mount: mount.to_string(),
            path: path.to_string(),
        };
        match self.send(Message::ListRequest(request)).await? {
            Message::ListResponse(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(message: Message) -> ServerError {
    ServerError::UnexpectedResponse(format!("{:?}", message))
}
