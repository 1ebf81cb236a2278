//! Network listener of the file manager.
//!
//! The listener uses a JSON newline-delimited protocol: each message is one
//! [`protocol::Envelope`] serialized on a single line. Every request gets
//! exactly one response carrying the request's sequence number.
//!
//! ## Example
//!
//! ```rust,no_run
//! use filemanager::server::FileManagerClient;
//! use filemanager::protocol::FileFlags;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = FileManagerClient::connect("127.0.0.1:8080").await?;
//!     let decision = client.check("flash", "/data/log.txt", FileFlags::READ).await?;
//!     println!("approved: {}", decision.approved);
//!     Ok(())
//! }
//! ```

mod client;
mod handler;
mod listener;

pub use client::FileManagerClient;
pub use handler::RequestHandler;
pub use listener::{Connection, FileManagerListener, MAX_LINE_LEN};

use std::io;
use std::net::SocketAddr;

use protocol::messages::ErrorCode;
use protocol::{Envelope, ProtocolError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that can occur on a listener connection.
#[derive(Debug, Error)]
pub enum ServerError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer did not answer in time.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A line exceeded the connection's limit.
    #[error("line longer than {0} bytes")]
    LineTooLong(usize),

    /// The daemon answered with an error message.
    #[error("request rejected ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// The daemon answered with something other than what was asked for.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Accept connections until `token` is cancelled.
pub async fn serve(listener: FileManagerListener, handler: RequestHandler, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("Listener received shutdown signal");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((connection, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    let handler = handler.clone();
                    let token = token.clone();
                    tokio::spawn(async move {
                        serve_connection(connection, peer, handler, token).await;
                    });
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            }
        }
    }
}

async fn serve_connection(
    mut connection: Connection,
    peer: SocketAddr,
    handler: RequestHandler,
    token: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = connection.read_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Connection from {} closed", peer);
                break;
            }
            Err(ServerError::LineTooLong(limit)) => {
                warn!("Dropping {}: request line longer than {} bytes", peer, limit);
                let reply = handler::error_envelope(
                    0,
                    ErrorCode::InvalidRequest,
                    format!("request line longer than {} bytes", limit),
                );
                let _ = connection.send_envelope(&reply).await;
                break;
            }
            Err(e) => {
                warn!("Read error on connection from {}: {}", peer, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        // A finished check whose requester went away is simply dropped.
        let reply = match Envelope::from_json(&line) {
            Ok(envelope) => handler.handle(envelope).await,
            Err(ProtocolError::VersionMismatch { expected, got }) => handler::error_envelope(
                0,
                ErrorCode::VersionMismatch,
                format!("expected protocol version {}, got {}", expected, got),
            ),
            Err(e) => {
                warn!("Malformed request from {}: {}", peer, e);
                handler::error_envelope(0, ErrorCode::InvalidRequest, e.to_string())
            }
        };

        if let Err(e) = connection.send_envelope(&reply).await {
            warn!("Failed to answer {}: {}", peer, e);
            break;
        }
    }
}
