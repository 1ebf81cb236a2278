//! Protocol message definitions for the file manager listener.
//!
//! Messages travel as one JSON document per line, each wrapped in an
//! [`Envelope`]. Flag masks are carried as raw `u32` values so that unknown
//! bits survive the trip and are reported as conflicts by the receiver.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::flags::FileFlags;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Envelope wrapper for all protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number echoed back in the matching response.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }

    /// Serialize to a single JSON line (without the trailing newline).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::from)
    }

    /// Parse one JSON line and check the version.
    pub fn from_json(line: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(line.trim())?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: envelope.version,
            });
        }
        Ok(envelope)
    }
}

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    /// Liveness check.
    Ping,
    /// Answer to [`Message::Ping`].
    Pong,
    /// Ask for the mounted filesystems.
    MountsRequest,
    /// Mounted filesystems, in registration order.
    MountsResponse(MountsResponse),
    /// Ask whether an operation may proceed.
    CheckRequest(CheckRequest),
    /// Decision for a [`Message::CheckRequest`].
    CheckResponse(CheckResponse),
    /// Ask for a directory listing.
    ListRequest(ListRequest),
    /// Directory listing.
    ListResponse(ListResponse),
    /// Request could not be processed.
    Error(ErrorMessage),
}

/// Why an operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    /// Requested bitmask contains a logically inconsistent combination.
    FlagConflict,
    /// Normalized path resolves outside the filesystem's root.
    PathEscape,
    /// Path is empty, too long or contains forbidden characters.
    InvalidPath,
    /// Mutation requested against a read-only backend.
    MediaReadonly,
    /// Delete requested on a non-empty directory without recurse.
    NotEmpty,
    /// Operation requires existence but the path is absent.
    NotFound,
    /// Strict-mode create or protected write on an existing path.
    AlreadyExists,
    /// File expected but directory found, or the other way round.
    WrongType,
    /// A mount access rule forbids the operation.
    AccessDenied,
    /// Backend failed or timed out during the metadata query.
    BackendUnavailable,
}

impl DenyReason {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::FlagConflict => "FLAG_CONFLICT",
            DenyReason::PathEscape => "PATH_ESCAPE",
            DenyReason::InvalidPath => "INVALID_PATH",
            DenyReason::MediaReadonly => "MEDIA_READONLY",
            DenyReason::NotEmpty => "NOT_EMPTY",
            DenyReason::NotFound => "NOT_FOUND",
            DenyReason::AlreadyExists => "ALREADY_EXISTS",
            DenyReason::WrongType => "WRONG_TYPE",
            DenyReason::AccessDenied => "ACCESS_DENIED",
            DenyReason::BackendUnavailable => "BACKEND_UNAVAILABLE",
        }
    }

    /// HTTP status a web front end should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            DenyReason::FlagConflict | DenyReason::InvalidPath => 400,
            DenyReason::PathEscape | DenyReason::MediaReadonly | DenyReason::AccessDenied => 403,
            DenyReason::NotFound => 404,
            DenyReason::NotEmpty | DenyReason::AlreadyExists | DenyReason::WrongType => 409,
            DenyReason::BackendUnavailable => 503,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about one mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountInfo {
    /// Mount label used in requests.
    pub label: String,
    /// Backend kind (e.g. `directory`, `memory`).
    pub kind: String,
    /// Whether the backend rejects mutations.
    pub read_only: bool,
    /// Capacity in bytes, if the backend knows it.
    pub total_bytes: Option<u64>,
    /// Bytes in use, if the backend knows it.
    pub used_bytes: Option<u64>,
}

/// Mounted filesystems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountsResponse {
    pub mounts: Vec<MountInfo>,
}

/// Request to check one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Mount label.
    pub mount: String,
    /// Path inside the mount.
    pub path: String,
    /// Raw requested bitmask.
    pub flags: u32,
}

impl CheckRequest {
    /// Build a request from typed flags.
    pub fn new(mount: impl Into<String>, path: impl Into<String>, flags: FileFlags) -> Self {
        Self {
            mount: mount.into(),
            path: path.into(),
            flags: flags.bits(),
        }
    }

    /// Requested flags, unknown bits retained.
    pub fn requested_flags(&self) -> FileFlags {
        FileFlags::from_bits_retain(self.flags)
    }
}

/// Decision for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    /// Mount label from the request.
    pub mount: String,
    /// Normalized path when approved, the requested path otherwise.
    pub path: String,
    /// Whether the operation may proceed.
    pub approved: bool,
    /// Effective flags to apply (0 when denied).
    pub effective: u32,
    /// Denial reason.
    pub reason: Option<DenyReason>,
    /// Human-readable detail for a denial.
    pub message: Option<String>,
    /// HTTP status a web front end should answer with.
    pub status: u16,
}

impl CheckResponse {
    /// Approval carrying the effective flags.
    pub fn approved(mount: impl Into<String>, path: impl Into<String>, effective: FileFlags) -> Self {
        Self {
            mount: mount.into(),
            path: path.into(),
            approved: true,
            effective: effective.bits(),
            reason: None,
            message: None,
            status: 200,
        }
    }

    /// Denial with a reason.
    pub fn denied(
        mount: impl Into<String>,
        path: impl Into<String>,
        reason: DenyReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            mount: mount.into(),
            path: path.into(),
            approved: false,
            effective: 0,
            reason: Some(reason),
            message: Some(message.into()),
            status: reason.http_status(),
        }
    }

    /// Effective flags as a typed value.
    pub fn effective_flags(&self) -> FileFlags {
        FileFlags::from_bits_retain(self.effective)
    }
}

/// Request to list a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    /// Mount label.
    pub mount: String,
    /// Directory path inside the mount.
    pub path: String,
}

/// Directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// Mount label.
    pub mount: String,
    /// Normalized directory path.
    pub path: String,
    /// Entries, directories first.
    pub entries: Vec<FileEntry>,
}

/// A single file or directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub entry_type: FileEntryType,
    /// Size in bytes (0 for directories).
    pub size: u64,
}

/// Type of file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileEntryType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Other (device, socket, etc.).
    Other,
}

/// Error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes for requests that never reach the checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed or unexpected message.
    InvalidRequest,
    /// No filesystem is mounted under the requested label.
    UnknownMount,
    /// Operation refused; see the message for the reason.
    Denied,
    /// Server-side error.
    InternalError,
    /// Protocol version mismatch.
    VersionMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_version() {
        let envelope = Envelope::new(1, Message::Ping);
        assert_eq!(envelope.version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_envelope_json_line() {
        let envelope = Envelope::new(
            7,
            Message::CheckRequest(CheckRequest::new("flash", "/a.txt", FileFlags::READ)),
        );
        let line = envelope.to_json().unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"type\":\"CheckRequest\""));

        let decoded = Envelope::from_json(&line).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_envelope_rejects_other_version() {
        let line = r#"{"version":9,"sequence":1,"payload":{"type":"Ping"}}"#;
        let result = Envelope::from_json(line);
        assert!(matches!(
            result,
            Err(ProtocolError::VersionMismatch { expected: 1, got: 9 })
        ));
    }

    #[test]
    fn test_unknown_bits_survive_the_wire() {
        let line = r#"{"version":1,"sequence":3,"payload":{"type":"CheckRequest","data":{"mount":"sd","path":"/","flags":1048577}}}"#;
        let envelope = Envelope::from_json(line).unwrap();
        match envelope.payload {
            Message::CheckRequest(request) => {
                assert!(request.requested_flags().contains(FileFlags::READ));
                assert_eq!(request.requested_flags().bits(), 1 << 20 | 1);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_deny_reason_wire_names() {
        let json = serde_json::to_string(&DenyReason::MediaReadonly).unwrap();
        assert_eq!(json, "\"MEDIA_READONLY\"");
        assert_eq!(DenyReason::MediaReadonly.as_str(), "MEDIA_READONLY");

        let restored: DenyReason = serde_json::from_str("\"BACKEND_UNAVAILABLE\"").unwrap();
        assert_eq!(restored, DenyReason::BackendUnavailable);
    }

    #[test]
    fn test_deny_reason_http_status() {
        assert_eq!(DenyReason::FlagConflict.http_status(), 400);
        assert_eq!(DenyReason::PathEscape.http_status(), 403);
        assert_eq!(DenyReason::MediaReadonly.http_status(), 403);
        assert_eq!(DenyReason::NotFound.http_status(), 404);
        assert_eq!(DenyReason::AlreadyExists.http_status(), 409);
        assert_eq!(DenyReason::NotEmpty.http_status(), 409);
        assert_eq!(DenyReason::BackendUnavailable.http_status(), 503);
    }

    #[test]
    fn test_check_response_constructors() {
        let ok = CheckResponse::approved("flash", "/a", FileFlags::READ);
        assert!(ok.approved);
        assert_eq!(ok.status, 200);
        assert_eq!(ok.effective_flags(), FileFlags::READ);

        let denied = CheckResponse::denied("flash", "/a", DenyReason::NotFound, "missing");
        assert!(!denied.approved);
        assert_eq!(denied.status, 404);
        assert_eq!(denied.effective, 0);
        assert_eq!(denied.reason, Some(DenyReason::NotFound));
    }
}
