//! Request dispatch.
//!
//! Backend queries run on the blocking pool, bounded by the metadata
//! timeout. A query that overruns is answered with `BACKEND_UNAVAILABLE`
//! and its eventual result discarded.

use std::sync::Arc;
use std::time::Duration;

use protocol::messages::{
    CheckRequest, CheckResponse, ErrorCode, ErrorMessage, ListRequest, ListResponse,
    MountsResponse,
};
use protocol::{DenyReason, Envelope, Message};
use tracing::{error, warn};

use crate::files::{Decision, DirectoryBrowser, FileSystemRegistry, FlagChecker};

/// Answers requests against the registered mounts.
#[derive(Clone)]
pub struct RequestHandler {
    registry: Arc<FileSystemRegistry>,
    checker: FlagChecker,
    browser: DirectoryBrowser,
    metadata_timeout: Duration,
}

enum Bounded<T> {
    Done(T),
    TimedOut,
    Failed(String),
}

impl RequestHandler {
    pub fn new(
        registry: Arc<FileSystemRegistry>,
        checker: FlagChecker,
        browser: DirectoryBrowser,
        metadata_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            checker,
            browser,
            metadata_timeout,
        }
    }

    /// Answer one envelope, echoing its sequence number.
    pub async fn handle(&self, envelope: Envelope) -> Envelope {
        let payload = self.dispatch(envelope.payload).await;
        Envelope::new(envelope.sequence, payload)
    }

    async fn dispatch(&self, message: Message) -> Message {
        match message {
            Message::Ping => Message::Pong,
            Message::MountsRequest => self.mounts().await,
            Message::CheckRequest(request) => self.check(request).await,
            Message::ListRequest(request) => self.list(request).await,
            other => error_message(
                ErrorCode::InvalidRequest,
                format!("not a request: {:?}", other),
            ),
        }
    }

    async fn mounts(&self) -> Message {
        let registry = Arc::clone(&self.registry);
        match self.bounded(move || registry.mounts_info()).await {
            Bounded::Done(mounts) => Message::MountsResponse(MountsResponse { mounts }),
            Bounded::TimedOut => {
                error_message(ErrorCode::InternalError, "mount query timed out")
            }
            Bounded::Failed(e) => error_message(ErrorCode::InternalError, e),
        }
    }

    async fn check(&self, request: CheckRequest) -> Message {
        let Some(mount) = self.registry.get(&request.mount) else {
            return unknown_mount(&request.mount);
        };

        let checker = self.checker.clone();
        let flags = request.requested_flags();
        let path = request.path.clone();
        let outcome = self
            .bounded(move || checker.check_with_rules(mount.fs(), mount.rules(), &path, flags))
            .await;

        let response = match outcome {
            Bounded::Done(Decision::Approved { path, effective }) => {
                CheckResponse::approved(request.mount, path.as_str(), effective)
            }
            Bounded::Done(Decision::Denied(denial)) => {
                CheckResponse::denied(request.mount, request.path, denial.reason, denial.message)
            }
            Bounded::TimedOut => {
                warn!(
                    "Metadata query on {} timed out after {:?}",
                    request.mount, self.metadata_timeout
                );
                CheckResponse::denied(
                    request.mount,
                    request.path,
                    DenyReason::BackendUnavailable,
                    format!("metadata query timed out after {:?}", self.metadata_timeout),
                )
            }
            Bounded::Failed(e) => return error_message(ErrorCode::InternalError, e),
        };
        Message::CheckResponse(response)
    }

    async fn list(&self, request: ListRequest) -> Message {
        let Some(mount) = self.registry.get(&request.mount) else {
            return unknown_mount(&request.mount);
        };

        let browser = self.browser.clone();
        let path = request.path.clone();
        match self.bounded(move || browser.list(&mount, &path)).await {
            Bounded::Done(Ok((dir, entries))) => Message::ListResponse(ListResponse {
                mount: request.mount,
                path: dir.to_string(),
                entries: entries.iter().map(|e| e.to_protocol()).collect(),
            }),
            Bounded::Done(Err(e)) => {
                error_message(ErrorCode::Denied, format!("{}: {}", e.reason(), e))
            }
            Bounded::TimedOut => error_message(
                ErrorCode::Denied,
                format!("{}: listing timed out", DenyReason::BackendUnavailable),
            ),
            Bounded::Failed(e) => error_message(ErrorCode::InternalError, e),
        }
    }

    async fn bounded<T, F>(&self, work: F) -> Bounded<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(self.metadata_timeout, tokio::task::spawn_blocking(work)).await
        {
            Ok(Ok(value)) => Bounded::Done(value),
            Ok(Err(e)) => {
                error!("Backend task failed: {}", e);
                Bounded::Failed(format!("backend task failed: {}", e))
            }
            Err(_) => Bounded::TimedOut,
        }
    }
}

fn unknown_mount(label: &str) -> Message {
    error_message(ErrorCode::UnknownMount, format!("no mount named {:?}", label))
}

fn error_message(code: ErrorCode, message: impl Into<String>) -> Message {
    Message::Error(ErrorMessage {
        code,
        message: message.into(),
    })
}

pub(super) fn error_envelope(sequence: u64, code: ErrorCode, message: impl Into<String>) -> Envelope {
    Envelope::new(sequence, error_message(code, message))
}
