use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Lowercased header names. Multiple values are joined with ", ".
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub latency: Duration,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TransportErrorKind {
    InvalidUrl,
    UnsupportedScheme,
    InvalidRequest,
    Connect,
    Request,
    Timeout,
    BodyRead,
}

impl TransportErrorKind {
    /// Transient failures are worth another attempt; the rest fail the same way every time.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Connect | Self::Request | Self::Timeout | Self::BodyRead
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    /// Time spent before the failure surfaced.
    pub latency: Duration,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>, latency: Duration) -> Self {
        Self {
            kind,
            message: message.into(),
            latency,
        }
    }
}

/// The single operation the engine needs from an HTTP stack.
///
/// Implementations are shared by every virtual user, so connection pooling is theirs to manage.
pub trait Transport: Send + Sync + 'static {
    fn issue_request(
        &self,
        req: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}
