//! Error types for the TeamSL upstream client.

use crate::teamsl::adapters::AdapterKind;
use crate::teamsl::models::Payload;
use std::time::Duration;

/// Failures produced by the transport before any HTTP status is known.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

impl TransportError {
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_owned();
        if err.is_timeout() {
            Self::Timeout { url }
        } else if err.is_connect() {
            Self::Connect {
                url,
                message: err.to_string(),
            }
        } else {
            Self::Request {
                url,
                message: err.to_string(),
            }
        }
    }
}

/// Every failure the engine can surface to a caller.
///
/// `Clone` because a single failed fetch is broadcast to every waiter that was
/// coalesced onto it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("{adapter}: transient network failure: {message}")]
    TransientNetwork { adapter: AdapterKind, message: String },

    #[error("{adapter}: search session was rejected: {message}")]
    SessionExpired { adapter: AdapterKind, message: String },

    #[error("{adapter}: unexpected upstream format: {message}")]
    Format { adapter: AdapterKind, message: String },

    #[error("{adapter}: assembled {assembled} records but upstream reported {expected}")]
    PaginationInconsistency {
        adapter: AdapterKind,
        expected: u32,
        assembled: usize,
        /// Best-effort result assembled before the inconsistency was detected.
        partial: Box<Payload>,
    },

    #[error("{adapter}: rate limited or blocked by upstream (HTTP {status})")]
    RateLimited {
        adapter: AdapterKind,
        status: u16,
        retry_after: Option<Duration>,
    },
}

/// Coarse classification of [`UpstreamError`] for the service shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    SessionExpired,
    Format,
    PaginationInconsistency,
    RateLimited,
}

impl ErrorKind {
    /// HTTP status a service shell should answer with for this kind.
    pub fn http_status(self) -> u16 {
        match self {
            Self::Transient => 503,
            Self::SessionExpired => 502,
            Self::Format => 502,
            Self::PaginationInconsistency => 206,
            Self::RateLimited => 429,
        }
    }
}

impl UpstreamError {
    pub fn format(adapter: AdapterKind, message: impl Into<String>) -> Self {
        Self::Format {
            adapter,
            message: message.into(),
        }
    }

    pub fn transient(adapter: AdapterKind, message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            adapter,
            message: message.into(),
        }
    }

    pub fn session_expired(adapter: AdapterKind, message: impl Into<String>) -> Self {
        Self::SessionExpired {
            adapter,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientNetwork { .. } => ErrorKind::Transient,
            Self::SessionExpired { .. } => ErrorKind::SessionExpired,
            Self::Format { .. } => ErrorKind::Format,
            Self::PaginationInconsistency { .. } => ErrorKind::PaginationInconsistency,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
        }
    }

    pub fn adapter(&self) -> AdapterKind {
        match self {
            Self::TransientNetwork { adapter, .. }
            | Self::SessionExpired { adapter, .. }
            | Self::Format { adapter, .. }
            | Self::PaginationInconsistency { adapter, .. }
            | Self::RateLimited { adapter, .. } => *adapter,
        }
    }

    /// Whether the request that produced this error may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork { .. } | Self::RateLimited { .. }
        )
    }

    /// Classify a transport failure at the adapter boundary.
    pub(crate) fn from_transport(adapter: AdapterKind, err: TransportError) -> Self {
        Self::transient(adapter, err.to_string())
    }
}
