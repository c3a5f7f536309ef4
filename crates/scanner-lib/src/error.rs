//! Error types shared across the scanner
//!
//! Retry decisions are made on the variant of [`BackendError`], never on
//! error text.

use std::time::Duration;
use thiserror::Error;

/// Transient transport failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    ConnectionRefused,
    Dns,
    Throttled,
    ServerError,
}

/// Well-formed, non-transient rejection kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessCode {
    InvalidParameter,
    AccessDenied,
    NotFound,
}

/// Error raised by a [`CloudBackend`](crate::gateway::CloudBackend) call
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("transport error ({kind:?}): {message}")]
    Transport { kind: TransportKind, message: String },

    #[error("request rejected ({code:?}): {message}")]
    Business { code: BusinessCode, message: String },
}

impl BackendError {
    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        BackendError::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn business(code: BusinessCode, message: impl Into<String>) -> Self {
        BackendError::Business {
            code,
            message: message.into(),
        }
    }

    /// Transport failures are worth retrying; business rejections are not
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transport { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BackendError::Business {
                code: BusinessCode::NotFound,
                ..
            }
        )
    }
}

/// Orchestration-level failures; the only errors a scan returns
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("invalid scan request: {0}")]
    InvalidRequest(String),

    #[error("failed to connect backend for tenant {tenant_id}")]
    Connect {
        tenant_id: String,
        #[source]
        source: BackendError,
    },

    #[error("region discovery failed for tenant {tenant_id}")]
    RegionDiscovery {
        tenant_id: String,
        #[source]
        source: BackendError,
    },

    #[error("no enumerable regions for tenant {0}")]
    NoRegions(String),

    #[error("scan exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

/// Failures inside a cache store; reads absorb these as misses
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache entry corrupted: {0}")]
    Corrupted(String),
}
