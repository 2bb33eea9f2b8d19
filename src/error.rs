//! Unified error handling for turnstile.
//!
//! The core reasons about a closed fault taxonomy: collaborator errors
//! (store drivers, delivery channels) are normalized into these kinds at
//! the boundary and never leak through as library-specific types.

use thiserror::Error;

// ============================================================================
// Store Faults (persistence boundary)
// ============================================================================

/// Faults surfaced by the persistent store boundary.
///
/// Only `Transient` is retryable; everything else propagates immediately
/// and unmodified.
#[derive(Debug, Clone, Error)]
pub enum StoreFault {
    /// Transient driver fault (timeout, pool exhaustion, lock contention).
    #[error("transient store fault: {0}")]
    Transient(String),

    /// Non-recoverable driver fault (corruption, schema mismatch, I/O).
    #[error("fatal store fault: {0}")]
    Fatal(String),

    /// Protocol error from an upstream dependency reached through the
    /// store path. Never retried.
    #[error("upstream protocol fault: {0}")]
    UpstreamProtocol(String),
}

impl StoreFault {
    /// Whether a bounded retry with backoff is worth attempting.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient_store_fault",
            Self::Fatal(_) => "fatal_store_fault",
            Self::UpstreamProtocol(_) => "upstream_protocol_fault",
        }
    }
}

// ============================================================================
// Access Errors (registry, tokens, broadcast)
// ============================================================================

/// Errors returned by registry, token, and broadcast operations.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Revoke/unban targeted a record that does not exist.
    #[error("no record for {0}")]
    NotFound(String),

    /// Ban attempt against the configured owner.
    #[error("the owner cannot be banned")]
    OwnerProtected,

    /// The initiator already has a broadcast job in flight.
    #[error("broadcast already running for {0}")]
    AlreadyRunning(String),

    /// Store-layer fault, already normalized.
    #[error(transparent)]
    Store(#[from] StoreFault),
}

impl AccessError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::OwnerProtected => "owner_protected",
            Self::AlreadyRunning(_) => "already_running",
            Self::Store(fault) => fault.error_code(),
        }
    }
}

/// Result type for registry and token operations.
pub type AccessResult<T> = Result<T, AccessError>;
