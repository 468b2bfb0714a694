//! Error taxonomy for the orchestration engine.
//!
//! Section render failures are absorbed into prompt metadata and never
//! propagate. Everything from request dispatch onward propagates to the
//! caller after failure telemetry has been emitted.

use crate::identity::Identity;
use crate::registry::ComponentKind;
use crate::types::CorrelationId;
use std::time::Duration;
use thiserror::Error;

/// Identity parsing and normalization failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("expected 'origin.bucket.name', got '{0}'")]
    Malformed(String),

    #[error("identity segment '{segment}' is empty in '{input}'")]
    EmptySegment { segment: &'static str, input: String },

    #[error("identity requires an explicit name")]
    MissingName,
}

/// Registry lifecycle and lookup failures.
///
/// `Frozen` is a programming error, not a retryable condition: registration
/// is only valid during the discovery phase.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate {kind} identity: {identity}")]
    Collision {
        kind: ComponentKind,
        identity: Identity,
    },

    #[error("{kind} registry is frozen; registration is only valid during discovery")]
    Frozen { kind: ComponentKind },

    #[error("{kind} not found: {identity}")]
    NotFound {
        kind: ComponentKind,
        identity: Identity,
    },

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// A prompt section's render hook failed.
///
/// Recorded under the prompt's `meta.errors[label]`; the build continues
/// with the remaining sections.
#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct SectionRenderError(pub String);

impl SectionRenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Provider client failures, classified transient vs. fatal.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<u64> },

    #[error("network error: {0}")]
    Network(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl ProviderError {
    /// Transient failures are retried under the backoff policy; fatal
    /// failures are attempted exactly once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Network(_)
                | ProviderError::Stream(_)
        )
    }
}

/// Record store failures during `persist`.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("transaction aborted: {0}")]
    Aborted(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("record conflict for correlation {0}")]
    Conflict(CorrelationId),
}

/// Top-level failure surfaced by service execution.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("no codec resolved for service {identity}")]
    CodecResolution { identity: Identity },

    #[error("response failed validation for service {identity} (correlation {correlation_id})")]
    Validation {
        identity: Identity,
        correlation_id: CorrelationId,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("persistence failed for {identity} (correlation {correlation_id}): {source}")]
    Persistence {
        identity: Identity,
        correlation_id: CorrelationId,
        #[source]
        source: PersistenceError,
    },

    #[error("deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32 },

    #[error("invocation cancelled")]
    Cancelled,

    #[error("unknown execution backend: {0}")]
    UnknownBackend(String),

    #[error("queue rejected invocation: {0}")]
    Queue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(!ProviderError::Auth("bad key".into()).is_transient());
        assert!(!ProviderError::InvalidRequest("empty model".into()).is_transient());
        assert!(!ProviderError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_transient());
    }
}
