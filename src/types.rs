//! Core types shared across the orchestration engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Unique per-invocation token enabling idempotent persistence and tracing.
///
/// Generated once when an invocation is created and carried through dispatch,
/// persistence, and telemetry. Retries of the same invocation reuse the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Whether an invocation runs inline or is handed to a queue collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run the whole engine inline on the caller's task.
    #[serde(alias = "immediate")]
    Sync,
    /// Serialize the invocation and let a worker replay it later.
    Deferred,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sync
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sync => write!(f, "sync"),
            ExecutionMode::Deferred => write!(f, "deferred"),
        }
    }
}

/// How a codec's null validation result is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// A null parse result is a soft failure reported on the outcome.
    Lenient,
    /// A null parse result raises a validation error.
    Strict,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        ValidationPolicy::Lenient
    }
}

/// Cooperative cancellation flag threaded through prompt build, dispatch,
/// and the streaming loop.
///
/// Checked between retry attempts and before each streaming chunk; a request
/// already in flight is never preempted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_round_trips_through_display() {
        let id = CorrelationId::new();
        let parsed: CorrelationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn execution_mode_accepts_immediate_alias() {
        let mode: ExecutionMode = serde_json::from_str("\"immediate\"").unwrap();
        assert_eq!(mode, ExecutionMode::Sync);
        let mode: ExecutionMode = serde_json::from_str("\"deferred\"").unwrap();
        assert_eq!(mode, ExecutionMode::Deferred);
    }

    #[test]
    fn cancellation_token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
