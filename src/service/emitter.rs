//! Telemetry emitter port and the default `tracing`-backed emitter.
//!
//! Emission is fire-and-forget: implementations must never return errors or
//! panic, and the engine never branches on emitter behavior.

use crate::codec::PersistSummary;
use crate::identity::Identity;
use crate::provider::Usage;
use crate::types::CorrelationId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// A request is about to be dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEvent {
    pub identity: Identity,
    pub correlation_id: CorrelationId,
    pub model: String,
    pub stream: bool,
    pub at: DateTime<Utc>,
}

/// A response was validated and persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEvent {
    pub identity: Identity,
    pub correlation_id: CorrelationId,
    pub elapsed_ms: u64,
    pub usage: Usage,
    pub soft_failure: bool,
    pub summary: PersistSummary,
    pub at: DateTime<Utc>,
}

/// An invocation failed after telemetry-visible work started.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEvent {
    pub identity: Identity,
    pub correlation_id: CorrelationId,
    pub error: String,
    pub elapsed_ms: u64,
    pub at: DateTime<Utc>,
}

/// One streaming chunk arrived.
#[derive(Debug, Clone, Serialize)]
pub struct StreamChunkEvent {
    pub identity: Identity,
    pub correlation_id: CorrelationId,
    pub seq: usize,
    pub delta_len: usize,
    pub at: DateTime<Utc>,
}

/// A stream finished and its assembled response completed the engine.
#[derive(Debug, Clone, Serialize)]
pub struct StreamCompleteEvent {
    pub identity: Identity,
    pub correlation_id: CorrelationId,
    pub chunks: usize,
    pub elapsed_ms: u64,
    pub usage: Usage,
    pub at: DateTime<Utc>,
}

/// Fire-and-forget telemetry port.
pub trait Emitter: Send + Sync {
    fn emit_request(&self, event: &RequestEvent);
    fn emit_response(&self, event: &ResponseEvent);
    fn emit_failure(&self, event: &FailureEvent);
    fn emit_stream_chunk(&self, event: &StreamChunkEvent);
    fn emit_stream_complete(&self, event: &StreamCompleteEvent);
}

/// Default emitter: structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingEmitter;

impl Emitter for TracingEmitter {
    fn emit_request(&self, event: &RequestEvent) {
        info!(
            identity = %event.identity,
            correlation_id = %event.correlation_id,
            model = %event.model,
            stream = event.stream,
            "Request dispatched"
        );
    }

    fn emit_response(&self, event: &ResponseEvent) {
        info!(
            identity = %event.identity,
            correlation_id = %event.correlation_id,
            elapsed_ms = event.elapsed_ms,
            total_tokens = event.usage.total_tokens,
            soft_failure = event.soft_failure,
            "Response persisted"
        );
    }

    fn emit_failure(&self, event: &FailureEvent) {
        warn!(
            identity = %event.identity,
            correlation_id = %event.correlation_id,
            elapsed_ms = event.elapsed_ms,
            error = %event.error,
            "Invocation failed"
        );
    }

    fn emit_stream_chunk(&self, event: &StreamChunkEvent) {
        info!(
            identity = %event.identity,
            correlation_id = %event.correlation_id,
            seq = event.seq,
            delta_len = event.delta_len,
            "Stream chunk"
        );
    }

    fn emit_stream_complete(&self, event: &StreamCompleteEvent) {
        info!(
            identity = %event.identity,
            correlation_id = %event.correlation_id,
            chunks = event.chunks,
            elapsed_ms = event.elapsed_ms,
            total_tokens = event.usage.total_tokens,
            "Stream complete"
        );
    }
}

/// Emitter that drops everything. Useful where telemetry is unwanted.
#[derive(Debug, Default)]
pub struct NullEmitter;

impl Emitter for NullEmitter {
    fn emit_request(&self, _event: &RequestEvent) {}
    fn emit_response(&self, _event: &ResponseEvent) {}
    fn emit_failure(&self, _event: &FailureEvent) {}
    fn emit_stream_chunk(&self, _event: &StreamChunkEvent) {}
    fn emit_stream_complete(&self, _event: &StreamCompleteEvent) {}
}
