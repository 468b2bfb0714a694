//! The service execution state machine.
//!
//! `CREATED -> PROMPT_BUILT -> REQUEST_SENT -> {VALIDATED | FAILED} ->
//! PERSISTED -> DONE`, with `STREAMING` between `REQUEST_SENT` and
//! `VALIDATED` while chunks arrive. Every unrecovered failure emits a
//! failure event before propagating; nothing is swallowed at this layer.

use crate::codec::{Codec, PersistRequest};
use crate::error::{ProviderError, ServiceError};
use crate::prompt::{Prompt, SectionRef};
use crate::provider::{assemble_response, NormalizedRequest, NormalizedResponse, StreamChunk};
use crate::service::emitter::{
    FailureEvent, RequestEvent, ResponseEvent, StreamChunkEvent, StreamCompleteEvent,
};
use crate::service::{CallOptions, CodecBinding, Completed, Invocation, Service};
use crate::types::{CancellationToken, ValidationPolicy};
use chrono::Utc;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Engine states, in order of progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Created,
    PromptBuilt,
    RequestSent,
    Streaming,
    Validated,
    Failed,
    Persisted,
    Done,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionState::Created => "created",
            ExecutionState::PromptBuilt => "prompt_built",
            ExecutionState::RequestSent => "request_sent",
            ExecutionState::Streaming => "streaming",
            ExecutionState::Validated => "validated",
            ExecutionState::Failed => "failed",
            ExecutionState::Persisted => "persisted",
            ExecutionState::Done => "done",
        };
        write!(f, "{}", label)
    }
}

impl Service {
    /// Run the full engine inline. Emits failure telemetry before any error
    /// propagates.
    pub(crate) async fn run_inline(
        &self,
        invocation: &Invocation,
        options: &CallOptions,
    ) -> Result<Completed, ServiceError> {
        let started = Instant::now();
        let result = self.run_to_completion(invocation, options, started).await;
        if let Err(err) = &result {
            self.emit_failure(invocation, err, started);
        }
        result
    }

    /// Same build and validate/persist path as `run_inline`, but through the
    /// streaming provider call.
    pub(crate) async fn run_stream_inline(
        &self,
        invocation: &Invocation,
        options: &CallOptions,
    ) -> Result<Completed, ServiceError> {
        let started = Instant::now();
        let result = self.run_stream_to_completion(invocation, options, started).await;
        if let Err(err) = &result {
            self.emit_failure(invocation, err, started);
        }
        result
    }

    async fn run_to_completion(
        &self,
        invocation: &Invocation,
        options: &CallOptions,
        started: Instant,
    ) -> Result<Completed, ServiceError> {
        let mut state = ExecutionState::Created;
        let cancel = options.cancel.clone().unwrap_or_default();
        let deadline_at = options.deadline.map(|d| started + d);

        let prompt = self.build_prompt(invocation, &cancel).await?;
        self.advance(invocation, &mut state, ExecutionState::PromptBuilt);

        let request = self.build_request(prompt, false);
        self.orchestrator().emitter.emit_request(&RequestEvent {
            identity: invocation.identity.clone(),
            correlation_id: invocation.correlation_id,
            model: request.model.clone(),
            stream: false,
            at: Utc::now(),
        });
        self.advance(invocation, &mut state, ExecutionState::RequestSent);

        let response = self
            .send_with_retry(&request, &cancel, deadline_at)
            .await?;
        self.finish(invocation, response, started, &mut state).await
    }

    async fn run_stream_to_completion(
        &self,
        invocation: &Invocation,
        options: &CallOptions,
        started: Instant,
    ) -> Result<Completed, ServiceError> {
        let mut state = ExecutionState::Created;
        let cancel = options.cancel.clone().unwrap_or_default();
        let deadline_at = options.deadline.map(|d| started + d);

        let prompt = self.build_prompt(invocation, &cancel).await?;
        self.advance(invocation, &mut state, ExecutionState::PromptBuilt);

        let request = self.build_request(prompt, true);
        self.orchestrator().emitter.emit_request(&RequestEvent {
            identity: invocation.identity.clone(),
            correlation_id: invocation.correlation_id,
            model: request.model.clone(),
            stream: true,
            at: Utc::now(),
        });
        self.advance(invocation, &mut state, ExecutionState::RequestSent);

        let mut stream = self
            .open_stream_with_retry(&request, &cancel, deadline_at)
            .await?;
        self.advance(invocation, &mut state, ExecutionState::Streaming);

        // Chunks are forwarded to the emitter immediately and buffered for
        // assembly; the terminal chunk is buffered but not emitted as a chunk.
        let mut chunks: Vec<StreamChunk> = Vec::new();
        let mut emitted = 0usize;
        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(ServiceError::Cancelled);
            }
            let chunk = item.map_err(ServiceError::Provider)?;
            let terminal = chunk.is_terminal();
            if !terminal {
                self.orchestrator()
                    .emitter
                    .emit_stream_chunk(&StreamChunkEvent {
                        identity: invocation.identity.clone(),
                        correlation_id: invocation.correlation_id,
                        seq: emitted,
                        delta_len: chunk.delta.len(),
                        at: Utc::now(),
                    });
                emitted += 1;
            }
            chunks.push(chunk);
            if terminal {
                break;
            }
        }

        let response = assemble_response(&self.spec().model, &chunks);
        let usage = response.usage;
        let completed = self.finish(invocation, response, started, &mut state).await?;
        self.orchestrator()
            .emitter
            .emit_stream_complete(&StreamCompleteEvent {
                identity: invocation.identity.clone(),
                correlation_id: invocation.correlation_id,
                chunks: emitted,
                elapsed_ms: started.elapsed().as_millis() as u64,
                usage,
                at: Utc::now(),
            });
        Ok(completed)
    }

    /// Steps 5-7: validate, persist, emit success telemetry.
    async fn finish(
        &self,
        invocation: &Invocation,
        response: NormalizedResponse,
        started: Instant,
        state: &mut ExecutionState,
    ) -> Result<Completed, ServiceError> {
        let codec = self.resolve_codec()?;
        let parsed = codec.validate_from_response(&response);

        let policy = self
            .spec()
            .validation_policy
            .unwrap_or(self.orchestrator().validation_policy);
        if parsed.is_none() && policy == ValidationPolicy::Strict {
            self.advance(invocation, state, ExecutionState::Failed);
            return Err(ServiceError::Validation {
                identity: invocation.identity.clone(),
                correlation_id: invocation.correlation_id,
            });
        }
        self.advance(invocation, state, ExecutionState::Validated);

        let summary = codec
            .persist(PersistRequest {
                identity: &invocation.identity,
                correlation_id: &invocation.correlation_id,
                response: &response,
                parsed: parsed.as_ref(),
                store: self.orchestrator().store.as_ref(),
            })
            .await
            .map_err(|source| ServiceError::Persistence {
                identity: invocation.identity.clone(),
                correlation_id: invocation.correlation_id,
                source,
            })?;
        self.advance(invocation, state, ExecutionState::Persisted);

        let elapsed = started.elapsed();
        let soft_failure = parsed.is_none();
        self.orchestrator().emitter.emit_response(&ResponseEvent {
            identity: invocation.identity.clone(),
            correlation_id: invocation.correlation_id,
            elapsed_ms: elapsed.as_millis() as u64,
            usage: response.usage,
            soft_failure,
            summary: summary.clone(),
            at: Utc::now(),
        });
        self.advance(invocation, state, ExecutionState::Done);

        Ok(Completed {
            correlation_id: invocation.correlation_id,
            response,
            parsed,
            summary,
            elapsed,
            soft_failure,
        })
    }

    async fn build_prompt(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<Prompt, ServiceError> {
        let plan: Vec<SectionRef> = if self.spec().prompt_plan.is_empty() {
            vec![SectionRef::Registered(self.identity().clone())]
        } else {
            self.spec()
                .prompt_plan
                .iter()
                .cloned()
                .map(SectionRef::Registered)
                .collect()
        };
        self.orchestrator()
            .engine()
            .build(&plan, &invocation.context, cancel)
            .await
    }

    fn build_request(&self, prompt: Prompt, stream: bool) -> NormalizedRequest {
        NormalizedRequest {
            model: self.spec().model.clone(),
            messages: prompt.into_turns(),
            stream,
            tools: self.spec().tools.clone(),
        }
    }

    /// Codec resolution: explicit instance > service override > exact catalog
    /// match > `(bucket, "default")` > `("default", "default")`.
    fn resolve_codec(&self) -> Result<Arc<dyn Codec>, ServiceError> {
        let codecs = self.orchestrator().catalog().codecs();
        match &self.spec().codec {
            CodecBinding::Explicit(codec) => Ok(Arc::clone(codec)),
            CodecBinding::Named(identity) => Ok(codecs.resolve(identity)?),
            CodecBinding::Resolve => {
                let identity = self.identity();
                let candidates = [
                    identity.clone(),
                    identity.with_name("default"),
                    identity.with_bucket("default").with_name("default"),
                ];
                for candidate in &candidates {
                    if let Some(codec) = codecs.get(candidate) {
                        return Ok(codec);
                    }
                }
                Err(ServiceError::CodecResolution {
                    identity: identity.clone(),
                })
            }
        }
    }

    /// Dispatch under the bounded retry policy. Transient failures back off
    /// exponentially with jitter; fatal failures are attempted exactly once.
    async fn send_with_retry(
        &self,
        request: &NormalizedRequest,
        cancel: &CancellationToken,
        deadline_at: Option<Instant>,
    ) -> Result<NormalizedResponse, ServiceError> {
        let policy = &self.orchestrator().retry;
        let mut attempt = 1u32;
        loop {
            self.check_gates(cancel, deadline_at, attempt)?;
            let outcome = tokio::time::timeout(
                policy.attempt_timeout(),
                self.orchestrator().client.send_request(request),
            )
            .await
            .unwrap_or_else(|_| Err(ProviderError::Timeout(policy.attempt_timeout())));

            match outcome {
                Ok(response) => return Ok(response),
                Err(err) => self.retry_or_fail(err, &mut attempt, cancel, deadline_at).await?,
            }
        }
    }

    async fn open_stream_with_retry(
        &self,
        request: &NormalizedRequest,
        cancel: &CancellationToken,
        deadline_at: Option<Instant>,
    ) -> Result<crate::provider::ChunkStream, ServiceError> {
        let mut attempt = 1u32;
        loop {
            self.check_gates(cancel, deadline_at, attempt)?;
            match self.orchestrator().client.stream_request(request).await {
                Ok(stream) => return Ok(stream),
                Err(err) => self.retry_or_fail(err, &mut attempt, cancel, deadline_at).await?,
            }
        }
    }

    /// Back off and bump the attempt counter, or convert the error into the
    /// terminal failure for this dispatch.
    async fn retry_or_fail(
        &self,
        err: ProviderError,
        attempt: &mut u32,
        cancel: &CancellationToken,
        deadline_at: Option<Instant>,
    ) -> Result<(), ServiceError> {
        let policy = &self.orchestrator().retry;
        if !err.is_transient() || *attempt >= policy.max_attempts {
            return Err(ServiceError::Provider(err));
        }
        let delay = policy.delay_with_jitter(*attempt);
        if let Some(deadline) = deadline_at {
            if Instant::now() + delay >= deadline {
                return Err(ServiceError::DeadlineExceeded { attempts: *attempt });
            }
        }
        warn!(
            identity = %self.identity(),
            attempt = *attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient provider failure; backing off"
        );
        tokio::time::sleep(delay).await;
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        *attempt += 1;
        Ok(())
    }

    fn check_gates(
        &self,
        cancel: &CancellationToken,
        deadline_at: Option<Instant>,
        attempt: u32,
    ) -> Result<(), ServiceError> {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        if let Some(deadline) = deadline_at {
            if Instant::now() >= deadline {
                return Err(ServiceError::DeadlineExceeded {
                    attempts: attempt.saturating_sub(1),
                });
            }
        }
        Ok(())
    }

    fn advance(&self, invocation: &Invocation, state: &mut ExecutionState, next: ExecutionState) {
        debug!(
            identity = %invocation.identity,
            correlation_id = %invocation.correlation_id,
            from = %state,
            to = %next,
            "Engine transition"
        );
        *state = next;
    }

    fn emit_failure(&self, invocation: &Invocation, err: &ServiceError, started: Instant) {
        self.orchestrator().emitter.emit_failure(&FailureEvent {
            identity: invocation.identity.clone(),
            correlation_id: invocation.correlation_id,
            error: err.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            at: Utc::now(),
        });
    }
}
