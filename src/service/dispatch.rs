//! Execution backend strategy and dispatch parameter resolution.
//!
//! Resolution order for mode, backend, and priority: per-call override >
//! service attribute > global default > hard-coded fallback. `enqueue`
//! always defers; `require_enqueue` on a service forces deferral even when
//! the resolved mode is sync.

use crate::config::ExecutionDefaults;
use crate::error::ServiceError;
use crate::service::worker::{InvocationEnvelope, InvocationQueue};
use crate::service::{CallOptions, ExecutionOutcome, Invocation, Service, ServiceSpec};
use crate::types::ExecutionMode;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Resolved dispatch parameters for one invocation.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub mode: ExecutionMode,
    pub backend: String,
    pub priority: i32,
    pub run_after: Option<Duration>,
}

/// Resolve the dispatch plan. With `force_deferred` (the `enqueue` path or a
/// `require_enqueue` service) the mode is deferred no matter what resolved,
/// and an "immediate" backend name is promoted to the queued backend so the
/// invocation actually leaves the caller's task.
pub fn resolve_plan(
    options: &CallOptions,
    spec: &ServiceSpec,
    defaults: &ExecutionDefaults,
    force_deferred: bool,
) -> DispatchPlan {
    let mut mode = options
        .mode
        .or(spec.execution_mode)
        .unwrap_or(defaults.mode);
    let mut backend = options
        .backend
        .clone()
        .or_else(|| spec.backend.clone())
        .unwrap_or_else(|| defaults.backend.clone());
    let priority = options
        .priority
        .or(spec.priority)
        .unwrap_or(defaults.priority);

    if force_deferred || spec.require_enqueue {
        mode = ExecutionMode::Deferred;
    }
    if mode == ExecutionMode::Deferred && backend == "immediate" {
        backend = "queued".to_string();
    }

    DispatchPlan {
        mode,
        backend,
        priority,
        run_after: options.run_after,
    }
}

/// Dispatch an invocation according to its plan.
pub(crate) async fn run(
    service: &Service,
    invocation: Invocation,
    options: &CallOptions,
    plan: &DispatchPlan,
) -> Result<ExecutionOutcome, ServiceError> {
    debug!(
        identity = %invocation.identity,
        correlation_id = %invocation.correlation_id,
        mode = %plan.mode,
        backend = %plan.backend,
        priority = plan.priority,
        "Dispatching invocation"
    );
    match plan.mode {
        ExecutionMode::Sync => {
            let completed = service.run_inline(&invocation, options).await?;
            Ok(ExecutionOutcome::Completed(completed))
        }
        ExecutionMode::Deferred => {
            let backend = service.orchestrator().backend(&plan.backend)?;
            backend.run(service, invocation, options).await
        }
    }
}

/// Strategy selecting how a deferred-mode invocation runs.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        service: &Service,
        invocation: Invocation,
        options: &CallOptions,
    ) -> Result<ExecutionOutcome, ServiceError>;
}

/// Runs the whole engine inline on the caller's task.
pub struct ImmediateBackend;

#[async_trait]
impl ExecutionBackend for ImmediateBackend {
    fn name(&self) -> &str {
        "immediate"
    }

    async fn run(
        &self,
        service: &Service,
        invocation: Invocation,
        options: &CallOptions,
    ) -> Result<ExecutionOutcome, ServiceError> {
        let completed = service.run_inline(&invocation, options).await?;
        Ok(ExecutionOutcome::Completed(completed))
    }
}

/// Serializes the invocation to the queue collaborator; a worker replays it.
pub struct QueuedBackend {
    queue: Arc<dyn InvocationQueue>,
}

impl QueuedBackend {
    pub fn new(queue: Arc<dyn InvocationQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ExecutionBackend for QueuedBackend {
    fn name(&self) -> &str {
        "queued"
    }

    async fn run(
        &self,
        _service: &Service,
        invocation: Invocation,
        _options: &CallOptions,
    ) -> Result<ExecutionOutcome, ServiceError> {
        let correlation_id = invocation.correlation_id;
        self.queue
            .submit(InvocationEnvelope::new(invocation))
            .await?;
        Ok(ExecutionOutcome::Deferred { correlation_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ServiceSpec {
        ServiceSpec::new("svc", "test-model")
    }

    #[test]
    fn fallback_plan_uses_global_defaults() {
        let plan = resolve_plan(
            &CallOptions::default(),
            &spec(),
            &ExecutionDefaults::default(),
            false,
        );
        assert_eq!(plan.mode, ExecutionMode::Sync);
        assert_eq!(plan.backend, "immediate");
        assert_eq!(plan.priority, 0);
    }

    #[test]
    fn global_default_applies_without_overrides() {
        let defaults = ExecutionDefaults {
            mode: ExecutionMode::Deferred,
            backend: "queued".to_string(),
            priority: 3,
        };
        let plan = resolve_plan(&CallOptions::default(), &spec(), &defaults, false);
        assert_eq!(plan.mode, ExecutionMode::Deferred);
        assert_eq!(plan.backend, "queued");
        assert_eq!(plan.priority, 3);
    }

    #[test]
    fn per_call_override_beats_spec_and_defaults() {
        let spec = spec().execution_mode(ExecutionMode::Sync);
        let options = CallOptions::default()
            .mode(ExecutionMode::Deferred)
            .backend("queued")
            .priority(7);
        let plan = resolve_plan(&options, &spec, &ExecutionDefaults::default(), false);
        assert_eq!(plan.mode, ExecutionMode::Deferred);
        assert_eq!(plan.backend, "queued");
        assert_eq!(plan.priority, 7);
    }

    #[test]
    fn spec_attribute_beats_global_default() {
        let spec = spec().execution_mode(ExecutionMode::Deferred);
        let plan = resolve_plan(
            &CallOptions::default(),
            &spec,
            &ExecutionDefaults::default(),
            false,
        );
        assert_eq!(plan.mode, ExecutionMode::Deferred);
    }

    #[test]
    fn force_deferred_promotes_immediate_backend() {
        let plan = resolve_plan(
            &CallOptions::default(),
            &spec(),
            &ExecutionDefaults::default(),
            true,
        );
        assert_eq!(plan.mode, ExecutionMode::Deferred);
        assert_eq!(plan.backend, "queued");
    }

    #[test]
    fn require_enqueue_forces_deferral_under_sync_mode() {
        let spec = spec().require_enqueue();
        let options = CallOptions::default().mode(ExecutionMode::Sync);
        let plan = resolve_plan(&options, &spec, &ExecutionDefaults::default(), false);
        assert_eq!(plan.mode, ExecutionMode::Deferred);
    }
}
