//! Service execution: the orchestrator, service handles, and call scoping.
//!
//! A service orchestrates prompt build, request dispatch, validation,
//! persistence, and telemetry for one identity. Callers reach it through the
//! `Orchestrator`, which owns the frozen catalog and the shared collaborator
//! ports.

pub mod dispatch;
pub mod emitter;
pub mod engine;
pub mod worker;

pub use dispatch::{ExecutionBackend, ImmediateBackend, QueuedBackend};
pub use emitter::{
    Emitter, FailureEvent, NullEmitter, RequestEvent, ResponseEvent, StreamChunkEvent,
    StreamCompleteEvent, TracingEmitter,
};
pub use engine::ExecutionState;
pub use worker::{InMemoryQueue, InvocationEnvelope, InvocationQueue, QueueStats, QueueWorker};

use crate::codec::{Codec, InMemoryRecordStore, PersistSummary, RecordStore};
use crate::config::{ExecutionDefaults, MaestroConfig};
use crate::error::ServiceError;
use crate::identity::{Identity, IdentitySpec};
use crate::prompt::{PromptEngine, RenderContext};
use crate::provider::{NormalizedResponse, ProviderClient, RetryPolicy, ToolDefinition};
use crate::registry::Catalog;
use crate::types::{CancellationToken, CorrelationId, ExecutionMode, ValidationPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How a service binds its codec.
#[derive(Clone, Default)]
pub enum CodecBinding {
    /// Resolve through the catalog: exact identity match, then
    /// `(bucket, "default")`, then `("default", "default")`.
    #[default]
    Resolve,
    /// Service-level override: a specific registered codec identity.
    Named(Identity),
    /// Explicit instance, bypassing the catalog.
    Explicit(Arc<dyn Codec>),
}

/// Declarative service definition held by the service registry.
#[derive(Clone)]
pub struct ServiceSpec {
    /// Identity of the service; the name segment is required.
    pub identity: IdentitySpec,
    /// Model identifier placed on every normalized request.
    pub model: String,
    /// Ordered prompt plan; empty means "the single section whose identity
    /// equals the service's own".
    pub prompt_plan: Vec<Identity>,
    pub codec: CodecBinding,
    pub tools: Vec<ToolDefinition>,
    /// Service-level execution attributes, between per-call overrides and
    /// global defaults.
    pub execution_mode: Option<ExecutionMode>,
    pub backend: Option<String>,
    pub priority: Option<i32>,
    /// Force deferral even when the resolved mode is sync.
    pub require_enqueue: bool,
    pub validation_policy: Option<ValidationPolicy>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            identity: IdentitySpec::named(name),
            model: model.into(),
            prompt_plan: Vec::new(),
            codec: CodecBinding::Resolve,
            tools: Vec::new(),
            execution_mode: None,
            backend: None,
            priority: None,
            require_enqueue: false,
            validation_policy: None,
        }
    }

    pub fn prompt_plan(mut self, plan: Vec<Identity>) -> Self {
        self.prompt_plan = plan;
        self
    }

    pub fn codec(mut self, binding: CodecBinding) -> Self {
        self.codec = binding;
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    pub fn require_enqueue(mut self) -> Self {
        self.require_enqueue = true;
        self
    }

    pub fn validation_policy(mut self, policy: ValidationPolicy) -> Self {
        self.validation_policy = Some(policy);
        self
    }
}

/// Per-call overrides, highest in the resolution order.
#[derive(Clone, Default)]
pub struct CallOptions {
    pub mode: Option<ExecutionMode>,
    pub backend: Option<String>,
    pub priority: Option<i32>,
    pub run_after: Option<Duration>,
    /// Overall deadline across all retry attempts.
    pub deadline: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    /// Fixed correlation id; defaults to a fresh one per invocation.
    pub correlation_id: Option<CorrelationId>,
}

impl CallOptions {
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn run_after(mut self, delay: Duration) -> Self {
        self.run_after = Some(delay);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// One resolved invocation, serializable for deferred execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub identity: Identity,
    pub correlation_id: CorrelationId,
    pub mode: ExecutionMode,
    pub backend: String,
    pub priority: i32,
    pub run_after_ms: Option<u64>,
    pub context: RenderContext,
}

/// A completed inline execution.
#[derive(Debug, Clone)]
pub struct Completed {
    pub correlation_id: CorrelationId,
    pub response: NormalizedResponse,
    pub parsed: Option<Value>,
    pub summary: PersistSummary,
    pub elapsed: Duration,
    /// True when validation returned no payload under the lenient policy.
    pub soft_failure: bool,
}

/// Result of dispatching an invocation.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Completed(Completed),
    Deferred { correlation_id: CorrelationId },
}

impl ExecutionOutcome {
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            ExecutionOutcome::Completed(done) => done.correlation_id,
            ExecutionOutcome::Deferred { correlation_id } => *correlation_id,
        }
    }
}

/// Owns the frozen catalog and shared collaborators; hands out service
/// handles.
pub struct Orchestrator {
    catalog: Arc<Catalog>,
    engine: PromptEngine,
    pub(crate) client: Arc<dyn ProviderClient>,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) emitter: Arc<dyn Emitter>,
    pub(crate) defaults: ExecutionDefaults,
    pub(crate) retry: RetryPolicy,
    pub(crate) validation_policy: ValidationPolicy,
    backends: HashMap<String, Arc<dyn ExecutionBackend>>,
}

impl Orchestrator {
    pub fn builder(catalog: Arc<Catalog>, client: Arc<dyn ProviderClient>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            catalog,
            client,
            store: None,
            emitter: None,
            queue: None,
            config: MaestroConfig::default(),
            extra_backends: Vec::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub(crate) fn engine(&self) -> &PromptEngine {
        &self.engine
    }

    pub(crate) fn backend(&self, name: &str) -> Result<Arc<dyn ExecutionBackend>, ServiceError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownBackend(name.to_string()))
    }

    /// Resolve a service handle by identity.
    pub fn service(self: &Arc<Self>, identity: &Identity) -> Result<Service, ServiceError> {
        let spec = self.catalog.services().resolve(identity)?;
        Ok(Service {
            identity: identity.clone(),
            spec,
            orchestrator: Arc::clone(self),
        })
    }
}

/// Builder wiring collaborators into an orchestrator. The store, emitter and
/// queue default to the in-memory/tracing adapters.
pub struct OrchestratorBuilder {
    catalog: Arc<Catalog>,
    client: Arc<dyn ProviderClient>,
    store: Option<Arc<dyn RecordStore>>,
    emitter: Option<Arc<dyn Emitter>>,
    queue: Option<Arc<dyn InvocationQueue>>,
    config: MaestroConfig,
    extra_backends: Vec<(String, Arc<dyn ExecutionBackend>)>,
}

impl OrchestratorBuilder {
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn emitter(mut self, emitter: Arc<dyn Emitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn InvocationQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn config(mut self, config: MaestroConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an additional execution backend under `name`.
    pub fn backend(mut self, name: impl Into<String>, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.extra_backends.push((name.into(), backend));
        self
    }

    pub fn build(self) -> Arc<Orchestrator> {
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryQueue::new()));
        let mut backends: HashMap<String, Arc<dyn ExecutionBackend>> = HashMap::new();
        backends.insert("immediate".to_string(), Arc::new(ImmediateBackend));
        backends.insert(
            "queued".to_string(),
            Arc::new(QueuedBackend::new(Arc::clone(&queue))),
        );
        for (name, backend) in self.extra_backends {
            backends.insert(name, backend);
        }
        Arc::new(Orchestrator {
            engine: PromptEngine::new(Arc::clone(&self.catalog)),
            catalog: self.catalog,
            client: self.client,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryRecordStore::new())),
            emitter: self.emitter.unwrap_or_else(|| Arc::new(TracingEmitter)),
            defaults: self.config.execution,
            retry: self.config.retry,
            validation_policy: self.config.validation_policy,
            backends,
        })
    }
}

/// Handle to one registered service.
pub struct Service {
    identity: Identity,
    spec: Arc<ServiceSpec>,
    orchestrator: Arc<Orchestrator>,
}

impl Service {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub(crate) fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub(crate) fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Scope a call with per-call overrides.
    pub fn using(&self, options: CallOptions) -> ScopedService<'_> {
        ScopedService {
            service: self,
            options,
        }
    }

    /// Execute with default options, honoring the resolved execution mode.
    pub async fn execute(&self, ctx: RenderContext) -> Result<ExecutionOutcome, ServiceError> {
        self.using(CallOptions::default()).execute(ctx).await
    }

    /// Always defer, regardless of the resolved mode.
    pub async fn enqueue(&self, ctx: RenderContext) -> Result<CorrelationId, ServiceError> {
        self.using(CallOptions::default()).enqueue(ctx).await
    }

    /// Execute inline with a streaming provider call.
    pub async fn run_stream(&self, ctx: RenderContext) -> Result<Completed, ServiceError> {
        self.using(CallOptions::default()).run_stream(ctx).await
    }

    /// Replay a deferred invocation; the worker path. Reuses the original
    /// correlation id so persistence stays idempotent under redelivery.
    pub(crate) async fn replay(&self, invocation: Invocation) -> Result<Completed, ServiceError> {
        self.run_inline(&invocation, &CallOptions::default()).await
    }

    pub(crate) fn make_invocation(
        &self,
        options: &CallOptions,
        plan: &dispatch::DispatchPlan,
        ctx: RenderContext,
    ) -> Invocation {
        Invocation {
            identity: self.identity.clone(),
            correlation_id: options.correlation_id.unwrap_or_default(),
            mode: plan.mode,
            backend: plan.backend.clone(),
            priority: plan.priority,
            run_after_ms: plan.run_after.map(|d| d.as_millis() as u64),
            context: ctx,
        }
    }
}

/// A service handle bound to per-call options.
pub struct ScopedService<'a> {
    service: &'a Service,
    options: CallOptions,
}

impl ScopedService<'_> {
    /// Execute, honoring the resolved execution mode (per-call override >
    /// service attribute > global default > `sync`).
    pub async fn execute(&self, ctx: RenderContext) -> Result<ExecutionOutcome, ServiceError> {
        let plan = dispatch::resolve_plan(
            &self.options,
            self.service.spec(),
            &self.service.orchestrator().defaults,
            false,
        );
        let invocation = self.service.make_invocation(&self.options, &plan, ctx);
        dispatch::run(self.service, invocation, &self.options, &plan).await
    }

    /// Always defer to the queue collaborator.
    pub async fn enqueue(&self, ctx: RenderContext) -> Result<CorrelationId, ServiceError> {
        let plan = dispatch::resolve_plan(
            &self.options,
            self.service.spec(),
            &self.service.orchestrator().defaults,
            true,
        );
        let invocation = self.service.make_invocation(&self.options, &plan, ctx);
        let outcome = dispatch::run(self.service, invocation, &self.options, &plan).await?;
        Ok(outcome.correlation_id())
    }

    /// Inline streaming execution.
    pub async fn run_stream(&self, ctx: RenderContext) -> Result<Completed, ServiceError> {
        let plan = dispatch::resolve_plan(
            &self.options,
            self.service.spec(),
            &self.service.orchestrator().defaults,
            false,
        );
        let invocation = self.service.make_invocation(&self.options, &plan, ctx);
        self.service
            .run_stream_inline(&invocation, &self.options)
            .await
    }
}
