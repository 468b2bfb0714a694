//! Maestro: Identity-Addressed AI Workflow Orchestration
//!
//! A registry-backed orchestration core for language-model services:
//! components register under three-part identities, prompts compose from
//! weighted sections, and a service engine carries each invocation through
//! request dispatch, validation, persistence, and telemetry.

pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod service;
pub mod types;

pub use codec::{
    Codec, InMemoryRecordStore, JsonRecordCodec, PersistRequest, PersistSummary, Record,
    RecordStore,
};
pub use config::{ConfigLoader, MaestroConfig};
pub use error::{
    IdentityError, PersistenceError, ProviderError, RegistryError, SectionRenderError,
    ServiceError,
};
pub use identity::{Identity, IdentitySpec};
pub use prompt::{
    Prompt, PromptEngine, PromptSection, RenderContext, SectionOutput, SectionRef, StaticSection,
};
pub use provider::{
    ChunkStream, NormalizedRequest, NormalizedResponse, ProviderClient, RetryPolicy, StreamChunk,
};
pub use registry::{Catalog, CollisionPolicy, ComponentKind, Registry};
pub use service::{
    CallOptions, CodecBinding, Completed, Emitter, ExecutionOutcome, InMemoryQueue, Invocation,
    Orchestrator, QueueWorker, Service, ServiceSpec,
};
pub use types::{CancellationToken, CorrelationId, ExecutionMode, ValidationPolicy};
