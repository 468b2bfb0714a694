//! Shared test support: a scripted provider client, a recording emitter, and
//! a fully wired orchestrator harness.

#![allow(dead_code)]

use async_trait::async_trait;
use maestro::provider::Usage;
use maestro::service::{
    Emitter, FailureEvent, RequestEvent, ResponseEvent, StreamChunkEvent, StreamCompleteEvent,
};
use maestro::{
    Catalog, ChunkStream, CollisionPolicy, Identity, IdentitySpec, InMemoryQueue,
    InMemoryRecordStore, JsonRecordCodec, MaestroConfig, NormalizedRequest, NormalizedResponse,
    Orchestrator, ProviderClient, ProviderError, Service, ServiceSpec, StaticSection, StreamChunk,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A response whose text is the given JSON (or prose) payload.
pub fn json_response(text: &str) -> NormalizedResponse {
    NormalizedResponse {
        model: "test-model".into(),
        text: text.into(),
        tool_calls: Vec::new(),
        usage: Usage {
            prompt_tokens: 12,
            completion_tokens: 5,
            total_tokens: 17,
        },
        finish_reason: Some("stop".into()),
    }
}

/// Provider client replaying a scripted sequence of outcomes. An exhausted
/// script answers with a valid JSON object so multi-call tests stay short.
#[derive(Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<NormalizedResponse, ProviderError>>>,
    streams: Mutex<VecDeque<Result<Vec<StreamChunk>, ProviderError>>>,
    requests: Mutex<Vec<NormalizedRequest>>,
    attempts: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, text: &str) {
        self.responses.lock().push_back(Ok(json_response(text)));
    }

    pub fn fail(&self, err: ProviderError) {
        self.responses.lock().push_back(Err(err));
    }

    pub fn stream(&self, chunks: Vec<StreamChunk>) {
        self.streams.lock().push_back(Ok(chunks));
    }

    pub fn fail_stream(&self, err: ProviderError) {
        self.streams.lock().push_back(Err(err));
    }

    /// Total send/stream attempts observed, including retried ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<NormalizedRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    async fn send_request(
        &self,
        request: &NormalizedRequest,
    ) -> Result<NormalizedResponse, ProviderError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(json_response(r#"{"ok": true}"#)))
    }

    async fn stream_request(
        &self,
        request: &NormalizedRequest,
    ) -> Result<ChunkStream, ProviderError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let chunks = self
            .streams
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Stream("no scripted stream".into())))?;
        Ok(Box::pin(futures::stream::iter(
            chunks.into_iter().map(Ok),
        )))
    }
}

/// Emitter capturing every event for assertion.
#[derive(Default)]
pub struct RecordingEmitter {
    pub requests: Mutex<Vec<RequestEvent>>,
    pub responses: Mutex<Vec<ResponseEvent>>,
    pub failures: Mutex<Vec<FailureEvent>>,
    pub chunks: Mutex<Vec<StreamChunkEvent>>,
    pub completes: Mutex<Vec<StreamCompleteEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.requests.lock().len(),
            self.responses.lock().len(),
            self.failures.lock().len(),
        )
    }
}

impl Emitter for RecordingEmitter {
    fn emit_request(&self, event: &RequestEvent) {
        self.requests.lock().push(event.clone());
    }

    fn emit_response(&self, event: &ResponseEvent) {
        self.responses.lock().push(event.clone());
    }

    fn emit_failure(&self, event: &FailureEvent) {
        self.failures.lock().push(event.clone());
    }

    fn emit_stream_chunk(&self, event: &StreamChunkEvent) {
        self.chunks.lock().push(event.clone());
    }

    fn emit_stream_complete(&self, event: &StreamCompleteEvent) {
        self.completes.lock().push(event.clone());
    }
}

/// A wired orchestrator plus handles to every observable collaborator.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub client: Arc<ScriptedClient>,
    pub store: Arc<InMemoryRecordStore>,
    pub emitter: Arc<RecordingEmitter>,
    pub queue: Arc<InMemoryQueue>,
}

impl Harness {
    pub fn service_identity(&self) -> Identity {
        Identity::new("app", "default", "svc").unwrap()
    }

    pub fn service(&self) -> Service {
        self.orchestrator
            .service(&self.service_identity())
            .unwrap()
    }
}

/// Default harness: one service `app.default.svc` with a static section under
/// the same identity and the JSON record codec as the default fallback.
pub fn harness() -> Harness {
    harness_with(MaestroConfig::default(), |_| Ok(()))
}

/// Config the retry policy down to microscopic delays so retry tests run in
/// real time.
pub fn fast_retry_config() -> MaestroConfig {
    let mut config = MaestroConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 4;
    config
}

pub fn harness_with(
    config: MaestroConfig,
    hook: impl FnOnce(&Catalog) -> anyhow::Result<()>,
) -> Harness {
    let catalog = Catalog::new("app", CollisionPolicy::Strict, Vec::new());
    catalog
        .register_section(
            StaticSection::new()
                .instruction("You review structured input.")
                .message("Respond with a JSON object."),
            IdentitySpec::named("svc"),
        )
        .unwrap();
    catalog
        .register_codec(JsonRecordCodec, IdentitySpec::default())
        .unwrap();
    catalog
        .register_service(ServiceSpec::new("svc", "test-model"))
        .unwrap();
    catalog.install(hook).unwrap();
    let catalog = catalog.finalize();

    let client = Arc::new(ScriptedClient::new());
    let store = Arc::new(InMemoryRecordStore::new());
    let emitter = Arc::new(RecordingEmitter::new());
    let queue = Arc::new(InMemoryQueue::new());

    let orchestrator = Orchestrator::builder(catalog, Arc::clone(&client) as _)
        .store(Arc::clone(&store) as _)
        .emitter(Arc::clone(&emitter) as _)
        .queue(Arc::clone(&queue) as _)
        .config(config)
        .build();

    Harness {
        orchestrator,
        client,
        store,
        emitter,
        queue,
    }
}
