//! Codec port: response validation and persistence.
//!
//! A codec extracts a structured payload from a normalized response,
//! validates it, and persists the result through the transactional store
//! port. Validation failure is a `None`, not an error; the validation policy
//! on the owning service decides whether that escalates.

pub mod store;

pub use store::{InMemoryRecordStore, Record, RecordStore, Transaction, TxnReceipt};

use crate::error::PersistenceError;
use crate::identity::Identity;
use crate::provider::NormalizedResponse;
use crate::types::CorrelationId;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Small serializable summary returned by `persist`; never a store handle.
pub type PersistSummary = BTreeMap<String, Value>;

/// Everything a codec needs to persist one validated response.
pub struct PersistRequest<'a> {
    pub identity: &'a Identity,
    pub correlation_id: &'a CorrelationId,
    pub response: &'a NormalizedResponse,
    pub parsed: Option<&'a Value>,
    pub store: &'a dyn RecordStore,
}

/// Component validating a provider response against a schema and persisting
/// the result.
#[async_trait]
pub trait Codec: Send + Sync {
    fn origin_hint(&self) -> Option<&str> {
        None
    }

    fn bucket_hint(&self) -> Option<&str> {
        None
    }

    fn name_hint(&self) -> Option<&str> {
        None
    }

    /// Extract and validate a structured payload. Returns `None` rather than
    /// an error when no structured payload exists or validation fails,
    /// letting the caller pick a fallback.
    fn validate_from_response(&self, response: &NormalizedResponse) -> Option<Value>;

    /// Persist the response. Must be atomic across any multi-record write and
    /// idempotent on the correlation id.
    async fn persist(&self, request: PersistRequest<'_>)
        -> Result<PersistSummary, PersistenceError>;
}

/// Parse the response text as a JSON document. Fenced ```json blocks are
/// unwrapped first, since models routinely fence structured output.
pub fn extract_json_payload(response: &NormalizedResponse) -> Option<Value> {
    let text = response.text.trim();
    let candidate = strip_code_fence(text).unwrap_or(text);
    serde_json::from_str(candidate).ok()
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let rest = rest.strip_suffix("```")?;
    Some(rest.trim())
}

/// Default codec: accepts any JSON object payload and persists a single
/// record carrying the payload plus the raw text. Registered under
/// `(origin, "default", "default")` so it serves as the terminal fallback
/// in codec resolution.
#[derive(Debug, Default)]
pub struct JsonRecordCodec;

#[async_trait]
impl Codec for JsonRecordCodec {
    fn name_hint(&self) -> Option<&str> {
        Some("default")
    }

    fn validate_from_response(&self, response: &NormalizedResponse) -> Option<Value> {
        extract_json_payload(response).filter(Value::is_object)
    }

    async fn persist(
        &self,
        request: PersistRequest<'_>,
    ) -> Result<PersistSummary, PersistenceError> {
        let record = Record::new(
            "result",
            json!({
                "service": request.identity.to_string(),
                "text": request.response.text,
                "payload": request.parsed.cloned(),
                "finish_reason": request.response.finish_reason,
            }),
        );
        let receipt = request
            .store
            .apply(Transaction {
                correlation_id: *request.correlation_id,
                records: vec![record],
            })
            .await?;

        let mut summary = PersistSummary::new();
        summary.insert("records".into(), json!(receipt.record_count));
        summary.insert("created".into(), json!(receipt.created));
        summary.insert("validated".into(), json!(request.parsed.is_some()));
        Ok(summary)
    }
}
