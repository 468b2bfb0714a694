//! Prompt sections and the composed prompt shape.
//!
//! A prompt section contributes instruction and/or message text. The engine
//! (`prompt::engine`) renders an ordered set of sections into a single
//! `Prompt` with exactly one instruction slot and one message slot.

pub mod engine;

pub use engine::{PromptEngine, SectionRef};

use crate::error::SectionRenderError;
use crate::provider::{MessageRole, RequestMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Read-only context map passed to every section render.
///
/// The engine never mutates the caller's context; sections receive a shared
/// reference. Serializable so deferred invocations can carry it through the
/// queue collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderContext {
    values: BTreeMap<String, Value>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for RenderContext {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }
}

/// Text contributed by one section render.
#[derive(Debug, Clone, Default)]
pub struct SectionOutput {
    pub instruction: Option<String>,
    pub message: Option<String>,
}

/// Unit contributing instruction/message text to a composed prompt.
///
/// Sections carry an integer weight (lower renders earlier) and either static
/// text or a render hook that may suspend. Identity hints let a section place
/// itself in a non-default origin or bucket at registration.
#[async_trait]
pub trait PromptSection: Send + Sync {
    /// Render order; lower renders earlier. Ties keep input order.
    fn weight(&self) -> i32 {
        0
    }

    /// Static instruction text, used when no render hook is defined.
    fn instruction(&self) -> Option<String> {
        None
    }

    /// Static message text, used when no render hook is defined.
    fn message(&self) -> Option<String> {
        None
    }

    fn origin_hint(&self) -> Option<&str> {
        None
    }

    fn bucket_hint(&self) -> Option<&str> {
        None
    }

    fn name_hint(&self) -> Option<&str> {
        None
    }

    /// Render hook. The default returns the static text.
    async fn render(&self, ctx: &RenderContext) -> Result<SectionOutput, SectionRenderError> {
        let _ = ctx;
        Ok(SectionOutput {
            instruction: self.instruction(),
            message: self.message(),
        })
    }
}

impl std::fmt::Debug for dyn PromptSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptSection")
            .field("weight", &self.weight())
            .finish_non_exhaustive()
    }
}

/// Ready-made static-text section, the common case.
#[derive(Debug, Clone, Default)]
pub struct StaticSection {
    weight: i32,
    instruction: Option<String>,
    message: Option<String>,
}

impl StaticSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    pub fn instruction(mut self, text: impl Into<String>) -> Self {
        self.instruction = Some(text.into());
        self
    }

    pub fn message(mut self, text: impl Into<String>) -> Self {
        self.message = Some(text.into());
        self
    }
}

#[async_trait]
impl PromptSection for StaticSection {
    fn weight(&self) -> i32 {
        self.weight
    }

    fn instruction(&self) -> Option<String> {
        self.instruction.clone()
    }

    fn message(&self) -> Option<String> {
        self.message.clone()
    }
}

/// One extra turn beyond the owned instruction/message slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub text: String,
}

/// Build metadata: ordered rendered labels plus per-label render errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptMeta {
    pub sections: Vec<String>,
    pub errors: BTreeMap<String, String>,
}

/// A composed prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prompt {
    pub instruction: Option<String>,
    pub message: Option<String>,
    pub extra_messages: Vec<PromptMessage>,
    pub meta: PromptMeta,
}

impl Prompt {
    /// Convert into normalized request turns: instruction becomes the system
    /// turn, message the user turn, then extra messages in order.
    pub fn into_turns(self) -> Vec<RequestMessage> {
        let mut turns = Vec::new();
        if let Some(instruction) = self.instruction {
            turns.push(RequestMessage::new(MessageRole::System, instruction));
        }
        if let Some(message) = self.message {
            turns.push(RequestMessage::new(MessageRole::User, message));
        }
        for extra in self.extra_messages {
            turns.push(RequestMessage::new(extra.role, extra.text));
        }
        turns
    }
}
