//! Prompt composition engine.
//!
//! Renders an ordered set of sections into a single `Prompt`. Rendering is
//! strictly sequential by weight order: later sections may depend on output
//! shaped by earlier ones and reproducible prompts require a deterministic
//! order. Individual renders may suspend on I/O.

use crate::error::ServiceError;
use crate::identity::Identity;
use crate::prompt::{Prompt, PromptMessage, PromptSection, RenderContext};
use crate::provider::MessageRole;
use crate::registry::Catalog;
use crate::types::CancellationToken;
use std::sync::Arc;
use tracing::{debug, warn};

/// A section to compose: either a registered identity or an inline section
/// carrying its own identity.
#[derive(Clone)]
pub enum SectionRef {
    Registered(Identity),
    Inline {
        identity: Identity,
        section: Arc<dyn PromptSection>,
    },
}

impl SectionRef {
    fn identity(&self) -> &Identity {
        match self {
            SectionRef::Registered(identity) => identity,
            SectionRef::Inline { identity, .. } => identity,
        }
    }
}

impl From<Identity> for SectionRef {
    fn from(identity: Identity) -> Self {
        SectionRef::Registered(identity)
    }
}

/// Composes prompts from sections resolved through the catalog.
pub struct PromptEngine {
    catalog: Arc<Catalog>,
}

impl PromptEngine {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Render `sections` into a prompt.
    ///
    /// Duplicates by identity collapse (first occurrence wins). Sections are
    /// stable-sorted ascending by weight, then rendered in order. A failing
    /// render is recorded under `meta.errors[label]` and the build continues;
    /// no single section aborts the whole prompt. An unresolvable registered
    /// identity, by contrast, is a caller error and propagates.
    pub async fn build(
        &self,
        sections: &[SectionRef],
        ctx: &RenderContext,
        cancel: &CancellationToken,
    ) -> Result<Prompt, ServiceError> {
        let mut resolved: Vec<(Identity, Arc<dyn PromptSection>)> = Vec::new();
        for section_ref in sections {
            let identity = section_ref.identity();
            if resolved.iter().any(|(seen, _)| seen == identity) {
                continue;
            }
            let section = match section_ref {
                SectionRef::Registered(identity) => self.catalog.sections().resolve(identity)?,
                SectionRef::Inline { section, .. } => Arc::clone(section),
            };
            resolved.push((identity.clone(), section));
        }

        // Stable sort: ties keep input order.
        resolved.sort_by_key(|(_, section)| section.weight());

        let mut prompt = Prompt::default();
        for (identity, section) in resolved {
            if cancel.is_cancelled() {
                return Err(ServiceError::Cancelled);
            }
            let label = identity.to_string();
            prompt.meta.sections.push(label.clone());
            match section.render(ctx).await {
                Ok(output) => {
                    apply_slot(
                        &mut prompt.instruction,
                        &mut prompt.extra_messages,
                        MessageRole::System,
                        output.instruction,
                    );
                    apply_slot(
                        &mut prompt.message,
                        &mut prompt.extra_messages,
                        MessageRole::User,
                        output.message,
                    );
                }
                Err(err) => {
                    warn!(section = %label, error = %err, "Section render failed; continuing");
                    prompt.meta.errors.insert(label, err.to_string());
                }
            }
        }

        debug!(
            sections = prompt.meta.sections.len(),
            errors = prompt.meta.errors.len(),
            "Prompt built"
        );
        Ok(prompt)
    }
}

/// First non-null contribution owns the slot; later non-null contributions
/// for an owned slot append to the extra messages instead of overwriting.
fn apply_slot(
    slot: &mut Option<String>,
    extras: &mut Vec<PromptMessage>,
    role: MessageRole,
    contribution: Option<String>,
) {
    let Some(text) = contribution else {
        return;
    };
    if slot.is_none() {
        *slot = Some(text);
    } else {
        extras.push(PromptMessage { role, text });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::StaticSection;
    use crate::registry::{Catalog, CollisionPolicy};

    fn catalog_with(sections: Vec<(&str, StaticSection)>) -> Arc<Catalog> {
        let catalog = Catalog::new("app", CollisionPolicy::Strict, Vec::new());
        for (name, section) in sections {
            catalog
                .register_section(section, crate::identity::IdentitySpec::named(name))
                .unwrap();
        }
        catalog.finalize()
    }

    fn id(name: &str) -> Identity {
        Identity::new("app", "default", name).unwrap()
    }

    #[tokio::test]
    async fn renders_in_weight_order_regardless_of_input_order() {
        let catalog = catalog_with(vec![
            ("a", StaticSection::new().weight(10).message("from a")),
            ("b", StaticSection::new().weight(0).message("from b")),
        ]);
        let engine = PromptEngine::new(catalog);
        let prompt = engine
            .build(
                &[SectionRef::Registered(id("a")), SectionRef::Registered(id("b"))],
                &RenderContext::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            prompt.meta.sections,
            vec!["app.default.b".to_string(), "app.default.a".to_string()]
        );
        // b rendered first, so it owns the message slot.
        assert_eq!(prompt.message.as_deref(), Some("from b"));
        assert_eq!(prompt.extra_messages.len(), 1);
        assert_eq!(prompt.extra_messages[0].text, "from a");
    }

    #[tokio::test]
    async fn duplicate_identities_collapse_first_wins() {
        let catalog = catalog_with(vec![("a", StaticSection::new().message("once"))]);
        let engine = PromptEngine::new(catalog);
        let prompt = engine
            .build(
                &[SectionRef::Registered(id("a")), SectionRef::Registered(id("a"))],
                &RenderContext::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(prompt.meta.sections.len(), 1);
        assert!(prompt.extra_messages.is_empty());
    }

    #[tokio::test]
    async fn failing_render_is_recorded_and_others_compose() {
        struct Raising;

        #[async_trait::async_trait]
        impl PromptSection for Raising {
            async fn render(
                &self,
                _ctx: &RenderContext,
            ) -> Result<crate::prompt::SectionOutput, crate::error::SectionRenderError> {
                Err(crate::error::SectionRenderError::new("boom"))
            }
        }

        let catalog = catalog_with(vec![("ok", StaticSection::new().message("fine"))]);
        let engine = PromptEngine::new(catalog);
        let prompt = engine
            .build(
                &[
                    SectionRef::Inline {
                        identity: id("raising"),
                        section: Arc::new(Raising),
                    },
                    SectionRef::Registered(id("ok")),
                ],
                &RenderContext::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(prompt.message.as_deref(), Some("fine"));
        assert_eq!(prompt.meta.errors.len(), 1);
        assert_eq!(
            prompt.meta.errors.get("app.default.raising").map(String::as_str),
            Some("boom")
        );
    }

    #[tokio::test]
    async fn unknown_identity_propagates() {
        let catalog = catalog_with(vec![]);
        let engine = PromptEngine::new(catalog);
        let result = engine
            .build(
                &[SectionRef::Registered(id("missing"))],
                &RenderContext::new(),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Registry(_))));
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_build() {
        let catalog = catalog_with(vec![("a", StaticSection::new().message("m"))]);
        let engine = PromptEngine::new(catalog);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine
            .build(
                &[SectionRef::Registered(id("a"))],
                &RenderContext::new(),
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Cancelled)));
    }
}
