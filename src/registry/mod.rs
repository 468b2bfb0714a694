//! Identity-addressed component registries with a freeze-after-discovery
//! lifecycle.
//!
//! Registries are mutable only during the startup discovery phase: init,
//! populate via install hooks, freeze, then query. Writes after freezing fail
//! loudly as programming errors. Post-freeze reads never contend with a
//! writer.

use crate::codec::Codec;
use crate::error::{IdentityError, RegistryError};
use crate::identity::{derive_name, simple_type_name, Identity, IdentitySpec, DEFAULT_BUCKET};
use crate::prompt::PromptSection;
use crate::service::ServiceSpec;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Kind of pluggable component, one registry per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Section,
    Codec,
    Service,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Section => write!(f, "section"),
            ComponentKind::Codec => write!(f, "codec"),
            ComponentKind::Service => write!(f, "service"),
        }
    }
}

/// What happens when two components register the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Fail immediately: development-time loud failure.
    Strict,
    /// Deterministically suffix the colliding name (`-2`, `-3`, …) by
    /// insertion order and warn.
    Lenient,
}

impl Default for CollisionPolicy {
    fn default() -> Self {
        CollisionPolicy::Strict
    }
}

struct RegistryInner<T: ?Sized> {
    entries: HashMap<Identity, Arc<T>>,
    order: Vec<Identity>,
}

/// Collision-aware store mapping identities to component handles.
///
/// Handles are held for lookup only; the registry never invokes them.
pub struct Registry<T: ?Sized + Send + Sync> {
    kind: ComponentKind,
    policy: CollisionPolicy,
    frozen: AtomicBool,
    inner: RwLock<RegistryInner<T>>,
}

impl<T: ?Sized + Send + Sync> Registry<T> {
    pub fn new(kind: ComponentKind, policy: CollisionPolicy) -> Self {
        Self {
            kind,
            policy,
            frozen: AtomicBool::new(false),
            inner: RwLock::new(RegistryInner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Insert a component under `identity`, applying the collision policy.
    /// Returns the identity actually used (possibly suffixed).
    pub fn register(&self, identity: Identity, handle: Arc<T>) -> Result<Identity, RegistryError> {
        if self.is_frozen() {
            return Err(RegistryError::Frozen { kind: self.kind });
        }
        let mut inner = self.inner.write();
        let identity = if inner.entries.contains_key(&identity) {
            match self.policy {
                CollisionPolicy::Strict => {
                    return Err(RegistryError::Collision {
                        kind: self.kind,
                        identity,
                    });
                }
                CollisionPolicy::Lenient => {
                    let suffixed = next_free_name(&inner.entries, &identity);
                    warn!(
                        kind = %self.kind,
                        requested = %identity,
                        assigned = %suffixed,
                        "Identity collision resolved by suffixing"
                    );
                    suffixed
                }
            }
        } else {
            identity
        };
        inner.entries.insert(identity.clone(), handle);
        inner.order.push(identity.clone());
        debug!(kind = %self.kind, identity = %identity, "Component registered");
        Ok(identity)
    }

    /// Look up a component, failing `NotFound` when absent.
    pub fn resolve(&self, identity: &Identity) -> Result<Arc<T>, RegistryError> {
        self.get(identity).ok_or_else(|| RegistryError::NotFound {
            kind: self.kind,
            identity: identity.clone(),
        })
    }

    pub fn get(&self, identity: &Identity) -> Option<Arc<T>> {
        self.inner.read().entries.get(identity).cloned()
    }

    /// All entries, in insertion order.
    pub fn all(&self) -> Vec<(Identity, Arc<T>)> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).map(|h| (id.clone(), Arc::clone(h))))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// End the discovery phase. Further writes fail loudly.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }
}

fn next_free_name<T: ?Sized>(entries: &HashMap<Identity, Arc<T>>, identity: &Identity) -> Identity {
    let base = identity.name().to_string();
    let mut n = 2u32;
    loop {
        let candidate = identity.with_name(&format!("{}-{}", base, n));
        if !entries.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// The three kind registries behind a single discovery lifecycle.
///
/// `Catalog::new` starts the discovery phase; `install` runs module
/// registration hooks; `finalize` freezes every registry and hands back a
/// shared, read-only catalog.
pub struct Catalog {
    namespace: String,
    strip_tokens: Vec<String>,
    sections: Registry<dyn PromptSection>,
    codecs: Registry<dyn Codec>,
    services: Registry<ServiceSpec>,
}

impl Catalog {
    pub fn new(
        namespace: impl Into<String>,
        policy: CollisionPolicy,
        strip_tokens: Vec<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            strip_tokens,
            sections: Registry::new(ComponentKind::Section, policy),
            codecs: Registry::new(ComponentKind::Codec, policy),
            services: Registry::new(ComponentKind::Service, policy),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn sections(&self) -> &Registry<dyn PromptSection> {
        &self.sections
    }

    pub fn codecs(&self) -> &Registry<dyn Codec> {
        &self.codecs
    }

    pub fn services(&self) -> &Registry<ServiceSpec> {
        &self.services
    }

    /// Register a prompt section. Identity precedence per segment: explicit
    /// spec > section hint > inferred default (namespace / `"default"` /
    /// name derived from the type's simple name).
    pub fn register_section<S: PromptSection + 'static>(
        &self,
        section: S,
        spec: IdentitySpec,
    ) -> Result<Identity, RegistryError> {
        let identity = self.resolve_identity(
            &spec,
            section.origin_hint(),
            section.bucket_hint(),
            section.name_hint(),
            simple_type_name::<S>(),
        )?;
        self.sections.register(identity, Arc::new(section))
    }

    /// Register a codec; same identity precedence as sections.
    pub fn register_codec<C: Codec + 'static>(
        &self,
        codec: C,
        spec: IdentitySpec,
    ) -> Result<Identity, RegistryError> {
        let identity = self.resolve_identity(
            &spec,
            codec.origin_hint(),
            codec.bucket_hint(),
            codec.name_hint(),
            simple_type_name::<C>(),
        )?;
        self.codecs.register(identity, Arc::new(codec))
    }

    /// Register a service definition. Services have no defining type to
    /// derive a name from, so an explicit name is required.
    pub fn register_service(&self, spec: ServiceSpec) -> Result<Identity, RegistryError> {
        let id_spec = spec.identity.clone();
        if id_spec.name.is_none() {
            return Err(RegistryError::Identity(IdentityError::MissingName));
        }
        let identity = self.resolve_identity(&id_spec, None, None, None, "")?;
        self.services.register(identity, Arc::new(spec))
    }

    /// Run a module registration hook against this catalog.
    pub fn install<F>(&self, hook: F) -> anyhow::Result<()>
    where
        F: FnOnce(&Catalog) -> anyhow::Result<()>,
    {
        hook(self)
    }

    /// End the discovery phase: freeze every registry and share the catalog.
    pub fn finalize(self) -> Arc<Catalog> {
        self.sections.freeze();
        self.codecs.freeze();
        self.services.freeze();
        debug!(
            namespace = %self.namespace,
            sections = self.sections.len(),
            codecs = self.codecs.len(),
            services = self.services.len(),
            "Catalog finalized"
        );
        Arc::new(self)
    }

    fn resolve_identity(
        &self,
        spec: &IdentitySpec,
        origin_hint: Option<&str>,
        bucket_hint: Option<&str>,
        name_hint: Option<&str>,
        raw_type_name: &str,
    ) -> Result<Identity, RegistryError> {
        let origin = spec
            .origin
            .as_deref()
            .or(origin_hint)
            .unwrap_or(&self.namespace);
        let bucket = spec
            .bucket
            .as_deref()
            .or(bucket_hint)
            .unwrap_or(DEFAULT_BUCKET);
        let derived;
        let name = match spec.name.as_deref().or(name_hint) {
            Some(name) => name,
            None => {
                derived = derive_name(raw_type_name, &self.strip_tokens);
                &derived
            }
        };
        Ok(Identity::new(origin, bucket, name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::StaticSection;

    fn section() -> StaticSection {
        StaticSection::new().message("hello")
    }

    #[test]
    fn strict_mode_rejects_duplicates() {
        let catalog = Catalog::new("app", CollisionPolicy::Strict, Vec::new());
        catalog
            .register_section(section(), IdentitySpec::named("dup"))
            .unwrap();
        let err = catalog
            .register_section(section(), IdentitySpec::named("dup"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Collision { .. }));
    }

    #[test]
    fn lenient_mode_suffixes_by_insertion_order() {
        let catalog = Catalog::new("app", CollisionPolicy::Lenient, Vec::new());
        let first = catalog
            .register_section(section(), IdentitySpec::named("dup"))
            .unwrap();
        let second = catalog
            .register_section(section(), IdentitySpec::named("dup"))
            .unwrap();
        let third = catalog
            .register_section(section(), IdentitySpec::named("dup"))
            .unwrap();
        assert_eq!(first.name(), "dup");
        assert_eq!(second.name(), "dup-2");
        assert_eq!(third.name(), "dup-3");
        // Both resolvable independently.
        assert!(catalog.sections().resolve(&first).is_ok());
        assert!(catalog.sections().resolve(&second).is_ok());
    }

    #[test]
    fn frozen_registry_rejects_writes() {
        let catalog = Catalog::new("app", CollisionPolicy::Strict, Vec::new());
        let catalog = catalog.finalize();
        let err = catalog
            .register_section(section(), IdentitySpec::named("late"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Frozen { .. }));
    }

    #[test]
    fn resolve_missing_is_not_found() {
        let catalog = Catalog::new("app", CollisionPolicy::Strict, Vec::new()).finalize();
        let id = Identity::new("app", "default", "ghost").unwrap();
        let err = catalog.sections().resolve(&id).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn identity_derived_from_type_name_with_strip_tokens() {
        struct SummarySection;
        #[async_trait::async_trait]
        impl PromptSection for SummarySection {}

        let catalog = Catalog::new(
            "app",
            CollisionPolicy::Strict,
            vec!["Section".to_string()],
        );
        let id = catalog
            .register_section(SummarySection, IdentitySpec::default())
            .unwrap();
        assert_eq!(id.to_string(), "app.default.summary");
    }

    #[test]
    fn explicit_spec_beats_hint_beats_default() {
        struct HintedSection;
        #[async_trait::async_trait]
        impl PromptSection for HintedSection {
            fn bucket_hint(&self) -> Option<&str> {
                Some("reports")
            }
        }

        let catalog = Catalog::new("app", CollisionPolicy::Strict, Vec::new());
        let hinted = catalog
            .register_section(HintedSection, IdentitySpec::named("a"))
            .unwrap();
        assert_eq!(hinted.bucket(), "reports");

        let explicit = catalog
            .register_section(HintedSection, IdentitySpec::bucketed("explicit", "b"))
            .unwrap();
        assert_eq!(explicit.bucket(), "explicit");
    }

    #[test]
    fn all_returns_insertion_order() {
        let catalog = Catalog::new("app", CollisionPolicy::Strict, Vec::new());
        catalog
            .register_section(section(), IdentitySpec::named("z"))
            .unwrap();
        catalog
            .register_section(section(), IdentitySpec::named("a"))
            .unwrap();
        let names: Vec<String> = catalog
            .sections()
            .all()
            .into_iter()
            .map(|(id, _)| id.name().to_string())
            .collect();
        assert_eq!(names, vec!["z".to_string(), "a".to_string()]);
    }
}
