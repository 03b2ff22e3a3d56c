//! NAPI registry: dynamically registered data providers keyed by domain tag.
//!
//! A registration maps a domain to an externally supplied repository
//! function plus an optional caching policy. Registrations are additive and
//! keyed by domain; re-registering a domain replaces the previous entry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;

use crate::core::{Reference, Tag};

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum NapiError {
    #[error("repository for `{domain}` failed: {reason}")]
    Repository { domain: String, reason: String },
}

/// An externally supplied data-fetching function.
///
/// Repositories run on the reader's thread with no runtime lock held; a
/// repository may block or call back into the runtime that invoked it.
pub trait NapiRepository: Send + Sync {
    fn fetch(&self, reference: &Reference) -> Result<Value, String>;
}

impl<F> NapiRepository for F
where
    F: Fn(&Reference) -> Result<Value, String> + Send + Sync,
{
    fn fetch(&self, reference: &Reference) -> Result<Value, String> {
        self(reference)
    }
}

/// Caching/refresh policy for one registration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Invoke the repository on every read.
    #[default]
    Fresh,
    /// Cache per fully bound reference until the domain is re-registered.
    Cache,
}

#[derive(Clone)]
pub struct NapiRegistration {
    repository: Arc<dyn NapiRepository>,
    policy: CachePolicy,
    cache: Arc<Mutex<BTreeMap<Reference, Value>>>,
}

impl fmt::Debug for NapiRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NapiRegistration")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl NapiRegistration {
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Fetch through the cache policy.
    pub fn fetch(&self, domain: &Tag, reference: &Reference) -> Result<Value, NapiError> {
        if self.policy == CachePolicy::Cache {
            let cache = match self.cache.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(hit) = cache.get(reference) {
                return Ok(hit.clone());
            }
        }
        let value = self
            .repository
            .fetch(reference)
            .map_err(|reason| NapiError::Repository {
                domain: domain.path().to_string(),
                reason,
            })?;
        if self.policy == CachePolicy::Cache {
            let mut cache = match self.cache.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            cache.insert(reference.clone(), value.clone());
        }
        Ok(value)
    }
}

#[derive(Debug, Default)]
pub struct NapiRegistry {
    registrations: BTreeMap<Tag, NapiRegistration>,
    /// Bumped on every (re-)registration; live queries re-check ownership
    /// when it moves.
    epoch: u64,
}

impl NapiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the provider for a domain. The replaced entry's
    /// cache goes with it.
    pub fn register(
        &mut self,
        domain: Tag,
        repository: Arc<dyn NapiRepository>,
        policy: CachePolicy,
    ) {
        self.registrations.insert(
            domain,
            NapiRegistration {
                repository,
                policy,
                cache: Arc::new(Mutex::new(BTreeMap::new())),
            },
        );
        self.epoch += 1;
    }

    /// The innermost registered domain owning this tag's lineage, if any.
    pub fn owner(&self, tag: &Tag) -> Option<(&Tag, &NapiRegistration)> {
        self.registrations
            .iter()
            .filter(|(domain, _)| tag.is_descendant_of(domain))
            .max_by_key(|(domain, _)| domain.path().len())
    }

    pub fn owns(&self, tag: &Tag) -> bool {
        self.owner(tag).is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TagGraph;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn graph() -> TagGraph {
        let mut b = TagGraph::builder("app").unwrap();
        b.node("app.data.prices.spot").unwrap();
        b.node("app.other").unwrap();
        b.build()
    }

    #[test]
    fn registration_replaces_previous_entry() {
        let g = graph();
        let domain = g.tag("app.data").unwrap();
        let mut registry = NapiRegistry::new();

        registry.register(domain.clone(), Arc::new(|_: &Reference| -> Result<Value, String> { Ok(json!(1)) }), CachePolicy::Fresh);
        registry.register(domain.clone(), Arc::new(|_: &Reference| -> Result<Value, String> { Ok(json!(2)) }), CachePolicy::Fresh);
        assert_eq!(registry.len(), 1);

        let spot = Reference::new(g.tag("app.data.prices.spot").unwrap());
        let (owner, registration) = registry.owner(spot.tag()).unwrap();
        assert_eq!(owner, &domain);
        assert_eq!(registration.fetch(owner, &spot).unwrap(), json!(2));
    }

    #[test]
    fn innermost_domain_wins() {
        let g = graph();
        let mut registry = NapiRegistry::new();
        registry.register(
            g.tag("app.data").unwrap(),
            Arc::new(|_: &Reference| -> Result<Value, String> { Ok(json!("outer")) }),
            CachePolicy::Fresh,
        );
        registry.register(
            g.tag("app.data.prices").unwrap(),
            Arc::new(|_: &Reference| -> Result<Value, String> { Ok(json!("inner")) }),
            CachePolicy::Fresh,
        );

        let spot = g.tag("app.data.prices.spot").unwrap();
        let (owner, _) = registry.owner(&spot).unwrap();
        assert_eq!(owner.path(), "app.data.prices");
        assert!(!registry.owns(&g.tag("app.other").unwrap()));
    }

    #[test]
    fn cache_policy_memoizes_per_reference() {
        let g = graph();
        let domain = g.tag("app.data").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = Arc::clone(&calls);
            move |_: &Reference| -> Result<Value, String> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!(42))
            }
        };
        let mut registry = NapiRegistry::new();
        registry.register(domain.clone(), Arc::new(counted), CachePolicy::Cache);

        let spot = Reference::new(g.tag("app.data.prices.spot").unwrap());
        let (owner, registration) = registry.owner(spot.tag()).unwrap();
        let registration = registration.clone();
        let owner = owner.clone();
        assert_eq!(registration.fetch(&owner, &spot).unwrap(), json!(42));
        assert_eq!(registration.fetch(&owner, &spot).unwrap(), json!(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repository_failure_is_an_error_value() {
        let g = graph();
        let domain = g.tag("app.data").unwrap();
        let mut registry = NapiRegistry::new();
        registry.register(
            domain.clone(),
            Arc::new(|_: &Reference| -> Result<Value, String> { Err("transport down".to_string()) }),
            CachePolicy::Fresh,
        );
        let spot = Reference::new(g.tag("app.data.prices.spot").unwrap());
        let (owner, registration) = registry.owner(spot.tag()).unwrap();
        let err = registration.fetch(owner, &spot).unwrap_err();
        assert!(matches!(err, NapiError::Repository { .. }));
    }
}
