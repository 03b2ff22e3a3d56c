//! Store routing: classify a bound reference into exactly one backing store.
//!
//! Classification is a closed, ordered check: privileged categories win
//! over anything a tag's path might otherwise suggest, and a reference is
//! routed exactly once per resolution.

use crate::core::{Category, Reference, StoreKind};

use super::store::NapiRegistry;

/// Fixed priority order:
/// 1. session-state / collection-id tags
/// 2. remote-configuration tags
/// 3. tags owned by a registered NAPI domain
/// 4. everything else: the local store
pub fn route(reference: &Reference, napi: &NapiRegistry) -> StoreKind {
    match reference.tag().category() {
        Category::SessionState => StoreKind::SessionState,
        Category::RemoteConfig => StoreKind::RemoteConfig,
        Category::Local => {
            if napi.owns(reference.tag()) {
                StoreKind::Napi
            } else {
                StoreKind::Local
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Category, Reference, TagGraph};
    use crate::runtime::store::CachePolicy;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn graph() -> TagGraph {
        let mut b = TagGraph::builder("app").unwrap();
        b.category("app.session", Category::SessionState).unwrap();
        b.node("app.session.logged_in").unwrap();
        b.category("app.configuration", Category::RemoteConfig)
            .unwrap();
        b.node("app.configuration.announcement").unwrap();
        b.node("app.data.prices").unwrap();
        b.collection("app.account").unwrap();
        b.node("app.account.balance").unwrap();
        b.build()
    }

    #[test]
    fn privileged_categories_win_in_order() {
        let g = graph();
        let mut napi = NapiRegistry::new();
        napi.register(
            g.tag("app.data").unwrap(),
            Arc::new(|_: &Reference| -> Result<Value, String> { Ok(json!(0)) }),
            CachePolicy::Fresh,
        );

        let classify = |path: &str| route(&Reference::new(g.tag(path).unwrap()), &napi);
        assert_eq!(classify("app.session.logged_in"), StoreKind::SessionState);
        assert_eq!(
            classify("app.configuration.announcement"),
            StoreKind::RemoteConfig
        );
        assert_eq!(classify("app.data.prices"), StoreKind::Napi);
        assert_eq!(classify("app.account.balance"), StoreKind::Local);
        // Collection id leaves route to session state even under a local
        // subtree.
        assert_eq!(classify("app.account.id"), StoreKind::SessionState);
    }

    #[test]
    fn unregistered_domain_falls_through_to_local() {
        let g = graph();
        let napi = NapiRegistry::new();
        let r = Reference::new(g.tag("app.data.prices").unwrap());
        assert_eq!(route(&r, &napi), StoreKind::Local);
    }
}
