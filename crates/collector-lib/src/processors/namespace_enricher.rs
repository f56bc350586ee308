//! Namespace identity enrichment

use super::Processor;
use crate::error::Result;
use crate::models::names::{labels, types};
use crate::models::{Batch, MetricSet};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

/// Lookup of namespace uids by name
pub trait NamespaceStore: Send + Sync {
    fn namespace_uid(&self, name: &str) -> Option<String>;
}

/// In-memory namespace store, updated by whatever watches the cluster
#[derive(Debug, Default)]
pub struct StaticNamespaceStore {
    namespaces: DashMap<String, String>,
}

impl StaticNamespaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, uid: impl Into<String>) {
        self.namespaces.insert(name.into(), uid.into());
    }

    pub fn remove(&self, name: &str) {
        self.namespaces.remove(name);
    }
}

impl NamespaceStore for StaticNamespaceStore {
    fn namespace_uid(&self, name: &str) -> Option<String> {
        self.namespaces.get(name).map(|uid| uid.value().clone())
    }
}

/// Sets `namespace_id` on container, pod and namespace sets
pub struct NamespaceBasedEnricher {
    store: Arc<dyn NamespaceStore>,
}

impl NamespaceBasedEnricher {
    pub fn new(store: Arc<dyn NamespaceStore>) -> Self {
        Self { store }
    }

    fn enrich(&self, set: &mut MetricSet) {
        if !matches!(
            set.resource_type(),
            types::POD_CONTAINER | types::POD | types::NAMESPACE
        ) {
            return;
        }
        let Some(namespace) = set.label(labels::NAMESPACE_NAME) else {
            return;
        };
        match self.store.namespace_uid(namespace) {
            Some(uid) => {
                set.labels.insert(labels::NAMESPACE_ID.to_string(), uid);
            }
            None => warn!(namespace = %namespace, "Namespace doesn't exist"),
        }
    }
}

#[async_trait]
impl Processor for NamespaceBasedEnricher {
    fn name(&self) -> &str {
        "namespace_based_enricher"
    }

    async fn process(&self, mut batch: Batch) -> Result<Batch> {
        for set in batch.sets.values_mut() {
            self.enrich(set);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKey;
    use chrono::Utc;

    fn set(kind: &str, namespace: &str) -> MetricSet {
        MetricSet::new(Utc::now())
            .with_labels([(labels::TYPE, kind), (labels::NAMESPACE_NAME, namespace)])
    }

    #[tokio::test]
    async fn test_enriches_namespaced_sets() {
        let store = Arc::new(StaticNamespaceStore::new());
        store.insert("default", "uid-123");
        let enricher = NamespaceBasedEnricher::new(store);

        let batch = Batch::new(Utc::now())
            .with_set(ResourceKey::pod("default", "a"), set(types::POD, "default"))
            .with_set(
                ResourceKey::pod_container("default", "a", "c"),
                set(types::POD_CONTAINER, "default"),
            )
            .with_set(ResourceKey::node("n1"), set(types::NODE, "default"))
            .with_set(ResourceKey::pod("other", "b"), set(types::POD, "other"));

        let out = enricher.process(batch).await.unwrap();
        let uid = |key: &ResourceKey| out.sets[key].label(labels::NAMESPACE_ID);

        assert_eq!(uid(&ResourceKey::pod("default", "a")), Some("uid-123"));
        assert_eq!(
            uid(&ResourceKey::pod_container("default", "a", "c")),
            Some("uid-123")
        );
        assert_eq!(uid(&ResourceKey::node("n1")), None);
        assert_eq!(uid(&ResourceKey::pod("other", "b")), None);
    }

    #[test]
    fn test_store_updates() {
        let store = StaticNamespaceStore::new();
        store.insert("kube-system", "a");
        store.insert("kube-system", "b");
        assert_eq!(store.namespace_uid("kube-system").as_deref(), Some("b"));
        store.remove("kube-system");
        assert_eq!(store.namespace_uid("kube-system"), None);
    }
}
