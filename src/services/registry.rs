//! Named lookup of configured backends.

use super::adapter::{BackendDetail, ObjectStoreAdapter, StoreError, StoreResult};
use crate::{
    backends::{BackendClient, LocalFsClient, MemoryClient},
    config::BackendConfig,
};
use std::{collections::BTreeMap, sync::Arc};

#[derive(Clone, Default)]
pub struct BackendRegistry {
    adapters: BTreeMap<String, ObjectStoreAdapter>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one adapter per configured backend. Later entries with a
    /// duplicate name replace earlier ones.
    pub fn from_config(backends: &[BackendConfig]) -> Self {
        let mut registry = Self::new();
        for backend in backends {
            let client: Arc<dyn BackendClient> = match backend {
                BackendConfig::Local { root, .. } => Arc::new(LocalFsClient::new(root)),
                BackendConfig::Memory { .. } => Arc::new(MemoryClient::new()),
            };
            let detail = BackendDetail {
                name: backend.name().to_string(),
                bucket: backend.bucket().to_string(),
            };
            tracing::info!(
                "Registered backend `{}` ({}) using vendor bucket `{}`",
                detail.name,
                client.vendor(),
                detail.bucket
            );
            registry.insert(ObjectStoreAdapter::new(detail, client));
        }
        registry
    }

    pub fn insert(&mut self, adapter: ObjectStoreAdapter) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> StoreResult<ObjectStoreAdapter> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchBackend(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn adapters(&self) -> impl Iterator<Item = &ObjectStoreAdapter> {
        self.adapters.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let registry = BackendRegistry::from_config(&[
            BackendConfig::Memory {
                name: "scratch".into(),
                bucket: "tmp".into(),
            },
            BackendConfig::Local {
                name: "disk".into(),
                bucket: "gateway".into(),
                root: "./unused".into(),
            },
        ]);
        assert_eq!(registry.names(), vec!["disk".to_string(), "scratch".to_string()]);
        assert_eq!(registry.get("scratch").unwrap().name(), "scratch");
        assert!(matches!(
            registry.get("missing"),
            Err(StoreError::NoSuchBackend(name)) if name == "missing"
        ));
    }
}
