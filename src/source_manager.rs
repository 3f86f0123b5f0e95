//! Source manager (C2): owns the `name -> adapter` registry and routes
//! adapter output to the message processor (C3) without knowing any
//! adapter's transport.
//!
//! Grounded in soar's `message_sources.rs`, which keeps a named collection
//! of `RawMessageSource` trait objects and drives them uniformly.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::adapters::{AdapterStatus, SourceAdapter};

pub struct SourceManager {
    adapters: RwLock<HashMap<String, Arc<dyn SourceAdapter>>>,
    enabled: RwLock<HashMap<String, bool>>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            enabled: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, name: &str, adapter: Arc<dyn SourceAdapter>, enabled: bool) {
        self.adapters.write().await.insert(name.to_string(), adapter);
        self.enabled.write().await.insert(name.to_string(), enabled);
    }

    pub async fn start(&self, name: &str) -> bool {
        let adapters = self.adapters.read().await;
        let Some(adapter) = adapters.get(name) else {
            warn!(source = name, "start requested for unknown source");
            return false;
        };
        adapter.start().await;
        self.enabled.write().await.insert(name.to_string(), true);
        info!(source = name, "source started");
        true
    }

    pub async fn stop(&self, name: &str) -> bool {
        let adapters = self.adapters.read().await;
        let Some(adapter) = adapters.get(name) else {
            warn!(source = name, "stop requested for unknown source");
            return false;
        };
        adapter.stop().await;
        self.enabled.write().await.insert(name.to_string(), false);
        info!(source = name, "source stopped");
        true
    }

    /// Start every source marked enabled in the configuration registry.
    pub async fn start_enabled(&self) {
        let names: Vec<String> = {
            let enabled = self.enabled.read().await;
            enabled
                .iter()
                .filter(|(_, &on)| on)
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in names {
            self.start(&name).await;
        }
    }

    pub async fn status(&self) -> HashMap<String, AdapterStatus> {
        let adapters = self.adapters.read().await;
        let mut out = HashMap::with_capacity(adapters.len());
        for (name, adapter) in adapters.iter() {
            out.insert(name.clone(), adapter.status().await);
        }
        out
    }

    pub async fn names(&self) -> Vec<String> {
        self.adapters.read().await.keys().cloned().collect()
    }
}

impl Default for SourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct FakeAdapter {
        name: String,
        started: AtomicBool,
        start_count: AtomicU64,
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self) {
            self.started.store(true, Ordering::SeqCst);
            self.start_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn stop(&self) {
            self.started.store(false, Ordering::SeqCst);
        }

        async fn status(&self) -> AdapterStatus {
            AdapterStatus {
                enabled: self.started.load(Ordering::SeqCst),
                connected: self.started.load(Ordering::SeqCst),
                ..Default::default()
            }
        }
    }

    fn fake(name: &str) -> Arc<FakeAdapter> {
        Arc::new(FakeAdapter {
            name: name.to_string(),
            started: AtomicBool::new(false),
            start_count: AtomicU64::new(0),
        })
    }

    #[tokio::test]
    async fn start_enabled_only_starts_enabled_sources() {
        let manager = SourceManager::new();
        let a = fake("adsb");
        let b = fake("acars");
        manager.register("adsb", a.clone(), true).await;
        manager.register("acars", b.clone(), false).await;

        manager.start_enabled().await;

        assert!(a.started.load(Ordering::SeqCst));
        assert!(!b.started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unknown_source_operations_return_false() {
        let manager = SourceManager::new();
        assert!(!manager.start("missing").await);
        assert!(!manager.stop("missing").await);
    }

    #[tokio::test]
    async fn status_reports_every_registered_source() {
        let manager = SourceManager::new();
        manager.register("adsb", fake("adsb"), true).await;
        manager.register("acars", fake("acars"), true).await;

        let status = manager.status().await;
        assert_eq!(status.len(), 2);
        assert!(status.contains_key("adsb"));
        assert!(status.contains_key("acars"));
    }

    #[tokio::test]
    async fn start_and_stop_flip_enabled_flag() {
        let manager = SourceManager::new();
        let a = fake("adsb");
        manager.register("adsb", a.clone(), false).await;
        manager.start("adsb").await;
        assert_eq!(a.start_count.load(Ordering::SeqCst), 1);
        manager.stop("adsb").await;
        assert!(!a.started.load(Ordering::SeqCst));
    }
}
