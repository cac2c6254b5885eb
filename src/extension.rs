//! Extension Registry — discovers, orders, and iterates capability extensions.
//!
//! Ordering: ascending `start_order`, ties broken by stable discovery order.
//! This order governs `init`, `create_container`, `update_container`, and
//! `dispose_container` fan-outs; rollback iterates the reverse of the
//! successfully-completed prefix.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::container::ContainerInner;

/// Shared, mutable parameter bag passed through an extension fan-out. Used
/// both to carry module metadata into callbacks and to carry a refusal
/// reason back out (`params["failureReason"]`).
pub type ExtensionParams = HashMap<String, String>;

pub const FAILURE_REASON_KEY: &str = "failureReason";

/// A pluggable capability module invoked during container lifecycle.
///
/// Mirrors the teacher's narrow-trait-plus-test-double shape (see
/// `DockerOps`/`FakeDocker`): production code depends only on this trait,
/// tests supply in-memory implementations.
#[async_trait]
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;
    fn is_active(&self) -> bool;
    fn start_order(&self) -> i32;
    fn implemented_capability(&self) -> &str;

    async fn init(&self) -> Result<(), String>;
    async fn destroy(&self) -> Result<(), String>;

    async fn create_container(
        &self,
        container_id: &str,
        instance: &ContainerInner,
        params: &ExtensionParams,
    ) -> Result<(), String>;

    async fn dispose_container(
        &self,
        container_id: &str,
        instance: &ContainerInner,
        params: &ExtensionParams,
    ) -> Result<(), String>;

    async fn update_container(
        &self,
        container_id: &str,
        instance: &ContainerInner,
        params: &ExtensionParams,
    ) -> Result<(), String>;

    /// Returns `false` (populating `params["failureReason"]`) to refuse an
    /// update.
    async fn is_update_container_allowed(
        &self,
        container_id: &str,
        instance: &ContainerInner,
        params: &mut ExtensionParams,
    ) -> bool;
}

/// Discovers, orders and iterates the active extension set.
///
/// Discovery itself is a pluggable `fn() -> Vec<Arc<dyn Extension>>` per the
/// Design Notes ("abstract dynamic service discovery as a `Discover[T]()`
/// function"); a static registration table, as used here, is equivalent.
pub struct ExtensionRegistry {
    extensions: Vec<Arc<dyn Extension>>,
}

impl ExtensionRegistry {
    /// Build a registry from a discovery function, keeping only active
    /// extensions and ordering them by ascending `start_order` (ties by the
    /// order `discover` returned them in — `sort_by_key` is stable).
    pub fn discover(discover: impl FnOnce() -> Vec<Arc<dyn Extension>>) -> Self {
        let mut extensions: Vec<Arc<dyn Extension>> =
            discover().into_iter().filter(|e| e.is_active()).collect();
        extensions.sort_by_key(|e| e.start_order());
        ExtensionRegistry { extensions }
    }

    pub fn from_extensions(extensions: Vec<Arc<dyn Extension>>) -> Self {
        let mut extensions: Vec<Arc<dyn Extension>> =
            extensions.into_iter().filter(|e| e.is_active()).collect();
        extensions.sort_by_key(|e| e.start_order());
        ExtensionRegistry { extensions }
    }

    /// Extensions in start order — the order used for init/create/update/dispose.
    pub fn ordered(&self) -> &[Arc<dyn Extension>] {
        &self.extensions
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.extensions
            .iter()
            .map(|e| e.implemented_capability().to_string())
            .collect()
    }

    /// Initializes every extension in start order. A failing extension is
    /// logged and iteration continues with the next one.
    pub async fn init_all(&self) {
        for extension in &self.extensions {
            tracing::info!("initializing extension: {}", extension.name());
            if let Err(reason) = extension.init().await {
                tracing::error!("extension '{}' failed to initialize: {}", extension.name(), reason);
            }
        }
    }

    /// Tears down every extension in start order. A failing extension is
    /// logged and iteration continues with the next one.
    pub async fn destroy_all(&self) {
        for extension in &self.extensions {
            tracing::info!("destroying extension: {}", extension.name());
            if let Err(reason) = extension.destroy().await {
                tracing::error!("extension '{}' failed to destroy: {}", extension.name(), reason);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// A configurable fake extension for ordering/rollback tests, in the
    /// style of the teacher's `client::fake::FakeDocker`.
    pub struct FakeExtension {
        pub name: String,
        pub start_order: i32,
        pub active: bool,
        pub fail_create: bool,
        pub fail_dispose: bool,
        pub fail_update_allowed: bool,
        pub create_calls: Arc<AtomicUsize>,
        pub dispose_calls: Arc<AtomicUsize>,
        pub update_calls: Arc<AtomicUsize>,
        pub call_log: Arc<Mutex<Vec<String>>>,
    }

    impl FakeExtension {
        pub fn new(name: &str, start_order: i32, call_log: Arc<Mutex<Vec<String>>>) -> Self {
            FakeExtension {
                name: name.to_string(),
                start_order,
                active: true,
                fail_create: false,
                fail_dispose: false,
                fail_update_allowed: false,
                create_calls: Arc::new(AtomicUsize::new(0)),
                dispose_calls: Arc::new(AtomicUsize::new(0)),
                update_calls: Arc::new(AtomicUsize::new(0)),
                call_log,
            }
        }
    }

    #[async_trait]
    impl Extension for FakeExtension {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_active(&self) -> bool {
            self.active
        }
        fn start_order(&self) -> i32 {
            self.start_order
        }
        fn implemented_capability(&self) -> &str {
            "FAKE"
        }

        async fn init(&self) -> Result<(), String> {
            Ok(())
        }
        async fn destroy(&self) -> Result<(), String> {
            Ok(())
        }

        async fn create_container(
            &self,
            _container_id: &str,
            _instance: &ContainerInner,
            _params: &ExtensionParams,
        ) -> Result<(), String> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            self.call_log.lock().await.push(format!("create:{}", self.name));
            if self.fail_create {
                Err(format!("{} refused create", self.name))
            } else {
                Ok(())
            }
        }

        async fn dispose_container(
            &self,
            _container_id: &str,
            _instance: &ContainerInner,
            _params: &ExtensionParams,
        ) -> Result<(), String> {
            self.dispose_calls.fetch_add(1, Ordering::SeqCst);
            self.call_log.lock().await.push(format!("dispose:{}", self.name));
            if self.fail_dispose {
                Err(format!("{} refused dispose", self.name))
            } else {
                Ok(())
            }
        }

        async fn update_container(
            &self,
            _container_id: &str,
            _instance: &ContainerInner,
            _params: &ExtensionParams,
        ) -> Result<(), String> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            self.call_log.lock().await.push(format!("update:{}", self.name));
            Ok(())
        }

        async fn is_update_container_allowed(
            &self,
            _container_id: &str,
            _instance: &ContainerInner,
            params: &mut ExtensionParams,
        ) -> bool {
            if self.fail_update_allowed {
                params.insert(
                    FAILURE_REASON_KEY.to_string(),
                    format!("{} refused update", self.name),
                );
                false
            } else {
                true
            }
        }
    }
}
