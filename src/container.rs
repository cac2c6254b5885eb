//! Container Instance — the materialized artifact handle, status, scanner
//! handle and marshaller caches for one container, plus the artifact
//! resolution interfaces it depends on.
//!
//! All lifecycle transitions (create body, dispose body, scanner
//! transitions, release upgrade) hold the per-instance mutex — mirroring
//! `AgentState`'s guarded-fields shape, scaled down to one entity instead of
//! the whole process.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use crate::model::{Coordinates, ContainerResource, ContainerStatus, Message};
use crate::scanner::ScannerHandle;

/// Opaque handle to a materialized artifact bundle. The artifact
/// resolver/classloader that produces these is out of scope (spec.md §1);
/// this is the narrow interface the host depends on instead.
#[async_trait]
pub trait ArtifactHandle: Send + Sync {
    /// Dispose of the underlying bundle. Called once, with the artifact
    /// handle already removed from the instance.
    async fn dispose(&self);

    /// Update this bundle in place to `coordinates`, returning the outcome
    /// messages (which may include `Severity::Error` entries) and the
    /// actually-resolved coordinates.
    async fn update_to_version(&self, coordinates: &Coordinates) -> UpdateOutcome;

    /// The coordinates this handle currently resolves to.
    fn resolved_coordinates(&self) -> Coordinates;

    /// Invalidate marshaller/classloader caches ahead of an update.
    fn invalidate_caches(&self);
}

/// Result of [`ArtifactHandle::update_to_version`].
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub messages: Vec<Message>,
    pub resolved_coordinates: Coordinates,
}

impl UpdateOutcome {
    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| matches!(m.severity, crate::model::Severity::Error))
    }
}

/// Resolves coordinates into a materialized [`ArtifactHandle`]. Out-of-scope
/// resolver/classloader logic lives behind implementations of this trait.
#[async_trait]
pub trait ArtifactFactory: Send + Sync {
    async fn resolve(&self, coordinates: &Coordinates) -> Option<Arc<dyn ArtifactHandle>>;
}

/// Fields guarded by the per-instance mutex.
pub struct ContainerInner {
    pub status: ContainerStatus,
    pub resource: ContainerResource,
    pub artifact_handle: Option<Arc<dyn ArtifactHandle>>,
    pub scanner: Option<Box<dyn ScannerHandle>>,
}

impl ContainerInner {
    /// Keep `resource.status` mirroring `status` — the invariant from
    /// spec.md §3.
    pub fn set_status(&mut self, status: ContainerStatus) {
        self.status = status;
        self.resource.status = status;
    }
}

pub struct ContainerInstance {
    pub container_id: String,
    inner: Mutex<ContainerInner>,
}

impl ContainerInstance {
    pub fn new(container_id: impl Into<String>, coordinates: Coordinates) -> Self {
        let container_id = container_id.into();
        let resource = ContainerResource::new(container_id.clone(), coordinates);
        ContainerInstance {
            container_id,
            inner: Mutex::new(ContainerInner {
                status: ContainerStatus::Creating,
                resource,
                artifact_handle: None,
                scanner: None,
            }),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, ContainerInner> {
        self.inner.lock().await
    }

    /// A snapshot of the public resource projection, without messages
    /// attached (callers attach messages separately — spec.md §3).
    pub async fn resource_snapshot(&self) -> ContainerResource {
        self.inner.lock().await.resource.clone()
    }

    pub async fn status(&self) -> ContainerStatus {
        self.inner.lock().await.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_instance_starts_creating() {
        let instance = ContainerInstance::new("c1", Coordinates::new("g", "a", "1.0"));
        assert_eq!(instance.status().await, ContainerStatus::Creating);
        assert_eq!(instance.resource_snapshot().await.status, ContainerStatus::Creating);
    }

    #[tokio::test]
    async fn set_status_mirrors_into_resource() {
        let instance = ContainerInstance::new("c1", Coordinates::new("g", "a", "1.0"));
        {
            let mut guard = instance.lock().await;
            guard.set_status(ContainerStatus::Started);
        }
        assert_eq!(instance.status().await, ContainerStatus::Started);
        assert_eq!(instance.resource_snapshot().await.status, ContainerStatus::Started);
    }
}
