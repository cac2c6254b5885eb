//! Lifecycle Orchestrator — create/dispose/upgrade coordination across
//! extensions with rollback.
//!
//! Grounded on `AgentPool::reconnect_agent`'s shape (ordered fan-out,
//! partial-failure handling, logging at each step) for the create/update/
//! dispose fan-outs; the rollback asymmetry between create and dispose is
//! spec-literal (spec.md §4.F, §9 Open Question 1).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::container::{ArtifactFactory, ContainerInstance};
use crate::error::{HostError, Response};
use crate::extension::{Extension, ExtensionParams, ExtensionRegistry, FAILURE_REASON_KEY};
use crate::messages::ContainerMessageLog;
use crate::model::{
    ContainerResource, ContainerStatus, Coordinates, CreateContainerRequest, Message,
};
use crate::registry::ContainerRegistry;
use crate::state_store::StateStore;

pub struct LifecycleOrchestrator {
    server_id: String,
    registry: Arc<ContainerRegistry>,
    extensions: Arc<ExtensionRegistry>,
    artifact_factory: Arc<dyn ArtifactFactory>,
    state_store: Arc<dyn StateStore>,
    messages: Arc<ContainerMessageLog>,
    /// Serializes the load-modify-store sequence against the state store so
    /// two concurrent container operations never clobber each other's
    /// persisted write. `StateStore::store` is atomic per-call, but nothing
    /// in spec.md synchronizes the read-modify-write around it; this lock
    /// is an implementation choice, not a spec requirement.
    persist_lock: AsyncMutex<()>,
}

impl LifecycleOrchestrator {
    pub fn new(
        server_id: impl Into<String>,
        registry: Arc<ContainerRegistry>,
        extensions: Arc<ExtensionRegistry>,
        artifact_factory: Arc<dyn ArtifactFactory>,
        state_store: Arc<dyn StateStore>,
        messages: Arc<ContainerMessageLog>,
    ) -> Self {
        LifecycleOrchestrator {
            server_id: server_id.into(),
            registry,
            extensions,
            artifact_factory,
            state_store,
            messages,
            persist_lock: AsyncMutex::new(()),
        }
    }

    fn module_params(container_id: &str, coordinates: &Coordinates) -> ExtensionParams {
        let mut params = HashMap::new();
        params.insert("containerId".to_string(), container_id.to_string());
        params.insert("groupId".to_string(), coordinates.group.clone());
        params.insert("artifactId".to_string(), coordinates.artifact.clone());
        params.insert("version".to_string(), coordinates.version.clone());
        params
    }

    async fn persist_upsert(&self, resource: ContainerResource) -> Result<(), HostError> {
        let _guard = self.persist_lock.lock().await;
        let mut state = self.state_store.load(&self.server_id).await?;
        state.upsert_container(resource);
        self.state_store.store(&self.server_id, &state).await
    }

    async fn persist_remove(&self, container_id: &str) -> Result<(), HostError> {
        let _guard = self.persist_lock.lock().await;
        let mut state = self.state_store.load(&self.server_id).await?;
        state.remove_container(container_id);
        self.state_store.store(&self.server_id, &state).await
    }

    /// `createContainer(id, req)` — spec.md §4.F.
    pub async fn create_container(
        &self,
        container_id: &str,
        req: CreateContainerRequest,
    ) -> Response<ContainerResource> {
        if req.coordinates.group.is_empty()
            || req.coordinates.artifact.is_empty()
            || req.coordinates.version.is_empty()
        {
            return HostError::ValidationFault("coordinates must be fully specified".into()).into();
        }

        let instance = Arc::new(ContainerInstance::new(container_id, req.coordinates.clone()));
        let mut guard = instance.lock().await;

        if let Some(existing) = self.registry.register(container_id, instance.clone()) {
            drop(guard);
            let mut resource = existing.resource_snapshot().await;
            resource.messages = self.messages.get(container_id);
            tracing::warn!("container {} already exists", container_id);
            return Response::failure_with(
                format!("container '{container_id}' already exists"),
                resource,
            );
        }

        tracing::info!("resolving artifact for container {}: {}", container_id, req.coordinates);
        let artifact = match self.artifact_factory.resolve(&req.coordinates).await {
            Some(handle) => handle,
            None => {
                guard.set_status(ContainerStatus::Failed);
                let mut resource = guard.resource.clone();
                drop(guard);
                let text = format!("failed to resolve artifact {}", req.coordinates);
                self.messages.append(container_id, Message::error(text.clone()));
                tracing::error!("{}", text);
                resource.messages = self.messages.get(container_id);
                return Response::failure_with(text, resource);
            }
        };
        guard.resource.resolved_coordinates = artifact.resolved_coordinates();
        guard.artifact_handle = Some(artifact);

        let params = Self::module_params(container_id, &req.coordinates);
        for extension in self.extensions.ordered() {
            tracing::debug!(
                "extension {} creating container {}",
                extension.name(),
                container_id
            );
            if let Err(reason) = extension.create_container(container_id, &guard, &params).await {
                guard.set_status(ContainerStatus::Failed);
                let mut resource = guard.resource.clone();
                drop(guard);
                let text = format!("extension '{}' failed to create container: {reason}", extension.name());
                self.messages.append(container_id, Message::error(text.clone()));
                tracing::error!("{}", text);
                resource.messages = self.messages.get(container_id);
                // No rollback on this path — the container is left FAILED
                // and registered; the caller is expected to dispose it.
                return Response::failure_with(text, resource);
            }
        }

        guard.set_status(ContainerStatus::Started);
        let resource = guard.resource.clone();
        drop(guard);

        if let Err(e) = self.persist_upsert(resource.clone()).await {
            tracing::error!("failed to persist container {}: {}", container_id, e);
            self.messages.append(container_id, Message::error(e.to_string()));
            let mut resource = resource;
            resource.messages = self.messages.get(container_id);
            return Response::failure_with(e.to_string(), resource);
        }

        let text = format!("container '{container_id}' created and started");
        self.messages.append(container_id, Message::info(text.clone()));
        tracing::info!("{}", text);

        let mut resource = resource;
        resource.messages = self.messages.get(container_id);
        Response::success(text, resource)
    }

    /// `disposeContainer(id)` — spec.md §4.F.
    pub async fn dispose_container(&self, container_id: &str) -> Response<()> {
        let instance = match self.registry.unregister(container_id) {
            Some(instance) => instance,
            None => {
                tracing::info!("container {} was not instantiated", container_id);
                return Response::success_empty(format!(
                    "container '{container_id}' was not instantiated"
                ));
            }
        };

        let mut guard = instance.lock().await;
        guard.set_status(ContainerStatus::Disposing);

        let params = Self::module_params(container_id, &guard.resource.coordinates);
        let mut disposed_prefix: Vec<Arc<dyn Extension>> = Vec::new();

        for extension in self.extensions.ordered() {
            match extension.dispose_container(container_id, &guard, &params).await {
                Ok(()) => disposed_prefix.push(extension.clone()),
                Err(reason) => {
                    tracing::warn!(
                        "extension '{}' failed to dispose container {}: {}; rolling back",
                        extension.name(),
                        container_id,
                        reason
                    );
                    // Roll back: re-create the already-disposed prefix, then
                    // restore the container to STARTED and re-register it.
                    for rolled_back in disposed_prefix.iter().rev() {
                        if let Err(e) = rolled_back.create_container(container_id, &guard, &params).await {
                            tracing::error!(
                                "rollback create_container failed for extension '{}': {}",
                                rolled_back.name(),
                                e
                            );
                        }
                    }
                    guard.set_status(ContainerStatus::Started);
                    drop(guard);
                    self.registry.register(container_id, instance.clone());

                    let text = format!(
                        "failed to dispose container '{container_id}': extension '{}' refused: {reason}",
                        extension.name()
                    );
                    self.messages.append(container_id, Message::warn(text.clone()));
                    return Response::failure(text);
                }
            }
        }

        let artifact = guard.artifact_handle.take();
        drop(guard);

        if let Some(artifact) = artifact {
            artifact.dispose().await;
        }

        if let Err(e) = self.persist_remove(container_id).await {
            tracing::error!("failed to persist disposal of {}: {}", container_id, e);
            return Response::failure(e.to_string());
        }

        self.messages.remove(container_id);
        let text = format!("container '{container_id}' disposed");
        tracing::info!("{}", text);
        Response::success_empty(text)
    }

    /// `updateContainerReleaseId(id, newCoordinates)` — spec.md §4.F.
    ///
    /// Deliberately does NOT take the instance mutex for its duration
    /// (spec.md §5, §9 Open Question 2): a dispose racing with an update
    /// fails the update rather than paying synchronization cost.
    pub async fn update_container_release_id(
        &self,
        container_id: &str,
        new_coordinates: Coordinates,
    ) -> Response<Coordinates> {
        if new_coordinates.group.is_empty()
            || new_coordinates.artifact.is_empty()
            || new_coordinates.version.is_empty()
        {
            return HostError::ValidationFault("coordinates must be fully specified".into()).into();
        }

        self.messages.clear(container_id);

        let instance = match self.registry.get(container_id) {
            Some(instance) => instance,
            None => {
                return self
                    .create_via_update(container_id, new_coordinates)
                    .await;
            }
        };

        // Read current state without holding the mutex across the fan-out.
        let has_artifact = instance.lock().await.artifact_handle.is_some();
        if !has_artifact {
            return self.create_via_update(container_id, new_coordinates).await;
        }

        let mut params = Self::module_params(container_id, &new_coordinates);
        for extension in self.extensions.ordered() {
            let allowed = {
                let guard = instance.lock().await;
                extension
                    .is_update_container_allowed(container_id, &guard, &mut params)
                    .await
            };
            if !allowed {
                let reason = params
                    .get(FAILURE_REASON_KEY)
                    .cloned()
                    .unwrap_or_else(|| format!("extension '{}' refused the update", extension.name()));
                self.messages.append(container_id, Message::warn(reason.clone()));
                tracing::warn!("update refused for {}: {}", container_id, reason);
                return Response::failure(reason);
            }
        }

        let artifact = {
            let guard = instance.lock().await;
            guard.artifact_handle.clone()
        };
        let artifact = match artifact {
            Some(a) => a,
            None => {
                // Disposed mid-flight by a racing dispose — fail late, as
                // spec.md's concurrency model accepts.
                let text = format!("container '{container_id}' was disposed during update");
                self.messages.append(container_id, Message::warn(text.clone()));
                return Response::failure(text);
            }
        };

        artifact.invalidate_caches();
        let outcome = artifact.update_to_version(&new_coordinates).await;

        if outcome.has_errors() {
            let aggregated = outcome
                .messages
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            let text = format!("update to {new_coordinates} failed: {aggregated}");
            self.messages.append(container_id, Message::warn(text.clone()));
            tracing::warn!("{}", text);

            // Expose the pre-update (old) resolved coordinates — the
            // underlying handle may or may not have updated.
            let old_resolved = instance.lock().await.resource.resolved_coordinates.clone();
            return Response::failure_with(text, old_resolved);
        }

        for extension in self.extensions.ordered() {
            let guard = instance.lock().await;
            if let Err(reason) = extension.update_container(container_id, &guard, &params).await {
                drop(guard);
                let text = format!("extension '{}' failed during update: {reason}", extension.name());
                self.messages.append(container_id, Message::warn(text.clone()));
                tracing::warn!("{}", text);
                return Response::failure(text);
            }
        }

        let resolved = outcome.resolved_coordinates.clone();
        let resource = {
            let mut guard = instance.lock().await;
            guard.resource.coordinates = new_coordinates.clone();
            guard.resource.resolved_coordinates = resolved.clone();
            guard.resource.clone()
        };

        if let Err(e) = self.persist_upsert(resource).await {
            tracing::error!("failed to persist release update for {}: {}", container_id, e);
            return Response::failure(e.to_string());
        }

        let text = format!("container '{container_id}' updated to {resolved}");
        self.messages.append(container_id, Message::info(text.clone()));
        tracing::info!("{}", text);
        Response::success(text, resolved)
    }

    async fn create_via_update(
        &self,
        container_id: &str,
        new_coordinates: Coordinates,
    ) -> Response<Coordinates> {
        let req = CreateContainerRequest {
            container_id: container_id.to_string(),
            coordinates: new_coordinates,
        };
        let created = self.create_container(container_id, req).await;
        let was_success = created.is_success();
        let Response { message, payload, .. } = created;
        match payload {
            Some(resource) => {
                if was_success {
                    Response::success(message, resource.resolved_coordinates)
                } else {
                    Response::failure_with(message, resource.resolved_coordinates)
                }
            }
            None => Response::failure(message),
        }
    }
}
