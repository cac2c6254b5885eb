//! Host Engine — startup/shutdown sequencing and the public operation surface.
//!
//! Wires components A-G (state store, extension registry, container
//! registry, scanner controller, lifecycle orchestrator, controller
//! client) the way the teacher's `main.rs`/`AgentPool` construction wires
//! its own subsystems, then exposes every operation behind the uniform
//! `Response<T>` envelope (spec.md §6, §7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::HostConfig;
use crate::container::ArtifactFactory;
use crate::controller::{ConnectOutcome, ContainerInstaller, ControllerClient, ReconnectTask};
use crate::error::{HostError, Response};
use crate::extension::{Extension, ExtensionRegistry};
use crate::messages::{ContainerMessageLog, ServerMessageLog};
use crate::model::{
    ContainerResource, Coordinates, CreateContainerRequest, Message, ScannerResource, ServerInfo,
    ServerState,
};
use crate::orchestrator::LifecycleOrchestrator;
use crate::registry::ContainerRegistry;
use crate::scanner::{ScannerController, ScannerFactory};
use crate::state_store::{state_exists, StateStore};

struct OrchestratorInstaller(Arc<LifecycleOrchestrator>);

#[async_trait::async_trait]
impl ContainerInstaller for OrchestratorInstaller {
    async fn install(&self, container_id: &str, req: CreateContainerRequest) {
        let response = self.0.create_container(container_id, req).await;
        if !response.is_success() {
            tracing::warn!(
                "failed to install container {} from controller: {}",
                container_id,
                response.message
            );
        }
    }
}

pub struct HostEngine {
    server_id: String,
    server_name: String,
    server_location: String,
    registry: Arc<ContainerRegistry>,
    extensions: Arc<ExtensionRegistry>,
    orchestrator: Arc<LifecycleOrchestrator>,
    scanner_controller: Arc<ScannerController>,
    controller_client: Arc<dyn ControllerClient>,
    state_store: Arc<dyn StateStore>,
    messages: Arc<ContainerMessageLog>,
    server_messages: Arc<ServerMessageLog>,
    active: AtomicBool,
    reconnect_shutdown: tokio::sync::watch::Sender<bool>,
}

impl HostEngine {
    /// Startup sequence — spec.md §2 data flow, §4.G bootstrap, §4.H.
    pub async fn bootstrap(
        config: HostConfig,
        discover: impl FnOnce() -> Vec<Arc<dyn Extension>>,
        artifact_factory: Arc<dyn ArtifactFactory>,
        scanner_factory: Arc<dyn ScannerFactory>,
        state_store: Arc<dyn StateStore>,
        controller_client: Arc<dyn ControllerClient>,
    ) -> Result<Arc<HostEngine>, HostError> {
        config
            .validate()
            .map_err(HostError::ValidationFault)?;

        let registry = Arc::new(ContainerRegistry::new());
        let extensions = Arc::new(ExtensionRegistry::discover(discover));
        let messages = Arc::new(ContainerMessageLog::new());
        let server_messages = Arc::new(ServerMessageLog::new());
        let scanner_controller = Arc::new(ScannerController::new(scanner_factory));

        let orchestrator = Arc::new(LifecycleOrchestrator::new(
            config.server_id.clone(),
            registry.clone(),
            extensions.clone(),
            artifact_factory,
            state_store.clone(),
            messages.clone(),
        ));

        extensions.init_all().await;

        let capabilities = extensions.capabilities();
        let info = ServerInfo {
            server_id: config.server_id.clone(),
            server_name: config.server_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities,
            location: config.server_location.clone(),
            messages: Vec::new(),
        };

        let had_prior_state = state_exists(std::path::Path::new(&config.state_dir), &config.server_id);
        let persisted = state_store.load(&config.server_id).await?;
        let (reconnect_shutdown, shutdown_rx) = tokio::sync::watch::channel(false);

        match controller_client.connect(&info).await {
            ConnectOutcome::Ready(setup) => {
                tracing::info!(
                    "controller handshake ready for {}, installing {} container(s)",
                    config.server_id,
                    setup.containers.len()
                );
                for container in setup.containers {
                    Self::install_one(&orchestrator, container).await;
                }
            }
            ConnectOutcome::NotDefined => {
                if had_prior_state {
                    tracing::info!(
                        "no controllers configured for {}, restoring {} locally persisted container(s)",
                        config.server_id,
                        persisted.containers.len()
                    );
                } else {
                    tracing::info!(
                        "no controllers configured for {} and no prior state found, starting empty",
                        config.server_id
                    );
                }
                for container in persisted.containers {
                    Self::install_one(&orchestrator, container).await;
                }
            }
            ConnectOutcome::NotConnected => {
                tracing::warn!("controller unreachable at startup for {}", config.server_id);
                let installer = Arc::new(OrchestratorInstaller(orchestrator.clone()));
                let task = ReconnectTask::new(
                    controller_client.clone(),
                    installer,
                    Duration::from_secs(config.reconnect_interval_secs.max(1)),
                    shutdown_rx,
                );
                if config.sync_deployment {
                    tracing::info!("sync-deployment is set, blocking startup on reconnect");
                    task.run(info.clone()).await;
                } else {
                    tokio::spawn(task.run(info.clone()));
                }
            }
        }

        server_messages
            .append(Message::info(format!(
                "{} ({}) started at {}",
                config.server_id,
                config.server_name,
                Utc::now().to_rfc3339()
            )))
            .await;

        Ok(Arc::new(HostEngine {
            server_id: config.server_id,
            server_name: config.server_name,
            server_location: config.server_location,
            registry,
            extensions,
            orchestrator,
            scanner_controller,
            controller_client,
            state_store,
            messages,
            server_messages,
            active: AtomicBool::new(true),
            reconnect_shutdown,
        }))
    }

    async fn install_one(orchestrator: &LifecycleOrchestrator, container: ContainerResource) {
        let req = CreateContainerRequest {
            container_id: container.container_id.clone(),
            coordinates: container.coordinates.clone(),
        };
        let response = orchestrator.create_container(&container.container_id, req).await;
        if !response.is_success() {
            tracing::warn!(
                "failed to install container {} at startup: {}",
                container.container_id,
                response.message
            );
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn get_info(&self) -> Response<ServerInfo> {
        Response::success(
            "ok",
            ServerInfo {
                server_id: self.server_id.clone(),
                server_name: self.server_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                capabilities: self.extensions.capabilities(),
                location: self.server_location.clone(),
                messages: self.server_messages.snapshot().await,
            },
        )
    }

    pub async fn create_container(
        &self,
        container_id: &str,
        req: CreateContainerRequest,
    ) -> Response<ContainerResource> {
        if !self.is_active() {
            return HostError::unexpected("engine", "host engine is shutting down").into();
        }
        self.orchestrator.create_container(container_id, req).await
    }

    pub async fn dispose_container(&self, container_id: &str) -> Response<()> {
        self.orchestrator.dispose_container(container_id).await
    }

    pub async fn list_containers(&self) -> Response<Vec<ContainerResource>> {
        let mut resources = Vec::new();
        for instance in self.registry.list() {
            let mut resource = instance.resource_snapshot().await;
            resource.messages = self.messages.get(&resource.container_id);
            resources.push(resource);
        }
        Response::success("ok", resources)
    }

    pub async fn get_container_info(&self, container_id: &str) -> Response<ContainerResource> {
        match self.registry.get(container_id) {
            Some(instance) => {
                let mut resource = instance.resource_snapshot().await;
                resource.messages = self.messages.get(container_id);
                Response::success("ok", resource)
            }
            None => HostError::NotFound(format!("container '{container_id}' not found")).into(),
        }
    }

    pub async fn get_container_release_id(&self, container_id: &str) -> Response<Coordinates> {
        match self.registry.get(container_id) {
            Some(instance) => {
                let resource = instance.resource_snapshot().await;
                Response::success("ok", resource.coordinates)
            }
            None => HostError::NotFound(format!("container '{container_id}' not found")).into(),
        }
    }

    pub async fn update_container_release_id(
        &self,
        container_id: &str,
        new_coordinates: Coordinates,
    ) -> Response<Coordinates> {
        self.orchestrator
            .update_container_release_id(container_id, new_coordinates)
            .await
    }

    pub async fn get_scanner_info(&self, container_id: &str) -> Response<ScannerResource> {
        match self.registry.get(container_id) {
            Some(instance) => Response::success("ok", self.scanner_controller.info(&instance).await),
            None => HostError::NotFound(format!("container '{container_id}' not found")).into(),
        }
    }

    pub async fn update_scanner(
        &self,
        container_id: &str,
        target: ScannerResource,
    ) -> Response<ScannerResource> {
        let instance = match self.registry.get(container_id) {
            Some(instance) => instance,
            None => {
                return HostError::NotFound(format!("container '{container_id}' not found")).into();
            }
        };

        match self
            .scanner_controller
            .update(container_id, &instance, &self.messages, &target)
            .await
        {
            Ok(resource) => Response::success("scanner transitioned", resource),
            Err(e) => e.into(),
        }
    }

    pub async fn get_server_state(&self) -> Response<ServerState> {
        match self.state_store.load(&self.server_id).await {
            Ok(state) => Response::success("ok", state),
            Err(e) => e.into(),
        }
    }

    pub async fn add_server_message(&self, message: Message) -> Response<()> {
        self.server_messages.append(message).await;
        Response::success_empty("message recorded")
    }

    /// Flips the active flag, stops the background reconnect task,
    /// disconnects from the controller, then tears down extensions in
    /// start order (failures logged, iteration continues per `destroy_all`).
    pub async fn destroy(&self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.reconnect_shutdown.send(true);

        let info = ServerInfo {
            server_id: self.server_id.clone(),
            server_name: self.server_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: self.extensions.capabilities(),
            location: self.server_location.clone(),
            messages: Vec::new(),
        };
        self.controller_client.disconnect(&info).await;
        self.extensions.destroy_all().await;
        tracing::info!("host engine {} destroyed", self.server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ArtifactHandle, UpdateOutcome};
    use crate::controller::tests_support::FakeControllerClient;
    use crate::extension::tests_support::FakeExtension;
    use crate::scanner::tests_support::FakeScannerFactory;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct FakeArtifact;

    #[async_trait]
    impl ArtifactHandle for FakeArtifact {
        async fn dispose(&self) {}
        async fn update_to_version(&self, coordinates: &Coordinates) -> UpdateOutcome {
            UpdateOutcome {
                messages: Vec::new(),
                resolved_coordinates: coordinates.clone(),
            }
        }
        fn resolved_coordinates(&self) -> Coordinates {
            Coordinates::new("g", "a", "1.0")
        }
        fn invalidate_caches(&self) {}
    }

    struct FakeArtifactFactory;

    #[async_trait]
    impl ArtifactFactory for FakeArtifactFactory {
        async fn resolve(&self, _coordinates: &Coordinates) -> Option<Arc<dyn ArtifactHandle>> {
            Some(Arc::new(FakeArtifact))
        }
    }

    fn test_config(dir: &std::path::Path) -> HostConfig {
        let mut config = HostConfig::default();
        config.server_id = "srv-test".to_string();
        config.state_dir = dir.to_string_lossy().to_string();
        config
    }

    async fn bootstrap_with(
        config: HostConfig,
        controller: Arc<dyn ControllerClient>,
    ) -> Arc<HostEngine> {
        let state_store: Arc<dyn StateStore> =
            Arc::new(crate::state_store::FileStateStore::new(config.state_dir.clone()));
        HostEngine::bootstrap(
            config,
            || -> Vec<Arc<dyn Extension>> {
                vec![Arc::new(FakeExtension::new(
                    "core",
                    0,
                    Arc::new(Mutex::new(Vec::new())),
                ))]
            },
            Arc::new(FakeArtifactFactory),
            Arc::new(FakeScannerFactory),
            state_store,
            controller,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_then_list_then_dispose_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(FakeControllerClient::new(vec![]));
        let engine = bootstrap_with(test_config(dir.path()), controller).await;

        let created = engine
            .create_container(
                "c1",
                CreateContainerRequest {
                    container_id: "c1".to_string(),
                    coordinates: Coordinates::new("org.x", "demo", "1.0"),
                },
            )
            .await;
        assert!(created.is_success());

        let listed = engine.list_containers().await;
        let containers = listed.payload.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].container_id, "c1");

        let disposed = engine.dispose_container("c1").await;
        assert!(disposed.is_success());

        let info = engine.get_container_info("c1").await;
        assert!(!info.is_success());

        let listed_after = engine.list_containers().await;
        assert!(listed_after.payload.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_release_id_reflects_in_get_release_id() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(FakeControllerClient::new(vec![]));
        let engine = bootstrap_with(test_config(dir.path()), controller).await;

        engine
            .create_container(
                "c1",
                CreateContainerRequest {
                    container_id: "c1".to_string(),
                    coordinates: Coordinates::new("org.x", "demo", "1.0"),
                },
            )
            .await;

        let updated = engine
            .update_container_release_id("c1", Coordinates::new("org.x", "demo", "2.0"))
            .await;
        assert!(updated.is_success());

        let release = engine.get_container_release_id("c1").await;
        assert_eq!(release.payload.unwrap(), Coordinates::new("org.x", "demo", "2.0"));
    }

    #[tokio::test]
    async fn dispose_unknown_container_is_idempotent_success() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(FakeControllerClient::new(vec![]));
        let engine = bootstrap_with(test_config(dir.path()), controller).await;

        let disposed = engine.dispose_container("missing").await;
        assert!(disposed.is_success());
    }

    #[tokio::test]
    async fn controller_unreachable_at_startup_is_non_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.sync_deployment = false;
        config.controllers = vec!["http://127.0.0.1:1".to_string()];
        let controller = Arc::new(FakeControllerClient::new(vec![ConnectOutcome::NotConnected]));

        let engine = bootstrap_with(config, controller).await;
        let info = engine.get_info().await;
        assert!(info.is_success());
    }

    #[tokio::test]
    async fn add_server_message_is_visible_in_get_info() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(FakeControllerClient::new(vec![]));
        let engine = bootstrap_with(test_config(dir.path()), controller).await;

        engine.add_server_message(Message::info("manual note")).await;
        let info = engine.get_info().await;
        let messages = info.payload.unwrap().messages;
        assert!(messages.iter().any(|m| m.text == "manual note"));
    }
}
