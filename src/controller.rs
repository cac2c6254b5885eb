//! Controller Client — handshake and background reconnect with the remote
//! control plane.
//!
//! Grounded on the teacher's `AgentDiscovery::start_swarm_discovery` loop
//! shape (`tokio::time::interval` + `MissedTickBehavior::Skip` +
//! `tokio::sync::watch<bool>` shutdown signal inside a `tokio::select!`);
//! the wire transport is `reqwest` JSON-over-HTTP rather than the teacher's
//! tonic gRPC, per the dependency notes in DESIGN.md.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{ContainerResource, ControllerEndpoint, CreateContainerRequest, ServerInfo};

/// The shape the controller returns on a successful handshake: the set of
/// containers this host should be running.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerSetup {
    pub containers: Vec<ContainerResource>,
}

/// `connect(serverInfo)` outcome — spec.md §4.G.
pub enum ConnectOutcome {
    Ready(ControllerSetup),
    NotDefined,
    NotConnected,
}

#[derive(Debug, Serialize)]
struct ConnectRequest<'a> {
    #[serde(rename = "serverId")]
    server_id: &'a str,
    #[serde(rename = "serverName")]
    server_name: &'a str,
    version: &'a str,
    capabilities: &'a [String],
    location: &'a str,
}

/// Wire contract toward a remote control plane: connect / disconnect.
#[async_trait::async_trait]
pub trait ControllerClient: Send + Sync {
    async fn connect(&self, info: &ServerInfo) -> ConnectOutcome;
    async fn disconnect(&self, info: &ServerInfo);
}

/// Default implementation: one `reqwest` POST attempt per configured
/// endpoint per connect cycle, first success wins.
pub struct HttpControllerClient {
    endpoints: Vec<ControllerEndpoint>,
    http: reqwest::Client,
}

impl HttpControllerClient {
    pub fn new(endpoints: Vec<ControllerEndpoint>) -> Self {
        HttpControllerClient {
            endpoints,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    async fn try_connect_one(
        &self,
        endpoint: &ControllerEndpoint,
        info: &ServerInfo,
    ) -> Option<ControllerSetup> {
        let url = format!("{}/connect", endpoint.url.trim_end_matches('/'));
        let body = ConnectRequest {
            server_id: &info.server_id,
            server_name: &info.server_name,
            version: &info.version,
            capabilities: &info.capabilities,
            location: &info.location,
        };

        match self.http.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<ControllerSetup>().await {
                    Ok(setup) => Some(setup),
                    Err(e) => {
                        tracing::warn!("controller {} returned an unparseable setup: {}", endpoint.url, e);
                        None
                    }
                }
            }
            Ok(response) => {
                tracing::warn!("controller {} responded with {}", endpoint.url, response.status());
                None
            }
            Err(e) => {
                tracing::warn!("controller {} unreachable: {}", endpoint.url, e);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl ControllerClient for HttpControllerClient {
    async fn connect(&self, info: &ServerInfo) -> ConnectOutcome {
        if self.endpoints.is_empty() {
            return ConnectOutcome::NotDefined;
        }

        for endpoint in &self.endpoints {
            if let Some(setup) = self.try_connect_one(endpoint, info).await {
                return ConnectOutcome::Ready(setup);
            }
        }

        ConnectOutcome::NotConnected
    }

    async fn disconnect(&self, info: &ServerInfo) {
        for endpoint in &self.endpoints {
            let url = format!("{}/disconnect", endpoint.url.trim_end_matches('/'));
            let body = ConnectRequest {
                server_id: &info.server_id,
                server_name: &info.server_name,
                version: &info.version,
                capabilities: &info.capabilities,
                location: &info.location,
            };
            if let Err(e) = self.http.post(&url).json(&body).send().await {
                tracing::debug!("disconnect notification to {} failed: {}", endpoint.url, e);
            }
        }
    }
}

/// Installs a [`ControllerSetup`]'s containers via a caller-supplied
/// installer callback — the orchestrator's `create_container`, invoked
/// once per container in the set.
#[async_trait::async_trait]
pub trait ContainerInstaller: Send + Sync {
    async fn install(&self, container_id: &str, req: CreateContainerRequest);
}

/// Background reconnect task: wakes periodically while the engine is
/// active, and on first success installs the returned setup then exits.
/// Shaped after `AgentDiscovery::start_swarm_discovery`.
pub struct ReconnectTask {
    client: Arc<dyn ControllerClient>,
    installer: Arc<dyn ContainerInstaller>,
    interval: Duration,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl ReconnectTask {
    pub fn new(
        client: Arc<dyn ControllerClient>,
        installer: Arc<dyn ContainerInstaller>,
        interval: Duration,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        ReconnectTask {
            client,
            installer,
            interval,
            shutdown_rx,
        }
    }

    /// Run until a successful connect is installed, or shutdown is signaled.
    pub async fn run(mut self, info: ServerInfo) {
        tracing::info!("starting controller reconnect task for server {}", info.server_id);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.client.connect(&info).await {
                        ConnectOutcome::Ready(setup) => {
                            tracing::info!(
                                "controller reconnect succeeded for {}, installing {} container(s)",
                                info.server_id,
                                setup.containers.len()
                            );
                            for container in setup.containers {
                                let req = CreateContainerRequest {
                                    container_id: container.container_id.clone(),
                                    coordinates: container.coordinates.clone(),
                                };
                                self.installer.install(&container.container_id, req).await;
                            }
                            break;
                        }
                        ConnectOutcome::NotDefined => {
                            tracing::debug!("no controllers configured, reconnect task exiting");
                            break;
                        }
                        ConnectOutcome::NotConnected => {
                            tracing::debug!("controller still unreachable, will retry");
                        }
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        tracing::info!("reconnect task for {} stopping on shutdown", info.server_id);
                        break;
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::{FakeControllerClient, RecordingInstaller};
    use super::*;
    use crate::model::Coordinates;

    fn sample_info() -> ServerInfo {
        ServerInfo {
            server_id: "srv-1".to_string(),
            server_name: "host-1".to_string(),
            version: "1.0".to_string(),
            capabilities: vec!["EXEC".to_string()],
            location: "http://localhost:8230".to_string(),
            messages: Vec::new(),
        }
    }

    #[tokio::test]
    async fn not_defined_exits_immediately() {
        let client = Arc::new(FakeControllerClient::new(vec![ConnectOutcome::NotDefined]));
        let installer = Arc::new(RecordingInstaller::new());
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let task = ReconnectTask::new(client, installer.clone(), Duration::from_millis(5), rx);

        task.run(sample_info()).await;
        assert!(installer.installed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn ready_installs_all_containers_and_exits() {
        let setup = ControllerSetup {
            containers: vec![ContainerResource::new(
                "c1",
                Coordinates::new("g", "a", "1.0"),
            )],
        };
        let client = Arc::new(FakeControllerClient::new(vec![
            ConnectOutcome::NotConnected,
            ConnectOutcome::Ready(setup),
        ]));
        let installer = Arc::new(RecordingInstaller::new());
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let task = ReconnectTask::new(client, installer.clone(), Duration::from_millis(5), rx);

        task.run(sample_info()).await;
        assert_eq!(installer.installed.lock().await.as_slice(), &["c1".to_string()]);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_loop() {
        let client = Arc::new(FakeControllerClient::new(Vec::new()));
        let installer = Arc::new(RecordingInstaller::new());
        let (tx, rx) = tokio::sync::watch::channel(false);
        let task = ReconnectTask::new(client, installer.clone(), Duration::from_millis(5), rx);

        let handle = tokio::spawn(task.run(sample_info()));
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(installer.installed.lock().await.is_empty());
    }
}
