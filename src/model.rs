//! Model — the data shapes shared across the host: coordinates, container
//! resources, scanner resources, messages and the persisted server state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifies an artifact bundle. `version` may be a concrete version or a
/// moving (snapshot) identifier whose concrete resolution can change over time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinates {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl Coordinates {
    pub fn new(group: impl Into<String>, artifact: impl Into<String>, version: impl Into<String>) -> Self {
        Coordinates {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

/// Lifecycle status of a container, mirrored by `ContainerInstance.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerStatus {
    Creating,
    Started,
    Disposing,
    Failed,
    Stopped,
}

/// Scanner substate as exposed to callers (mapped from the scanner-runtime's
/// own status vocabulary — see [`crate::scanner`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScannerStatus {
    Created,
    Started,
    Stopped,
    Scanning,
    Disposed,
    Unknown,
}

/// Scanner resource: status plus the poll interval required to enter `Started`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerResource {
    pub status: ScannerStatus,
    /// Poll interval in milliseconds, required when `status == Started`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
}

impl ScannerResource {
    pub fn new(status: ScannerStatus) -> Self {
        ScannerResource {
            status,
            poll_interval: None,
        }
    }

    pub fn with_poll_interval(status: ScannerStatus, poll_interval: u64) -> Self {
        ScannerResource {
            status,
            poll_interval: Some(poll_interval),
        }
    }
}

/// Severity of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// A single log line attached to the server-wide or a per-container message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_messages: Vec<Message>,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Message {
            severity: Severity::Info,
            text: text.into(),
            sub_messages: Vec::new(),
        }
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Message {
            severity: Severity::Warn,
            text: text.into(),
            sub_messages: Vec::new(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Message {
            severity: Severity::Error,
            text: text.into(),
            sub_messages: Vec::new(),
        }
    }
}

/// Public projection of a container, persisted and returned to callers.
/// `messages` is attached on read and is never itself persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerResource {
    pub container_id: String,
    pub coordinates: Coordinates,
    pub resolved_coordinates: Coordinates,
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanner_resource: Option<ScannerResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
}

impl ContainerResource {
    pub fn new(container_id: impl Into<String>, coordinates: Coordinates) -> Self {
        let resolved = coordinates.clone();
        ContainerResource {
            container_id: container_id.into(),
            coordinates,
            resolved_coordinates: resolved,
            status: ContainerStatus::Creating,
            scanner_resource: None,
            messages: Vec::new(),
        }
    }

    /// A copy with the message log stripped — the shape actually persisted
    /// (`messages` is attached on read, never persisted, per the data model).
    pub fn without_messages(&self) -> Self {
        ContainerResource {
            messages: Vec::new(),
            ..self.clone()
        }
    }
}

/// Endpoint of a remote control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerEndpoint {
    pub url: String,
}

/// Authoritative, persisted server state keyed by `server_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerState {
    pub server_id: String,
    #[serde(default)]
    pub controllers: Vec<ControllerEndpoint>,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
    #[serde(default)]
    pub containers: Vec<ContainerResource>,
}

impl ServerState {
    /// A freshly initialized, empty state for an unknown `server_id`.
    pub fn empty(server_id: impl Into<String>) -> Self {
        ServerState {
            server_id: server_id.into(),
            controllers: Vec::new(),
            configuration: HashMap::new(),
            containers: Vec::new(),
        }
    }

    /// Insert-or-replace a container by id (set semantics by `container_id`).
    pub fn upsert_container(&mut self, resource: ContainerResource) {
        let stripped = resource.without_messages();
        if let Some(existing) = self
            .containers
            .iter_mut()
            .find(|c| c.container_id == stripped.container_id)
        {
            *existing = stripped;
        } else {
            self.containers.push(stripped);
        }
    }

    /// Remove a container by id.
    pub fn remove_container(&mut self, container_id: &str) {
        self.containers.retain(|c| c.container_id != container_id);
    }
}

/// Identity/capability summary returned by `getInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_id: String,
    pub server_name: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub location: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Caller-supplied request to create a container.
#[derive(Debug, Clone)]
pub struct CreateContainerRequest {
    pub container_id: String,
    pub coordinates: Coordinates,
}
