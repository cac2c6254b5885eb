//! Config — host configuration loading from file and environment variables.
//!
//! Priority: environment variables > config file > defaults, matching the
//! teacher's `AgentConfig::load` precedence.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Recognized configuration keys, stored in [`ServerState::configuration`]
/// (spec.md §6).
pub const KEY_SYNC_DEPLOYMENT: &str = "sync-deployment";
pub const KEY_SERVER_LOCATION: &str = "server-location";
pub const KEY_SERVER_ID: &str = "server-id";
pub const KEY_SERVER_NAME: &str = "server-name";

const DEFAULT_SERVER_LOCATION: &str = "http://localhost:8230/services/rest/server";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub server_id: String,
    pub server_name: String,
    pub server_location: String,
    pub sync_deployment: bool,
    pub state_dir: String,
    pub controllers: Vec<String>,
    pub reconnect_interval_secs: u64,
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            server_id: "default-server".to_string(),
            server_name: "Default Server".to_string(),
            server_location: DEFAULT_SERVER_LOCATION.to_string(),
            sync_deployment: false,
            state_dir: "/var/lib/exec-host".to_string(),
            controllers: Vec::new(),
            reconnect_interval_secs: 10,
            extra: HashMap::new(),
        }
    }
}

impl HostConfig {
    /// Load configuration from file or environment variables.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = std::env::var("EXEC_HOST_CONFIG_FILE")
            .unwrap_or_else(|_| "/etc/exec-host/host.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!(
                "config file not found at {}, using environment variables",
                config_path
            );
            Self::from_env()
        };

        // Environment variables override file config for critical settings.
        if let Ok(id) = std::env::var("EXEC_HOST_SERVER_ID") {
            config.server_id = id;
        }
        if let Ok(name) = std::env::var("EXEC_HOST_SERVER_NAME") {
            config.server_name = name;
        }
        if let Ok(location) = std::env::var("EXEC_HOST_LOCATION") {
            config.server_location = location;
        }
        if let Ok(sync) = std::env::var("EXEC_HOST_SYNC_DEPLOYMENT") {
            config.sync_deployment = sync.parse().unwrap_or(false);
        }
        if let Ok(dir) = std::env::var("EXEC_HOST_STATE_DIR") {
            config.state_dir = dir;
        }
        if let Ok(controllers) = std::env::var("EXEC_HOST_CONTROLLERS") {
            config.controllers = controllers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let config: HostConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = HostConfig::default();
        if let Ok(id) = std::env::var("EXEC_HOST_SERVER_ID") {
            config.server_id = id;
        }
        if let Ok(controllers) = std::env::var("EXEC_HOST_CONTROLLERS") {
            config.controllers = controllers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        config
    }

    /// Validate configuration values are sane.
    pub fn validate(&self) -> Result<(), String> {
        if self.server_id.trim().is_empty() {
            return Err("server_id must not be empty".to_string());
        }
        for controller in &self.controllers {
            if !(controller.starts_with("http://") || controller.starts_with("https://")) {
                return Err(format!(
                    "controller endpoint must be an http(s) URL: {}",
                    controller
                ));
            }
        }
        Ok(())
    }

    /// The seed `configuration` map for a freshly-initialized [`crate::model::ServerState`].
    pub fn configuration_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(KEY_SERVER_ID.to_string(), self.server_id.clone());
        map.insert(KEY_SERVER_NAME.to_string(), self.server_name.clone());
        map.insert(
            KEY_SERVER_LOCATION.to_string(),
            self.server_location.clone(),
        );
        map.insert(
            KEY_SYNC_DEPLOYMENT.to_string(),
            self.sync_deployment.to_string(),
        );
        map.extend(self.extra.clone());
        map
    }
}
