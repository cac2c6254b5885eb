//! State Store — persist and load the authoritative server state.
//!
//! `store` is atomic with respect to concurrent `load`: a load either sees
//! the prior complete document or the new complete one, never a partial
//! write. The default implementation gets this by writing to a temp file in
//! the same directory and renaming it over the target — `rename` is atomic
//! on a single filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::HostError;
use crate::model::ServerState;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, server_id: &str) -> Result<ServerState, HostError>;
    async fn store(&self, server_id: &str, state: &ServerState) -> Result<(), HostError>;
}

/// File-backed state store: one JSON document per server id under `base_dir`.
pub struct FileStateStore {
    base_dir: PathBuf,
}

impl FileStateStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FileStateStore {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, server_id: &str) -> PathBuf {
        self.base_dir.join(format!("{server_id}.json"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, server_id: &str) -> Result<ServerState, HostError> {
        let path = self.path_for(server_id);
        if !path.exists() {
            tracing::debug!("no persisted state for {}, using empty state", server_id);
            return Ok(ServerState::empty(server_id));
        }

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            HostError::unexpected("io", format!("failed to read state file {path:?}: {e}"))
        })?;

        serde_json::from_slice(&bytes).map_err(|e| {
            HostError::unexpected("deserialize", format!("corrupt state file {path:?}: {e}"))
        })
    }

    async fn store(&self, server_id: &str, state: &ServerState) -> Result<(), HostError> {
        tokio::fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            HostError::unexpected(
                "io",
                format!("failed to create state dir {:?}: {e}", self.base_dir),
            )
        })?;

        let final_path = self.path_for(server_id);
        let tmp_path = self.base_dir.join(format!(".{server_id}.json.tmp"));

        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| HostError::unexpected("serialize", e.to_string()))?;

        tokio::fs::write(&tmp_path, &bytes).await.map_err(|e| {
            HostError::unexpected("io", format!("failed to write temp state file: {e}"))
        })?;

        tokio::fs::rename(&tmp_path, &final_path).await.map_err(|e| {
            HostError::unexpected("io", format!("failed to atomically replace state file: {e}"))
        })?;

        Ok(())
    }
}

/// Returns `true` if a state file exists for `server_id` under `base_dir`.
pub fn state_exists(base_dir: &Path, server_id: &str) -> bool {
    base_dir.join(format!("{server_id}.json")).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_unknown_server_id_yields_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let state = store.load("unknown").await.unwrap();
        assert_eq!(state.server_id, "unknown");
        assert!(state.containers.is_empty());
    }

    #[tokio::test]
    async fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let mut state = ServerState::empty("srv-1");
        state
            .configuration
            .insert("sync-deployment".to_string(), "false".to_string());

        store.store("srv-1", &state).await.unwrap();
        let loaded = store.load("srv-1").await.unwrap();

        assert_eq!(loaded.server_id, "srv-1");
        assert_eq!(
            loaded.configuration.get("sync-deployment").unwrap(),
            "false"
        );
    }

    #[tokio::test]
    async fn store_overwrites_previous_document_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let mut first = ServerState::empty("srv-1");
        first.containers.push(crate::model::ContainerResource::new(
            "c1",
            crate::model::Coordinates::new("g", "a", "1.0"),
        ));
        store.store("srv-1", &first).await.unwrap();

        let second = ServerState::empty("srv-1");
        store.store("srv-1", &second).await.unwrap();

        let loaded = store.load("srv-1").await.unwrap();
        assert!(loaded.containers.is_empty());
    }
}
