//! Messages — the server-wide log and the per-container message logs.
//!
//! Per-container logs are a concurrent map from id to an append-only list
//! (Design Notes); clearing one is a map-local replace. The server-wide log
//! only the engine appends to, so a plain `Mutex<Vec<Message>>` suffices.

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::model::Message;

/// Per-container message logs, keyed by container id.
#[derive(Default)]
pub struct ContainerMessageLog {
    inner: DashMap<String, Vec<Message>>,
}

impl ContainerMessageLog {
    pub fn new() -> Self {
        ContainerMessageLog {
            inner: DashMap::new(),
        }
    }

    /// Clear this container's log (a map-local replace, not a removal — a
    /// subsequent `append` still works without re-creating the entry).
    pub fn clear(&self, container_id: &str) {
        self.inner.insert(container_id.to_string(), Vec::new());
    }

    pub fn append(&self, container_id: &str, message: Message) {
        self.inner
            .entry(container_id.to_string())
            .or_default()
            .push(message);
    }

    pub fn get(&self, container_id: &str) -> Vec<Message> {
        self.inner
            .get(container_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Drop the log entirely, e.g. once a container is disposed.
    pub fn remove(&self, container_id: &str) {
        self.inner.remove(container_id);
    }
}

/// Server-wide message log. Only the engine appends; reads return a snapshot.
pub struct ServerMessageLog {
    inner: Mutex<Vec<Message>>,
}

impl ServerMessageLog {
    pub fn new() -> Self {
        ServerMessageLog {
            inner: Mutex::new(Vec::new()),
        }
    }

    pub async fn append(&self, message: Message) {
        self.inner.lock().await.push(message);
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.inner.lock().await.clone()
    }
}

impl Default for ServerMessageLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;

    #[test]
    fn container_log_clears_and_appends() {
        let log = ContainerMessageLog::new();
        log.append("c1", Message::info("created"));
        assert_eq!(log.get("c1").len(), 1);

        log.clear("c1");
        assert!(log.get("c1").is_empty());

        log.append("c1", Message::warn("stopped"));
        let messages = log.get("c1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].severity, Severity::Warn);
    }

    #[test]
    fn unknown_container_has_empty_log() {
        let log = ContainerMessageLog::new();
        assert!(log.get("missing").is_empty());
    }

    #[tokio::test]
    async fn server_log_accumulates() {
        let log = ServerMessageLog::new();
        log.append(Message::info("a")).await;
        log.append(Message::info("b")).await;
        assert_eq!(log.snapshot().await.len(), 2);
    }
}
