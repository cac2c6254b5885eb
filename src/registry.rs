//! Container Registry — the in-memory id -> container instance map.
//!
//! Grounded on `AgentPool`'s `DashMap`-keyed connection map: `register` is
//! a compare-and-set, `unregister` an atomic remove-and-return, and
//! `list()` returns a snapshot safe to traverse while others mutate (a
//! `Vec` collected from the map at call time, same as `AgentPool::list_agents`).

use std::sync::Arc;

use dashmap::DashMap;

use crate::container::ContainerInstance;

#[derive(Default)]
pub struct ContainerRegistry {
    containers: DashMap<String, Arc<ContainerInstance>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        ContainerRegistry {
            containers: DashMap::new(),
        }
    }

    /// Compare-and-set register: if a mapping already exists, it is
    /// returned unchanged and the new instance is discarded.
    pub fn register(
        &self,
        container_id: &str,
        instance: Arc<ContainerInstance>,
    ) -> Option<Arc<ContainerInstance>> {
        match self.containers.entry(container_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Some(entry.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(instance);
                None
            }
        }
    }

    pub fn unregister(&self, container_id: &str) -> Option<Arc<ContainerInstance>> {
        self.containers.remove(container_id).map(|(_, v)| v)
    }

    pub fn get(&self, container_id: &str) -> Option<Arc<ContainerInstance>> {
        self.containers.get(container_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of all registered instances, safe to traverse while other
    /// callers mutate the map.
    pub fn list(&self) -> Vec<Arc<ContainerInstance>> {
        self.containers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}
