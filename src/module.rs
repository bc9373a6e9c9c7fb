//! Module/container registry: which service owns which container.

use std::sync::RwLock;

use indexmap::IndexMap;

use crate::dom::NodeId;

/// Prefix of ids generated when neither the caller nor the parent node
/// provides one. Their zones are dropped on disconnect.
pub const RANDOM_ID_PREFIX: &str = "Rmc_";
/// Prefix of ids derived from the parent node's id.
pub const STABLE_ID_PREFIX: &str = "mc_";
/// Prefix of per-service global containers.
pub const GLOBAL_ID_PREFIX: &str = "Gmc_";

pub fn global_container_id(service_name: &str) -> String {
    format!("{GLOBAL_ID_PREFIX}{service_name}")
}

pub fn is_global_container(container_id: &str) -> bool {
    container_id.starts_with(GLOBAL_ID_PREFIX)
}

/// A live container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub container_id: String,
    pub service_name: String,
    /// The container's shadow root, or the container itself.
    pub host: NodeId,
}

/// Records keyed by container id, in registration order.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    records: RwLock<IndexMap<String, ModuleRecord>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container. Re-adding an id replaces the record in place.
    pub fn add(&self, container_id: &str, service_name: &str, host: NodeId) {
        self.records
            .write()
            .expect("module registry lock poisoned")
            .insert(
                container_id.to_string(),
                ModuleRecord {
                    container_id: container_id.to_string(),
                    service_name: service_name.to_string(),
                    host,
                },
            );
    }

    /// Drop the record for `container_id`. When `boundary` is given the
    /// record is only dropped if it was registered with that host.
    pub fn clear(&self, container_id: &str, boundary: Option<NodeId>) -> bool {
        let mut records = self.records.write().expect("module registry lock poisoned");
        let matches = records
            .get(container_id)
            .is_some_and(|r| boundary.is_none_or(|b| r.host == b));
        if matches {
            records.shift_remove(container_id);
        }
        matches
    }

    pub fn get(&self, container_id: &str) -> Option<ModuleRecord> {
        self.records
            .read()
            .expect("module registry lock poisoned")
            .get(container_id)
            .cloned()
    }

    /// Records of one service, registration order.
    pub fn for_service(&self, service_name: &str) -> Vec<ModuleRecord> {
        self.records
            .read()
            .expect("module registry lock poisoned")
            .values()
            .filter(|r| r.service_name == service_name)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<ModuleRecord> {
        self.records
            .read()
            .expect("module registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("module registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear_all(&self) {
        self.records.write().expect("module registry lock poisoned").clear();
    }
}
