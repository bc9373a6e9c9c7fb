//! Execution contexts ("zones") and the call-site value threaded through hooks.
//!
//! A zone labels everything a service runs (initial load, lifecycle hooks,
//! custom-element callbacks) with the container id and service name. Rust has
//! no ambient async-context propagation, so the active zone travels explicitly
//! inside a [`CallSite`].

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

/// Property set on every zone forked for a service container.
pub const IS_SERVICE_ZONE: &str = "isServiceZone";
/// Property holding the owning service's name.
pub const SERVICE_NAME: &str = "serviceName";

/// A labelled execution context.
#[derive(Debug)]
pub struct Zone {
    name: String,
    properties: HashMap<String, Value>,
    parent: Option<Arc<Zone>>,
}

impl Zone {
    pub fn new(name: impl Into<String>, properties: HashMap<String, Value>, parent: Option<Arc<Zone>>) -> Self {
        Self {
            name: name.into(),
            properties,
            parent,
        }
    }

    /// A service zone: `{isServiceZone: true, serviceName}`.
    pub fn service(container_id: &str, service_name: &str, parent: Option<Arc<Zone>>) -> Self {
        let properties = HashMap::from([
            (IS_SERVICE_ZONE.to_string(), Value::Bool(true)),
            (SERVICE_NAME.to_string(), Value::String(service_name.to_string())),
        ]);
        Self::new(container_id, properties, parent)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<Zone>> {
        self.parent.as_ref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn is_service_zone(&self) -> bool {
        self.get(IS_SERVICE_ZONE) == Some(&Value::Bool(true))
    }

    pub fn service_name(&self) -> Option<&str> {
        self.get(SERVICE_NAME).and_then(Value::as_str)
    }

    /// Run `f` with this zone active.
    pub fn run<R>(self: &Arc<Self>, f: impl FnOnce(&CallSite) -> R) -> R {
        f(&CallSite::in_zone(self.clone()))
    }
}

/// The attribution context of one intercepted call: the active zone plus the
/// captured call-stack frames (outermost last).
#[derive(Debug, Clone, Default)]
pub struct CallSite {
    pub zone: Option<Arc<Zone>>,
    pub stack: Vec<String>,
}

impl CallSite {
    /// Outside any zone, with no stack.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn in_zone(zone: Arc<Zone>) -> Self {
        Self {
            zone: Some(zone),
            stack: Vec::new(),
        }
    }

    pub fn with_stack<I, S>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stack = frames.into_iter().map(Into::into).collect();
        self
    }

    /// The nearest service zone on the zone chain.
    pub fn service_zone(&self) -> Option<&Arc<Zone>> {
        let mut current = self.zone.as_ref();
        while let Some(zone) = current {
            if zone.is_service_zone() {
                return Some(zone);
            }
            current = zone.parent();
        }
        None
    }
}

/// One zone per container id.
#[derive(Debug, Default)]
pub struct ZoneManager {
    zones: DashMap<String, Arc<Zone>>,
}

impl ZoneManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse the container's zone or fork a new service zone from `parent`.
    pub fn fork_for(&self, container_id: &str, service_name: &str, parent: Option<Arc<Zone>>) -> Arc<Zone> {
        self.zones
            .entry(container_id.to_string())
            .or_insert_with(|| Arc::new(Zone::service(container_id, service_name, parent)))
            .clone()
    }

    pub fn get(&self, container_id: &str) -> Option<Arc<Zone>> {
        self.zones.get(container_id).map(|z| z.clone())
    }

    /// Forget the container's zone. Returns whether one existed.
    pub fn clear(&self, container_id: &str) -> bool {
        self.zones.remove(container_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_zone_found_through_parents() {
        let service = Arc::new(Zone::service("mc_root", "app1", None));
        let child = Arc::new(Zone::new("timer", HashMap::new(), Some(service.clone())));
        let site = CallSite::in_zone(child);
        let found = site.service_zone().unwrap();
        assert_eq!(found.name(), "mc_root");
        assert_eq!(found.service_name(), Some("app1"));
    }

    #[test]
    fn root_call_site_has_no_service() {
        assert!(CallSite::root().service_zone().is_none());
    }

    #[test]
    fn fork_reuses_existing_zone() {
        let zones = ZoneManager::new();
        let a = zones.fork_for("mc_1", "app1", None);
        let b = zones.fork_for("mc_1", "other", None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.service_name(), Some("app1"));
        assert!(zones.clear("mc_1"));
        assert!(zones.get("mc_1").is_none());
    }

    #[test]
    fn run_exposes_zone_to_closure() {
        let zone = Arc::new(Zone::service("Rmc_x", "x", None));
        let name = zone.run(|site| site.service_zone().map(|z| z.name().to_string()));
        assert_eq!(name.as_deref(), Some("Rmc_x"));
    }
}
