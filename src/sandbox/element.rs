//! Custom elements: the container element's lifecycle and zone-aware
//! `customElements.define`.

use std::sync::Arc;

use tracing::{debug, warn};

use super::Sandbox;
use crate::dom::{CustomElementDefinition, LifecycleCallback, NodeId};
use crate::error::SandboxResult;
use crate::module::RANDOM_ID_PREFIX;

impl Sandbox {
    /// Patched `customElements.define`: `connected` runs inside the zone of
    /// the element it fires for, when the element has one.
    pub fn define_custom_element(&self, name: &str, definition: CustomElementDefinition) -> SandboxResult<()> {
        let definition = if self.is_patched() {
            CustomElementDefinition {
                connected: definition.connected.map(|raw| self.zone_aware(raw)),
                disconnected: definition.disconnected,
            }
        } else {
            definition
        };
        self.doc().define_custom_element(name, definition)?;
        debug!(name, "custom element defined");
        self.flush_reactions();
        Ok(())
    }

    fn zone_aware(&self, raw: LifecycleCallback) -> LifecycleCallback {
        let zones = Arc::clone(&self.element_zones);
        Arc::new(move |site, node| {
            let zone = zones.get(&node).map(|z| z.clone());
            match zone {
                Some(zone) => zone.run(|inner| raw(inner, node)),
                None => raw(site, node),
            }
        })
    }

    /// Container connected: register it as a module record.
    pub(super) fn container_connected(&self, container: NodeId) {
        let (id, service, host) = {
            let doc = self.doc();
            (
                doc.get_attribute(container, "id").map(str::to_string),
                doc.get_attribute(container, "servicename").unwrap_or_default().to_string(),
                doc.shadow_root(container).unwrap_or(container),
            )
        };
        match id {
            Some(id) if !id.is_empty() => self.add_module(&id, &service, host),
            _ => warn!(%container, "container connected without an id, not registered"),
        }
    }

    /// Container disconnected: drop its zone (random ids only), its record,
    /// the isolated globals it asked to clear and everything tracked for
    /// nodes inside it.
    pub(super) fn container_disconnected(&self, container: NodeId) {
        let (id, service, boundary) = {
            let doc = self.doc();
            (
                doc.get_attribute(container, "id").unwrap_or_default().to_string(),
                doc.get_attribute(container, "servicename").unwrap_or_default().to_string(),
                doc.shadow_root(container),
            )
        };
        if id.starts_with(RANDOM_ID_PREFIX) {
            self.clear_zone_by_node_id(&id);
        }
        self.clear_module_by_node_id(&id, boundary);
        self.forget_host(boundary.unwrap_or(container));
        if let Some((_, props)) = self.container_props.remove(&container) {
            for prop in props.iter().filter(|p| p.need_clear) {
                self.globals.clear_service_value(&service, &prop.prop);
            }
        }
        debug!(id = %id, service = %service, "container disconnected");
    }
}
