//! Patched tree operations: where a service's appends and removals land.

use tracing::{debug, warn};

use super::{HookLevel, Sandbox};
use crate::dom::{AdjacentPosition, NodeId};
use crate::error::SandboxResult;
use crate::materialize::{CachedStyle, is_style_link};
use crate::resolver::ServiceRef;
use crate::service::{HOST_SELECTOR, HintKind};
use crate::zone::CallSite;

/// What the parent of an intercepted call is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Body,
    Head,
    Other,
}

impl Sandbox {
    fn target(&self, parent: NodeId) -> Target {
        let doc = self.doc();
        if parent == doc.body() && self.intercepts(HookLevel::Body) {
            Target::Body
        } else if doc.is_tag(parent, "head") && self.intercepts(HookLevel::Head) {
            Target::Head
        } else {
            Target::Other
        }
    }

    fn is_container(&self, node: NodeId) -> bool {
        self.doc().is_tag(node, &self.mc_tag)
    }

    /// Patched `appendChild`.
    ///
    /// Body appends of a resolved service go to its host (global container
    /// first). Head styles and stylesheet links of a resolved service are
    /// materialized into its host and cached. Everything else is a plain
    /// append.
    pub fn append_child(&self, site: &CallSite, parent: NodeId, node: NodeId) -> SandboxResult<NodeId> {
        match self.target(parent) {
            Target::Body if !self.is_container(node) => {
                let hint = self.hint(node);
                if let Some(service) = self.resolve(site, Some(&hint)) {
                    let host = self.get_host(&service, true);
                    debug!(service = %service.service_name, %node, %host, "body append redirected");
                    return self.raw_append(host, node);
                }
            }
            Target::Head => {
                let hint = self.hint(node);
                match hint.kind {
                    HintKind::Style => {
                        if let Some(service) = self.resolve(site, Some(&hint)) {
                            let is_global = self.check_global_css(&service, &hint);
                            let host = self.patch_style_append(&service, node, is_global)?;
                            self.clone_css_to_other_hosts(&service, node, host, is_global)?;
                            return Ok(node);
                        }
                    }
                    HintKind::Link if self.is_style_link(node) => {
                        if let Some(service) = self.resolve(site, Some(&hint)) {
                            return self.patch_link_append(&service, node);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        self.raw_append(parent, node)
    }

    /// Patched `removeChild`. Nodes that were redirected on insert are
    /// removed from the host they landed in, and the service's cache entry
    /// for a removed style or link is purged.
    pub fn remove_child(&self, site: &CallSite, parent: NodeId, node: NodeId) -> SandboxResult<NodeId> {
        let removed = self.route_remove_child(site, parent, node)?;
        self.forget_node(removed);
        Ok(removed)
    }

    fn route_remove_child(&self, site: &CallSite, parent: NodeId, node: NodeId) -> SandboxResult<NodeId> {
        match self.target(parent) {
            Target::Body if !self.is_container(node) => {
                let hint = self.hint(node);
                if let Some(service) = self.resolve(site, Some(&hint)) {
                    let host = self.get_host(&service, true);
                    let in_host = self.doc().parent(node) == Some(host);
                    if in_host {
                        return self.raw_remove_child(host, node);
                    }
                    warn!(service = %service.service_name, %node, "node not found in service host, removing from body");
                }
            }
            Target::Head => {
                let hint = self.hint(node);
                let cache_key = match hint.kind {
                    HintKind::Style if !hint.text.is_empty() => Some(hint.text.clone()),
                    HintKind::Link if self.is_style_link(node) => hint.href.clone(),
                    _ => None,
                };
                if let Some(key) = cache_key {
                    if let Some(service) = self.resolve(site, Some(&hint)) {
                        if hint.kind == HintKind::Style {
                            self.styles.remove_style(&service.service_name, &key);
                        } else {
                            self.styles.remove_link(&service.service_name, &key);
                        }
                        let host = self.get_host(&service, false);
                        let in_host = self.doc().parent(node) == Some(host);
                        if in_host {
                            return self.raw_remove_child(host, node);
                        }
                    }
                }
            }
            _ => {}
        }
        self.raw_remove_child(parent, node)
    }

    /// Patched `Element.remove`. A style's cache entry and head copies go
    /// with it.
    pub fn remove(&self, site: &CallSite, node: NodeId) -> SandboxResult<()> {
        let is_style = self.doc().is_tag(node, "style");
        if self.is_patched() && is_style {
            let hint = self.hint(node);
            if let Some(service) = self.resolve(site, Some(&hint)) {
                self.styles.remove_style(&service.service_name, &hint.text);
            }
            if let Some((_, clones)) = self.head_clones.remove(&node) {
                for clone in clones {
                    self.raw_remove(clone)?;
                }
            }
        }
        self.raw_remove(node)?;
        self.forget_node(node);
        Ok(())
    }

    /// Patched `insertAdjacentElement`.
    ///
    /// A style placed `afterend` of a style inside a container's shadow root
    /// is rewritten for that root, cached under the container's service and
    /// propagated to its other hosts.
    pub fn insert_adjacent_element(
        &self,
        _site: &CallSite,
        target: NodeId,
        position: &str,
        element: NodeId,
    ) -> SandboxResult<Option<NodeId>> {
        let position: AdjacentPosition = position.parse()?;
        let inserted = self.doc().insert_adjacent_element(target, position, element)?;
        self.flush_reactions();
        if !self.is_patched() || position != AdjacentPosition::AfterEnd || inserted.is_none() {
            return Ok(inserted);
        }
        let container = {
            let doc = self.doc();
            let both_styles = doc.is_tag(target, "style") && doc.is_tag(element, "style");
            doc.parent(target)
                .filter(|_| both_styles)
                .filter(|&p| doc.is_shadow_root(p))
                .and_then(|root| doc.shadow_host(root).map(|host| (root, host)))
                .filter(|&(_, host)| doc.is_tag(host, &self.mc_tag))
                .map(|(root, host)| {
                    let id = doc.get_attribute(host, "id").unwrap_or_default().to_string();
                    let name = doc.get_attribute(host, "servicename").unwrap_or_default().to_string();
                    (root, id, name)
                })
        };
        let Some((root, container_id, service_name)) = container else {
            return Ok(inserted);
        };
        debug!(service = %service_name, container = %container_id, "adjacent style inserted in container");
        self.patch_node_css(root, element);
        let snapshot = CachedStyle::capture(&self.doc(), element);
        if !snapshot.text.is_empty() {
            self.styles.insert_style(&service_name, snapshot);
        }
        let service = ServiceRef::with_id(container_id, service_name);
        self.clone_css_to_other_hosts(&service, element, root, false)?;
        Ok(inserted)
    }

    /// Patched `document.querySelector`. Inner selectors are answered from
    /// the resolved service's host; `mc#host` yields the container itself.
    pub fn query_selector(&self, site: &CallSite, selector: &str) -> Option<NodeId> {
        if self.is_patched() && self.services.is_inner_selector(selector) {
            if let Some(service) = self.resolve(site, None) {
                let host = self.get_host(&service, false);
                let doc = self.doc();
                if selector == HOST_SELECTOR {
                    return Some(doc.shadow_host(host).unwrap_or(host));
                }
                if let Some(found) = doc.query_selector(host, selector) {
                    return Some(found);
                }
            }
        }
        let doc = self.doc();
        doc.query_selector(doc.root(), selector)
    }

    /// Patched `document.querySelectorAll`. An empty host result falls back
    /// to the whole document.
    pub fn query_selector_all(&self, site: &CallSite, selector: &str) -> Vec<NodeId> {
        if self.is_patched() && self.services.is_inner_selector(selector) {
            if let Some(service) = self.resolve(site, None) {
                let host = self.get_host(&service, false);
                let doc = self.doc();
                if selector == HOST_SELECTOR {
                    return vec![doc.shadow_host(host).unwrap_or(host)];
                }
                let found = doc.query_selector_all(host, selector);
                if !found.is_empty() {
                    return found;
                }
            }
        }
        let doc = self.doc();
        doc.query_selector_all(doc.root(), selector)
    }

    /// Whether `node` is a stylesheet link.
    pub(crate) fn is_style_link(&self, node: NodeId) -> bool {
        is_style_link(&self.doc(), node)
    }
}
