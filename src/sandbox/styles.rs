//! Style and link materialization: caching, host insertion, propagation to
//! sibling containers and rehydration of new ones.

use std::time::Instant;

use tracing::{debug, warn};

use super::{EMPTY_STYLE_TIMEOUT, LinkWatch, PendingStyle, Sandbox};
use crate::css::find_style;
use crate::dom::NodeId;
use crate::error::SandboxResult;
use crate::materialize::{CachedLink, CachedStyle, find_link};
use crate::module;
use crate::resolver::ServiceRef;
use crate::zone::CallSite;

impl Sandbox {
    // -----------------------------------------------------------------------
    // Styles
    // -----------------------------------------------------------------------

    /// Move a service's head `<style>` into its host. Returns the host.
    ///
    /// An empty style is observed until content arrives (or the timeout
    /// passes). A style whose text is already cached replaces the existing
    /// copy in the host.
    pub(super) fn patch_style_append(
        &self,
        service: &ServiceRef,
        node: NodeId,
        include_head: bool,
    ) -> SandboxResult<NodeId> {
        let name = &service.service_name;
        let host = self.get_host(service, false);
        self.styles.ensure_service(name);

        let text = self.doc().text_content(node);
        if text.is_empty() {
            self.doc().observe(node);
            self.pending_styles
                .lock()
                .expect("pending styles lock poisoned")
                .push(PendingStyle {
                    node,
                    host,
                    service: service.clone(),
                    include_head,
                    deadline: Instant::now() + EMPTY_STYLE_TIMEOUT,
                    observing: true,
                });
            debug!(service = %name, %node, "empty style observed");
        } else if self.styles.contains_style(name, &text) {
            let existing = find_style(&self.doc(), host, &text);
            if let Some(existing) = existing {
                debug!(service = %name, %existing, "replacing duplicate style in host");
                self.raw_remove(existing)?;
            }
        } else {
            let snapshot = CachedStyle::capture(&self.doc(), node);
            self.styles.insert_style(name, snapshot);
        }

        self.raw_append(host, node)?;
        self.patch_node_css(host, node);
        Ok(host)
    }

    /// Copy a style (or stylesheet link) into every other host of the
    /// service that lacks it, and into the head when `include_head` and the
    /// style did not already land there.
    pub(super) fn clone_css_to_other_hosts(
        &self,
        service: &ServiceRef,
        node: NodeId,
        origin: NodeId,
        include_head: bool,
    ) -> SandboxResult<()> {
        let is_link = self.doc().is_tag(node, "link");
        if is_link {
            return self.clone_link_to_other_hosts(service, node, origin);
        }
        let snapshot = CachedStyle::capture(&self.doc(), node);
        if snapshot.text.is_empty() {
            return Ok(());
        }
        for host in self.sibling_hosts(service, origin) {
            let present = find_style(&self.doc(), host, &snapshot.text).is_some();
            if present {
                continue;
            }
            let clone = snapshot.materialize(&mut self.doc())?;
            self.raw_append(host, clone)?;
            self.patch_node_css(host, clone);
        }
        let head = self.doc().head();
        if include_head && origin != head {
            let clone = snapshot.materialize(&mut self.doc())?;
            self.raw_append(head, clone)?;
            self.head_clones.entry(node).or_default().push(clone);
            debug!(service = %service.service_name, %node, %clone, "global style copied to head");
        }
        Ok(())
    }

    fn clone_link_to_other_hosts(&self, service: &ServiceRef, node: NodeId, origin: NodeId) -> SandboxResult<()> {
        let Some(snapshot) = CachedLink::capture(&self.doc(), node) else {
            return Ok(());
        };
        for host in self.sibling_hosts(service, origin) {
            let present = find_link(&self.doc(), host, &snapshot.href, None).is_some();
            if present {
                continue;
            }
            let clone = snapshot.materialize(&mut self.doc())?;
            self.link_watches.insert(clone, LinkWatch::Clone { host });
            self.raw_append(host, clone)?;
        }
        Ok(())
    }

    /// Hosts of the service other than `origin`. Global containers count
    /// only for services that use one.
    fn sibling_hosts(&self, service: &ServiceRef, origin: NodeId) -> Vec<NodeId> {
        let use_global = self
            .services
            .get(&service.service_name)
            .is_some_and(|c| c.use_global_div_sandbox);
        self.modules
            .for_service(&service.service_name)
            .into_iter()
            .filter(|r| r.host != origin)
            .filter(|r| use_global || !module::is_global_container(&r.container_id))
            .map(|r| r.host)
            .collect()
    }

    /// First content of an observed empty style.
    pub(super) fn on_style_mutation(&self, node: NodeId) -> SandboxResult<()> {
        let pending = {
            let mut pending = self.pending_styles.lock().expect("pending styles lock poisoned");
            let Some(entry) = pending.iter_mut().find(|p| p.node == node && p.observing) else {
                return Ok(());
            };
            entry.observing = false;
            entry.clone()
        };
        let text = {
            let mut doc = self.doc();
            doc.unobserve(node);
            doc.text_content(node)
        };
        if text.is_empty() {
            return Ok(());
        }
        let name = &pending.service.service_name;
        if self.styles.contains_style(name, &text) {
            debug!(service = %name, %node, "late style content already cached, dropping node");
            return self.remove_from_host(pending.host, node);
        }
        self.patch_node_css(pending.host, node);
        let snapshot = CachedStyle::capture(&self.doc(), node);
        self.styles.insert_style(name, snapshot);
        self.clone_css_to_other_hosts(&pending.service, node, pending.host, pending.include_head)
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Move a service's head stylesheet link into its host.
    pub(super) fn patch_link_append(&self, service: &ServiceRef, node: NodeId) -> SandboxResult<NodeId> {
        let host = self.get_host(service, false);
        self.doc().set_attribute(node, "crossorigin", "anonymous")?;
        self.styles.ensure_service(&service.service_name);
        self.add_new_link(service, host, node, true)
    }

    /// Insert a link into `host`; it is cached and propagated once loaded.
    fn add_new_link(
        &self,
        service: &ServiceRef,
        host: NodeId,
        link: NodeId,
        check_exist: bool,
    ) -> SandboxResult<NodeId> {
        self.link_watches.insert(
            link,
            LinkWatch::Primary {
                service: service.clone(),
                host,
                check_exist,
            },
        );
        self.raw_append(host, link)
    }

    pub(super) fn on_link_load(&self, link: NodeId) -> SandboxResult<()> {
        let Some((_, watch)) = self.link_watches.remove(&link) else {
            return Ok(());
        };
        match watch {
            LinkWatch::Clone { host } => self.patch_node_css(host, link),
            LinkWatch::Rewrite { boundary } => self.patch_node_css(boundary, link),
            LinkWatch::Primary {
                service,
                host,
                check_exist,
            } => {
                let name = &service.service_name;
                let snapshot = CachedLink::capture(&self.doc(), link);
                let Some(snapshot) = snapshot else {
                    warn!(service = %name, %link, "stylesheet link without href, not cached");
                    return Ok(());
                };
                if !self.styles.contains_link(name, &snapshot.href) {
                    self.styles.insert_link(name, snapshot);
                } else if check_exist {
                    let duplicate = find_link(&self.doc(), host, &snapshot.href, Some(link)).is_some();
                    if duplicate {
                        warn!(service = %name, href = %snapshot.href, "stylesheet already loaded in host, dropping duplicate link");
                        return self.raw_remove(link);
                    }
                }
                self.patch_node_css(host, link);
                self.clone_link_to_other_hosts(&service, link, host)?;
            }
        }
        Ok(())
    }

    /// Insert the loader's `css` URLs as stylesheet links under `node` (the
    /// head when `None`). Each sheet is rewritten for `node` once loaded.
    pub fn load_css(&self, urls: &[String], node: Option<NodeId>) -> SandboxResult<Vec<NodeId>> {
        let target = node.unwrap_or_else(|| self.doc().head());
        let mut links = Vec::with_capacity(urls.len());
        for url in urls.iter().filter(|u| !u.is_empty()) {
            let link = {
                let mut doc = self.doc();
                let link = doc.create_element("link");
                doc.set_attribute(link, "href", url)?;
                doc.set_attribute(link, "rel", "stylesheet")?;
                doc.set_attribute(link, "crossorigin", "anonymous")?;
                link
            };
            self.link_watches.insert(link, LinkWatch::Rewrite { boundary: target });
            self.raw_append(target, link)?;
            links.push(link);
        }
        Ok(links)
    }

    // -----------------------------------------------------------------------
    // Rehydration
    // -----------------------------------------------------------------------

    /// Materialize everything cached for `service_name` into a new host.
    pub fn append_exist_styles_and_links(&self, service_name: &str, host: NodeId) -> SandboxResult<()> {
        let service = ServiceRef::named(service_name);
        for snapshot in self.styles.styles(service_name) {
            let present = find_style(&self.doc(), host, &snapshot.text).is_some();
            if present {
                continue;
            }
            let style = snapshot.materialize(&mut self.doc())?;
            self.raw_append(host, style)?;
            self.patch_node_css(host, style);
        }
        for snapshot in self.styles.links(service_name) {
            let present = find_link(&self.doc(), host, &snapshot.href, None).is_some();
            if present {
                continue;
            }
            let link = snapshot.materialize(&mut self.doc())?;
            self.add_new_link(&service, host, link, false)?;
        }
        Ok(())
    }

    /// Add the per-load `extra_css` to `host` through the patched append.
    pub fn add_extra_css(&self, host: NodeId, css: Option<&str>) -> SandboxResult<Option<NodeId>> {
        let Some(css) = css.filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        let style = {
            let mut doc = self.doc();
            let style = doc.create_element("style");
            doc.set_text_content(style, css)?;
            style
        };
        self.append_child(&CallSite::root(), host, style)?;
        self.patch_node_css(host, style);
        Ok(Some(style))
    }
}
