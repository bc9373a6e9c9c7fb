//! Per-service style and link snapshots.
//!
//! Every stylesheet a service inserts is remembered (style text, absolute link
//! URL) so it can be re-materialized into containers created later.

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::dom::{Document, NodeId};
use crate::error::DomResult;

/// Whether `node` is a `<link>` that loads a stylesheet (no `rel`, or
/// `rel=stylesheet`).
pub fn is_style_link(doc: &Document, node: NodeId) -> bool {
    doc.is_tag(node, "link")
        && doc
            .get_attribute(node, "rel")
            .is_none_or(|rel| rel.is_empty() || rel.eq_ignore_ascii_case("stylesheet"))
}

/// A direct stylesheet link child of `host` with the same absolute URL,
/// other than `except`.
pub fn find_link(doc: &Document, host: NodeId, href: &str, except: Option<NodeId>) -> Option<NodeId> {
    doc.children(host).iter().copied().find(|&c| {
        Some(c) != except && is_style_link(doc, c) && doc.href(c).as_deref() == Some(href)
    })
}

/// Snapshot of a `<style>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedStyle {
    pub text: String,
    pub style_type: Option<String>,
}

impl CachedStyle {
    pub fn capture(doc: &Document, node: NodeId) -> Self {
        Self {
            text: doc.text_content(node),
            style_type: doc.get_attribute(node, "type").map(str::to_string),
        }
    }

    /// Create a detached `<style>` with this snapshot's content.
    pub fn materialize(&self, doc: &mut Document) -> DomResult<NodeId> {
        let style = doc.create_element("style");
        doc.set_text_content(style, &self.text)?;
        if let Some(ref ty) = self.style_type {
            doc.set_attribute(style, "type", ty)?;
        }
        Ok(style)
    }
}

/// Snapshot of a stylesheet `<link>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedLink {
    pub href: String,
    pub rel: Option<String>,
    pub link_type: Option<String>,
}

impl CachedLink {
    /// `None` when the link has no `href`.
    pub fn capture(doc: &Document, node: NodeId) -> Option<Self> {
        Some(Self {
            href: doc.href(node)?,
            rel: doc
                .get_attribute(node, "rel")
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            link_type: doc.get_attribute(node, "type").map(str::to_string),
        })
    }

    /// Create a detached anonymous-CORS `<link>` pointing at the same URL.
    pub fn materialize(&self, doc: &mut Document) -> DomResult<NodeId> {
        let link = doc.create_element("link");
        doc.set_attribute(link, "crossorigin", "anonymous")?;
        doc.set_attribute(link, "href", &self.href)?;
        if let Some(ref ty) = self.link_type {
            doc.set_attribute(link, "type", ty)?;
        }
        if let Some(ref rel) = self.rel {
            doc.set_attribute(link, "rel", rel)?;
        }
        Ok(link)
    }
}

#[derive(Debug, Default)]
struct ServiceSheets {
    styles: IndexMap<String, CachedStyle>,
    links: IndexMap<String, CachedLink>,
}

/// Style text → snapshot and link URL → snapshot, per service, in insertion
/// order.
#[derive(Debug, Default)]
pub struct StyleCache {
    services: DashMap<String, ServiceSheets>,
}

impl StyleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_service(&self, service: &str) {
        self.services.entry(service.to_string()).or_default();
    }

    pub fn contains_style(&self, service: &str, text: &str) -> bool {
        self.services
            .get(service)
            .is_some_and(|s| s.styles.contains_key(text))
    }

    /// Cache a style. Returns `false` if that text was already cached.
    pub fn insert_style(&self, service: &str, style: CachedStyle) -> bool {
        let mut sheets = self.services.entry(service.to_string()).or_default();
        if sheets.styles.contains_key(&style.text) {
            return false;
        }
        sheets.styles.insert(style.text.clone(), style);
        true
    }

    pub fn remove_style(&self, service: &str, text: &str) -> bool {
        self.services
            .get_mut(service)
            .is_some_and(|mut s| s.styles.shift_remove(text).is_some())
    }

    pub fn contains_link(&self, service: &str, href: &str) -> bool {
        self.services
            .get(service)
            .is_some_and(|s| s.links.contains_key(href))
    }

    pub fn insert_link(&self, service: &str, link: CachedLink) -> bool {
        let mut sheets = self.services.entry(service.to_string()).or_default();
        if sheets.links.contains_key(&link.href) {
            return false;
        }
        sheets.links.insert(link.href.clone(), link);
        true
    }

    pub fn remove_link(&self, service: &str, href: &str) -> bool {
        self.services
            .get_mut(service)
            .is_some_and(|mut s| s.links.shift_remove(href).is_some())
    }

    pub fn styles(&self, service: &str) -> Vec<CachedStyle> {
        self.services
            .get(service)
            .map(|s| s.styles.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn links(&self, service: &str) -> Vec<CachedLink> {
        self.services
            .get(service)
            .map(|s| s.links.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.services.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style(text: &str) -> CachedStyle {
        CachedStyle {
            text: text.into(),
            style_type: None,
        }
    }

    #[test]
    fn styles_dedupe_by_text_in_insertion_order() {
        let cache = StyleCache::new();
        assert!(cache.insert_style("app1", style("b{}")));
        assert!(cache.insert_style("app1", style("a{}")));
        assert!(!cache.insert_style("app1", style("b{}")));
        let texts: Vec<_> = cache.styles("app1").into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["b{}", "a{}"]);
        assert!(!cache.contains_style("app2", "a{}"));
    }

    #[test]
    fn remove_purges_single_entry() {
        let cache = StyleCache::new();
        cache.insert_style("app1", style("a{}"));
        assert!(cache.remove_style("app1", "a{}"));
        assert!(!cache.remove_style("app1", "a{}"));
        assert!(cache.styles("app1").is_empty());
    }

    #[test]
    fn link_snapshot_is_anonymous_cors() {
        let mut doc = Document::with_base_url("https://host.test/");
        let link = doc.create_element("link");
        doc.set_attribute(link, "href", "/a.css").unwrap();
        doc.set_attribute(link, "rel", "stylesheet").unwrap();
        let snapshot = CachedLink::capture(&doc, link).unwrap();
        assert_eq!(snapshot.href, "https://host.test/a.css");
        let clone = snapshot.materialize(&mut doc).unwrap();
        assert_eq!(doc.get_attribute(clone, "crossorigin"), Some("anonymous"));
        assert_eq!(doc.href(clone).as_deref(), Some("https://host.test/a.css"));
    }

    #[test]
    fn style_links_are_recognized() {
        let mut doc = Document::new();
        let plain = doc.create_element("link");
        let icon = doc.create_element("link");
        doc.set_attribute(icon, "rel", "icon").unwrap();
        assert!(is_style_link(&doc, plain));
        assert!(!is_style_link(&doc, icon));
    }

    #[test]
    fn find_link_skips_the_node_itself() {
        let mut doc = Document::with_base_url("https://host.test/");
        let head = doc.head();
        let link = doc.create_element("link");
        doc.set_attribute(link, "href", "a.css").unwrap();
        doc.append_child(head, link).unwrap();
        let href = "https://host.test/a.css";
        assert_eq!(find_link(&doc, head, href, None), Some(link));
        assert_eq!(find_link(&doc, head, href, Some(link)), None);
    }
}
