//! Service registry: per-service options and the process-wide inner-selector
//! list.
//!
//! Registration is idempotent. Re-registering a service merges: scalar options
//! given later win, inner selectors are set-unioned.

use std::fmt;
use std::sync::{Arc, RwLock};

use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;

use crate::dom::{Document, NodeId};

/// Selector answered with the service's host element.
pub const HOST_SELECTOR: &str = "mc#host";

/// Predicate deciding whether a mutation belongs to a service.
pub type ServicePredicate = Arc<dyn Fn(&MutationHint) -> bool + Send + Sync>;

/// Predicate deciding whether a head style should also be cloned into the
/// document head. Receives the resolved host.
pub type GlobalCheck = Arc<dyn Fn(NodeId, &MutationHint) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintKind {
    Style,
    Link,
    Element,
}

/// Snapshot of a node handed to attribution predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationHint {
    pub kind: HintKind,
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub href: Option<String>,
}

impl MutationHint {
    pub fn capture(doc: &Document, node: NodeId) -> Self {
        let tag = doc.tag_name(node).unwrap_or_default().to_string();
        let kind = match tag.as_str() {
            "style" => HintKind::Style,
            "link" => HintKind::Link,
            _ => HintKind::Element,
        };
        Self {
            kind,
            href: (kind == HintKind::Link).then(|| doc.href(node)).flatten(),
            attributes: doc.attributes(node).to_vec(),
            text: doc.text_content(node),
            tag,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Options passed to `add_service`. `None` leaves the current value.
#[derive(Clone, Default, Deserialize)]
pub struct ServiceOptions {
    /// Only read from configuration files.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub need_shadow_dom: Option<bool>,
    #[serde(default)]
    pub need_stack_analysis: Option<bool>,
    #[serde(default)]
    pub use_global_div_sandbox: Option<bool>,
    #[serde(default)]
    pub inner_selectors: Vec<String>,
    #[serde(skip)]
    pub check_service: Option<ServicePredicate>,
    #[serde(skip)]
    pub global_check: Option<GlobalCheck>,
}

impl fmt::Debug for ServiceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceOptions")
            .field("name", &self.name)
            .field("need_shadow_dom", &self.need_shadow_dom)
            .field("need_stack_analysis", &self.need_stack_analysis)
            .field("use_global_div_sandbox", &self.use_global_div_sandbox)
            .field("inner_selectors", &self.inner_selectors)
            .field("check_service", &self.check_service.is_some())
            .field("global_check", &self.global_check.is_some())
            .finish()
    }
}

impl ServiceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shadow_dom(mut self, enabled: bool) -> Self {
        self.need_shadow_dom = Some(enabled);
        self
    }

    pub fn stack_analysis(mut self, enabled: bool) -> Self {
        self.need_stack_analysis = Some(enabled);
        self
    }

    pub fn global_div_sandbox(mut self, enabled: bool) -> Self {
        self.use_global_div_sandbox = Some(enabled);
        self
    }

    pub fn inner_selector(mut self, selector: impl Into<String>) -> Self {
        self.inner_selectors.push(selector.into());
        self
    }

    pub fn check_service(mut self, f: impl Fn(&MutationHint) -> bool + Send + Sync + 'static) -> Self {
        self.check_service = Some(Arc::new(f));
        self
    }

    pub fn global_check(
        mut self,
        f: impl Fn(NodeId, &MutationHint) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.global_check = Some(Arc::new(f));
        self
    }
}

/// Effective configuration of a registered service.
#[derive(Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub need_shadow_dom: bool,
    pub need_stack_analysis: bool,
    pub use_global_div_sandbox: bool,
    pub inner_selectors: IndexSet<String>,
    pub check_service: Option<ServicePredicate>,
    pub global_check: Option<GlobalCheck>,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("name", &self.name)
            .field("need_shadow_dom", &self.need_shadow_dom)
            .field("need_stack_analysis", &self.need_stack_analysis)
            .field("use_global_div_sandbox", &self.use_global_div_sandbox)
            .field("inner_selectors", &self.inner_selectors)
            .finish_non_exhaustive()
    }
}

impl ServiceConfig {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            need_shadow_dom: true,
            need_stack_analysis: true,
            use_global_div_sandbox: false,
            inner_selectors: IndexSet::new(),
            check_service: None,
            global_check: None,
        }
    }

    fn merge(&mut self, options: ServiceOptions) {
        if let Some(v) = options.need_shadow_dom {
            self.need_shadow_dom = v;
        }
        if let Some(v) = options.need_stack_analysis {
            self.need_stack_analysis = v;
        }
        if let Some(v) = options.use_global_div_sandbox {
            self.use_global_div_sandbox = v;
        }
        if options.check_service.is_some() {
            self.check_service = options.check_service;
        }
        if options.global_check.is_some() {
            self.global_check = options.global_check;
        }
        self.inner_selectors.extend(options.inner_selectors);
    }
}

/// Registered services in registration order.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<IndexMap<String, ServiceConfig>>,
    inner_selectors: RwLock<IndexSet<String>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or merge a service. Returns `true` when it was new.
    pub fn add(&self, name: &str, options: ServiceOptions) -> bool {
        self.inner_selectors
            .write()
            .expect("inner selector lock poisoned")
            .extend(options.inner_selectors.iter().cloned());
        let mut services = self.services.write().expect("service registry lock poisoned");
        let is_new = !services.contains_key(name);
        services
            .entry(name.to_string())
            .or_insert_with(|| ServiceConfig::new(name))
            .merge(options);
        is_new
    }

    pub fn get(&self, name: &str) -> Option<ServiceConfig> {
        self.services
            .read()
            .expect("service registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services
            .read()
            .expect("service registry lock poisoned")
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.services
            .read()
            .expect("service registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// All services, registration order.
    pub fn all(&self) -> Vec<ServiceConfig> {
        self.services
            .read()
            .expect("service registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Whether a document query should first be answered inside a service
    /// host.
    pub fn is_inner_selector(&self, selector: &str) -> bool {
        selector.starts_with('#')
            || selector.starts_with('.')
            || selector == HOST_SELECTOR
            || self
                .inner_selectors
                .read()
                .expect("inner selector lock poisoned")
                .contains(selector)
    }

    pub fn clear(&self) {
        self.services.write().expect("service registry lock poisoned").clear();
        self.inner_selectors
            .write()
            .expect("inner selector lock poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_on_first_registration() {
        let registry = ServiceRegistry::new();
        assert!(registry.add("app1", ServiceOptions::new()));
        let config = registry.get("app1").unwrap();
        assert!(config.need_shadow_dom);
        assert!(config.need_stack_analysis);
        assert!(!config.use_global_div_sandbox);
    }

    #[test]
    fn later_scalars_win_and_selectors_union() {
        let registry = ServiceRegistry::new();
        registry.add("app1", ServiceOptions::new().shadow_dom(false).inner_selector("[a]"));
        let again = registry.add(
            "app1",
            ServiceOptions::new().stack_analysis(false).inner_selector("[a]").inner_selector("[b]"),
        );
        assert!(!again);
        let config = registry.get("app1").unwrap();
        assert!(!config.need_shadow_dom);
        assert!(!config.need_stack_analysis);
        assert_eq!(config.inner_selectors.len(), 2);
        assert!(registry.is_inner_selector("[b]"));
    }

    #[test]
    fn registration_order_is_kept() {
        let registry = ServiceRegistry::new();
        registry.add("b", ServiceOptions::new());
        registry.add("a", ServiceOptions::new());
        registry.add("b", ServiceOptions::new());
        assert_eq!(registry.names(), vec!["b", "a"]);
    }

    #[test]
    fn id_class_and_host_selectors_are_inner() {
        let registry = ServiceRegistry::new();
        assert!(registry.is_inner_selector("#root"));
        assert!(registry.is_inner_selector(".panel"));
        assert!(registry.is_inner_selector(HOST_SELECTOR));
        assert!(!registry.is_inner_selector("div"));
    }

    #[test]
    fn hint_captures_link_href() {
        let mut doc = Document::with_base_url("https://host.test/");
        let link = doc.create_element("link");
        doc.set_attribute(link, "href", "a.css").unwrap();
        doc.set_attribute(link, "rel", "stylesheet").unwrap();
        let hint = MutationHint::capture(&doc, link);
        assert_eq!(hint.kind, HintKind::Link);
        assert_eq!(hint.href.as_deref(), Some("https://host.test/a.css"));
        assert_eq!(hint.attribute("REL"), Some("stylesheet"));
    }
}
