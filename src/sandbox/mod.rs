//! The sandbox: registries, interception entry points and the load pipeline.
//!
//! A [`Sandbox`] owns the service, module, zone and style registries and
//! exposes the *patched* versions of the document operations services use.
//! Hosts route `appendChild`/`removeChild`/… through these methods; every
//! write the sandbox itself performs goes straight to the raw [`Document`]
//! primitives.
//!
//! Deferred browser work (mutation records, link `load` events) is delivered
//! by [`Sandbox::pump`]; custom-element reactions are flushed synchronously
//! after every write.

mod element;
mod intercept;
mod load;
mod styles;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, SandboxConfig};
use crate::css::{self, StyleSheet};
use crate::dom::{
    ComputedStyle, CustomElementDefinition, Document, DomEvent, EventListener, NodeId, Reaction,
    SharedDocument,
};
use crate::error::SandboxResult;
use crate::globals::{GlobalScope, SandboxProp};
use crate::loader::RemoteLoader;
use crate::materialize::StyleCache;
use crate::module::{self, ModuleRegistry};
use crate::resolver::{AttributionResolver, ServiceRef};
use crate::service::{MutationHint, ServiceConfig, ServiceOptions, ServiceRegistry};
use crate::zone::{CallSite, Zone, ZoneManager};

pub use load::{GenWcHook, LifeHook, LifeParams, Lifecycle, LoadOptions, LoadOutcome, LoadedModule, WcParam};

/// How long an empty `<style>` may wait for content before it is dropped.
pub const EMPTY_STYLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Prototype level an interception hook is installed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookLevel {
    Node,
    Element,
    Head,
    Body,
}

impl HookLevel {
    pub const ALL: [HookLevel; 4] = [HookLevel::Head, HookLevel::Body, HookLevel::Element, HookLevel::Node];
}

/// An empty head style waiting for its content.
#[derive(Debug, Clone)]
struct PendingStyle {
    node: NodeId,
    host: NodeId,
    service: ServiceRef,
    include_head: bool,
    deadline: Instant,
    observing: bool,
}

/// What to do when a link finishes loading.
#[derive(Debug, Clone)]
enum LinkWatch {
    /// A service's own link: cache, rewrite and propagate.
    Primary {
        service: ServiceRef,
        host: NodeId,
        check_exist: bool,
    },
    /// A propagated copy: rewrite for its host only.
    Clone { host: NodeId },
    /// A loader `css` link: rewrite for its boundary.
    Rewrite { boundary: NodeId },
}

impl LinkWatch {
    /// The host or boundary the link was inserted for.
    fn host(&self) -> NodeId {
        match self {
            Self::Primary { host, .. } | Self::Clone { host } => *host,
            Self::Rewrite { boundary } => *boundary,
        }
    }
}

/// The attribution-and-interception engine.
pub struct Sandbox {
    config: SandboxConfig,
    document: SharedDocument,
    services: ServiceRegistry,
    modules: ModuleRegistry,
    zones: ZoneManager,
    styles: StyleCache,
    resolver: AttributionResolver,
    globals: GlobalScope,
    loader: Arc<dyn RemoteLoader>,
    patched: AtomicBool,
    levels: RwLock<Vec<HookLevel>>,
    mc_tag: String,
    pending_styles: Mutex<Vec<PendingStyle>>,
    link_watches: DashMap<NodeId, LinkWatch>,
    head_clones: DashMap<NodeId, Vec<NodeId>>,
    element_zones: Arc<DashMap<NodeId, Arc<Zone>>>,
    element_hosts: DashMap<NodeId, NodeId>,
    container_props: DashMap<NodeId, Vec<SandboxProp>>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("config", &self.config)
            .field("patched", &self.is_patched())
            .field("modules", &self.modules.len())
            .field("zones", &self.zones.len())
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Crate version written to every container's `v` attribute.
    pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    /// Create the sandbox, register the container element and install the
    /// interception layer when `need_patched` is set.
    pub fn new(
        config: SandboxConfig,
        document: SharedDocument,
        loader: Arc<dyn RemoteLoader>,
    ) -> SandboxResult<Self> {
        let mc_tag = config.module_cube_tag_name.to_ascii_lowercase();
        let sandbox = Self {
            resolver: AttributionResolver::new(config.need_stack_analysis, config.max_stack),
            config,
            document,
            services: ServiceRegistry::new(),
            modules: ModuleRegistry::new(),
            zones: ZoneManager::new(),
            styles: StyleCache::new(),
            globals: GlobalScope::new(),
            loader,
            patched: AtomicBool::new(false),
            levels: RwLock::new(Vec::new()),
            mc_tag,
            pending_styles: Mutex::new(Vec::new()),
            link_watches: DashMap::new(),
            head_clones: DashMap::new(),
            element_zones: Arc::new(DashMap::new()),
            element_hosts: DashMap::new(),
            container_props: DashMap::new(),
        };
        sandbox.register_container_element()?;
        if sandbox.config.need_patched {
            sandbox.patch();
        }
        info!(
            tag = %sandbox.mc_tag,
            patched = sandbox.is_patched(),
            stack_analysis = sandbox.config.need_stack_analysis,
            "sandbox initialised"
        );
        Ok(sandbox)
    }

    /// Create the sandbox from a configuration file and register its
    /// services.
    pub fn from_config(
        file: ConfigFile,
        document: SharedDocument,
        loader: Arc<dyn RemoteLoader>,
    ) -> SandboxResult<Self> {
        let sandbox = Self::new(file.sandbox, document, loader)?;
        for options in file.services {
            match options.name.clone() {
                Some(name) => sandbox.add_service(&name, options),
                None => warn!("service entry without a name in configuration, skipped"),
            }
        }
        Ok(sandbox)
    }

    /// Remove the interception layer and forget all registered state.
    pub fn teardown(&self) {
        if self.is_patched() {
            self.unpatch();
        }
        self.services.clear();
        self.modules.clear_all();
        self.styles.clear();
        let pending: Vec<PendingStyle> = self
            .pending_styles
            .lock()
            .expect("pending styles lock poisoned")
            .drain(..)
            .collect();
        {
            let mut doc = self.doc();
            for p in &pending {
                doc.unobserve(p.node);
            }
        }
        self.link_watches.clear();
        self.head_clones.clear();
        self.element_zones.clear();
        self.element_hosts.clear();
        self.container_props.clear();
        info!("sandbox torn down");
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn zones(&self) -> &ZoneManager {
        &self.zones
    }

    pub fn styles(&self) -> &StyleCache {
        &self.styles
    }

    pub fn globals(&self) -> &GlobalScope {
        &self.globals
    }

    pub fn resolver(&self) -> &AttributionResolver {
        &self.resolver
    }

    /// Tag name of the container element.
    pub fn container_tag(&self) -> &str {
        &self.mc_tag
    }

    /// The host a generated component was appended to (`wc.mcHost`).
    pub fn component_host(&self, wc: NodeId) -> Option<NodeId> {
        self.element_hosts.get(&wc).map(|h| *h)
    }

    /// The zone a generated component runs its callbacks in (`wc.zone`).
    pub fn component_zone(&self, wc: NodeId) -> Option<Arc<Zone>> {
        self.element_zones.get(&wc).map(|z| z.clone())
    }

    pub(crate) fn doc(&self) -> MutexGuard<'_, Document> {
        self.document.lock().expect("document lock poisoned")
    }

    // -----------------------------------------------------------------------
    // Patch state
    // -----------------------------------------------------------------------

    pub fn is_patched(&self) -> bool {
        self.patched.load(Ordering::SeqCst)
    }

    /// Install the interception layer at every level.
    pub fn patch(&self) {
        self.patch_levels(&HookLevel::ALL);
    }

    /// Install the interception layer at the given levels only.
    pub fn patch_levels(&self, levels: &[HookLevel]) {
        if !self.config.need_patched {
            warn!("need_patched is false, nothing to patch");
            return;
        }
        if self.patched.swap(true, Ordering::SeqCst) {
            warn!("sandbox already patched");
            return;
        }
        *self.levels.write().expect("hook levels lock poisoned") = levels.to_vec();
        debug!(?levels, "interception installed");
    }

    pub fn unpatch(&self) {
        if !self.config.need_patched {
            warn!("need_patched is false, nothing to unpatch");
            return;
        }
        self.levels.write().expect("hook levels lock poisoned").clear();
        self.patched.store(false, Ordering::SeqCst);
        debug!("interception removed");
    }

    pub fn hook_levels(&self) -> Vec<HookLevel> {
        self.levels.read().expect("hook levels lock poisoned").clone()
    }

    /// Whether calls on the body (or head) are intercepted: either the
    /// specific level or a generic element/node level is installed.
    fn intercepts(&self, level: HookLevel) -> bool {
        self.is_patched()
            && self
                .levels
                .read()
                .expect("hook levels lock poisoned")
                .iter()
                .any(|l| *l == level || matches!(l, HookLevel::Element | HookLevel::Node))
    }

    // -----------------------------------------------------------------------
    // Registries
    // -----------------------------------------------------------------------

    /// Register a service (or merge options into an existing one).
    pub fn add_service(&self, name: &str, options: ServiceOptions) {
        let is_new = self.services.add(name, options);
        self.styles.ensure_service(name);
        debug!(service = %name, is_new, "service registered");
    }

    pub fn service(&self, name: &str) -> Option<ServiceConfig> {
        self.services.get(name)
    }

    /// Where a service's nodes go.
    ///
    /// Priority: the service's global container (when `check_global` and the
    /// service uses one), the exact container, the first non-global container
    /// of the service, the document head.
    pub fn get_host(&self, service: &ServiceRef, check_global: bool) -> NodeId {
        if check_global
            && self
                .services
                .get(&service.service_name)
                .is_some_and(|c| c.use_global_div_sandbox)
        {
            let global_id = module::global_container_id(&service.service_name);
            if let Some(record) = self.modules.get(&global_id) {
                return record.host;
            }
        }
        if let Some(record) = service.service_id.as_deref().and_then(|id| self.modules.get(id)) {
            return record.host;
        }
        let fallback = self
            .modules
            .for_service(&service.service_name)
            .into_iter()
            .find(|r| !module::is_global_container(&r.container_id));
        match fallback {
            Some(record) => record.host,
            None => self.doc().head(),
        }
    }

    /// Register a container (what the container element does on connect).
    pub fn add_module(&self, container_id: &str, service_name: &str, host: NodeId) {
        self.modules.add(container_id, service_name, host);
        debug!(id = %container_id, service = %service_name, "container registered");
    }

    /// Forget a container. With `boundary`, only if it was registered with
    /// that host.
    pub fn clear_module_by_node_id(&self, container_id: &str, boundary: Option<NodeId>) -> bool {
        self.modules.clear(container_id, boundary)
    }

    pub fn clear_zone_by_node_id(&self, container_id: &str) -> bool {
        self.zones.clear(container_id)
    }

    // -----------------------------------------------------------------------
    // Attribution helpers
    // -----------------------------------------------------------------------

    fn hint(&self, node: NodeId) -> MutationHint {
        MutationHint::capture(&self.doc(), node)
    }

    fn resolve(&self, site: &CallSite, hint: Option<&MutationHint>) -> Option<ServiceRef> {
        self.resolver.resolve(&self.services, site, hint)
    }

    fn check_global_css(&self, service: &ServiceRef, hint: &MutationHint) -> bool {
        let Some(check) = self
            .services
            .get(&service.service_name)
            .and_then(|c| c.global_check)
        else {
            return false;
        };
        let host = self.get_host(service, false);
        check(host, hint)
    }

    // -----------------------------------------------------------------------
    // Globals
    // -----------------------------------------------------------------------

    /// Virtualize globals (`isolateWindowJS`).
    pub fn isolate_window_js(&self, props: &[SandboxProp]) -> usize {
        self.globals.isolate(props)
    }

    pub fn get_global(&self, site: &CallSite, prop: &str) -> Option<Value> {
        self.globals.get(site, prop)
    }

    pub fn set_global(&self, site: &CallSite, prop: &str, value: Value) -> bool {
        self.globals.set(site, prop, value)
    }

    pub fn delete_global(&self, prop: &str) -> bool {
        self.globals.delete(prop)
    }

    // -----------------------------------------------------------------------
    // Raw writes
    // -----------------------------------------------------------------------

    fn raw_append(&self, parent: NodeId, node: NodeId) -> SandboxResult<NodeId> {
        let appended = self.doc().append_child(parent, node)?;
        self.flush_reactions();
        Ok(appended)
    }

    fn raw_remove_child(&self, parent: NodeId, node: NodeId) -> SandboxResult<NodeId> {
        let removed = self.doc().remove_child(parent, node)?;
        self.flush_reactions();
        Ok(removed)
    }

    fn raw_remove(&self, node: NodeId) -> SandboxResult<()> {
        self.doc().remove(node)?;
        self.flush_reactions();
        Ok(())
    }

    /// Rewrite `node`'s sheet for `boundary` (no-op for non-shadow
    /// boundaries).
    fn patch_node_css(&self, boundary: NodeId, node: NodeId) {
        let mut doc = self.doc();
        if let Some(sheet) = doc.sheet(node) {
            css::patch_css(&mut doc, boundary, &sheet);
        }
    }

    /// Apply the shadow rewriter to a sheet directly.
    pub fn patch_css(&self, boundary: NodeId, sheet: &StyleSheet) -> usize {
        css::patch_css(&mut self.doc(), boundary, sheet)
    }

    // -----------------------------------------------------------------------
    // Deferred work
    // -----------------------------------------------------------------------

    /// Run custom-element reactions queued by document writes.
    pub fn flush_reactions(&self) {
        loop {
            let reactions = self.doc().take_reactions();
            if reactions.is_empty() {
                return;
            }
            for reaction in reactions {
                self.run_reaction(reaction);
            }
        }
    }

    /// Deliver queued mutation records and link events. Returns how many
    /// were handled.
    pub fn pump(&self) -> usize {
        let mut handled = 0;
        loop {
            let (records, events) = {
                let mut doc = self.doc();
                (doc.take_records(), doc.take_events())
            };
            if records.is_empty() && events.is_empty() {
                return handled;
            }
            handled += records.len() + events.len();
            for record in records {
                if let Err(e) = self.on_style_mutation(record.target) {
                    warn!(node = %record.target, error = %e, "style content handling failed");
                }
            }
            for event in events {
                let result = match event {
                    DomEvent::Load(link) => self.on_link_load(link),
                    DomEvent::Error(link) => {
                        self.link_watches.remove(&link);
                        warn!(node = %link, "stylesheet link failed to load");
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    warn!(error = %e, "link load handling failed");
                }
            }
            self.flush_reactions();
        }
    }

    /// Drop head styles that stayed empty past their window. Returns how many
    /// nodes were removed.
    pub fn expire_pending_styles(&self, now: Instant) -> usize {
        let expired: Vec<PendingStyle> = {
            let mut pending = self.pending_styles.lock().expect("pending styles lock poisoned");
            let (expired, keep): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|p| p.deadline <= now);
            *pending = keep;
            expired
        };
        let mut removed = 0;
        for p in expired {
            let empty = {
                let mut doc = self.doc();
                doc.unobserve(p.node);
                doc.text_content(p.node).is_empty()
            };
            if !empty {
                continue;
            }
            warn!(node = %p.node, service = %p.service.service_name, "style still empty after timeout, removing it");
            if self.remove_from_host(p.host, p.node).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Drop deferred work tracked for a node that left the tree.
    fn forget_node(&self, node: NodeId) {
        self.link_watches.remove(&node);
        let was_pending = {
            let mut pending = self.pending_styles.lock().expect("pending styles lock poisoned");
            let before = pending.len();
            pending.retain(|p| p.node != node);
            pending.len() != before
        };
        if was_pending {
            self.doc().unobserve(node);
        }
    }

    /// Drop deferred work and element bookkeeping tied to a container host.
    fn forget_host(&self, host: NodeId) {
        self.link_watches.retain(|_, watch| watch.host() != host);
        let dropped: Vec<NodeId> = {
            let mut pending = self.pending_styles.lock().expect("pending styles lock poisoned");
            let (dropped, keep): (Vec<_>, Vec<_>) = pending.drain(..).partition(|p| p.host == host);
            *pending = keep;
            dropped.into_iter().map(|p| p.node).collect()
        };
        if !dropped.is_empty() {
            let mut doc = self.doc();
            for node in dropped {
                doc.unobserve(node);
            }
        }
        let components: Vec<NodeId> = self
            .element_hosts
            .iter()
            .filter(|entry| *entry.value() == host)
            .map(|entry| *entry.key())
            .collect();
        for wc in components {
            self.element_hosts.remove(&wc);
            self.element_zones.remove(&wc);
        }
    }

    /// Remove `node` from `host`, or from wherever it is.
    fn remove_from_host(&self, host: NodeId, node: NodeId) -> SandboxResult<()> {
        let in_host = self.doc().parent(node) == Some(host);
        if in_host {
            self.raw_remove_child(host, node).map(|_| ())
        } else {
            self.raw_remove(node)
        }
    }

    // -----------------------------------------------------------------------
    // Misc patched entry points
    // -----------------------------------------------------------------------

    /// Patched `getComputedStyle`: shadow roots yield an empty style.
    pub fn computed_style(&self, node: NodeId) -> SandboxResult<ComputedStyle> {
        let doc = self.doc();
        if self.is_patched() && doc.is_shadow_root(node) {
            return Ok(ComputedStyle::default());
        }
        Ok(doc.computed_style(node)?)
    }

    /// Fire `event` on `node`, invoking listeners outside the document lock.
    pub fn dispatch_event(&self, node: NodeId, event: &str, detail: &Value) -> usize {
        let listeners: Vec<EventListener> = self.doc().listeners(node, event);
        for listener in &listeners {
            listener(detail);
        }
        listeners.len()
    }

    fn register_container_element(&self) -> SandboxResult<()> {
        let mut doc = self.doc();
        if doc.is_defined(&self.mc_tag) {
            warn!(tag = %self.mc_tag, "container tag already defined, containers fall back to div");
            return Ok(());
        }
        doc.define_custom_element(&self.mc_tag, CustomElementDefinition::default())
            .map_err(Into::into)
    }

    fn run_reaction(&self, reaction: Reaction) {
        let (node, connected) = match reaction {
            Reaction::Connected(node) => (node, true),
            Reaction::Disconnected(node) => (node, false),
        };
        let is_container = {
            let doc = self.doc();
            doc.is_tag(node, &self.mc_tag) && self.owns_container_tag(&doc)
        };
        if is_container {
            if connected {
                self.container_connected(node);
            } else {
                self.container_disconnected(node);
            }
            return;
        }
        let definition = {
            let doc = self.doc();
            doc.tag_name(node).and_then(|tag| doc.custom_element(tag))
        };
        let callback = definition.and_then(|d| if connected { d.connected } else { d.disconnected });
        if let Some(callback) = callback {
            callback(&CallSite::root(), node);
        }
    }

    /// Whether the container tag carries the sandbox's own definition (no
    /// callbacks) rather than a foreign one.
    fn owns_container_tag(&self, doc: &Document) -> bool {
        doc.custom_element(&self.mc_tag)
            .is_some_and(|d| d.connected.is_none() && d.disconnected.is_none())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::dom::ShadowRootMode;
    use crate::error::{LoadError, LoadResult};
    use crate::loader::{LoaderOption, ModuleInstance, Mountable};

    struct Offline;

    #[async_trait]
    impl RemoteLoader for Offline {
        async fn load(&self, option: &LoaderOption, _site: &CallSite) -> LoadResult<Box<dyn Mountable>> {
            Err(LoadError::MissingContainer {
                name: option.name.clone(),
            })
        }
    }

    /// Mounts an empty instance for every load.
    struct Ready;

    #[async_trait]
    impl Mountable for Ready {
        async fn mount(&self) -> LoadResult<ModuleInstance> {
            Ok(ModuleInstance::default())
        }
    }

    #[async_trait]
    impl RemoteLoader for Ready {
        async fn load(&self, _option: &LoaderOption, _site: &CallSite) -> LoadResult<Box<dyn Mountable>> {
            Ok(Box::new(Ready))
        }
    }

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxConfig::default(), Document::new().into_shared(), Arc::new(Offline)).unwrap()
    }

    /// Append a container to the body the way `load` does.
    fn container(sandbox: &Sandbox, id: &str, service: &str) -> NodeId {
        let (body, root, el) = {
            let mut doc = sandbox.doc();
            let el = doc.create_element("module-cube");
            doc.set_attribute(el, "id", id).unwrap();
            doc.set_attribute(el, "servicename", service).unwrap();
            let root = doc.attach_shadow(el, ShadowRootMode::Open).unwrap();
            (doc.body(), root, el)
        };
        sandbox.raw_append(body, el).unwrap();
        root
    }

    #[test]
    fn new_patches_and_defines_container_tag() {
        let sandbox = sandbox();
        assert!(sandbox.is_patched());
        assert_eq!(sandbox.hook_levels().len(), 4);
        assert!(sandbox.doc().is_defined("module-cube"));
    }

    #[test]
    fn patch_is_idempotent_and_unpatch_clears_levels() {
        let sandbox = sandbox();
        sandbox.patch();
        assert!(sandbox.is_patched());
        sandbox.unpatch();
        assert!(!sandbox.is_patched());
        assert!(sandbox.hook_levels().is_empty());
    }

    #[test]
    fn unpatched_config_never_patches() {
        let config = SandboxConfig {
            need_patched: false,
            ..Default::default()
        };
        let sandbox = Sandbox::new(config, Document::new().into_shared(), Arc::new(Offline)).unwrap();
        sandbox.patch();
        assert!(!sandbox.is_patched());
    }

    #[test]
    fn connected_container_registers_shadow_root() {
        let sandbox = sandbox();
        let root = container(&sandbox, "mc_a", "app1");
        let record = sandbox.modules().get("mc_a").unwrap();
        assert_eq!(record.host, root);
        assert_eq!(record.service_name, "app1");
    }

    #[test]
    fn disconnected_container_clears_record_and_random_zone() {
        let sandbox = sandbox();
        container(&sandbox, "Rmc_app1_abc", "app1");
        sandbox.zones().fork_for("Rmc_app1_abc", "app1", None);
        let el = sandbox.doc().shadow_host(sandbox.modules().get("Rmc_app1_abc").unwrap().host).unwrap();
        sandbox.raw_remove(el).unwrap();
        assert!(sandbox.modules().get("Rmc_app1_abc").is_none());
        assert!(sandbox.zones().get("Rmc_app1_abc").is_none());
    }

    #[test]
    fn stable_zone_survives_disconnect() {
        let sandbox = sandbox();
        let root = container(&sandbox, "mc_root", "app1");
        sandbox.zones().fork_for("mc_root", "app1", None);
        let el = sandbox.doc().shadow_host(root).unwrap();
        sandbox.raw_remove(el).unwrap();
        assert!(sandbox.modules().is_empty());
        assert!(sandbox.zones().get("mc_root").is_some());
    }

    #[test]
    fn get_host_priorities() {
        let sandbox = sandbox();
        sandbox.add_service("app1", ServiceOptions::new().global_div_sandbox(true));
        let head = sandbox.doc().head();
        assert_eq!(sandbox.get_host(&ServiceRef::named("app1"), false), head);

        let a = container(&sandbox, "mc_a", "app1");
        let b = container(&sandbox, "mc_b", "app1");
        assert_eq!(sandbox.get_host(&ServiceRef::named("app1"), true), a);
        assert_eq!(sandbox.get_host(&ServiceRef::with_id("mc_b", "app1"), false), b);

        let global = container(&sandbox, "Gmc_app1", "app1");
        assert_eq!(sandbox.get_host(&ServiceRef::with_id("mc_b", "app1"), true), global);
        assert_eq!(sandbox.get_host(&ServiceRef::named("app1"), false), a);
    }

    #[test]
    fn shadow_root_computed_style_is_empty() {
        let sandbox = sandbox();
        let root = container(&sandbox, "mc_a", "app1");
        assert!(sandbox.computed_style(root).unwrap().is_empty());
        sandbox.unpatch();
        assert!(sandbox.computed_style(root).is_err());
    }

    /// Sizes of the per-node bookkeeping maps.
    fn tracked(sandbox: &Sandbox) -> [usize; 5] {
        [
            sandbox.element_hosts.len(),
            sandbox.element_zones.len(),
            sandbox.container_props.len(),
            sandbox.link_watches.len(),
            sandbox.pending_styles.lock().unwrap().len(),
        ]
    }

    #[tokio::test]
    async fn mount_unmount_cycles_leave_no_bookkeeping_behind() {
        let sandbox =
            Sandbox::new(SandboxConfig::default(), Document::new().into_shared(), Arc::new(Ready)).unwrap();
        sandbox.add_service("app1", ServiceOptions::new());
        let (body, head) = {
            let doc = sandbox.doc();
            (doc.body(), doc.head())
        };
        let anchor = sandbox.doc().create_element("div");
        sandbox.raw_append(body, anchor).unwrap();
        let baseline = tracked(&sandbox);

        for _ in 0..5 {
            let mut option = LoaderOption::new("https://cdn.example.com/app1/remoteEntry.js", "./Card");
            option.css = vec!["https://cdn.example.com/app1/card.css".into()];
            let mut options = super::LoadOptions::new("app1", "app1-card", option);
            options.js_sandbox_props = vec![SandboxProp::cleared("store")];

            let outcome = sandbox.load(anchor, options).await.unwrap();
            let host = outcome.host.unwrap();
            let site = CallSite::in_zone(outcome.zone.unwrap());
            let empty = sandbox.doc().create_element("style");
            sandbox.append_child(&site, head, empty).unwrap();
            assert_ne!(tracked(&sandbox), baseline);
            assert!(tracked(&sandbox).iter().all(|&n| n > 0));

            let container = sandbox.doc().shadow_host(host).unwrap();
            sandbox.remove(&CallSite::root(), container).unwrap();
            assert_eq!(tracked(&sandbox), baseline);
            assert!(!sandbox.doc().is_observed(empty));
        }
        assert!(sandbox.modules().is_empty());
        assert!(sandbox.zones().is_empty());
    }

    #[tokio::test]
    async fn failed_load_leaves_no_bookkeeping_behind() {
        let sandbox = sandbox();
        sandbox.add_service("app1", ServiceOptions::new());
        let body = sandbox.doc().body();
        let anchor = sandbox.doc().create_element("div");
        sandbox.raw_append(body, anchor).unwrap();

        let mut option = LoaderOption::new("https://cdn.example.com/app1/remoteEntry.js", "./Card");
        option.css = vec!["https://cdn.example.com/app1/card.css".into()];
        let mut options = super::LoadOptions::new("app1", "app1-card", option);
        options.js_sandbox_props = vec![SandboxProp::cleared("store")];

        let outcome = sandbox.load(anchor, options).await.unwrap();
        assert!(outcome.module.is_err());
        assert_eq!(tracked(&sandbox), [0; 5]);
        assert!(sandbox.doc().children(anchor).is_empty());
    }

    #[test]
    fn teardown_forgets_state() {
        let sandbox = sandbox();
        sandbox.add_service("app1", ServiceOptions::new());
        container(&sandbox, "mc_a", "app1");
        sandbox.teardown();
        assert!(!sandbox.is_patched());
        assert!(sandbox.modules().is_empty());
        assert!(!sandbox.services().contains("app1"));
    }
}
