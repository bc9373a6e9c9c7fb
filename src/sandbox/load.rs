//! The `load` pipeline: container creation, zone setup, remote loading and
//! component generation.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::Sandbox;
use crate::dom::{EventListener, NodeId, ShadowRootMode};
use crate::error::{SandboxError, SandboxResult};
use crate::globals::SandboxProp;
use crate::loader::{LoaderOption, ModuleInstance, ModuleKind, RemoteLoader};
use crate::module::{self, RANDOM_ID_PREFIX, STABLE_ID_PREFIX};
use crate::zone::{CallSite, Zone};

/// Length of the random part of generated container ids.
const RANDOM_ID_LEN: usize = 12;

/// A lifecycle hook.
pub type LifeHook = Arc<dyn Fn(&LifeParams<'_>) + Send + Sync>;

/// Custom component generator. `Ok(None)` or an error falls back to
/// creating a `wc_tag_name` element.
pub type GenWcHook = Arc<dyn Fn(&LifeParams<'_>) -> SandboxResult<Option<NodeId>> + Send + Sync>;

/// What a lifecycle hook sees.
pub struct LifeParams<'a> {
    pub sandbox: &'a Sandbox,
    /// The service zone's call site (root when loading ran outside zones).
    pub site: &'a CallSite,
    pub module: Option<&'a LoadedModule>,
    pub host: Option<NodeId>,
    pub wc_tag_name: &'a str,
    pub wc: Option<NodeId>,
}

/// Optional hooks around component loading and insertion.
#[derive(Clone, Default)]
pub struct Lifecycle {
    pub before_load_component: Option<LifeHook>,
    pub before_gen_wc: Option<LifeHook>,
    pub gen_wc: Option<GenWcHook>,
    pub before_append_wc: Option<LifeHook>,
    pub after_append_wc: Option<LifeHook>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("before_load_component", &self.before_load_component.is_some())
            .field("before_gen_wc", &self.before_gen_wc.is_some())
            .field("gen_wc", &self.gen_wc.is_some())
            .field("before_append_wc", &self.before_append_wc.is_some())
            .field("after_append_wc", &self.after_append_wc.is_some())
            .finish()
    }
}

/// A parameter applied to the generated component.
#[derive(Clone)]
pub enum WcParam {
    /// Set as an attribute and as a property.
    Attribute(String),
    /// Registered as an event listener under the parameter name.
    Listener(EventListener),
    Property(Value),
}

impl fmt::Debug for WcParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute(v) => f.debug_tuple("Attribute").field(v).finish(),
            Self::Listener(_) => f.write_str("Listener"),
            Self::Property(v) => f.debug_tuple("Property").field(v).finish(),
        }
    }
}

/// Everything one `load` call needs.
#[derive(Clone, Default)]
pub struct LoadOptions {
    pub service_name: String,
    pub wc_tag_name: String,
    pub wc_params: IndexMap<String, WcParam>,
    pub loader_option: LoaderOption,
    pub extra_css: Option<String>,
    /// Replaces the sandbox's loader for this call.
    pub loader: Option<Arc<dyn RemoteLoader>>,
    pub lifecycle: Lifecycle,
    /// Extra container attributes; an `id` here fixes the container id.
    pub mc_attributes: IndexMap<String, String>,
    pub js_sandbox_props: Vec<SandboxProp>,
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("service_name", &self.service_name)
            .field("wc_tag_name", &self.wc_tag_name)
            .field("wc_params", &self.wc_params)
            .field("loader_option", &self.loader_option)
            .field("extra_css", &self.extra_css)
            .field("loader", &self.loader.is_some())
            .field("lifecycle", &self.lifecycle)
            .field("mc_attributes", &self.mc_attributes)
            .field("js_sandbox_props", &self.js_sandbox_props)
            .finish()
    }
}

impl LoadOptions {
    pub fn new(service_name: impl Into<String>, wc_tag_name: impl Into<String>, loader_option: LoaderOption) -> Self {
        Self {
            service_name: service_name.into(),
            wc_tag_name: wc_tag_name.into(),
            loader_option,
            ..Default::default()
        }
    }

    pub fn param(mut self, name: impl Into<String>, param: WcParam) -> Self {
        self.wc_params.insert(name.into(), param);
        self
    }

    pub fn mc_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.mc_attributes.insert(name.into(), value.into());
        self
    }
}

/// The mounted module, or why it could not be produced.
#[derive(Debug, Default)]
pub struct LoadedModule {
    pub instance: Option<ModuleInstance>,
    pub exception: Option<SandboxError>,
}

impl LoadedModule {
    pub fn is_err(&self) -> bool {
        self.exception.is_some()
    }
}

/// Result of [`Sandbox::load`]. On failure `zone` and `host` are `None` and
/// the container has been removed again.
#[derive(Debug)]
pub struct LoadOutcome {
    pub module: LoadedModule,
    pub zone: Option<Arc<Zone>>,
    pub host: Option<NodeId>,
}

impl Sandbox {
    /// Load a service component into a new container under `host_node`.
    ///
    /// Creates the container (and the service's global container when it
    /// uses one), rehydrates cached styles, loads and mounts the remote
    /// module inside the container's zone, then generates the component
    /// element and appends it to the host.
    pub async fn load(&self, host_node: NodeId, mut options: LoadOptions) -> SandboxResult<LoadOutcome> {
        let service_name = options.service_name.clone();
        let container_id = self.container_id(host_node, &options);
        info!(service = %service_name, id = %container_id, "loading component");

        self.add_global_div(&options)?;
        let container = self.create_container(&container_id, &options)?;
        let host = self.attach_boundary(&service_name, container)?;
        self.raw_append(host_node, container)?;

        options.loader_option.css_host = Some(host);
        self.append_exist_styles_and_links(&service_name, host)?;
        self.add_extra_css(host, options.extra_css.as_deref())?;
        if let Some(provider) = options.loader_option.provider_config.as_mut() {
            provider.host = Some(host);
        }

        let module = self.run_in_zone(&container_id, &options).await;
        if let Some(ref e) = module.exception {
            warn!(service = %service_name, id = %container_id, error = %e, "load failed, removing container");
            self.raw_remove(container)?;
            self.container_props.remove(&container);
            self.forget_host(host);
            return Ok(LoadOutcome {
                module,
                zone: None,
                host: None,
            });
        }

        let zone = self.zones.get(&container_id);
        self.after_run(&module, zone.as_ref(), host, &options)?;
        Ok(LoadOutcome {
            module,
            zone,
            host: Some(host),
        })
    }

    /// Container id: explicit `id` attribute, `mc_<host id>`, or a random id.
    fn container_id(&self, host_node: NodeId, options: &LoadOptions) -> String {
        if let Some(id) = options.mc_attributes.get("id").filter(|id| !id.is_empty()) {
            return id.clone();
        }
        let parent_id = self
            .doc()
            .get_attribute(host_node, "id")
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        match parent_id {
            Some(pid) => format!("{STABLE_ID_PREFIX}{pid}"),
            None => {
                let suffix: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(RANDOM_ID_LEN)
                    .map(char::from)
                    .collect();
                format!("{RANDOM_ID_PREFIX}{}_{suffix}", options.service_name)
            }
        }
    }

    /// Create a detached container element.
    fn create_container(&self, id: &str, options: &LoadOptions) -> SandboxResult<NodeId> {
        let mut doc = self.doc();
        let tag = if self.owns_container_tag(&doc) { self.mc_tag.as_str() } else { "div" };
        let container = doc.create_element(tag);
        for (name, value) in &options.mc_attributes {
            doc.set_attribute(container, name, value)?;
        }
        doc.set_attribute(container, "servicename", &options.service_name)?;
        doc.set_attribute(container, "v", Self::VERSION)?;
        doc.set_attribute(container, "id", id)?;
        drop(doc);
        if !options.js_sandbox_props.is_empty() {
            self.container_props.insert(container, options.js_sandbox_props.clone());
        }
        Ok(container)
    }

    /// Attach an open shadow root when both the sandbox and the service want
    /// one. Returns the host nodes go into.
    fn attach_boundary(&self, service_name: &str, container: NodeId) -> SandboxResult<NodeId> {
        let service_wants = self
            .services
            .get(service_name)
            .is_none_or(|c| c.need_shadow_dom);
        if self.config.need_shadow_dom && service_wants {
            Ok(self.doc().attach_shadow(container, ShadowRootMode::Open)?)
        } else {
            Ok(container)
        }
    }

    /// Create the service's global container under the body, once.
    fn add_global_div(&self, options: &LoadOptions) -> SandboxResult<()> {
        let uses_global = self
            .services
            .get(&options.service_name)
            .is_some_and(|c| c.use_global_div_sandbox);
        if !uses_global {
            return Ok(());
        }
        let global_id = module::global_container_id(&options.service_name);
        if self.modules.get(&global_id).is_some() {
            return Ok(());
        }
        let container = self.create_container(&global_id, options)?;
        let host = self.attach_boundary(&options.service_name, container)?;
        let body = self.doc().body();
        self.raw_append(body, container)?;
        self.add_extra_css(host, options.extra_css.as_deref())?;
        self.load_css(&options.loader_option.css, Some(host))?;
        debug!(service = %options.service_name, id = %global_id, "global container created");
        Ok(())
    }

    /// Fork the container's zone and load the module inside it.
    async fn run_in_zone(&self, container_id: &str, options: &LoadOptions) -> LoadedModule {
        if !self.config.need_patched {
            warn!(service = %options.service_name, "patching disabled, loading outside any zone");
            return self.load_remote_component(options, &CallSite::root()).await;
        }
        let zone = self.zones.fork_for(container_id, &options.service_name, None);
        let option = &options.loader_option;
        if option.entry_url.is_empty() {
            debug!(service = %options.service_name, "no entry url, nothing to load");
            return LoadedModule::default();
        }
        let site = CallSite::in_zone(zone);
        self.run_hook(options.lifecycle.before_load_component.as_ref(), &site, None, None, options, None);
        self.isolate_window_js(&options.js_sandbox_props);

        if option.kind == ModuleKind::Iife {
            let entry = option.resolved_entry();
            if let Err(e) = self.loader.load_iife(&entry, &site).await {
                error!(url = %entry, error = %e, "iife entry failed");
            }
            if let Err(e) = self.load_css(&option.css, option.css_host) {
                warn!(error = %e, "loading component css failed");
            }
            return LoadedModule::default();
        }
        self.load_remote_component(options, &site).await
    }

    async fn load_remote_component(&self, options: &LoadOptions, site: &CallSite) -> LoadedModule {
        let option = &options.loader_option;
        let result = async {
            let mountable = match options.loader {
                Some(ref custom) => custom.load(option, site).await?,
                None => {
                    self.load_css(&option.css, option.css_host)?;
                    self.loader.load(option, site).await?
                }
            };
            Ok::<_, SandboxError>(mountable.mount().await?)
        }
        .await;
        match result {
            Ok(instance) => LoadedModule {
                instance: Some(instance),
                exception: None,
            },
            Err(e) => {
                error!(service = %options.service_name, error = %e, "loadComponent failed");
                LoadedModule {
                    instance: None,
                    exception: Some(e),
                }
            }
        }
    }

    /// Generate the component element and append it to the host.
    fn after_run(
        &self,
        module: &LoadedModule,
        zone: Option<&Arc<Zone>>,
        host: NodeId,
        options: &LoadOptions,
    ) -> SandboxResult<NodeId> {
        let site = zone.cloned().map(CallSite::in_zone).unwrap_or_default();
        let hooks = &options.lifecycle;
        self.run_hook(hooks.before_gen_wc.as_ref(), &site, Some(module), Some(host), options, None);

        let generated = hooks.gen_wc.as_ref().and_then(|gen_wc| {
            let params = self.life_params(&site, Some(module), Some(host), options, None);
            match gen_wc(&params) {
                Ok(wc) => wc,
                Err(e) => {
                    warn!(service = %options.service_name, error = %e, "genWC failed, using the default component");
                    None
                }
            }
        });
        let wc = match generated {
            Some(wc) => wc,
            None => self.default_gen_wc(&options.wc_tag_name, zone),
        };

        self.element_hosts.insert(wc, host);
        self.apply_wc_params(wc, &options.wc_params)?;
        self.run_hook(hooks.before_append_wc.as_ref(), &site, Some(module), Some(host), options, Some(wc));
        self.append_child(&site, host, wc)?;
        self.run_hook(hooks.after_append_wc.as_ref(), &site, Some(module), Some(host), options, Some(wc));
        Ok(wc)
    }

    fn default_gen_wc(&self, tag: &str, zone: Option<&Arc<Zone>>) -> NodeId {
        let wc = self.doc().create_element(tag);
        if let Some(zone) = zone {
            self.element_zones.insert(wc, zone.clone());
        }
        wc
    }

    fn apply_wc_params(&self, wc: NodeId, params: &IndexMap<String, WcParam>) -> SandboxResult<()> {
        let mut doc = self.doc();
        for (name, param) in params {
            match param {
                WcParam::Attribute(value) => {
                    doc.set_attribute(wc, name, value)?;
                    doc.set_property(wc, name, Value::String(value.clone()))?;
                }
                WcParam::Listener(listener) => doc.add_event_listener(wc, name, listener.clone())?,
                WcParam::Property(value) => doc.set_property(wc, name, value.clone())?,
            }
        }
        Ok(())
    }

    fn life_params<'a>(
        &'a self,
        site: &'a CallSite,
        module: Option<&'a LoadedModule>,
        host: Option<NodeId>,
        options: &'a LoadOptions,
        wc: Option<NodeId>,
    ) -> LifeParams<'a> {
        LifeParams {
            sandbox: self,
            site,
            module,
            host,
            wc_tag_name: &options.wc_tag_name,
            wc,
        }
    }

    fn run_hook(
        &self,
        hook: Option<&LifeHook>,
        site: &CallSite,
        module: Option<&LoadedModule>,
        host: Option<NodeId>,
        options: &LoadOptions,
        wc: Option<NodeId>,
    ) {
        if let Some(hook) = hook {
            hook(&self.life_params(site, module, host, options, wc));
        }
    }
}
