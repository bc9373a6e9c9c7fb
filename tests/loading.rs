//! The `load` pipeline end to end, with an in-memory module system.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use module_cube::config::SandboxConfig;
use module_cube::dom::{CustomElementDefinition, Document, NodeId};
use module_cube::error::{LoadError, LoadResult, SandboxResult};
use module_cube::globals::SandboxProp;
use module_cube::loader::{
    ComponentLoader, EntryFetcher, ExportArgs, FetchResponse, LoaderOption, ModuleInstance, ModuleKind,
    ProviderConfig, RemoteContainer, RemoteModule, ShareScope,
};
use module_cube::sandbox::{LifeHook, LifeParams, LoadOptions, LoadOutcome, Sandbox, WcParam};
use module_cube::service::ServiceOptions;
use module_cube::zone::CallSite;
use serde_json::json;

use common::{body, element, init_tracing, style_texts};

const ENTRY: &str = "https://cdn.example.com/app1/remoteEntry.js";

/// A remote container. `id` tells instantiations apart; `inits` counts
/// share-scope initialisations.
struct App1 {
    id: usize,
    inits: Arc<AtomicUsize>,
}

#[async_trait]
impl RemoteContainer for App1 {
    async fn init(&self, _scope: &ShareScope) -> LoadResult<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, exposed: &str) -> LoadResult<RemoteModule> {
        if exposed != "./Card" {
            return Err(LoadError::MissingExport {
                name: exposed.to_string(),
            });
        }
        let id = self.id;
        Ok(RemoteModule::new()
            .with_value("title", json!("Card"))
            .with_function("bootstrap", move |args: ExportArgs| {
                async move {
                    Ok::<_, LoadError>(ModuleInstance::new(json!({
                        "host": args.host.map(NodeId::get),
                        "container": id,
                    })))
                }
                .boxed()
            }))
    }
}

#[derive(Default)]
struct Network {
    instantiations: AtomicUsize,
    inits: Arc<AtomicUsize>,
    fail: bool,
    evaluated_in: Mutex<Vec<String>>,
}

#[async_trait]
impl EntryFetcher for Network {
    async fn instantiate(&self, url: &str, _kind: ModuleKind, _name: &str) -> LoadResult<Arc<dyn RemoteContainer>> {
        let id = self.instantiations.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;
        if self.fail {
            return Err(LoadError::Instantiate {
                url: url.to_string(),
                message: "network unreachable".into(),
            });
        }
        Ok(Arc::new(App1 {
            id,
            inits: self.inits.clone(),
        }))
    }

    async fn fetch_text(&self, _url: &str) -> LoadResult<FetchResponse> {
        Ok(FetchResponse {
            status: 200,
            body: "window.app1 = {}".into(),
        })
    }

    fn evaluate(&self, _url: &str, _source: &str, site: &CallSite) -> LoadResult<()> {
        let zone = site.service_zone().map(|z| z.name().to_string()).unwrap_or_default();
        self.evaluated_in.lock().unwrap().push(zone);
        Ok(())
    }
}

fn setup(network: Arc<Network>) -> Sandbox {
    init_tracing();
    let document = Document::with_base_url("https://shell.example.com/").into_shared();
    let loader = Arc::new(ComponentLoader::new(network));
    let sandbox = Sandbox::new(SandboxConfig::default(), document, loader).unwrap();
    sandbox.add_service("app1", ServiceOptions::new());
    sandbox.add_service("app2", ServiceOptions::new());
    sandbox
}

/// A `<div>` under the body, optionally with an id.
fn host_node(sandbox: &Sandbox, id: Option<&str>) -> NodeId {
    let div = element(sandbox, "div");
    if let Some(id) = id {
        sandbox
            .document()
            .lock()
            .unwrap()
            .set_attribute(div, "id", id)
            .unwrap();
    }
    sandbox
        .append_child(&CallSite::root(), body(sandbox), div)
        .unwrap();
    div
}

fn card_options() -> LoadOptions {
    card_options_for("app1")
}

fn card_options_for(service: &str) -> LoadOptions {
    let option = LoaderOption {
        entry_url: ENTRY.into(),
        component: "./Card".into(),
        provider_config: Some(ProviderConfig {
            export_fn: Some("bootstrap".into()),
            ..Default::default()
        }),
        ..Default::default()
    };
    LoadOptions::new(service, format!("{service}-card"), option)
}

fn container_of(sandbox: &Sandbox, host: NodeId) -> NodeId {
    sandbox.document().lock().unwrap().shadow_host(host).unwrap()
}

#[tokio::test]
async fn load_mounts_component_in_shadow_container() {
    let network = Arc::new(Network::default());
    let sandbox = setup(network.clone());
    let root = host_node(&sandbox, Some("root"));

    let selected = Arc::new(Mutex::new(Vec::new()));
    let record = selected.clone();
    let options = card_options()
        .param("title", WcParam::Attribute("Hello".into()))
        .param(
            "select",
            WcParam::Listener(Arc::new(move |detail: &serde_json::Value| {
                record.lock().unwrap().push(detail.clone());
            })),
        );
    let outcome = sandbox.load(root, options).await.unwrap();

    assert!(!outcome.module.is_err());
    let host = outcome.host.unwrap();
    let instance = outcome.module.instance.unwrap();
    assert_eq!(instance.value(), &json!({"host": host.get(), "container": 1}));
    assert!(instance.has_unmount());

    let zone = outcome.zone.unwrap();
    assert_eq!(zone.name(), "mc_root");
    assert_eq!(zone.service_name(), Some("app1"));
    assert_eq!(sandbox.modules().get("mc_root").unwrap().host, host);

    let doc = sandbox.document().lock().unwrap();
    assert!(doc.is_shadow_root(host));
    let container = doc.shadow_host(host).unwrap();
    assert_eq!(doc.parent(container), Some(root));
    assert_eq!(doc.get_attribute(container, "servicename"), Some("app1"));
    assert_eq!(doc.get_attribute(container, "v"), Some(Sandbox::VERSION));

    let wc = doc
        .children(host)
        .iter()
        .copied()
        .find(|&n| doc.is_tag(n, "app1-card"))
        .unwrap();
    assert_eq!(doc.get_attribute(wc, "title"), Some("Hello"));
    drop(doc);
    assert_eq!(sandbox.component_host(wc), Some(host));
    assert!(sandbox.component_zone(wc).is_some());
    assert_eq!(network.instantiations.load(Ordering::SeqCst), 1);

    assert_eq!(sandbox.dispatch_event(wc, "select", &json!({"id": 7})), 1);
    assert_eq!(sandbox.dispatch_event(wc, "close", &json!(null)), 0);
    assert_eq!(*selected.lock().unwrap(), vec![json!({"id": 7})]);
}

#[tokio::test]
async fn services_sharing_an_entry_share_one_container() {
    let network = Arc::new(Network::default());
    let sandbox = setup(network.clone());
    let left = host_node(&sandbox, Some("left"));
    let right = host_node(&sandbox, Some("right"));

    let (a, b) = tokio::join!(
        sandbox.load(left, card_options_for("app1")),
        sandbox.load(right, card_options_for("app2"))
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.host.is_some());
    assert!(b.host.is_some());
    assert_eq!(network.instantiations.load(Ordering::SeqCst), 1);
    assert_eq!(network.inits.load(Ordering::SeqCst), 1);

    let container_of_instance = |outcome: &LoadOutcome| {
        outcome.module.instance.as_ref().unwrap().value()["container"].clone()
    };
    assert_eq!(container_of_instance(&a), json!(1));
    assert_eq!(container_of_instance(&b), json!(1));
    assert_eq!(sandbox.modules().for_service("app1").len(), 1);
    assert_eq!(sandbox.modules().for_service("app2").len(), 1);
}

#[tokio::test]
async fn failed_load_removes_the_container() {
    let network = Arc::new(Network {
        fail: true,
        ..Default::default()
    });
    let sandbox = setup(network);
    let root = host_node(&sandbox, Some("root"));

    let outcome = sandbox.load(root, card_options()).await.unwrap();
    assert!(outcome.module.is_err());
    assert!(outcome.zone.is_none());
    assert!(outcome.host.is_none());
    assert!(sandbox.modules().is_empty());
    assert!(sandbox.document().lock().unwrap().children(root).is_empty());
}

#[tokio::test]
async fn random_container_zone_is_cleared_on_disconnect() {
    let sandbox = setup(Arc::new(Network::default()));
    let anonymous = host_node(&sandbox, None);

    let outcome = sandbox.load(anonymous, card_options()).await.unwrap();
    let zone = outcome.zone.unwrap();
    let id = zone.name().to_string();
    assert!(id.starts_with("Rmc_app1_"));
    assert!(sandbox.zones().get(&id).is_some());

    let container = container_of(&sandbox, outcome.host.unwrap());
    sandbox.remove(&CallSite::root(), container).unwrap();
    assert!(sandbox.zones().get(&id).is_none());
    assert!(sandbox.modules().get(&id).is_none());
}

#[tokio::test]
async fn cleared_globals_are_dropped_with_the_container() {
    let sandbox = setup(Arc::new(Network::default()));
    let root = host_node(&sandbox, Some("root"));
    let mut options = card_options();
    options.js_sandbox_props = vec![SandboxProp::cleared("store")];

    let outcome = sandbox.load(root, options).await.unwrap();
    let site = CallSite::in_zone(outcome.zone.unwrap());
    sandbox.set_global(&site, "store", json!({"count": 1}));
    assert_eq!(sandbox.globals().service_value("app1", "store"), Some(json!({"count": 1})));

    let container = container_of(&sandbox, outcome.host.unwrap());
    sandbox.remove(&CallSite::root(), container).unwrap();
    assert_eq!(sandbox.globals().service_value("app1", "store"), None);
}

#[tokio::test]
async fn component_callbacks_run_in_the_service_zone() {
    let sandbox = setup(Arc::new(Network::default()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    sandbox
        .define_custom_element(
            "app1-card",
            CustomElementDefinition {
                connected: Some(Arc::new(move |site: &CallSite, _node: NodeId| {
                    let zone = site.service_zone().map(|z| z.name().to_string());
                    record.lock().unwrap().push(zone);
                })),
                disconnected: None,
            },
        )
        .unwrap();

    let root = host_node(&sandbox, Some("root"));
    sandbox.load(root, card_options()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Some("mc_root".to_string())]);
}

#[tokio::test]
async fn lifecycle_hooks_run_in_order() {
    let sandbox = setup(Arc::new(Network::default()));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let hook = |name: &'static str| -> LifeHook {
        let calls = calls.clone();
        Arc::new(move |params: &LifeParams<'_>| {
            assert!(params.site.service_zone().is_some());
            calls.lock().unwrap().push(name);
        })
    };

    let mut options = card_options();
    options.lifecycle.before_load_component = Some(hook("before_load_component"));
    options.lifecycle.before_gen_wc = Some(hook("before_gen_wc"));
    options.lifecycle.before_append_wc = Some(hook("before_append_wc"));
    options.lifecycle.after_append_wc = Some(hook("after_append_wc"));
    let gen_calls = calls.clone();
    options.lifecycle.gen_wc = Some(Arc::new(move |_params: &LifeParams<'_>| -> SandboxResult<Option<NodeId>> {
        gen_calls.lock().unwrap().push("gen_wc");
        Ok(None)
    }));

    let root = host_node(&sandbox, Some("root"));
    sandbox.load(root, options).await.unwrap();
    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            "before_load_component",
            "before_gen_wc",
            "gen_wc",
            "before_append_wc",
            "after_append_wc"
        ]
    );
}

#[tokio::test]
async fn iife_entries_run_inside_the_zone() {
    let network = Arc::new(Network::default());
    let sandbox = setup(network.clone());
    let root = host_node(&sandbox, Some("root"));
    let mut options = card_options();
    options.loader_option.kind = ModuleKind::Iife;

    let outcome = sandbox.load(root, options).await.unwrap();
    assert!(outcome.module.instance.is_none());
    assert!(!outcome.module.is_err());
    assert_eq!(*network.evaluated_in.lock().unwrap(), vec!["mc_root".to_string()]);
    assert_eq!(network.instantiations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn extra_css_and_global_container() {
    let sandbox = setup(Arc::new(Network::default()));
    sandbox.add_service("app1", ServiceOptions::new().global_div_sandbox(true));
    let root = host_node(&sandbox, Some("root"));
    let mut options = card_options();
    options.extra_css = Some(".card { padding: 0; }".into());

    let outcome = sandbox.load(root, options).await.unwrap();
    let host = outcome.host.unwrap();
    assert!(style_texts(&sandbox, host).contains(&".card { padding: 0; }".to_string()));

    let global = sandbox.modules().get("Gmc_app1").unwrap();
    assert!(style_texts(&sandbox, global.host).contains(&".card { padding: 0; }".to_string()));
    let global_container = container_of(&sandbox, global.host);
    let body = body(&sandbox);
    assert_eq!(
        sandbox.document().lock().unwrap().parent(global_container),
        Some(body)
    );
}

#[tokio::test]
async fn empty_entry_url_still_renders_component() {
    let network = Arc::new(Network::default());
    let sandbox = setup(network.clone());
    let root = host_node(&sandbox, Some("root"));
    let options = LoadOptions::new("app1", "app1-card", LoaderOption::default());

    let outcome = sandbox.load(root, options).await.unwrap();
    assert!(outcome.module.instance.is_none());
    assert!(outcome.host.is_some());
    assert_eq!(network.instantiations.load(Ordering::SeqCst), 0);
}
