//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use module_cube::config::SandboxConfig;
use module_cube::dom::{Document, NodeId, ShadowRootMode};
use module_cube::error::{LoadError, LoadResult};
use module_cube::loader::{LoaderOption, Mountable, RemoteLoader};
use module_cube::sandbox::Sandbox;
use module_cube::zone::CallSite;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A loader with no reachable remotes.
pub struct Offline;

#[async_trait]
impl RemoteLoader for Offline {
    async fn load(&self, option: &LoaderOption, _site: &CallSite) -> LoadResult<Box<dyn Mountable>> {
        Err(LoadError::MissingContainer {
            name: option.name.clone(),
        })
    }
}

pub fn sandbox_with(config: SandboxConfig) -> Sandbox {
    init_tracing();
    let document = Document::with_base_url("https://shell.example.com/").into_shared();
    Sandbox::new(config, document, Arc::new(Offline)).unwrap()
}

pub fn sandbox() -> Sandbox {
    sandbox_with(SandboxConfig::default())
}

/// Connect a container with an open shadow root under the body. Returns the
/// shadow root.
pub fn mount_container(sandbox: &Sandbox, id: &str, service: &str) -> NodeId {
    let (body, el, root) = {
        let mut doc = sandbox.document().lock().unwrap();
        let el = doc.create_element(sandbox.container_tag());
        doc.set_attribute(el, "id", id).unwrap();
        doc.set_attribute(el, "servicename", service).unwrap();
        let root = doc.attach_shadow(el, ShadowRootMode::Open).unwrap();
        (doc.body(), el, root)
    };
    sandbox.append_child(&CallSite::root(), body, el).unwrap();
    root
}

/// A detached `<style>` with `text`.
pub fn style(sandbox: &Sandbox, text: &str) -> NodeId {
    let mut doc = sandbox.document().lock().unwrap();
    let style = doc.create_element("style");
    doc.set_text_content(style, text).unwrap();
    style
}

/// A detached stylesheet `<link>`.
pub fn link(sandbox: &Sandbox, href: &str) -> NodeId {
    let mut doc = sandbox.document().lock().unwrap();
    let link = doc.create_element("link");
    doc.set_attribute(link, "rel", "stylesheet").unwrap();
    doc.set_attribute(link, "href", href).unwrap();
    link
}

pub fn element(sandbox: &Sandbox, tag: &str) -> NodeId {
    sandbox.document().lock().unwrap().create_element(tag)
}

/// Texts of the `<style>` children of `host`, in order.
pub fn style_texts(sandbox: &Sandbox, host: NodeId) -> Vec<String> {
    let doc = sandbox.document().lock().unwrap();
    doc.children(host)
        .iter()
        .filter(|&&c| doc.is_tag(c, "style"))
        .map(|&c| doc.text_content(c))
        .collect()
}

/// Number of stylesheet `<link>` children of `host`.
pub fn link_count(sandbox: &Sandbox, host: NodeId) -> usize {
    let doc = sandbox.document().lock().unwrap();
    doc.children(host).iter().filter(|&&c| doc.is_tag(c, "link")).count()
}

/// Call site inside the zone of container `id`.
pub fn zone_site(sandbox: &Sandbox, id: &str, service: &str) -> CallSite {
    CallSite::in_zone(sandbox.zones().fork_for(id, service, None))
}

pub fn head(sandbox: &Sandbox) -> NodeId {
    sandbox.document().lock().unwrap().head()
}

pub fn body(sandbox: &Sandbox) -> NodeId {
    sandbox.document().lock().unwrap().body()
}

pub fn parent(sandbox: &Sandbox, node: NodeId) -> Option<NodeId> {
    sandbox.document().lock().unwrap().parent(node)
}
