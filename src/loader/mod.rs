//! Remote component loading.
//!
//! The sandbox only needs something that turns a [`LoaderOption`] into a
//! [`Mountable`]; [`RemoteLoader`] is that seam. [`ComponentLoader`] is the
//! default implementation (module-federation style remote entries), and
//! callers may pass their own loader per `load` call.

mod component;
mod instance;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::dom::NodeId;
use crate::error::{LoadError, LoadResult};
use crate::zone::CallSite;

pub use component::{ComponentLoader, EntryFetcher, FetchResponse, RemoteContainer, ReturnModule, ShareScope};
pub use instance::{Export, ExportArgs, ExportFn, ModuleInstance, RemoteModule, UnmountHook};

/// Placeholder in `entry_url` replaced by `version`.
pub const VERSION_POS: &str = "@{version}";

/// How a remote entry is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Classic script registering a container on the global scope.
    Window,
    /// ES module import.
    #[default]
    Module,
    /// Self-executing bundle run inside the service zone.
    Iife,
    /// SystemJS import; containers get an empty share scope.
    Systemjs,
}

/// Which export of the exposed module produces the instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Exported function called with `params` (and the host).
    #[serde(default)]
    pub export_fn: Option<String>,
    #[serde(default)]
    pub params: Vec<Value>,
    /// Exported value used as the instance when there is no `export_fn`.
    #[serde(default)]
    pub export_module: Option<String>,
    /// Container host appended to the call arguments.
    #[serde(skip)]
    pub host: Option<NodeId>,
}

/// Where and how to load a service's component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderOption {
    #[serde(default)]
    pub entry_url: String,
    #[serde(default, rename = "type")]
    pub kind: ModuleKind,
    /// Global name of a `window` container.
    #[serde(default)]
    pub name: String,
    /// Exposed module requested from the container.
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub css: Vec<String>,
    #[serde(default)]
    pub provider_config: Option<ProviderConfig>,
    /// Node that receives `css` links. Set by the sandbox.
    #[serde(skip)]
    pub css_host: Option<NodeId>,
    #[serde(default = "default_true")]
    pub need_share: bool,
}

fn default_true() -> bool {
    true
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

impl Default for LoaderOption {
    fn default() -> Self {
        Self {
            entry_url: String::new(),
            kind: ModuleKind::default(),
            name: String::new(),
            component: String::new(),
            version: None,
            css: Vec::new(),
            provider_config: None,
            css_host: None,
            need_share: true,
        }
    }
}

impl LoaderOption {
    pub fn new(entry_url: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            entry_url: entry_url.into(),
            component: component.into(),
            ..Default::default()
        }
    }

    /// `entry_url` with the version placeholder substituted.
    pub fn resolved_entry(&self) -> String {
        match self.version.as_deref() {
            Some(version) if !version.is_empty() => self.entry_url.replace(VERSION_POS, version),
            _ => self.entry_url.clone(),
        }
    }
}

/// A loaded component, ready to be mounted.
#[async_trait]
pub trait Mountable: Send + Sync {
    /// Produce the component instance. Repeated calls return the same
    /// instance.
    async fn mount(&self) -> LoadResult<ModuleInstance>;
}

/// The remote-loading collaborator.
#[async_trait]
pub trait RemoteLoader: Send + Sync {
    async fn load(&self, option: &LoaderOption, site: &CallSite) -> LoadResult<Box<dyn Mountable>>;

    /// Fetch and run a self-executing entry under `site`.
    async fn load_iife(&self, entry: &str, _site: &CallSite) -> LoadResult<()> {
        Err(LoadError::Script {
            url: entry.to_string(),
            message: "this loader does not run iife entries".into(),
        })
    }
}
