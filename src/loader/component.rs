//! Default remote loader: module-federation style containers.
//!
//! Each remote entry URL is instantiated at most once; concurrent loads of the
//! same URL await one shared instantiation. A failed instantiation is not
//! remembered, so the next load retries it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{
    ExportArgs, LoaderOption, ModuleInstance, ModuleKind, Mountable, ProviderConfig, RemoteLoader,
    RemoteModule,
};
use crate::error::{LoadError, LoadResult};
use crate::zone::CallSite;

/// Shared-dependency scope handed to remote containers.
#[derive(Debug, Clone, Default)]
pub struct ShareScope {
    pub name: String,
    /// Package name → version provided by the host.
    pub packages: Arc<DashMap<String, String>>,
}

impl ShareScope {
    /// The host's `default` scope.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            packages: Arc::default(),
        }
    }

    /// Scope used for SystemJS containers.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn provide(&self, package: &str, version: &str) {
        self.packages.insert(package.to_string(), version.to_string());
    }
}

/// A loaded remote entry.
#[async_trait]
pub trait RemoteContainer: Send + Sync {
    /// Initialise the container with the host's share scope. Fails when the
    /// remote already owns a scope.
    async fn init(&self, scope: &ShareScope) -> LoadResult<()>;

    /// Resolve an exposed module (`container.get(name)` then the factory).
    async fn get(&self, exposed: &str) -> LoadResult<RemoteModule>;

    /// Whether the container implements `get`. Containers without it are
    /// their own exports.
    fn has_get(&self) -> bool {
        true
    }

    fn exports(&self) -> RemoteModule {
        RemoteModule::new()
    }
}

/// Script response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

/// The host's module system and network.
#[async_trait]
pub trait EntryFetcher: Send + Sync {
    /// Import the entry at `url` and return its container. For `window`
    /// entries `name` is the global the script registers.
    async fn instantiate(&self, url: &str, kind: ModuleKind, name: &str) -> LoadResult<Arc<dyn RemoteContainer>>;

    /// Fetch a script's source.
    async fn fetch_text(&self, url: &str) -> LoadResult<FetchResponse>;

    /// Execute script source with `site` as its context.
    fn evaluate(&self, url: &str, source: &str, site: &CallSite) -> LoadResult<()>;
}

/// Memoized remote loader.
pub struct ComponentLoader {
    fetcher: Arc<dyn EntryFetcher>,
    share_scope: ShareScope,
    scope_ready: AtomicBool,
    containers: DashMap<String, Arc<OnceCell<Arc<dyn RemoteContainer>>>>,
    initialized: DashSet<String>,
    scripts: DashMap<String, Arc<OnceCell<()>>>,
}

impl fmt::Debug for ComponentLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentLoader")
            .field("share_scope", &self.share_scope.name)
            .field("containers", &self.containers.len())
            .field("scripts", &self.scripts.len())
            .finish()
    }
}

impl ComponentLoader {
    pub fn new(fetcher: Arc<dyn EntryFetcher>) -> Self {
        Self::with_share_scope(fetcher, ShareScope::named("default"))
    }

    pub fn with_share_scope(fetcher: Arc<dyn EntryFetcher>, share_scope: ShareScope) -> Self {
        Self {
            fetcher,
            share_scope,
            scope_ready: AtomicBool::new(false),
            containers: DashMap::new(),
            initialized: DashSet::new(),
            scripts: DashMap::new(),
        }
    }

    pub fn share_scope(&self) -> &ShareScope {
        &self.share_scope
    }

    /// Instantiate (once) the remote entry at `url`.
    pub async fn load_entry(
        &self,
        url: &str,
        kind: ModuleKind,
        name: &str,
        need_share: bool,
    ) -> LoadResult<Arc<dyn RemoteContainer>> {
        let cell = self.containers.entry(url.to_string()).or_default().clone();
        let container = cell
            .get_or_try_init(|| async {
                debug!(url = %url, ?kind, "instantiating remote entry");
                let container = self.fetcher.instantiate(url, kind, name).await?;
                if need_share {
                    self.init_remote(container.as_ref(), url, kind).await;
                }
                Ok::<_, LoadError>(container)
            })
            .await?;
        Ok(container.clone())
    }

    async fn init_remote(&self, container: &dyn RemoteContainer, key: &str, kind: ModuleKind) {
        if self.initialized.contains(key) {
            return;
        }
        if !self.scope_ready.swap(true, Ordering::SeqCst) {
            debug!(scope = %self.share_scope.name, "share scope initialised");
        }
        let scope = match kind {
            ModuleKind::Systemjs => ShareScope::empty(),
            _ => self.share_scope.clone(),
        };
        match container.init(&scope).await {
            Ok(()) => {
                self.initialized.insert(key.to_string());
            }
            Err(e) => {
                warn!(url = %key, error = %e, "container init failed, the remote keeps its own share scope");
            }
        }
    }

    async fn exposed_module(container: &dyn RemoteContainer, exposed: &str) -> LoadResult<RemoteModule> {
        if container.has_get() {
            container.get(exposed).await
        } else {
            Ok(container.exports())
        }
    }
}

#[async_trait]
impl RemoteLoader for ComponentLoader {
    async fn load(&self, option: &LoaderOption, _site: &CallSite) -> LoadResult<Box<dyn Mountable>> {
        let entry = option.resolved_entry();
        let container = self
            .load_entry(&entry, option.kind, &option.name, option.need_share)
            .await?;
        let module = Self::exposed_module(container.as_ref(), &option.component).await?;
        Ok(Box::new(ReturnModule::new(
            module,
            option.provider_config.clone().unwrap_or_default(),
        )))
    }

    async fn load_iife(&self, entry: &str, site: &CallSite) -> LoadResult<()> {
        let cell = self.scripts.entry(entry.to_string()).or_default().clone();
        cell.get_or_try_init(|| async {
            let response = self.fetcher.fetch_text(entry).await?;
            if response.status >= 400 {
                return Err(LoadError::HttpStatus {
                    url: entry.to_string(),
                    status: response.status,
                });
            }
            self.fetcher.evaluate(entry, &response.body, site)
        })
        .await?;
        Ok(())
    }
}

/// The module a load resolves to: mounting picks the provider export and is
/// memoized.
pub struct ReturnModule {
    module: RemoteModule,
    provider: ProviderConfig,
    mounted: OnceCell<ModuleInstance>,
}

impl fmt::Debug for ReturnModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnModule")
            .field("provider", &self.provider)
            .field("mounted", &self.mounted.initialized())
            .finish()
    }
}

impl ReturnModule {
    pub fn new(module: RemoteModule, provider: ProviderConfig) -> Self {
        Self {
            module,
            provider,
            mounted: OnceCell::new(),
        }
    }

    async fn instantiate(&self) -> LoadResult<ModuleInstance> {
        let export_fn = self
            .provider
            .export_fn
            .as_deref()
            .and_then(|name| self.module.function(name));
        let instance = if let Some(f) = export_fn {
            f(ExportArgs {
                params: self.provider.params.clone(),
                host: self.provider.host,
            })
            .await?
        } else if let Some(instance) = self
            .provider
            .export_module
            .as_deref()
            .and_then(|name| self.module.instance(name))
        {
            instance
        } else {
            self.module.clone().into_instance()
        };
        instance.ensure_unmount();
        Ok(instance)
    }
}

#[async_trait]
impl Mountable for ReturnModule {
    async fn mount(&self) -> LoadResult<ModuleInstance> {
        self.mounted
            .get_or_try_init(|| self.instantiate())
            .await
            .cloned()
    }
}
