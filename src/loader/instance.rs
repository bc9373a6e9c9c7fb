//! Remote exports and mounted component instances.

use std::fmt;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::warn;

use crate::dom::NodeId;
use crate::error::LoadResult;

/// Teardown callback of an instance (`unmount` / `destroy`).
pub type UnmountHook = Arc<dyn Fn() + Send + Sync>;

/// Arguments passed to an exported provider function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportArgs {
    pub params: Vec<Value>,
    /// The container host the component renders into.
    pub host: Option<NodeId>,
}

/// Exported provider function (`providerConfig.exportFn`).
pub type ExportFn = Arc<dyn Fn(ExportArgs) -> BoxFuture<'static, LoadResult<ModuleInstance>> + Send + Sync>;

/// One named export of a remote module.
#[derive(Clone)]
pub enum Export {
    Function(ExportFn),
    Instance(ModuleInstance),
    Value(Value),
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function"),
            Self::Instance(i) => f.debug_tuple("Instance").field(i).finish(),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

/// The exports of an exposed remote module.
#[derive(Clone, Default)]
pub struct RemoteModule {
    exports: IndexMap<String, Export>,
    destroy: Option<UnmountHook>,
}

impl fmt::Debug for RemoteModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteModule")
            .field("exports", &self.exports)
            .field("destroy", &self.destroy.is_some())
            .finish()
    }
}

impl RemoteModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(ExportArgs) -> BoxFuture<'static, LoadResult<ModuleInstance>> + Send + Sync + 'static,
    {
        self.exports.insert(name.to_string(), Export::Function(Arc::new(f)));
        self
    }

    pub fn with_instance(mut self, name: &str, instance: ModuleInstance) -> Self {
        self.exports.insert(name.to_string(), Export::Instance(instance));
        self
    }

    pub fn with_value(mut self, name: &str, value: Value) -> Self {
        self.exports.insert(name.to_string(), Export::Value(value));
        self
    }

    /// A module-level `destroy` export.
    pub fn with_destroy(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.destroy = Some(Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Export> {
        self.exports.get(name)
    }

    pub fn function(&self, name: &str) -> Option<ExportFn> {
        match self.exports.get(name)? {
            Export::Function(f) => Some(f.clone()),
            _ => None,
        }
    }

    /// An export usable as an instance (`providerConfig.exportModule`).
    pub fn instance(&self, name: &str) -> Option<ModuleInstance> {
        match self.exports.get(name)? {
            Export::Instance(i) => Some(i.clone()),
            Export::Value(v) => Some(ModuleInstance::new(v.clone())),
            Export::Function(_) => None,
        }
    }

    /// The whole module used as the instance.
    pub fn into_instance(self) -> ModuleInstance {
        let value: Map<String, Value> = self
            .exports
            .iter()
            .filter_map(|(name, export)| match export {
                Export::Value(v) => Some((name.clone(), v.clone())),
                Export::Instance(i) => Some((name.clone(), i.value().clone())),
                Export::Function(_) => None,
            })
            .collect();
        ModuleInstance {
            value: Value::Object(value),
            destroy: self.destroy,
            ..Default::default()
        }
    }
}

/// A mounted component.
///
/// Clones share the `unmount` slot, so an unmount synthesized after mounting
/// is visible through every handle.
#[derive(Clone, Default)]
pub struct ModuleInstance {
    value: Value,
    destroy: Option<UnmountHook>,
    unmount: Arc<RwLock<Option<UnmountHook>>>,
    sealed: bool,
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("value", &self.value)
            .field("destroy", &self.destroy.is_some())
            .field("unmount", &self.has_unmount())
            .field("sealed", &self.sealed)
            .finish()
    }
}

impl ModuleInstance {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    pub fn with_destroy(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.destroy = Some(Arc::new(f));
        self
    }

    pub fn with_unmount(self, f: impl Fn() + Send + Sync + 'static) -> Self {
        *self.unmount.write().expect("unmount lock poisoned") = Some(Arc::new(f));
        self
    }

    /// Freeze the instance: no properties (including `unmount`) can be added.
    pub fn sealed(mut self) -> Self {
        self.sealed = true;
        self
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn has_unmount(&self) -> bool {
        self.unmount.read().expect("unmount lock poisoned").is_some()
    }

    /// Call `unmount`. Returns `false` when the instance has none.
    pub fn unmount(&self) -> bool {
        let hook = self.unmount.read().expect("unmount lock poisoned").clone();
        match hook {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }

    /// Give an instance without `unmount` one that calls `destroy`.
    pub(crate) fn ensure_unmount(&self) {
        if self.has_unmount() || (!self.value.is_object() && self.destroy.is_none()) {
            return;
        }
        if self.sealed {
            warn!("unmount can not be defined on a sealed instance, it may never be called");
            return;
        }
        let destroy = self.destroy.clone();
        let hook: UnmountHook = Arc::new(move || match destroy {
            Some(ref destroy) => destroy(),
            None => warn!("no unmount function to run"),
        });
        *self.unmount.write().expect("unmount lock poisoned") = Some(hook);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;
    use serde_json::json;

    use super::*;
    use crate::error::LoadError;

    #[test]
    fn synthesized_unmount_calls_destroy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let instance = ModuleInstance::new(json!({})).with_destroy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let handle = instance.clone();
        instance.ensure_unmount();
        assert!(handle.unmount());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn existing_unmount_is_kept() {
        let instance = ModuleInstance::new(json!({})).with_unmount(|| {});
        instance.ensure_unmount();
        assert!(instance.has_unmount());
    }

    #[test]
    fn sealed_instance_gets_no_unmount() {
        let instance = ModuleInstance::new(json!({})).sealed();
        instance.ensure_unmount();
        assert!(!instance.unmount());
    }

    #[test]
    fn primitive_instance_gets_no_unmount() {
        let instance = ModuleInstance::new(json!(42));
        instance.ensure_unmount();
        assert!(!instance.has_unmount());
    }

    #[test]
    fn whole_module_instance_collects_values() {
        let module = RemoteModule::new()
            .with_value("title", json!("Card"))
            .with_function("bootstrap", |_| {
                async { Ok::<_, LoadError>(ModuleInstance::default()) }.boxed()
            });
        assert!(module.function("bootstrap").is_some());
        assert!(module.instance("bootstrap").is_none());
        let instance = module.into_instance();
        assert_eq!(instance.value(), &json!({"title": "Card"}));
    }
}
