//! Global-variable isolation.
//!
//! Virtualized properties are stored per service: reads and writes made from
//! inside a service zone hit that service's bucket, everything else hits the
//! fallback bucket seeded with the value the property had before isolation.
//! Deleting a virtualized property is refused and leaves the buckets as they
//! are.

use std::collections::HashMap;
use std::sync::RwLock;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::zone::CallSite;

/// A global to isolate for a service (`jsSandboxProps` entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxProp {
    pub prop: String,
    /// Drop the service's value when one of its containers disconnects.
    #[serde(default)]
    pub need_clear: bool,
}

impl SandboxProp {
    pub fn new(prop: impl Into<String>) -> Self {
        Self {
            prop: prop.into(),
            need_clear: false,
        }
    }

    pub fn cleared(prop: impl Into<String>) -> Self {
        Self {
            prop: prop.into(),
            need_clear: true,
        }
    }
}

/// Property descriptor flags for plain globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyFlags {
    pub writable: bool,
    pub configurable: bool,
}

impl Default for PropertyFlags {
    fn default() -> Self {
        Self {
            writable: true,
            configurable: true,
        }
    }
}

#[derive(Debug, Clone)]
enum Property {
    Plain { value: Value, flags: PropertyFlags },
    Virtualized,
}

/// The shared global scope.
#[derive(Debug, Default)]
pub struct GlobalScope {
    properties: RwLock<HashMap<String, Property>>,
    fallback: RwLock<HashMap<String, Value>>,
    buckets: DashMap<String, HashMap<String, Value>>,
}

fn zone_service(site: &CallSite) -> Option<&str> {
    site.service_zone().and_then(|zone| zone.service_name())
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a plain property, bypassing isolation.
    pub fn define_raw(&self, prop: &str, value: Value, flags: PropertyFlags) {
        self.properties
            .write()
            .expect("globals lock poisoned")
            .insert(prop.to_string(), Property::Plain { value, flags });
    }

    pub fn is_virtualized(&self, prop: &str) -> bool {
        matches!(
            self.properties.read().expect("globals lock poisoned").get(prop),
            Some(Property::Virtualized)
        )
    }

    /// Virtualize `props`. Properties already virtualized, or frozen
    /// (non-writable or non-configurable), are left alone. Returns how many
    /// were newly virtualized.
    pub fn isolate(&self, props: &[SandboxProp]) -> usize {
        let mut properties = self.properties.write().expect("globals lock poisoned");
        let mut fallback = self.fallback.write().expect("globals lock poisoned");
        let mut count = 0;
        for SandboxProp { prop, .. } in props {
            let current = match properties.get(prop) {
                Some(Property::Virtualized) => continue,
                Some(Property::Plain { flags, .. }) if !flags.writable || !flags.configurable => {
                    continue;
                }
                Some(Property::Plain { value, .. }) => Some(value.clone()),
                None => None,
            };
            match current {
                Some(value) => fallback.insert(prop.clone(), value),
                None => fallback.remove(prop),
            };
            properties.insert(prop.clone(), Property::Virtualized);
            debug!(prop = %prop, "global virtualized");
            count += 1;
        }
        count
    }

    /// Read `prop` as seen from `site`.
    pub fn get(&self, site: &CallSite, prop: &str) -> Option<Value> {
        match self.properties.read().expect("globals lock poisoned").get(prop)? {
            Property::Plain { value, .. } => return Some(value.clone()),
            Property::Virtualized => {}
        }
        let own = zone_service(site).and_then(|service| {
            self.buckets
                .get(service)
                .and_then(|bucket| bucket.get(prop).cloned())
        });
        own.or_else(|| {
            self.fallback
                .read()
                .expect("globals lock poisoned")
                .get(prop)
                .cloned()
        })
    }

    /// Write `prop` from `site`. Returns `false` for non-writable globals.
    pub fn set(&self, site: &CallSite, prop: &str, value: Value) -> bool {
        let mut properties = self.properties.write().expect("globals lock poisoned");
        match properties.get_mut(prop) {
            Some(Property::Virtualized) => {}
            Some(Property::Plain { flags, .. }) if !flags.writable => return false,
            Some(Property::Plain { value: slot, .. }) => {
                *slot = value;
                return true;
            }
            None => {
                properties.insert(
                    prop.to_string(),
                    Property::Plain {
                        value,
                        flags: PropertyFlags::default(),
                    },
                );
                return true;
            }
        }
        drop(properties);
        match zone_service(site) {
            Some(service) => {
                self.buckets
                    .entry(service.to_string())
                    .or_default()
                    .insert(prop.to_string(), value);
            }
            None => {
                self.fallback
                    .write()
                    .expect("globals lock poisoned")
                    .insert(prop.to_string(), value);
            }
        }
        true
    }

    /// `delete globalThis[prop]`. Virtualized properties cannot be deleted.
    pub fn delete(&self, prop: &str) -> bool {
        let mut properties = self.properties.write().expect("globals lock poisoned");
        match properties.get(prop) {
            Some(Property::Virtualized) => false,
            Some(Property::Plain { flags, .. }) if !flags.configurable => false,
            Some(Property::Plain { .. }) => {
                properties.remove(prop);
                true
            }
            None => true,
        }
    }

    /// The value a service wrote for `prop`, if any.
    pub fn service_value(&self, service: &str, prop: &str) -> Option<Value> {
        self.buckets.get(service)?.get(prop).cloned()
    }

    pub fn fallback_value(&self, prop: &str) -> Option<Value> {
        self.fallback
            .read()
            .expect("globals lock poisoned")
            .get(prop)
            .cloned()
    }

    /// Forget a service's value for `prop`.
    pub fn clear_service_value(&self, service: &str, prop: &str) -> bool {
        self.buckets
            .get_mut(service)
            .is_some_and(|mut bucket| bucket.remove(prop).is_some())
    }
}
