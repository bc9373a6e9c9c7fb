//! Attribution: decide which service a mutation or global access belongs to.
//!
//! Tiers, first hit wins:
//!
//! 1. **Predicate**: each service's `check_service` in registration order
//!    (only when a hint is supplied).
//! 2. **Context**: the nearest service zone on the call site.
//! 3. **Stack**: [`StackHeuristic`], only when enabled for the sandbox.

use std::sync::OnceLock;

use tracing::trace;

use crate::service::{MutationHint, ServiceRegistry};
use crate::zone::CallSite;

/// Marker present in frames that come from the shared framework's DOM
/// insertion code.
const APPEND_MARKER: &str = ".appendChild";

/// The service a call was attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    /// Container id; only known from the context tier.
    pub service_id: Option<String>,
    pub service_name: String,
}

impl ServiceRef {
    pub fn named(service_name: impl Into<String>) -> Self {
        Self {
            service_id: None,
            service_name: service_name.into(),
        }
    }

    pub fn with_id(service_id: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id.into()),
            service_name: service_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Predicate,
    Context,
    Stack,
}

/// Fallback attribution from captured stack frames.
///
/// Heuristic: frames are matched by substring against service names. The
/// "main" service is the one whose bundle hosts the shared framework's
/// `.appendChild`; it is memoized the first time one is found and never
/// re-evaluated. Another service named anywhere in the stack beats the main
/// service.
#[derive(Debug)]
pub struct StackHeuristic {
    max_stack: usize,
    main_service: OnceLock<String>,
}

impl StackHeuristic {
    pub fn new(max_stack: usize) -> Self {
        Self {
            max_stack,
            main_service: OnceLock::new(),
        }
    }

    pub fn main_service(&self) -> Option<&str> {
        self.main_service.get().map(String::as_str)
    }

    pub fn resolve(&self, services: &ServiceRegistry, frames: &[String]) -> Option<String> {
        let names = services.names();
        let frames = &frames[..frames.len().min(self.max_stack)];
        let origins: Vec<&str> = frames.iter().map(|frame| strip_origin(frame)).collect();

        let main = match self.main_service.get() {
            Some(main) => Some(main.as_str()),
            None => match discover_main(frames, &origins, &names) {
                Some(found) => Some(self.main_service.get_or_init(|| found.to_string()).as_str()),
                None => None,
            },
        };

        let candidate = origins
            .iter()
            .find_map(|origin| {
                names
                    .iter()
                    .find(|name| Some(name.as_str()) != main && origin.contains(name.as_str()))
            })
            .map(String::as_str)
            .or(main)?;

        // A service that opted out of stack analysis is never returned here.
        let allowed = services
            .get(candidate)
            .is_none_or(|config| config.need_stack_analysis);
        allowed.then(|| candidate.to_string())
    }
}

/// Keep a frame from its first `//` (the script origin) onwards.
fn strip_origin(frame: &str) -> &str {
    match frame.find("//") {
        Some(i) => &frame[i..],
        None => frame,
    }
}

/// The marker is looked up in the raw frame (it precedes the origin in
/// engine stack formats); service names are matched against the origin.
fn discover_main<'a>(frames: &[String], origins: &[&str], names: &'a [String]) -> Option<&'a str> {
    frames
        .iter()
        .zip(origins)
        .filter(|(frame, _)| frame.find(APPEND_MARKER).is_some_and(|i| i > 0))
        .find_map(|(_, origin)| names.iter().find(|name| origin.contains(name.as_str())))
        .map(String::as_str)
}

/// Three-tier resolver.
#[derive(Debug)]
pub struct AttributionResolver {
    stack_enabled: bool,
    stack: StackHeuristic,
}

impl AttributionResolver {
    pub fn new(stack_enabled: bool, max_stack: usize) -> Self {
        Self {
            stack_enabled,
            stack: StackHeuristic::new(max_stack),
        }
    }

    pub fn stack(&self) -> &StackHeuristic {
        &self.stack
    }

    pub fn resolve(
        &self,
        services: &ServiceRegistry,
        site: &CallSite,
        hint: Option<&MutationHint>,
    ) -> Option<ServiceRef> {
        self.resolve_with_tier(services, site, hint).map(|(service, _)| service)
    }

    pub fn resolve_with_tier(
        &self,
        services: &ServiceRegistry,
        site: &CallSite,
        hint: Option<&MutationHint>,
    ) -> Option<(ServiceRef, Tier)> {
        if let Some(hint) = hint {
            let matched = services.all().into_iter().find(|config| {
                config
                    .check_service
                    .as_ref()
                    .is_some_and(|check| check(hint))
            });
            if let Some(config) = matched {
                trace!(service = %config.name, "attributed by predicate");
                return Some((ServiceRef::named(config.name), Tier::Predicate));
            }
        }

        if let Some(zone) = site.service_zone() {
            let name = zone.service_name().unwrap_or_default();
            trace!(service = %name, id = %zone.name(), "attributed by zone");
            return Some((ServiceRef::with_id(zone.name(), name), Tier::Context));
        }

        if !self.stack_enabled {
            return None;
        }
        let name = self.stack.resolve(services, &site.stack)?;
        trace!(service = %name, "attributed by call stack");
        Some((ServiceRef::named(name), Tier::Stack))
    }
}
