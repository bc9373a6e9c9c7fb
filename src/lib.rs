// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # module-cube
//!
//! A micro-frontend sandbox: several independently built services share one
//! document, and every style, link and element a service inserts is routed
//! into that service's own container.
//!
//! ## Architecture
//!
//! - **Host document** (`dom`): arena document with the raw primitives the sandbox intercepts
//! - **Attribution** (`resolver`): predicate → zone → call-stack tiers decide which service acted
//! - **Interception** (`sandbox`): patched append/remove/query entry points and the `load` pipeline
//! - **Styles** (`css`, `materialize`): shadow-boundary rewriting, per-service caches, rehydration
//! - **Zones & globals** (`zone`, `globals`): explicit call contexts and per-service global values
//! - **Remote loading** (`loader`): memoized remote entries, share scopes, mountable instances
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use module_cube::config::SandboxConfig;
//! use module_cube::dom::Document;
//! use module_cube::error::{LoadError, LoadResult};
//! use module_cube::loader::{LoaderOption, Mountable, RemoteLoader};
//! use module_cube::sandbox::Sandbox;
//! use module_cube::service::ServiceOptions;
//! use module_cube::zone::CallSite;
//!
//! struct NoRemotes;
//!
//! #[async_trait::async_trait]
//! impl RemoteLoader for NoRemotes {
//!     async fn load(&self, option: &LoaderOption, _site: &CallSite) -> LoadResult<Box<dyn Mountable>> {
//!         Err(LoadError::MissingContainer { name: option.name.clone() })
//!     }
//! }
//!
//! let document = Document::new().into_shared();
//! let sandbox = Sandbox::new(SandboxConfig::default(), document.clone(), Arc::new(NoRemotes)).unwrap();
//! sandbox.add_service("app1", ServiceOptions::new().check_service(|hint| hint.text.contains(".app1")));
//!
//! let (head, style) = {
//!     let mut doc = document.lock().unwrap();
//!     let style = doc.create_element("style");
//!     doc.set_text_content(style, ".app1 { color: red }").unwrap();
//!     (doc.head(), style)
//! };
//! sandbox.append_child(&CallSite::root(), head, style).unwrap();
//! assert_eq!(sandbox.styles().styles("app1").len(), 1);
//! ```

pub mod config;
pub mod css;
pub mod dom;
pub mod error;
pub mod globals;
pub mod loader;
pub mod materialize;
pub mod module;
pub mod resolver;
pub mod sandbox;
pub mod service;
pub mod zone;

pub use error::{SandboxError, SandboxResult};
pub use sandbox::Sandbox;
