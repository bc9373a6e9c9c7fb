//! Rich diagnostic error types for the module-cube sandbox.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. [`SandboxError`] wraps them all so a
//! host adapter can bubble any failure up through a single type.

use miette::Diagnostic;
use thiserror::Error;

use crate::dom::NodeId;

/// Top-level error type for the sandbox.
#[derive(Debug, Error, Diagnostic)]
pub enum SandboxError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Dom(#[from] DomError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Host document errors
// ---------------------------------------------------------------------------

/// Failures of the raw document primitives (the DOMException family).
#[derive(Debug, Error, Diagnostic)]
pub enum DomError {
    #[error("unknown node: {node}")]
    #[diagnostic(
        code(module_cube::dom::unknown_node),
        help("The node id does not belong to this document. Node ids are not portable between documents.")
    )]
    UnknownNode { node: NodeId },

    #[error("node {child} is not a child of {parent}")]
    #[diagnostic(
        code(module_cube::dom::not_a_child),
        help(
            "removeChild was called on a parent that does not own the node. \
             The node may already have been moved into a service host."
        )
    )]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("cannot insert {child} into {parent}: {reason}")]
    #[diagnostic(
        code(module_cube::dom::hierarchy_request),
        help("Only elements, shadow roots and the document can hold children, and a node cannot contain itself.")
    )]
    HierarchyRequest {
        parent: NodeId,
        child: NodeId,
        reason: String,
    },

    #[error("node {node} is not an element")]
    #[diagnostic(code(module_cube::dom::not_an_element))]
    NotAnElement { node: NodeId },

    #[error("element {host} already hosts a shadow root")]
    #[diagnostic(
        code(module_cube::dom::shadow_root_exists),
        help("attachShadow can only be called once per element.")
    )]
    ShadowRootExists { host: NodeId },

    #[error("invalid custom element name: {name}")]
    #[diagnostic(
        code(module_cube::dom::invalid_name),
        help("Custom element names must be lowercase and contain a hyphen, e.g. \"x-app\".")
    )]
    InvalidCustomElementName { name: String },

    #[error("custom element already defined: {name}")]
    #[diagnostic(code(module_cube::dom::already_defined))]
    AlreadyDefined { name: String },

    #[error("invalid insertAdjacentElement position: {position}")]
    #[diagnostic(
        code(module_cube::dom::invalid_position),
        help("Use one of beforebegin, afterbegin, beforeend, afterend.")
    )]
    InvalidPosition { position: String },

    #[error("getComputedStyle called on a non-element node {node}")]
    #[diagnostic(code(module_cube::dom::computed_style))]
    ComputedStyle { node: NodeId },
}

// ---------------------------------------------------------------------------
// Remote loading errors
// ---------------------------------------------------------------------------

/// Failures reported by the remote-loading collaborator.
#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("fetching {url} failed with status {status}")]
    #[diagnostic(
        code(module_cube::load::http_status),
        help("The remote entry responded with an HTTP error. Check that the service is deployed at that URL.")
    )]
    HttpStatus { url: String, status: u16 },

    #[error("failed to instantiate remote entry {url}: {message}")]
    #[diagnostic(code(module_cube::load::instantiate))]
    Instantiate { url: String, message: String },

    #[error("remote container {name} was not published on the global scope")]
    #[diagnostic(
        code(module_cube::load::missing_container),
        help("For `window` entries, `loaderOption.name` must match the library name the remote registers.")
    )]
    MissingContainer { name: String },

    #[error("remote module does not expose {name}")]
    #[diagnostic(code(module_cube::load::missing_export))]
    MissingExport { name: String },

    #[error("share scope initialisation failed: {message}")]
    #[diagnostic(
        code(module_cube::load::share_scope),
        help("The remote already owns a share scope. The loader keeps using the remote's scope.")
    )]
    ShareScope { message: String },

    #[error("mount failed: {message}")]
    #[diagnostic(code(module_cube::load::mount))]
    Mount { message: String },

    #[error("script {url} failed: {message}")]
    #[diagnostic(code(module_cube::load::script))]
    Script { url: String, message: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("invalid sandbox configuration: {message}")]
    #[diagnostic(
        code(module_cube::config::parse),
        help("The configuration must be TOML with an optional [sandbox] table and [[service]] tables.")
    )]
    Parse { message: String },

    #[error("failed to read configuration {path}: {source}")]
    #[diagnostic(code(module_cube::config::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for raw document operations.
pub type DomResult<T> = std::result::Result<T, DomError>;

/// Result type for remote loading.
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Convenience alias for functions returning sandbox results.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
