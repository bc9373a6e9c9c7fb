//! Sandbox configuration, loadable from TOML.
//!
//! ```toml
//! [sandbox]
//! max_stack = 50
//! need_stack_analysis = true
//!
//! [[service]]
//! name = "app1"
//! need_shadow_dom = true
//! inner_selectors = ["[data-app1]"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::service::ServiceOptions;

/// Default custom-element tag for service containers.
pub const DEFAULT_TAG_NAME: &str = "module-cube";

/// Process-wide sandbox options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Frames kept from each captured call stack.
    #[serde(default = "default_max_stack")]
    pub max_stack: usize,
    /// Install the interception layer at init.
    #[serde(default = "default_true")]
    pub need_patched: bool,
    /// Give containers a shadow boundary when the service allows it.
    #[serde(default = "default_true")]
    pub need_shadow_dom: bool,
    /// Enable the call-stack attribution tier.
    #[serde(default)]
    pub need_stack_analysis: bool,
    /// Tag of the container custom element.
    #[serde(default = "default_tag_name")]
    pub module_cube_tag_name: String,
}

fn default_max_stack() -> usize {
    50
}
fn default_true() -> bool {
    true
}
fn default_tag_name() -> String {
    DEFAULT_TAG_NAME.into()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_stack: default_max_stack(),
            need_patched: true,
            need_shadow_dom: true,
            need_stack_analysis: false,
            module_cube_tag_name: default_tag_name(),
        }
    }
}

impl SandboxConfig {
    /// Parse a bare `SandboxConfig` (no `[sandbox]` table wrapper).
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }
}

/// A configuration file: sandbox options plus pre-registered services.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceOptions>,
}

impl ConfigFile {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }
}
