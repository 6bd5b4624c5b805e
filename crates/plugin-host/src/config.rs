//! Host Configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `PLUGIN_HOST_*` environment variables, then command line flags.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::js::{GlobalPolicy, RuntimeOptions};

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "PLUGIN_HOST_";

pub const DEFAULT_PORT: u16 = 4243;

/// Resolved configuration for the plugin host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Address to bind
    pub host: String,
    pub port: u16,
    /// Directory relative plugin module paths resolve against
    pub plugin_root: PathBuf,
    /// QuickJS heap limit. `None` leaves the engine default.
    pub js_memory_limit_bytes: Option<usize>,
    pub js_max_stack_size: Option<usize>,
    /// Globals to neutralize on top of the platform policy
    pub extra_denied_globals: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            plugin_root: PathBuf::from("."),
            js_memory_limit_bytes: None,
            js_max_stack_size: None,
            extra_denied_globals: Vec::new(),
        }
    }
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_root: Option<PathBuf>,
}

impl HostConfig {
    /// Defaults, file and environment layers, without command line flags
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(HostConfig::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Resolve every layer into a config
    pub fn load(config_file: Option<&Path>, overrides: &CliOverrides) -> Result<Self, figment::Error> {
        Self::figment(config_file)
            .merge(Serialized::defaults(overrides))
            .extract()
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Engine settings for the plugin worker
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            name: "plugin-host".to_string(),
            module_root: Some(self.plugin_root.clone()),
            memory_limit: self.js_memory_limit_bytes,
            max_stack_size: self.js_max_stack_size,
        }
    }

    /// Platform policy plus any extra denied names
    pub fn global_policy(&self) -> GlobalPolicy {
        GlobalPolicy::standard().with_denied(self.extra_denied_globals.iter().cloned())
    }
}
