//! External configuration documents consumed by the registry: the static
//! services mapping and the control-proxy parameters, plus the process-wide
//! lazily loaded control-proxy config holder.

use crate::{
    error::RegistryError,
    location::{canonical_name, ServiceLocation},
};
use arc_swap::ArcSwapOption;
use serde::Deserialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Environment variable overriding the control-proxy config file location.
pub const CONTROL_PROXY_CONFIG_ENV: &str = "CONTROL_PROXY_CONFIG";

/// Default control-proxy config file.
pub const DEFAULT_CONTROL_PROXY_CONFIG: &str = "/etc/gateway/control_proxy.yml";

/// One entry of the static `services:` mapping.
///
/// `host` is preferred; `ip_address` is the legacy spelling. An entry missing
/// both, or missing `port`, fails to load.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEntry {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub echo_port: u16,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub proxy_aliases: HashMap<String, ProxyAlias>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyAlias {
    pub port: u16,
}

/// A per-module static services document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicesDocument {
    #[serde(default)]
    pub services: HashMap<String, ServiceEntry>,
}

impl ServicesDocument {
    /// Parse a document from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, RegistryError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RegistryError::config(format!("malformed services document: {e}")))
    }

    /// Parse a document from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    /// Convert the document into service locations. Names are upper-cased.
    pub fn into_locations(self) -> Result<Vec<ServiceLocation>, RegistryError> {
        let mut locations = Vec::with_capacity(self.services.len());
        for (name, entry) in self.services {
            locations.push(entry.into_location(&name)?);
        }
        Ok(locations)
    }
}

impl ServiceEntry {
    fn into_location(self, name: &str) -> Result<ServiceLocation, RegistryError> {
        let host = self
            .host
            .or(self.ip_address)
            .ok_or_else(|| RegistryError::config(format!("service {name} has no host")))?;
        let port = self
            .port
            .ok_or_else(|| RegistryError::config(format!("service {name} has no port")))?;

        Ok(ServiceLocation {
            name: canonical_name(name),
            host,
            grpc_port: port,
            echo_port: self.echo_port,
            labels: self.labels,
            annotations: self.annotations,
            proxy_aliases: self
                .proxy_aliases
                .into_iter()
                .map(|(alias, a)| (alias, a.port))
                .collect(),
        })
    }
}

/// Load every `*.yml` document under `dir` and collect their locations.
pub fn load_services_from_dir(dir: impl AsRef<Path>) -> Result<Vec<ServiceLocation>, RegistryError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| RegistryError::config(format!("cannot read {}: {e}", dir.display())))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext == "yml" || ext == "yaml"))
        .collect();
    files.sort();

    let mut locations = Vec::new();
    for file in files {
        locations.extend(ServicesDocument::from_file(&file)?.into_locations()?);
    }
    Ok(locations)
}

/// Parameters of the local control proxy and the cloud it fronts.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlProxyConfig {
    /// Cloud controller address the authority string is derived from.
    pub cloud_address: String,
    /// Local forwarding port of the control proxy.
    #[serde(default)]
    pub local_port: u16,
    /// Route cloud connections through the local proxy. Defaults to true.
    #[serde(default = "default_proxy_cloud_connections")]
    pub proxy_cloud_connections: bool,
    /// Port for direct (unproxied) cloud connections.
    #[serde(default)]
    pub cloud_port: u16,
    /// Optional root CA bundle appended to the OS trust store.
    #[serde(default)]
    pub rootca_cert: Option<String>,
    /// Optional client certificate presented to the cloud.
    #[serde(default)]
    pub gateway_cert: Option<String>,
    /// Private key matching `gateway_cert`.
    #[serde(default)]
    pub gateway_key: Option<String>,
}

fn default_proxy_cloud_connections() -> bool {
    true
}

impl ControlProxyConfig {
    /// Parse a control-proxy document from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, RegistryError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RegistryError::config(format!("malformed control proxy config: {e}")))
    }

    /// Parse a control-proxy document from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    fn load_default() -> Result<Self, RegistryError> {
        let path = std::env::var(CONTROL_PROXY_CONFIG_ENV)
            .unwrap_or_else(|_| DEFAULT_CONTROL_PROXY_CONFIG.to_string());
        Self::from_file(path)
    }
}

// Swapped in once on first successful load. Concurrent first loads are
// tolerated: the loaded value is immutable, so the last redundant store wins
// harmlessly. Never invalidated automatically.
static CONTROL_PROXY: ArcSwapOption<ControlProxyConfig> = ArcSwapOption::const_empty();

/// The process-wide control-proxy configuration, loaded lazily on first use
/// from [`DEFAULT_CONTROL_PROXY_CONFIG`] (or the [`CONTROL_PROXY_CONFIG_ENV`]
/// override).
pub fn control_proxy_config() -> Result<Arc<ControlProxyConfig>, RegistryError> {
    if let Some(cached) = CONTROL_PROXY.load_full() {
        return Ok(cached);
    }
    let loaded = Arc::new(ControlProxyConfig::load_default()?);
    CONTROL_PROXY.store(Some(loaded.clone()));
    Ok(loaded)
}

/// Drop the cached control-proxy configuration so that the next
/// [`control_proxy_config`] call reloads it from disk. A config change
/// requires this explicit flush (or a process restart).
pub fn flush_control_proxy_config() {
    CONTROL_PROXY.store(None);
}
