//! The process-wide service registry: the location store, the per-service
//! connection pool and the mode selected at construction.

use crate::{
    dialer::{DialOptions, DialTarget, Dialer, EndpointDialer, GrpcConnection},
    error::RegistryError,
    location::{canonical_name, LocationStore, ServiceLocation},
    remote::DirectoryRpc,
    shared_cache::SharedCloudConnections,
};
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
    time::Duration,
};

/// Well-known gRPC port used when a location omits one.
pub const DEFAULT_GRPC_PORT: u16 = 9180;

/// Well-known HTTP port used when a location omits one.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Name of the directory service itself.
pub const DIRECTORY_SERVICE: &str = "DIRECTORY";

/// Name of the local control proxy in the directory.
pub const CONTROL_PROXY_SERVICE: &str = "CONTROL_PROXY";

/// Environment variable selecting the registry mode.
pub const REGISTRY_MODE_ENV: &str = "SERVICE_REGISTRY_MODE";

const DOCKER_BOOTSTRAP_ADDR: &str = "directory:9180";
const K8S_BOOTSTRAP_ADDR: &str = "orc8r-directory:9180";

/// How directory queries are answered. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    /// Answer from the local location store.
    Static,
    /// Delegate to the remote directory service, Docker flavor.
    Docker,
    /// Delegate to the remote directory service, Kubernetes flavor.
    Kubernetes,
}

impl RegistryMode {
    /// Read the mode from [`REGISTRY_MODE_ENV`]. Unset or unrecognized
    /// values select [`RegistryMode::Static`].
    pub fn from_env() -> Self {
        match std::env::var(REGISTRY_MODE_ENV).as_deref() {
            Ok("docker") => RegistryMode::Docker,
            Ok("kubernetes") | Ok("k8s") => RegistryMode::Kubernetes,
            _ => RegistryMode::Static,
        }
    }

    /// The well-known address of the directory service in this mode. The
    /// directory cannot be discovered through itself, so this is fixed.
    pub fn bootstrap_address(self) -> &'static str {
        match self {
            // Unused in static mode, where the directory is the local store.
            RegistryMode::Static => DOCKER_BOOTSTRAP_ADDR,
            RegistryMode::Docker => DOCKER_BOOTSTRAP_ADDR,
            RegistryMode::Kubernetes => K8S_BOOTSTRAP_ADDR,
        }
    }

    pub(crate) fn is_remote(self) -> bool {
        !matches!(self, RegistryMode::Static)
    }
}

/// Service directory plus per-service connection pool.
///
/// All logic operates on an explicitly constructed instance so that tests and
/// multi-tenant processes can hold several independent registries; a
/// process-wide convenience instance is available through [`global`].
pub struct ServiceRegistry {
    mode: RegistryMode,
    pub(crate) locations: RwLock<LocationStore>,
    connections: RwLock<HashMap<String, GrpcConnection>>,
    pub(crate) dialer: Arc<dyn Dialer>,
    pub(crate) additional_dial_options: DialOptions,
    pub(crate) remote: Option<Arc<dyn DirectoryRpc>>,
    pub(crate) shared: SharedCloudConnections,
}

impl ServiceRegistry {
    /// A registry in the given mode with the production dialer.
    pub fn new(mode: RegistryMode) -> Self {
        Self::builder().mode(mode).build()
    }

    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    pub fn mode(&self) -> RegistryMode {
        self.mode
    }

    /// Upsert a location and drop any pooled connection cached under its
    /// name, forcing a redial on next use.
    pub fn add_location(&self, location: ServiceLocation) {
        let name = self
            .locations
            .write()
            .expect("location store lock poisoned")
            .add(location);
        self.drop_pooled(&name);
    }

    /// Upsert a batch of locations; each drops its pooled connection.
    pub fn add_locations(&self, locations: impl IntoIterator<Item = ServiceLocation>) {
        let names = self
            .locations
            .write()
            .expect("location store lock poisoned")
            .add_many(locations);
        for name in names {
            self.drop_pooled(&name);
        }
    }

    /// Remove a location and its pooled connection. Returns whether the
    /// location was present.
    pub fn remove_location(&self, name: &str) -> bool {
        let removed = self
            .locations
            .write()
            .expect("location store lock poisoned")
            .remove(name);
        self.drop_pooled(&canonical_name(name));
        removed
    }

    /// Remove every location carrying `label`, with their pooled
    /// connections. Returns the removed names.
    pub fn remove_locations_with_label(&self, label: &str) -> Vec<String> {
        let removed = self
            .locations
            .write()
            .expect("location store lock poisoned")
            .remove_with_label(label);
        for name in &removed {
            self.drop_pooled(name);
        }
        removed
    }

    /// Explicitly drop the pooled connection for a service, if any. The next
    /// [`get_connection`](Self::get_connection) will redial.
    pub fn remove_connection(&self, service: &str) -> bool {
        self.drop_pooled(&canonical_name(service))
    }

    fn drop_pooled(&self, canonical: &str) -> bool {
        self.connections
            .write()
            .expect("connection pool lock poisoned")
            .remove(canonical)
            .is_some()
    }

    /// A pooled connection to `service`, dialing on first use.
    pub async fn get_connection(&self, service: &str) -> Result<GrpcConnection, RegistryError> {
        self.get_connection_with_options(service, DialOptions::default())
            .await
    }

    /// Like [`get_connection`](Self::get_connection) with a per-request
    /// timeout applied to the dialed endpoint.
    ///
    /// The timeout bounds each RPC made over the connection, not the dial
    /// itself; connect attempts are bounded separately by
    /// [`DialOptions::connect_timeout`].
    pub async fn get_connection_with_timeout(
        &self,
        service: &str,
        timeout: Duration,
    ) -> Result<GrpcConnection, RegistryError> {
        self.get_connection_with_options(
            service,
            DialOptions {
                request_timeout: Some(timeout),
                ..Default::default()
            },
        )
        .await
    }

    /// A pooled connection dialed with `options` layered over the registry's
    /// additional dial options.
    ///
    /// Double-checked and race-tolerant: the fast path returns any cached
    /// connection under a shared lock without a liveness check (a stale
    /// connection fails the caller's RPC, and an explicit
    /// [`remove_connection`](Self::remove_connection) triggers the redial).
    /// On a miss the dial happens outside any lock; on completion the pool is
    /// re-checked under the exclusive lock, and if a concurrent caller won
    /// the race the fresh connection is closed and the installed one
    /// returned. At most one connection per name is ever installed.
    pub async fn get_connection_with_options(
        &self,
        service: &str,
        options: DialOptions,
    ) -> Result<GrpcConnection, RegistryError> {
        let name = canonical_name(service);

        if let Some(conn) = self
            .connections
            .read()
            .expect("connection pool lock poisoned")
            .get(&name)
        {
            return Ok(conn.clone());
        }

        let addr = self.dial_address(&name).await?;
        let options = self.additional_dial_options.clone().overlay(options);
        let dialed = self
            .dialer
            .dial(&DialTarget {
                addr,
                options,
            })
            .await?;

        let mut pool = self
            .connections
            .write()
            .expect("connection pool lock poisoned");
        match pool.get(&name) {
            Some(existing) => {
                // Lost the race: another caller installed a connection while
                // we were dialing. Ours is surplus.
                dialed.close();
                Ok(existing.clone())
            }
            None => {
                pool.insert(name, dialed.clone());
                Ok(dialed)
            }
        }
    }

    async fn dial_address(&self, canonical: &str) -> Result<String, RegistryError> {
        if self.mode.is_remote() && canonical == DIRECTORY_SERVICE {
            return Ok(self.mode.bootstrap_address().to_string());
        }
        self.get_service_address(canonical).await
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Configures and builds a [`ServiceRegistry`].
#[derive(Default)]
pub struct ServiceRegistryBuilder {
    mode: Option<RegistryMode>,
    dialer: Option<Arc<dyn Dialer>>,
    additional_dial_options: DialOptions,
    remote: Option<Arc<dyn DirectoryRpc>>,
}

impl ServiceRegistryBuilder {
    /// Set the registry mode. Defaults to [`RegistryMode::from_env`].
    pub fn mode(mut self, mode: RegistryMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Replace the production dialer, e.g. with a fake in tests.
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Options applied to every dial at the lowest precedence: per-call
    /// options and the cloud resolver's mandatory fields layer on top.
    pub fn additional_dial_options(mut self, options: DialOptions) -> Self {
        self.additional_dial_options = options;
        self
    }

    /// Replace the remote directory client used in orchestrated modes.
    pub fn remote_directory(mut self, remote: Arc<dyn DirectoryRpc>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry {
            mode: self.mode.unwrap_or_else(RegistryMode::from_env),
            locations: RwLock::new(LocationStore::new()),
            connections: RwLock::new(HashMap::new()),
            dialer: self.dialer.unwrap_or_else(|| Arc::new(EndpointDialer)),
            additional_dial_options: self.additional_dial_options,
            remote: self.remote,
            shared: SharedCloudConnections::new(),
        }
    }
}

static GLOBAL_REGISTRY: OnceLock<ServiceRegistry> = OnceLock::new();

/// The process-wide registry, constructed on first access with the mode from
/// the environment. Prefer passing an explicit [`ServiceRegistry`] where one
/// is available.
pub fn global() -> &'static ServiceRegistry {
    GLOBAL_REGISTRY.get_or_init(|| ServiceRegistry::new(RegistryMode::from_env()))
}

/// Install a custom process-wide registry. Returns false if one was already
/// built, in which case the supplied registry is dropped.
pub fn init_global(registry: ServiceRegistry) -> bool {
    GLOBAL_REGISTRY.set(registry).is_ok()
}
