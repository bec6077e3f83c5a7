//! `registro` is an in-process service directory and gRPC connection manager
//! for [`tonic`]: it maps service names to locations, hands out pooled
//! client connections with at-most-one-dial-in-flight semantics, and manages
//! long-lived connections across an on-premises/cloud boundary, either
//! through a local forwarding proxy or directly over TLS.
//!
//! # Resolving addresses from a static directory
//!
//! ```rust
//! #[tokio::main]
//! async fn main() {
//!     use registro::{RegistryMode, ServiceLocation, ServiceRegistry};
//!
//!     let registry = ServiceRegistry::builder()
//!         .mode(RegistryMode::Static)
//!         .build();
//!     registry.add_location(ServiceLocation::new("state", "10.0.0.1", 9180));
//!
//!     let address = registry
//!         .get_service_address("state")
//!         .await
//!         .expect("state is registered");
//!     assert_eq!(address, "10.0.0.1:9180");
//! }
//! ```
//!
//! # Pooled connections
//!
//! Connections are dialed on first use and cached per service name. Any
//! number of callers may race on the same name; exactly one dialed
//! connection is installed and shared, the rest are closed.
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() {
//!     use registro::{RegistryMode, ServiceLocation, ServiceRegistry};
//!
//!     let registry = ServiceRegistry::builder()
//!         .mode(RegistryMode::Static)
//!         .build();
//!     registry.add_location(ServiceLocation::new("state", "10.0.0.1", 9180));
//!
//!     let conn = registry
//!         .get_connection("state")
//!         .await
//!         .expect("failed to reach state");
//!     // Build any tonic client on top; pair the channel with
//!     // `TimeoutInterceptor` so every call gets a bounded deadline.
//!     let _channel = conn.channel();
//! }
//! ```
//!
//! # Shared cloud connections
//!
//! Cloud-bound connections are cached per service with a TTL and replaced
//! when expired or unhealthy. An expired connection keeps serving while its
//! replacement dial is failing: availability is preferred over freshness.
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() {
//!     use registro::{ControlProxyConfig, RegistryMode, ServiceRegistry};
//!
//!     let config = ControlProxyConfig::from_file("/etc/gateway/control_proxy.yml")
//!         .expect("control proxy config");
//!     let registry = ServiceRegistry::builder()
//!         .mode(RegistryMode::from_env())
//!         .build();
//!
//!     let conn = registry
//!         .get_shared_cloud_connection_with_config(&config, "bootstrapper")
//!         .await
//!         .expect("failed to reach the cloud");
//!     let _channel = conn.channel();
//! }
//! ```
//!
//! # Modes
//!
//! In [`RegistryMode::Static`] every directory query reads the local
//! location store, populated from static services documents. In
//! [`RegistryMode::Docker`] and [`RegistryMode::Kubernetes`] queries are
//! delegated over RPC to a remote directory service reached at a well-known
//! bootstrap address, since the directory cannot discover its own address
//! through itself.

mod cloud;
mod config;
mod dialer;
mod directory;
mod error;
mod interceptor;
mod location;
mod registry;
pub mod remote;
mod shared_cache;
#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    control_proxy_config, flush_control_proxy_config, load_services_from_dir, ControlProxyConfig,
    ProxyAlias, ServiceEntry, ServicesDocument, CONTROL_PROXY_CONFIG_ENV,
    DEFAULT_CONTROL_PROXY_CONFIG,
};
pub use dialer::{
    DialOptions, DialTarget, Dialer, EndpointDialer, GrpcConnection, DEFAULT_CONNECT_TIMEOUT,
};
pub use error::{BoxError, RegistryError};
pub use interceptor::{
    GatewayClientInterceptor, TimeoutInterceptor, DEFAULT_RPC_TIMEOUT, GATEWAY_ORIGIN_HEADER,
};
pub use location::{canonical_name, LocationStore, ServiceLocation};
pub use registry::{
    global, init_global, RegistryMode, ServiceRegistry, ServiceRegistryBuilder,
    CONTROL_PROXY_SERVICE, DEFAULT_GRPC_PORT, DEFAULT_HTTP_PORT, DIRECTORY_SERVICE,
    REGISTRY_MODE_ENV,
};
pub use shared_cache::{CLOSE_GRACE_PERIOD, DEFAULT_SHARED_CONNECTION_TTL};
