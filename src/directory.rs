//! The directory facade: name and label queries answered either from the
//! local location store (static mode) or by delegating to the remote
//! directory service over RPC (orchestrated modes).

use crate::{
    config::{load_services_from_dir, ServicesDocument},
    error::RegistryError,
    location::{canonical_name, ServiceLocation},
    registry::{ServiceRegistry, DIRECTORY_SERVICE},
    remote::{DirectoryRpc, GrpcDirectory},
};
use std::{collections::HashMap, path::Path, sync::Arc};

impl ServiceRegistry {
    /// Names of all registered services.
    pub async fn list_all_services(&self) -> Result<Vec<String>, RegistryError> {
        if self.mode().is_remote() {
            return self.remote_directory().await?.list_all_services().await;
        }
        Ok(self
            .locations
            .read()
            .expect("location store lock poisoned")
            .list())
    }

    /// Names of every service carrying `label`.
    pub async fn find_services(&self, label: &str) -> Result<Vec<String>, RegistryError> {
        if self.mode().is_remote() {
            return self.remote_directory().await?.find_services(label).await;
        }
        Ok(self
            .locations
            .read()
            .expect("location store lock poisoned")
            .find(label))
    }

    /// The `host:port` gRPC address of a service.
    ///
    /// Fails with [`RegistryError::NotRegistered`] for an unknown name and
    /// with [`RegistryError::NotAvailable`] for a known name whose gRPC port
    /// is zero.
    pub async fn get_service_address(&self, service: &str) -> Result<String, RegistryError> {
        if self.mode().is_remote() {
            let address = self
                .remote_directory()
                .await?
                .get_service_address(&canonical_name(service))
                .await?;
            return require_available(service, "grpc", address);
        }
        self.with_location(service, |loc| match loc.grpc_port {
            0 => Err(RegistryError::NotAvailable {
                service: loc.name.clone(),
                endpoint: "grpc",
            }),
            port => Ok(format!("{}:{port}", loc.host)),
        })
    }

    /// The `host:port` auxiliary HTTP address of a service. Fails like
    /// [`get_service_address`](Self::get_service_address), keyed on the echo
    /// port.
    pub async fn get_http_server_address(&self, service: &str) -> Result<String, RegistryError> {
        if self.mode().is_remote() {
            let address = self
                .remote_directory()
                .await?
                .get_http_server_address(&canonical_name(service))
                .await?;
            return require_available(service, "http", address);
        }
        self.with_location(service, |loc| match loc.echo_port {
            0 => Err(RegistryError::NotAvailable {
                service: loc.name.clone(),
                endpoint: "http",
            }),
            port => Ok(format!("{}:{port}", loc.host)),
        })
    }

    /// The gRPC port of a service. In orchestrated modes this is parsed out
    /// of the remotely resolved address.
    pub async fn get_service_port(&self, service: &str) -> Result<u16, RegistryError> {
        if self.mode().is_remote() {
            let address = self.get_service_address(service).await?;
            return parse_port(&address);
        }
        self.with_location(service, |loc| match loc.grpc_port {
            0 => Err(RegistryError::NotAvailable {
                service: loc.name.clone(),
                endpoint: "grpc",
            }),
            port => Ok(port),
        })
    }

    /// The auxiliary HTTP port of a service.
    pub async fn get_echo_server_port(&self, service: &str) -> Result<u16, RegistryError> {
        if self.mode().is_remote() {
            let address = self.get_http_server_address(service).await?;
            return parse_port(&address);
        }
        self.with_location(service, |loc| match loc.echo_port {
            0 => Err(RegistryError::NotAvailable {
                service: loc.name.clone(),
                endpoint: "http",
            }),
            port => Ok(port),
        })
    }

    /// Alternate `host:port` aliases of a service, for diagnostics. Always
    /// answered locally: the remote directory contract does not carry
    /// aliases.
    pub fn get_service_proxy_aliases(
        &self,
        service: &str,
    ) -> Result<HashMap<String, u16>, RegistryError> {
        self.with_location(service, |loc| Ok(loc.proxy_aliases.clone()))
    }

    /// The raw value of an annotation.
    pub async fn get_annotation(
        &self,
        service: &str,
        annotation: &str,
    ) -> Result<String, RegistryError> {
        if self.mode().is_remote() {
            return self
                .remote_directory()
                .await?
                .get_annotation(&canonical_name(service), annotation)
                .await;
        }
        self.with_location(service, |loc| {
            loc.annotations.get(annotation).cloned().ok_or_else(|| {
                RegistryError::AnnotationNotFound {
                    service: loc.name.clone(),
                    annotation: annotation.to_string(),
                }
            })
        })
    }

    /// An annotation parsed as a comma-separated list: fields are stripped of
    /// all whitespace (embedded newlines included) and dropped when empty.
    /// Order and duplicates are preserved.
    pub async fn get_annotation_list(
        &self,
        service: &str,
        annotation: &str,
    ) -> Result<Vec<String>, RegistryError> {
        let raw = self.get_annotation(service, annotation).await?;
        Ok(split_annotation_list(&raw))
    }

    /// Load every services document under `dir` into the directory.
    pub fn populate_from_dir(&self, dir: impl AsRef<Path>) -> Result<(), RegistryError> {
        self.add_locations(load_services_from_dir(dir)?);
        Ok(())
    }

    /// Load already-parsed services documents into the directory.
    pub fn populate_from_documents(
        &self,
        documents: impl IntoIterator<Item = ServicesDocument>,
    ) -> Result<(), RegistryError> {
        let mut locations = Vec::new();
        for document in documents {
            locations.extend(document.into_locations()?);
        }
        self.add_locations(locations);
        Ok(())
    }

    fn with_location<T>(
        &self,
        service: &str,
        f: impl FnOnce(&ServiceLocation) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let store = self.locations.read().expect("location store lock poisoned");
        match store.get(service) {
            Some(location) => f(location),
            None => Err(RegistryError::NotRegistered {
                service: canonical_name(service),
            }),
        }
    }

    /// The remote directory client, reached through the connection pool at
    /// the well-known bootstrap address. The directory cannot resolve itself
    /// through itself.
    pub(crate) async fn remote_directory(
        &self,
    ) -> Result<Arc<dyn DirectoryRpc>, RegistryError> {
        if let Some(remote) = &self.remote {
            return Ok(remote.clone());
        }
        let target = self.mode().bootstrap_address().to_string();
        let conn = Box::pin(self.get_connection(DIRECTORY_SERVICE))
            .await
            .map_err(|source| RegistryError::BootstrapUnavailable {
                target,
                source: Box::new(source),
            })?;
        Ok(Arc::new(GrpcDirectory::new(conn)))
    }
}

fn require_available(
    service: &str,
    endpoint: &'static str,
    address: String,
) -> Result<String, RegistryError> {
    if address.is_empty() {
        return Err(RegistryError::NotAvailable {
            service: canonical_name(service),
            endpoint,
        });
    }
    Ok(address)
}

fn parse_port(address: &str) -> Result<u16, RegistryError> {
    address
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .ok_or_else(|| {
            RegistryError::config(format!("directory returned malformed address {address}"))
        })
}

fn split_annotation_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|field| field.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|field| !field.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::RegistryMode,
        testing::{FakeDialer, FakeDirectory},
    };
    use std::sync::Arc;

    fn static_registry() -> ServiceRegistry {
        ServiceRegistry::builder()
            .mode(RegistryMode::Static)
            .dialer(Arc::new(FakeDialer::new()))
            .build()
    }

    fn remote_registry(directory: Arc<FakeDirectory>) -> ServiceRegistry {
        ServiceRegistry::builder()
            .mode(RegistryMode::Docker)
            .dialer(Arc::new(FakeDialer::new()))
            .remote_directory(directory)
            .build()
    }

    #[tokio::test]
    async fn unregistered_and_unavailable_fail_distinctly() {
        let registry = static_registry();
        let mut portless = ServiceLocation::new("metricsd", "10.0.0.1", 0);
        portless.echo_port = 0;
        registry.add_location(portless);

        assert!(matches!(
            registry.get_service_address("missing").await.unwrap_err(),
            RegistryError::NotRegistered { .. }
        ));
        assert!(matches!(
            registry.get_service_address("metricsd").await.unwrap_err(),
            RegistryError::NotAvailable { .. }
        ));
        assert!(matches!(
            registry.get_service_port("metricsd").await.unwrap_err(),
            RegistryError::NotAvailable { .. }
        ));
        assert!(matches!(
            registry
                .get_http_server_address("metricsd")
                .await
                .unwrap_err(),
            RegistryError::NotAvailable { .. }
        ));
    }

    #[tokio::test]
    async fn addresses_and_ports_resolve_locally_in_static_mode() {
        let registry = static_registry();
        let mut loc = ServiceLocation::new("state", "10.0.0.7", 9180);
        loc.echo_port = 8080;
        registry.add_location(loc);

        assert_eq!(
            registry.get_service_address("state").await.unwrap(),
            "10.0.0.7:9180"
        );
        assert_eq!(
            registry.get_http_server_address("state").await.unwrap(),
            "10.0.0.7:8080"
        );
        assert_eq!(registry.get_service_port("state").await.unwrap(), 9180);
        assert_eq!(registry.get_echo_server_port("state").await.unwrap(), 8080);
    }

    #[tokio::test]
    async fn annotation_list_strips_whitespace_and_drops_empty_fields() {
        let registry = static_registry();
        let mut loc = ServiceLocation::new("state", "10.0.0.1", 9180);
        loc.annotations.insert(
            "networks".to_string(),
            "  a,       b, c,\n\nd,    e,\n\n  f,  \n  ".to_string(),
        );
        loc.annotations.insert("empty".to_string(), String::new());
        loc.annotations.insert("blank".to_string(), " \n \t ".to_string());
        registry.add_location(loc);

        assert_eq!(
            registry.get_annotation_list("state", "networks").await.unwrap(),
            vec!["a", "b", "c", "d", "e", "f"]
        );
        assert!(registry
            .get_annotation_list("state", "empty")
            .await
            .unwrap()
            .is_empty());
        assert!(registry
            .get_annotation_list("state", "blank")
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            registry
                .get_annotation_list("state", "unset")
                .await
                .unwrap_err(),
            RegistryError::AnnotationNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn list_and_find_read_the_local_store() {
        let registry = static_registry();
        let mut a = ServiceLocation::new("b_service", "10.0.0.1", 9180);
        a.labels.insert("orchestrator".into(), String::new());
        registry.add_location(a);
        registry.add_location(ServiceLocation::new("a_service", "10.0.0.2", 9180));

        assert_eq!(
            registry.list_all_services().await.unwrap(),
            vec!["A_SERVICE", "B_SERVICE"]
        );
        assert_eq!(
            registry.find_services("orchestrator").await.unwrap(),
            vec!["B_SERVICE"]
        );
    }

    #[tokio::test]
    async fn orchestrated_modes_delegate_to_the_remote_directory() {
        let directory = Arc::new(FakeDirectory::default());
        directory.set_address("STATE", "orc8r-state:9180");
        directory.set_annotation("STATE", "networks", "lte,\nwifi");
        let registry = remote_registry(directory.clone());

        assert_eq!(
            registry.get_service_address("state").await.unwrap(),
            "orc8r-state:9180"
        );
        assert_eq!(registry.get_service_port("state").await.unwrap(), 9180);
        assert_eq!(
            registry.get_annotation_list("state", "networks").await.unwrap(),
            vec!["lte", "wifi"]
        );
        assert!(matches!(
            registry.get_service_address("unknown").await.unwrap_err(),
            RegistryError::NotRegistered { .. }
        ));
    }

    #[tokio::test]
    async fn remote_http_and_label_queries_delegate_too() {
        let directory = Arc::new(FakeDirectory::default());
        directory.set_http_address("STATE", "orc8r-state:8080");
        directory.set_http_address("SUBSCRIBERDB", "");
        directory.set_label("orc8r", &["STATE", "SUBSCRIBERDB"]);
        let registry = remote_registry(directory.clone());

        assert_eq!(
            registry.get_http_server_address("state").await.unwrap(),
            "orc8r-state:8080"
        );
        assert_eq!(registry.get_echo_server_port("state").await.unwrap(), 8080);
        // The directory knows the name but reports no address for it.
        assert!(matches!(
            registry
                .get_http_server_address("subscriberdb")
                .await
                .unwrap_err(),
            RegistryError::NotAvailable { .. }
        ));
        assert_eq!(
            registry.find_services("orc8r").await.unwrap(),
            vec!["STATE", "SUBSCRIBERDB"]
        );
    }

    #[tokio::test]
    async fn proxy_aliases_are_local_even_in_orchestrated_modes() {
        let registry = remote_registry(Arc::new(FakeDirectory::default()));
        let mut loc = ServiceLocation::new("state", "10.0.0.1", 9180);
        loc.proxy_aliases.insert("state_sidecar".into(), 9280);
        registry.add_location(loc);

        let aliases = registry.get_service_proxy_aliases("state").unwrap();
        assert_eq!(aliases["state_sidecar"], 9280);
    }

    #[tokio::test]
    async fn populate_from_dir_registers_every_document() {
        let dir = std::env::temp_dir().join(format!("registro-populate-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("state.yml"),
            "services:\n  state:\n    host: 10.0.0.1\n    port: 9180\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("magmad.yaml"),
            "services:\n  magmad:\n    host: 10.0.0.2\n    port: 9182\n",
        )
        .unwrap();

        let registry = static_registry();
        registry.populate_from_dir(&dir).unwrap();
        assert_eq!(
            registry.list_all_services().await.unwrap(),
            vec!["MAGMAD", "STATE"]
        );
    }

    #[tokio::test]
    async fn populate_from_documents_registers_everything() {
        let registry = static_registry();
        let doc = ServicesDocument::from_yaml(
            r#"
            services:
              state:
                host: 10.0.0.1
                port: 9180
              magmad:
                host: 10.0.0.2
                port: 9182
            "#,
        )
        .unwrap();

        registry.populate_from_documents([doc]).unwrap();
        assert_eq!(
            registry.list_all_services().await.unwrap(),
            vec!["MAGMAD", "STATE"]
        );
    }
}
