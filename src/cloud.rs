//! The cloud connection resolver: computes the authority and target address
//! for a cloud service and dials it, either through the local control proxy
//! or directly over TLS.

use crate::{
    config::{control_proxy_config, ControlProxyConfig},
    dialer::{DialOptions, DialTarget, GrpcConnection, DEFAULT_CONNECT_TIMEOUT},
    error::RegistryError,
    registry::{ServiceRegistry, CONTROL_PROXY_SERVICE},
};
use http::Uri;
use std::time::Duration;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

/// Keepalive ping interval on cloud connections.
const CLOUD_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a keepalive ping acknowledgement.
const CLOUD_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

impl ServiceRegistry {
    /// Dial a fresh connection to a cloud service, loading the process-wide
    /// control-proxy configuration on first use.
    ///
    /// Unlike [`get_connection`](Self::get_connection) the result is not
    /// pooled here; the shared cloud connection cache layers reuse on top.
    pub async fn get_cloud_connection(
        &self,
        service: &str,
    ) -> Result<GrpcConnection, RegistryError> {
        let config = control_proxy_config()?;
        self.get_cloud_connection_with_config(&config, service).await
    }

    /// Dial a fresh connection to a cloud service with an explicit
    /// control-proxy configuration.
    pub async fn get_cloud_connection_with_config(
        &self,
        config: &ControlProxyConfig,
        service: &str,
    ) -> Result<GrpcConnection, RegistryError> {
        let target = self.cloud_dial_target(config, service).await?;
        self.dialer.dial(&target).await
    }

    /// Compute the physical address and dial options for a cloud service.
    ///
    /// All required config validation happens here, before any network I/O.
    /// Caller-supplied options overlay the defaults but the mandatory fields
    /// (authority, transport security, connect-timeout floor) are applied
    /// last and cannot be removed.
    pub(crate) async fn cloud_dial_target(
        &self,
        config: &ControlProxyConfig,
        service: &str,
    ) -> Result<DialTarget, RegistryError> {
        if config.cloud_address.is_empty() {
            return Err(RegistryError::config("control proxy cloud_address is required"));
        }
        let authority = format!("{}-{}", service.to_lowercase(), config.cloud_address);

        let (addr, tls) = if config.proxy_cloud_connections {
            if config.local_port == 0 {
                return Err(RegistryError::config(
                    "control proxy local_port is required when proxying cloud connections",
                ));
            }
            let proxy_address = self.get_service_address(CONTROL_PROXY_SERVICE).await?;
            let proxy_host = host_part(&proxy_address);
            (format!("{proxy_host}:{}", config.local_port), None)
        } else {
            if config.cloud_port == 0 {
                return Err(RegistryError::config(
                    "control proxy cloud_port is required for direct cloud connections",
                ));
            }
            let cloud_host = host_part(&config.cloud_address);
            (
                format!("{cloud_host}:{}", config.cloud_port),
                build_cloud_tls(config, &authority),
            )
        };

        let scheme = if tls.is_some() { "https" } else { "http" };
        let authority_uri: Uri = format!("{scheme}://{authority}").parse().map_err(|e| {
            RegistryError::config(format!("cloud authority {authority} is not a valid uri: {e}"))
        })?;

        let defaults = DialOptions {
            keep_alive_interval: Some(CLOUD_KEEPALIVE_INTERVAL),
            keep_alive_timeout: Some(CLOUD_KEEPALIVE_TIMEOUT),
            keep_alive_while_idle: Some(true),
            ..Default::default()
        };
        let mut options = defaults.overlay(self.additional_dial_options.clone());
        options.authority = Some(authority_uri);
        options.tls = tls;
        options.connect_timeout = Some(match options.connect_timeout {
            Some(t) => t.max(DEFAULT_CONNECT_TIMEOUT),
            None => DEFAULT_CONNECT_TIMEOUT,
        });

        Ok(DialTarget { addr, options })
    }
}

/// The host of a `host:port` string. IPv6 hosts must be bracketed, as in
/// `[2001:db8::1]:443`; a bare unbracketed IPv6 literal is ambiguous and
/// not supported.
fn host_part(address: &str) -> &str {
    if let Some(end) = address.find(']') {
        return &address[..=end];
    }
    match address.rsplit_once(':') {
        Some((host, _)) => host,
        None => address,
    }
}

/// Build the TLS configuration for a direct cloud connection.
///
/// The trust store is seeded from the OS bundle; `rootca_cert` is appended
/// when it loads. Load failures of optional material are logged and skipped.
/// Returns `None` (a connection without transport security) only when no
/// trust material exists at all, and says so loudly. The degraded connection
/// can only ever reach a plaintext endpoint; against a TLS-only port the
/// handshake fails outright.
fn build_cloud_tls(config: &ControlProxyConfig, authority: &str) -> Option<ClientTlsConfig> {
    let mut tls = ClientTlsConfig::new().domain_name(authority.to_string());

    let mut have_rootca = false;
    if let Some(path) = &config.rootca_cert {
        match std::fs::read(path) {
            Ok(pem) => {
                tls = tls.ca_certificate(Certificate::from_pem(pem));
                have_rootca = true;
            }
            Err(source) => {
                let err = RegistryError::TlsMaterial {
                    path: path.clone(),
                    source,
                };
                tracing::warn!(error = %err, "skipping configured root CA");
            }
        }
    }

    let native_roots = rustls_native_certs::load_native_certs()
        .map(|certs| certs.len())
        .unwrap_or(0);
    if !have_rootca && native_roots == 0 {
        tracing::warn!(
            authority,
            "no trust material available from the OS store or rootca_cert; \
             connecting to the cloud WITHOUT transport security"
        );
        return None;
    }

    match (&config.gateway_cert, &config.gateway_key) {
        (Some(cert_path), Some(key_path)) => {
            match (std::fs::read(cert_path), std::fs::read(key_path)) {
                (Ok(cert), Ok(key)) => {
                    tls = tls.identity(Identity::from_pem(cert, key));
                }
                (Err(source), _) => {
                    let err = RegistryError::TlsMaterial {
                        path: cert_path.clone(),
                        source,
                    };
                    tracing::warn!(error = %err, "skipping gateway client certificate");
                }
                (_, Err(source)) => {
                    let err = RegistryError::TlsMaterial {
                        path: key_path.clone(),
                        source,
                    };
                    tracing::warn!(error = %err, "skipping gateway client certificate");
                }
            }
        }
        (None, None) => {}
        _ => {
            tracing::warn!(
                "gateway_cert and gateway_key must both be set to attach a client certificate"
            );
        }
    }

    Some(tls)
}
