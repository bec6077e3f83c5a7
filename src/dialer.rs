//! Connection handles, dial options and the dialing seam.
//!
//! [`Dialer`] plays the same role the lookup-service seam plays for address
//! resolution: production code dials real tonic endpoints through
//! [`EndpointDialer`], tests inject a fake.

use crate::error::RegistryError;
use http::Uri;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

/// Floor for how long a single connect attempt may take.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Options applied to a dial, merged with [`DialOptions::overlay`].
///
/// Unset fields fall back to whatever the lower-precedence layer supplied;
/// the cloud resolver applies its mandatory fields (authority, connect-timeout
/// floor) after all overlays, so callers can tune but not remove them.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Per-request timeout applied at the transport.
    pub request_timeout: Option<Duration>,
    /// Upper bound for a single connect attempt.
    pub connect_timeout: Option<Duration>,
    /// HTTP/2 keepalive ping interval.
    pub keep_alive_interval: Option<Duration>,
    /// How long to wait for a keepalive ping acknowledgement.
    pub keep_alive_timeout: Option<Duration>,
    /// Send keepalive pings on idle connections.
    pub keep_alive_while_idle: Option<bool>,
    /// `:authority` override, distinct from the physical dial address.
    pub authority: Option<Uri>,
    /// TLS configuration; `None` dials without transport security.
    pub tls: Option<ClientTlsConfig>,
}

impl DialOptions {
    /// Merge `other` on top of `self`: fields set in `other` win.
    pub fn overlay(mut self, other: DialOptions) -> DialOptions {
        self.request_timeout = other.request_timeout.or(self.request_timeout);
        self.connect_timeout = other.connect_timeout.or(self.connect_timeout);
        self.keep_alive_interval = other.keep_alive_interval.or(self.keep_alive_interval);
        self.keep_alive_timeout = other.keep_alive_timeout.or(self.keep_alive_timeout);
        self.keep_alive_while_idle = other.keep_alive_while_idle.or(self.keep_alive_while_idle);
        self.authority = other.authority.or(self.authority);
        self.tls = other.tls.or(self.tls);
        self
    }
}

/// A physical address plus the options to dial it with.
#[derive(Debug, Clone)]
pub struct DialTarget {
    pub addr: String,
    pub options: DialOptions,
}

#[derive(Debug, Default)]
struct ConnectionState {
    closed: AtomicBool,
    unready: AtomicBool,
}

/// A cheap-to-clone handle on a client connection.
///
/// All clones share one underlying channel and one state block, so closing
/// any handle closes the connection for every holder.
#[derive(Clone)]
pub struct GrpcConnection {
    channel: Channel,
    target: String,
    state: Arc<ConnectionState>,
}

impl GrpcConnection {
    pub fn new(channel: Channel, target: impl Into<String>) -> Self {
        Self {
            channel,
            target: target.into(),
            state: Arc::new(ConnectionState::default()),
        }
    }

    /// The underlying tonic channel, for constructing clients. Combine with
    /// [`TimeoutInterceptor`](crate::TimeoutInterceptor) so every call gets a
    /// bounded deadline.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// The physical address this connection was dialed against.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether the connection is usable: not closed and not flagged broken.
    pub fn is_ready(&self) -> bool {
        !self.state.closed.load(Ordering::Acquire) && !self.state.unready.load(Ordering::Acquire)
    }

    /// Whether [`close`](Self::close) has been called on any handle.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Flag the connection as broken, e.g. after a failed RPC. The next
    /// cache access will replace it.
    pub fn mark_unready(&self) {
        self.state.unready.store(true, Ordering::Release);
    }

    /// Close the connection for all holders. The transport itself is released
    /// once the last channel clone is dropped.
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
    }

    /// Whether two handles refer to the same underlying connection.
    pub(crate) fn shares_state_with(&self, other: &GrpcConnection) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for GrpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcConnection")
            .field("target", &self.target)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Dials a [`DialTarget`] into a [`GrpcConnection`].
#[async_trait::async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, target: &DialTarget) -> Result<GrpcConnection, RegistryError>;
}

/// Production [`Dialer`] backed by [`tonic::transport::Endpoint`].
#[derive(Debug, Default)]
pub struct EndpointDialer;

impl EndpointDialer {
    fn endpoint(target: &DialTarget) -> Result<Endpoint, RegistryError> {
        let opts = &target.options;
        let scheme = if opts.tls.is_some() { "https" } else { "http" };
        let mut endpoint = Endpoint::from_shared(format!("{scheme}://{}", target.addr))
            .map_err(|e| RegistryError::config(format!("invalid dial address {}: {e}", target.addr)))?
            .connect_timeout(opts.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT));

        if let Some(timeout) = opts.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        if let Some(interval) = opts.keep_alive_interval {
            endpoint = endpoint.http2_keep_alive_interval(interval);
        }
        if let Some(timeout) = opts.keep_alive_timeout {
            endpoint = endpoint.keep_alive_timeout(timeout);
        }
        if let Some(while_idle) = opts.keep_alive_while_idle {
            endpoint = endpoint.keep_alive_while_idle(while_idle);
        }
        if let Some(authority) = &opts.authority {
            endpoint = endpoint.origin(authority.clone());
        }
        if let Some(tls) = &opts.tls {
            endpoint = endpoint
                .tls_config(tls.clone())
                .map_err(|e| RegistryError::dial(target.addr.clone(), e))?;
        }
        Ok(endpoint)
    }
}

#[async_trait::async_trait]
impl Dialer for EndpointDialer {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn dial(&self, target: &DialTarget) -> Result<GrpcConnection, RegistryError> {
        let endpoint = Self::endpoint(target)?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| RegistryError::dial(target.addr.clone(), e))?;
        tracing::debug!(addr = %target.addr, "connected");
        Ok(GrpcConnection::new(channel, target.addr.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_fields_set_on_top() {
        let base = DialOptions {
            request_timeout: Some(Duration::from_secs(5)),
            connect_timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let top = DialOptions {
            request_timeout: Some(Duration::from_secs(9)),
            keep_alive_while_idle: Some(true),
            ..Default::default()
        };

        let merged = base.overlay(top);
        assert_eq!(merged.request_timeout, Some(Duration::from_secs(9)));
        assert_eq!(merged.connect_timeout, Some(Duration::from_secs(1)));
        assert_eq!(merged.keep_alive_while_idle, Some(true));
    }

    #[tokio::test]
    async fn close_is_shared_across_clones() {
        let channel = Endpoint::from_static("http://127.0.0.1:9").connect_lazy();
        let conn = GrpcConnection::new(channel, "127.0.0.1:9");
        let other = conn.clone();

        assert!(other.is_ready());
        conn.close();
        assert!(!other.is_ready());
        assert!(other.is_closed());
    }

    #[tokio::test]
    async fn mark_unready_leaves_connection_open_but_unusable() {
        let channel = Endpoint::from_static("http://127.0.0.1:9").connect_lazy();
        let conn = GrpcConnection::new(channel, "127.0.0.1:9");

        conn.mark_unready();
        assert!(!conn.is_ready());
        assert!(!conn.is_closed());
    }

    #[test]
    fn invalid_address_is_a_config_error() {
        let target = DialTarget {
            addr: "not an address".into(),
            options: DialOptions::default(),
        };
        assert!(matches!(
            EndpointDialer::endpoint(&target),
            Err(RegistryError::ConfigLoad { .. })
        ));
    }
}
