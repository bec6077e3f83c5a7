//! Client interceptors applied to connections built by the registry.

use std::time::Duration;
use tonic::{metadata::AsciiMetadataValue, service::Interceptor, Request, Status};

/// Default per-call deadline installed when the caller supplied none.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// Metadata key carrying the caller-supplied deadline on the wire.
const GRPC_TIMEOUT_METADATA_KEY: &str = "grpc-timeout";

/// Fixed identification header stamped by [`GatewayClientInterceptor`].
pub const GATEWAY_ORIGIN_HEADER: &str = "x-gateway-origin";

/// Ensures every outbound call carries a deadline.
///
/// Calls that already carry one pass through untouched; the deadline is never
/// shortened or lengthened. The timer for an installed deadline is scoped to
/// the call and released by the transport on return.
#[derive(Debug, Clone)]
pub struct TimeoutInterceptor {
    default_timeout: Duration,
}

impl TimeoutInterceptor {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Default for TimeoutInterceptor {
    fn default() -> Self {
        Self::new(DEFAULT_RPC_TIMEOUT)
    }
}

impl Interceptor for TimeoutInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if request.metadata().get(GRPC_TIMEOUT_METADATA_KEY).is_none() {
            request.set_timeout(self.default_timeout);
        }
        Ok(request)
    }
}

/// [`TimeoutInterceptor`] plus a fixed identification header, for calls made
/// from gateway-side code into the cloud. Composition, not replacement: the
/// header is stamped first, then the base interceptor runs.
#[derive(Debug, Clone, Default)]
pub struct GatewayClientInterceptor {
    inner: TimeoutInterceptor,
}

impl GatewayClientInterceptor {
    pub fn new(inner: TimeoutInterceptor) -> Self {
        Self { inner }
    }
}

impl Interceptor for GatewayClientInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert(GATEWAY_ORIGIN_HEADER, AsciiMetadataValue::from_static("gateway"));
        self.inner.call(request)
    }
}
