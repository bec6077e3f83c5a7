//! Error types returned by the registry, the connection pool and the cloud
//! connection resolver.

use std::error::Error as StdError;

/// A boxed transport-level error, kept opaque so that fake dialers in tests
/// can produce dial failures without constructing a real transport error.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by every lookup and connection entry point.
///
/// Lookup failures distinguish a name that is unknown to the directory
/// ([`RegistryError::NotRegistered`]) from a name that is known but has no
/// endpoint of the requested kind ([`RegistryError::NotAvailable`]). Neither
/// is ever retried internally.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The service name is absent from the directory.
    #[error("service {service} is not registered")]
    NotRegistered { service: String },

    /// The service is registered, but the requested endpoint port is zero.
    #[error("{endpoint} endpoint for service {service} is not available")]
    NotAvailable {
        service: String,
        endpoint: &'static str,
    },

    /// The service is registered but does not carry the requested annotation.
    #[error("annotation {annotation} is not set for service {service}")]
    AnnotationNotFound { service: String, annotation: String },

    /// A static-services or control-proxy document is missing or malformed.
    #[error("invalid configuration: {reason}")]
    ConfigLoad { reason: String },

    /// Dialing `target` failed at the transport layer.
    #[error("failed to dial {target}")]
    Dial {
        target: String,
        #[source]
        source: BoxError,
    },

    /// Certificate or key material could not be loaded. Optional credentials
    /// are skipped with a warning instead of surfacing this error.
    #[error("failed to load TLS material from {path}")]
    TlsMaterial {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The directory service itself is unreachable at its bootstrap address.
    #[error("directory service is unreachable at {target}")]
    BootstrapUnavailable {
        target: String,
        #[source]
        source: Box<RegistryError>,
    },

    /// A delegated directory query failed remotely.
    #[error("directory request failed")]
    Directory(#[from] tonic::Status),
}

impl RegistryError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        RegistryError::ConfigLoad {
            reason: reason.into(),
        }
    }

    pub(crate) fn dial(target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        RegistryError::Dial {
            target: target.into(),
            source: source.into(),
        }
    }
}
