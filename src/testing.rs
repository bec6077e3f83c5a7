//! Fakes injected through the dialer and remote-directory seams, shared by
//! the unit tests.

use crate::{
    dialer::{DialTarget, Dialer, GrpcConnection},
    error::RegistryError,
    remote::DirectoryRpc,
};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};
use tonic::transport::Endpoint;

/// A valid self-signed certificate for TLS-material fixtures.
pub(crate) const TEST_CERT_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIDXzCCAkegAwIBAgIUMzW8Tiy49vnH8xYtty2hxt2y/gYwDQYJKoZIhvcNAQEL
BQAwPzEWMBQGA1UECgwNUmVnaXN0cm8gVGVzdDElMCMGA1UEAwwcY29udHJvbGxl
ci5jbG91ZC5leGFtcGxlLm9yZzAeFw0yNjA4MjkyMTE0MTFaFw0yNzA4MjkyMTE0
MTFaMD8xFjAUBgNVBAoMDVJlZ2lzdHJvIFRlc3QxJTAjBgNVBAMMHGNvbnRyb2xs
ZXIuY2xvdWQuZXhhbXBsZS5vcmcwggEiMA0GCSqGSIb3DQEBAQUAA4IBDwAwggEK
AoIBAQDh7qjBv5Ppw170Dbwroqg8FtLP14QiPPBcSMQPh1OsxfU0qrA2I/8voVpe
tRL1BquX8hqFCFx1mV1h6iPPzlkpIiIeGqOSf4N0Af5sNmXB4dT3UNFVclu2p7Uw
NPKEKC3E/oZAJ3rzktW1xt0XggQitS7SRgpa4AdjijNvGGYUHMXpMvsG64MpAKqo
XGVuJJWRHItrfHlsWbXs29hjTuO9fnskbFiM42njCYsQPMrzCVVlPi2xav8m9Nku
EV0G7R0lOJD43kCTnQDzNiYXsO0tgoIPiyHPisoT9sr8+qqovXxFzR5nh/RfJlpB
0+wPrwKr21SxOulee73iU/FB8GDRAgMBAAGjUzBRMB0GA1UdDgQWBBQ3cS/ZvSg2
FgRfZeKUGUA8KTzKeDAfBgNVHSMEGDAWgBQ3cS/ZvSg2FgRfZeKUGUA8KTzKeDAP
BgNVHRMBAf8EBTADAQH/MA0GCSqGSIb3DQEBCwUAA4IBAQB9n8m19nCREg77ro76
W9o45GqnWZUItSHh5JBxbxVCx8EwO5TeO3AJXnQSyf1B4FL+sJHuoDksmnnhP5+9
0bZ7AsOGOSflypeXZPBp6iSNpFQSSgRhdPxLcKFE61gp9Dfy4CUFSKgFh9gJm5B/
ZPpewm5kJ0r77fI84jVY8XN4XNndu3Btio2bxBu/Vr64yCXdNZO2AeZKmbqJwddz
JgySPhqZb3YUS6X1ZfB19gQ5Zgpje8zHX8LVApUsU02Oaa4vQWfjkSZ+HOkawqWC
C6LF5ftdazGNJwYTGK7v89VJZ3jQ7FgpGomfQvB4Gj9bHZ1CtJIVoPGKeMberPGp
aDvM
-----END CERTIFICATE-----
";

/// Write `contents` to a unique file under the OS temp directory.
pub(crate) fn write_temp_file(prefix: &str, contents: &[u8]) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let path = std::env::temp_dir().join(format!(
        "registro-{prefix}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed),
    ));
    std::fs::write(&path, contents).expect("failed to write temp file");
    path
}

fn lazy_channel() -> tonic::transport::Channel {
    // Never actually connected: tests make no RPCs through fake connections.
    Endpoint::from_static("http://127.0.0.1:9").connect_lazy()
}

/// A [`Dialer`] that hands out lazy channels and records every dial.
#[derive(Default)]
pub(crate) struct FakeDialer {
    delay: Option<Duration>,
    fail: AtomicBool,
    dials: AtomicUsize,
    targets: Mutex<Vec<DialTarget>>,
    connections: Mutex<Vec<GrpcConnection>>,
}

impl FakeDialer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A dialer whose dials take `delay`, to widen race windows.
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::Release);
    }

    pub(crate) fn dial_count(&self) -> usize {
        self.dials.load(Ordering::Acquire)
    }

    /// Addresses dialed, in order.
    pub(crate) fn targets(&self) -> Vec<String> {
        self.targets
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.addr.clone())
            .collect()
    }

    /// Full dial targets, options included.
    pub(crate) fn dial_targets(&self) -> Vec<DialTarget> {
        self.targets.lock().unwrap().clone()
    }

    /// Every connection ever handed out, winners and losers alike.
    pub(crate) fn connections(&self) -> Vec<GrpcConnection> {
        self.connections.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self, target: &DialTarget) -> Result<GrpcConnection, RegistryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.dials.fetch_add(1, Ordering::AcqRel);
        self.targets.lock().unwrap().push(target.clone());
        if self.fail.load(Ordering::Acquire) {
            return Err(RegistryError::dial(
                target.addr.clone(),
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "fake dial failure"),
            ));
        }
        let conn = GrpcConnection::new(lazy_channel(), target.addr.clone());
        self.connections.lock().unwrap().push(conn.clone());
        Ok(conn)
    }
}

/// An in-memory [`DirectoryRpc`] standing in for the remote directory
/// service.
#[derive(Default)]
pub(crate) struct FakeDirectory {
    addresses: Mutex<HashMap<String, String>>,
    http_addresses: Mutex<HashMap<String, String>>,
    annotations: Mutex<HashMap<(String, String), String>>,
    labels: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeDirectory {
    pub(crate) fn set_address(&self, service: &str, address: &str) {
        self.addresses
            .lock()
            .unwrap()
            .insert(service.to_string(), address.to_string());
    }

    pub(crate) fn set_http_address(&self, service: &str, address: &str) {
        self.http_addresses
            .lock()
            .unwrap()
            .insert(service.to_string(), address.to_string());
    }

    pub(crate) fn set_annotation(&self, service: &str, annotation: &str, value: &str) {
        self.annotations
            .lock()
            .unwrap()
            .insert((service.to_string(), annotation.to_string()), value.to_string());
    }

    pub(crate) fn set_label(&self, label: &str, services: &[&str]) {
        self.labels.lock().unwrap().insert(
            label.to_string(),
            services.iter().map(|s| s.to_string()).collect(),
        );
    }
}

#[async_trait::async_trait]
impl DirectoryRpc for FakeDirectory {
    async fn list_all_services(&self) -> Result<Vec<String>, RegistryError> {
        let mut names: Vec<String> = self.addresses.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn find_services(&self, label: &str) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .labels
            .lock()
            .unwrap()
            .get(label)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_service_address(&self, service: &str) -> Result<String, RegistryError> {
        self.addresses
            .lock()
            .unwrap()
            .get(service)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered {
                service: service.to_string(),
            })
    }

    async fn get_http_server_address(&self, service: &str) -> Result<String, RegistryError> {
        self.http_addresses
            .lock()
            .unwrap()
            .get(service)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered {
                service: service.to_string(),
            })
    }

    async fn get_annotation(
        &self,
        service: &str,
        annotation: &str,
    ) -> Result<String, RegistryError> {
        self.annotations
            .lock()
            .unwrap()
            .get(&(service.to_string(), annotation.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::AnnotationNotFound {
                service: service.to_string(),
                annotation: annotation.to_string(),
            })
    }
}
