//! The in-memory location store: a name-keyed map of service metadata.
//!
//! The store is pure data. Locking and the coupling between location updates
//! and pooled-connection invalidation live in
//! [`ServiceRegistry`](crate::ServiceRegistry).

use std::collections::HashMap;

/// Canonical form of a service name. Every write and every lookup key goes
/// through this, so lookups are insensitive to caller casing.
pub fn canonical_name(name: &str) -> String {
    name.to_uppercase()
}

/// Where a single peer service lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceLocation {
    /// Unique, canonicalized service name.
    pub name: String,
    /// Hostname or IP.
    pub host: String,
    /// gRPC port; `0` means the service has no RPC endpoint.
    pub grpc_port: u16,
    /// Auxiliary HTTP ("echo") port; `0` means none.
    pub echo_port: u16,
    /// Tags attached to the service. Only key membership is meaningful.
    pub labels: HashMap<String, String>,
    /// Free-form metadata; values may encode comma-separated lists.
    pub annotations: HashMap<String, String>,
    /// Alternate `host:port` strings mapped to their port, for diagnostics.
    pub proxy_aliases: HashMap<String, u16>,
}

impl ServiceLocation {
    /// Create a location with the given name, host and gRPC port.
    pub fn new(name: impl Into<String>, host: impl Into<String>, grpc_port: u16) -> Self {
        Self {
            name: canonical_name(&name.into()),
            host: host.into(),
            grpc_port,
            ..Default::default()
        }
    }

    /// Whether the location carries the given label.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains_key(label)
    }
}

/// Name-keyed map of [`ServiceLocation`]s.
///
/// Re-adding a name overwrites its previous location.
#[derive(Debug, Default)]
pub struct LocationStore {
    locations: HashMap<String, ServiceLocation>,
}

impl LocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a single location. Returns the canonical name it was stored
    /// under.
    pub fn add(&mut self, mut location: ServiceLocation) -> String {
        let name = canonical_name(&location.name);
        location.name = name.clone();
        self.locations.insert(name.clone(), location);
        name
    }

    /// Upsert a batch of locations. Returns the canonical names stored.
    pub fn add_many(&mut self, locations: impl IntoIterator<Item = ServiceLocation>) -> Vec<String> {
        locations.into_iter().map(|l| self.add(l)).collect()
    }

    /// Remove a location. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        self.locations.remove(&canonical_name(name)).is_some()
    }

    /// Remove every location carrying `label`. Linear over all entries, no
    /// label index is maintained. Returns the removed names.
    pub fn remove_with_label(&mut self, label: &str) -> Vec<String> {
        let doomed: Vec<String> = self
            .locations
            .values()
            .filter(|l| l.has_label(label))
            .map(|l| l.name.clone())
            .collect();
        for name in &doomed {
            self.locations.remove(name);
        }
        doomed
    }

    /// All known service names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.locations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of every service carrying `label`, sorted.
    pub fn find(&self, label: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .locations
            .values()
            .filter(|l| l.has_label(label))
            .map(|l| l.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Look up a location. `None` is a "not found" signal; higher layers
    /// translate it into a typed error.
    pub fn get(&self, name: &str) -> Option<&ServiceLocation> {
        self.locations.get(&canonical_name(name))
    }
}
