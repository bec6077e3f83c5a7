//! The shared cloud connection cache: long-lived connections reused across
//! many logically unrelated calls, refreshed by TTL and replaced when
//! unhealthy. Availability wins over freshness: an expired entry keeps
//! serving while a replacement dial is failing.

use crate::{
    config::{control_proxy_config, ControlProxyConfig},
    dialer::GrpcConnection,
    error::RegistryError,
    location::canonical_name,
    registry::ServiceRegistry,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
    time::{Duration, Instant},
};

/// Default lifetime of a shared cloud connection.
pub const DEFAULT_SHARED_CONNECTION_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// How long a superseded (still healthy) connection stays open after being
/// replaced, so in-flight calls can drain.
pub const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(60);

struct CacheEntry {
    conn: GrpcConnection,
    expires_at: Instant,
}

/// Per-registry cache of shared cloud connections.
pub(crate) struct SharedCloudConnections {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl_secs: AtomicU64,
}

impl SharedCloudConnections {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_secs: AtomicU64::new(DEFAULT_SHARED_CONNECTION_TTL.as_secs()),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.load(Ordering::Relaxed))
    }
}

// Snapshot of the cache state for one name, taken under a lock. The
// connection handles are cheap clones sharing state with the cached ones.
enum Cached {
    Missing,
    FreshHealthy(GrpcConnection),
    ExpiredHealthy(GrpcConnection),
    Unhealthy(GrpcConnection),
}

fn classify(entry: Option<&CacheEntry>, now: Instant) -> Cached {
    match entry {
        None => Cached::Missing,
        Some(e) if !e.conn.is_ready() => Cached::Unhealthy(e.conn.clone()),
        Some(e) if now < e.expires_at => Cached::FreshHealthy(e.conn.clone()),
        Some(e) => Cached::ExpiredHealthy(e.conn.clone()),
    }
}

impl ServiceRegistry {
    /// A shared, long-lived connection to a cloud service.
    ///
    /// A cached connection that is fresh and ready is returned without any
    /// dial. Otherwise a replacement is dialed outside the lock and the cache
    /// re-checked before installing it; see the crate docs for the full
    /// replacement policy.
    pub async fn get_shared_cloud_connection(
        &self,
        service: &str,
    ) -> Result<GrpcConnection, RegistryError> {
        let config = control_proxy_config()?;
        self.get_shared_cloud_connection_with_config(&config, service)
            .await
    }

    /// [`get_shared_cloud_connection`](Self::get_shared_cloud_connection)
    /// with an explicit control-proxy configuration.
    pub async fn get_shared_cloud_connection_with_config(
        &self,
        config: &ControlProxyConfig,
        service: &str,
    ) -> Result<GrpcConnection, RegistryError> {
        let name = canonical_name(service);

        {
            let entries = self
                .shared
                .entries
                .read()
                .expect("shared connection cache lock poisoned");
            if let Cached::FreshHealthy(conn) = classify(entries.get(&name), Instant::now()) {
                return Ok(conn);
            }
        }

        // Dial before re-acquiring the lock; the lock is never held across
        // network I/O.
        let dialed = self.get_cloud_connection_with_config(config, service).await;

        let mut entries = self
            .shared
            .entries
            .write()
            .expect("shared connection cache lock poisoned");
        let now = Instant::now();
        match classify(entries.get(&name), now) {
            Cached::FreshHealthy(existing) => {
                // A concurrent caller installed a fresh entry while we were
                // dialing; ours is surplus.
                if let Ok(conn) = dialed {
                    conn.close();
                }
                Ok(existing)
            }
            Cached::ExpiredHealthy(existing) => match dialed {
                Ok(conn) => {
                    entries.insert(
                        name,
                        CacheEntry {
                            conn: conn.clone(),
                            expires_at: now + self.shared.ttl(),
                        },
                    );
                    schedule_delayed_close(existing);
                    Ok(conn)
                }
                Err(err) => {
                    tracing::warn!(
                        service = %name,
                        error = %err,
                        "redial failed; keeping the expired shared cloud connection"
                    );
                    Ok(existing)
                }
            },
            Cached::Unhealthy(existing) => {
                // Already broken, nothing in flight worth draining.
                existing.close();
                match dialed {
                    Ok(conn) => {
                        entries.insert(
                            name,
                            CacheEntry {
                                conn: conn.clone(),
                                expires_at: now + self.shared.ttl(),
                            },
                        );
                        Ok(conn)
                    }
                    Err(err) => {
                        entries.remove(&name);
                        Err(err)
                    }
                }
            }
            Cached::Missing => match dialed {
                Ok(conn) => {
                    entries.insert(
                        name,
                        CacheEntry {
                            conn: conn.clone(),
                            expires_at: now + self.shared.ttl(),
                        },
                    );
                    Ok(conn)
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Evict and synchronously close the shared connection for a service.
    /// Returns whether one was cached.
    pub fn cleanup_shared_cloud_connection(&self, service: &str) -> bool {
        let removed = self
            .shared
            .entries
            .write()
            .expect("shared connection cache lock poisoned")
            .remove(&canonical_name(service));
        match removed {
            Some(entry) => {
                entry.conn.close();
                true
            }
            None => false,
        }
    }

    /// Adjust the TTL applied to shared connections installed from now on.
    /// Existing entries keep their original expiration.
    pub fn set_shared_connection_ttl(&self, ttl: Duration) {
        self.shared.ttl_secs.store(ttl.as_secs(), Ordering::Relaxed);
    }
}

/// Close a superseded connection after the grace period. Best-effort: the
/// task may still be pending when shutdown begins.
fn schedule_delayed_close(conn: GrpcConnection) {
    tokio::spawn(async move {
        tokio::time::sleep(CLOSE_GRACE_PERIOD).await;
        conn.close();
    });
}
