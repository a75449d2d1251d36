//! In-memory registry of downstream microservice health.
//!
//! The registry is the cache `notify()` reads; the `microservice_health`
//! table is its durable copy, written by the health probe.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use vigil_domain::{HealthStatus, MicroserviceHealth};

/// A configured downstream microservice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroserviceEndpoint {
    /// Registry name (e.g. "commission")
    pub name: String,
    /// Base URL
    pub endpoint: String,
}

impl MicroserviceEndpoint {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// A status flip observed by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthChange {
    pub name: String,
    pub previous: HealthStatus,
    pub current: HealthStatus,
}

/// Health cache keyed by microservice name.
///
/// Only configured microservices are tracked. They start offline until the
/// first probe (or a restored snapshot) says otherwise.
pub struct HealthRegistry {
    entries: RwLock<HashMap<String, MicroserviceHealth>>,
}

impl HealthRegistry {
    /// Registry for the configured microservices, all offline.
    pub fn new(services: &[MicroserviceEndpoint]) -> Self {
        let entries = services
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    MicroserviceHealth::new(&s.name, &s.endpoint, HealthStatus::Offline),
                )
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Adopt persisted statuses for configured services.
    ///
    /// The configured endpoint wins over the persisted one.
    pub async fn restore(&self, persisted: Vec<MicroserviceHealth>) {
        let mut entries = self.entries.write().await;
        for health in persisted {
            if let Some(entry) = entries.get_mut(&health.name) {
                entry.status = health.status;
                entry.last_check = health.last_check;
            }
        }
    }

    /// Snapshot of one microservice.
    pub async fn get(&self, name: &str) -> Option<MicroserviceHealth> {
        self.entries.read().await.get(name).cloned()
    }

    /// Known and online.
    pub async fn is_online(&self, name: &str) -> bool {
        self.entries
            .read()
            .await
            .get(name)
            .map(|h| h.is_online())
            .unwrap_or(false)
    }

    /// Record a probe result; returns the change when the status flipped.
    pub async fn set_status(&self, name: &str, status: HealthStatus) -> Option<HealthChange> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(name)?;
        let previous = entry.status;
        entry.status = status;
        entry.last_check = Utc::now();

        (previous != status).then(|| HealthChange {
            name: name.to_string(),
            previous,
            current: status,
        })
    }

    /// All tracked microservices, sorted by name.
    pub async fn snapshot(&self) -> Vec<MicroserviceHealth> {
        let mut all: Vec<MicroserviceHealth> = self.entries.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Configured endpoints.
    pub async fn endpoints(&self) -> Vec<MicroserviceEndpoint> {
        let mut all: Vec<MicroserviceEndpoint> = self
            .entries
            .read()
            .await
            .values()
            .map(|h| MicroserviceEndpoint::new(&h.name, &h.endpoint))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services() -> Vec<MicroserviceEndpoint> {
        vec![
            MicroserviceEndpoint::new("commission", "http://commission:8080"),
            MicroserviceEndpoint::new("accounting", "http://accounting:8080"),
        ]
    }

    #[tokio::test]
    async fn test_starts_offline() {
        let registry = HealthRegistry::new(&services());
        assert!(!registry.is_online("commission").await);
        assert!(!registry.is_online("unknown").await);
        assert_eq!(registry.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_set_status_reports_flips_only() {
        let registry = HealthRegistry::new(&services());

        let change = registry.set_status("commission", HealthStatus::Online).await.unwrap();
        assert_eq!(change.previous, HealthStatus::Offline);
        assert_eq!(change.current, HealthStatus::Online);
        assert!(registry.is_online("commission").await);

        assert!(registry.set_status("commission", HealthStatus::Online).await.is_none());
        assert!(registry.set_status("unknown", HealthStatus::Online).await.is_none());
    }

    #[tokio::test]
    async fn test_restore_ignores_unconfigured() {
        let registry = HealthRegistry::new(&services());
        registry
            .restore(vec![
                MicroserviceHealth::new("accounting", "http://old-host", HealthStatus::Online),
                MicroserviceHealth::new("legacy", "http://legacy", HealthStatus::Online),
            ])
            .await;

        let accounting = registry.get("accounting").await.unwrap();
        assert!(accounting.is_online());
        assert_eq!(accounting.endpoint, "http://accounting:8080");
        assert!(registry.get("legacy").await.is_none());
    }
}
