//! File-backed cloud backend
//!
//! Serves regions, instances and averaged metrics from a JSON inventory
//! document. Used by the daemon when no live cloud endpoint is configured
//! and by tests that need a realistic tenant layout.
//!
//! ```json
//! {
//!   "tenants": {
//!     "acme": {
//!       "access_key_id": "AK-ACME",
//!       "regions": {
//!         "eu-central-1": [
//!           {
//!             "id": "i-1", "display_name": "web-1", "region": "eu-central-1",
//!             "kind": "c7.large", "core_count": 2,
//!             "created_at": "2024-01-01T00:00:00Z", "charge_model": "prepaid",
//!             "has_agent": true,
//!             "metrics": { "cpu_utilization": [{ "average_value": 1.5, "sample_count": 288 }] }
//!           }
//!         ]
//!       }
//!     }
//!   }
//! }
//! ```

use super::{BackendFactory, CloudBackend};
use crate::error::{BackendError, BusinessCode};
use crate::models::{metric_names, MetricSample, ResourceDescriptor, TenantCredentials};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One averaged data point as stored in the inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryPoint {
    pub average_value: f64,
    #[serde(default = "default_sample_count")]
    pub sample_count: u64,
}

fn default_sample_count() -> u64 {
    1
}

/// Instance entry: descriptor plus its telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryResource {
    #[serde(flatten)]
    pub descriptor: ResourceDescriptor,
    /// Without an agent, agent metrics are rejected as not found
    #[serde(default)]
    pub has_agent: bool,
    #[serde(default)]
    pub metrics: BTreeMap<String, Vec<InventoryPoint>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantInventory {
    pub access_key_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_secret: Option<String>,
    #[serde(default)]
    pub regions: BTreeMap<String, Vec<InventoryResource>>,
}

/// Parsed inventory document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryFile {
    #[serde(default)]
    pub tenants: BTreeMap<String, TenantInventory>,
}

impl InventoryFile {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse inventory document")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read inventory file {}", path.display()))?;
        let inventory = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            tenants = inventory.tenants.len(),
            "Loaded inventory"
        );
        Ok(inventory)
    }

    pub fn tenant_ids(&self) -> impl Iterator<Item = &str> {
        self.tenants.keys().map(String::as_str)
    }
}

/// Hands out inventory backends after checking tenant credentials
#[derive(Debug, Clone)]
pub struct InventoryFactory {
    inventory: Arc<InventoryFile>,
}

impl InventoryFactory {
    pub fn new(inventory: InventoryFile) -> Self {
        Self {
            inventory: Arc::new(inventory),
        }
    }
}

#[async_trait]
impl BackendFactory for InventoryFactory {
    async fn connect(
        &self,
        credentials: &TenantCredentials,
    ) -> Result<Arc<dyn CloudBackend>, BackendError> {
        let Some(tenant) = self.inventory.tenants.get(&credentials.tenant_id) else {
            return Err(BackendError::business(
                BusinessCode::AccessDenied,
                format!("no account for tenant {}", credentials.tenant_id),
            ));
        };

        let secret_matches = tenant
            .access_key_secret
            .as_ref()
            .map_or(true, |secret| *secret == credentials.access_key_secret);
        if tenant.access_key_id != credentials.access_key_id || !secret_matches {
            warn!(tenant_id = %credentials.tenant_id, "Inventory credentials rejected");
            return Err(BackendError::business(
                BusinessCode::AccessDenied,
                "access key does not match tenant",
            ));
        }

        debug!(tenant_id = %credentials.tenant_id, "Inventory backend connected");
        Ok(Arc::new(InventoryBackend {
            tenant: Arc::new(tenant.clone()),
        }))
    }
}

/// Backend view over one tenant's inventory
#[derive(Debug, Clone)]
pub struct InventoryBackend {
    tenant: Arc<TenantInventory>,
}

impl InventoryBackend {
    pub fn new(tenant: TenantInventory) -> Self {
        Self {
            tenant: Arc::new(tenant),
        }
    }

    fn find(&self, resource_id: &str) -> Option<&InventoryResource> {
        self.tenant
            .regions
            .values()
            .flatten()
            .find(|r| r.descriptor.id == resource_id)
    }
}

#[async_trait]
impl CloudBackend for InventoryBackend {
    async fn list_regions(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.tenant.regions.keys().cloned().collect())
    }

    async fn list_resources(&self, region: &str) -> Result<Vec<ResourceDescriptor>, BackendError> {
        let resources = self.tenant.regions.get(region).ok_or_else(|| {
            BackendError::business(
                BusinessCode::InvalidParameter,
                format!("unknown region {region}"),
            )
        })?;
        Ok(resources.iter().map(|r| r.descriptor.clone()).collect())
    }

    async fn get_metric(
        &self,
        resource_id: &str,
        metric_name: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _period: Duration,
    ) -> Result<Vec<MetricSample>, BackendError> {
        let resource = self.find(resource_id).ok_or_else(|| {
            BackendError::business(
                BusinessCode::NotFound,
                format!("unknown resource {resource_id}"),
            )
        })?;

        if !resource.has_agent && metric_names::EXTENDED.contains(&metric_name) {
            return Err(BackendError::business(
                BusinessCode::NotFound,
                format!("{metric_name} requires the monitoring agent"),
            ));
        }

        Ok(resource
            .metrics
            .get(metric_name)
            .map(|points| {
                points
                    .iter()
                    .map(|p| MetricSample {
                        metric_name: metric_name.to_string(),
                        average_value: p.average_value,
                        sample_count: p.sample_count,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"{
        "tenants": {
            "acme": {
                "access_key_id": "AK-ACME",
                "access_key_secret": "s3cret",
                "regions": {
                    "eu-central-1": [
                        {
                            "id": "i-1",
                            "display_name": "web-1",
                            "region": "eu-central-1",
                            "kind": "c7.large",
                            "core_count": 2,
                            "created_at": "2024-01-01T00:00:00Z",
                            "charge_model": "prepaid",
                            "public_bandwidth_mbps": 10.0,
                            "metrics": {
                                "cpu_utilization": [
                                    { "average_value": 2.0, "sample_count": 100 },
                                    { "average_value": 4.0 }
                                ]
                            }
                        }
                    ],
                    "us-west-1": []
                }
            }
        }
    }"#;

    fn creds(key: &str, secret: &str) -> TenantCredentials {
        TenantCredentials {
            tenant_id: "acme".to_string(),
            access_key_id: key.to_string(),
            access_key_secret: secret.to_string(),
        }
    }

    async fn connect() -> Arc<dyn CloudBackend> {
        let factory = InventoryFactory::new(InventoryFile::from_json(INVENTORY).unwrap());
        factory.connect(&creds("AK-ACME", "s3cret")).await.unwrap()
    }

    #[tokio::test]
    async fn test_lists_regions_and_resources() {
        let backend = connect().await;

        let regions = backend.list_regions().await.unwrap();
        assert_eq!(regions, vec!["eu-central-1", "us-west-1"]);

        let resources = backend.list_resources("eu-central-1").await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].public_bandwidth_mbps, Some(10.0));
        assert!(backend.list_resources("us-west-1").await.unwrap().is_empty());

        let err = backend.list_resources("mars-1").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_metric_points_default_sample_count() {
        let backend = connect().await;
        let now = Utc::now();

        let samples = backend
            .get_metric("i-1", metric_names::CPU_UTILIZATION, now, now, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].sample_count, 1);

        let empty = backend
            .get_metric("i-1", metric_names::DISK_READ_IOPS, now, now, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_agent_metrics_not_found_without_agent() {
        let backend = connect().await;
        let now = Utc::now();

        let err = backend
            .get_metric("i-1", metric_names::MEMORY_UTILIZATION, now, now, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = backend
            .get_metric("i-404", metric_names::CPU_UTILIZATION, now, now, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_credentials() {
        let factory = InventoryFactory::new(InventoryFile::from_json(INVENTORY).unwrap());

        assert!(factory.connect(&creds("AK-OTHER", "s3cret")).await.is_err());
        assert!(factory.connect(&creds("AK-ACME", "wrong")).await.is_err());

        let mut stranger = creds("AK-ACME", "s3cret");
        stranger.tenant_id = "globex".to_string();
        let err = factory.connect(&stranger).await.err();
        assert!(matches!(
            err,
            Some(BackendError::Business {
                code: BusinessCode::AccessDenied,
                ..
            })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("inventory.json");
        std::fs::write(&path, INVENTORY).unwrap();

        let inventory = InventoryFile::load(&path).unwrap();
        assert_eq!(inventory.tenant_ids().collect::<Vec<_>>(), vec!["acme"]);

        assert!(InventoryFile::load(temp_dir.path().join("missing.json")).is_err());
    }
}
