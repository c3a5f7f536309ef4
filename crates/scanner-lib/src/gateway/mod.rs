//! Boundary to the cloud platform
//!
//! [`CloudBackend`] is the single capability the scanner consumes. Every
//! call made through [`MetricGateway`] is wrapped in the retry policy.

mod inventory;

pub use inventory::{
    InventoryBackend, InventoryFactory, InventoryFile, InventoryPoint, InventoryResource,
    TenantInventory,
};

use crate::error::BackendError;
use crate::models::{
    metric_names, MetricBundle, MetricSample, MetricValue, ResourceDescriptor, TenantCredentials,
};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use async_trait::async_trait;

/// Inventory and telemetry capability of one tenant's cloud account
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// List region identifiers visible to the tenant
    async fn list_regions(&self) -> Result<Vec<String>, BackendError>;

    /// List instances provisioned in a region
    async fn list_resources(&self, region: &str) -> Result<Vec<ResourceDescriptor>, BackendError>;

    /// Fetch averaged samples of one metric over `[start, end)`
    async fn get_metric(
        &self,
        resource_id: &str,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Duration,
    ) -> Result<Vec<MetricSample>, BackendError>;
}

/// Builds a backend bound to one tenant's credentials
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn connect(
        &self,
        credentials: &TenantCredentials,
    ) -> Result<Arc<dyn CloudBackend>, BackendError>;
}

/// Time range and averaging period for metric queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub period: Duration,
}

impl MetricWindow {
    /// Window of `days` ending at `end`; `None` when the start is not representable
    pub fn trailing_days(end: DateTime<Utc>, days: u32, period: Duration) -> Option<Self> {
        let span = ChronoDuration::try_days(i64::from(days))?;
        Some(Self {
            start: end.checked_sub_signed(span)?,
            end,
            period,
        })
    }
}

/// Retrying access to a [`CloudBackend`]
#[derive(Clone)]
pub struct MetricGateway {
    backend: Arc<dyn CloudBackend>,
    retry: RetryPolicy,
}

impl MetricGateway {
    pub fn new(backend: Arc<dyn CloudBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn list_regions(&self) -> Result<Vec<String>, BackendError> {
        self.retry
            .call_backend("list_regions", || self.backend.list_regions())
            .await
    }

    pub async fn list_resources(&self, region: &str) -> Result<Vec<ResourceDescriptor>, BackendError> {
        self.retry
            .call_backend("list_resources", || self.backend.list_resources(region))
            .await
    }

    async fn fetch(
        &self,
        resource_id: &str,
        metric_name: &str,
        window: &MetricWindow,
    ) -> Result<MetricValue, BackendError> {
        let samples = self
            .retry
            .call_backend("get_metric", || {
                self.backend.get_metric(
                    resource_id,
                    metric_name,
                    window.start,
                    window.end,
                    window.period,
                )
            })
            .await?;
        Ok(MetricValue::aggregate(&samples))
    }

    /// Fetch and aggregate every metric the classifier may need.
    ///
    /// Basic metrics must all succeed. A not-found rejection on an agent
    /// metric means no agent is installed and leaves that metric unobserved;
    /// `has_agent` is set when any agent metric has data points.
    pub async fn metric_bundle(
        &self,
        resource: &ResourceDescriptor,
        window: &MetricWindow,
    ) -> Result<MetricBundle, BackendError> {
        let mut bundle = MetricBundle::new(false);

        for name in metric_names::BASIC {
            let value = self.fetch(&resource.id, name, window).await?;
            bundle.insert(*name, value);
        }

        if resource.public_bandwidth_mbps.is_some() {
            let name = metric_names::PUBLIC_BANDWIDTH_OUT_MBPS;
            let value = self.fetch(&resource.id, name, window).await?;
            bundle.insert(name, value);
        }

        for name in metric_names::EXTENDED {
            let value = match self.fetch(&resource.id, name, window).await {
                Ok(value) => value,
                Err(e) if e.is_not_found() => MetricValue::unobserved(),
                Err(e) => return Err(e),
            };
            bundle.has_agent |= value.observed;
            bundle.insert(*name, value);
        }

        debug!(
            resource_id = %resource.id,
            has_agent = bundle.has_agent,
            metrics = bundle.values.len(),
            "Metric bundle assembled"
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BusinessCode, TransportKind};
    use crate::models::ChargeModel;
    use dashmap::DashMap;
    use std::collections::HashMap;

    /// Backend serving fixed samples, failing transiently a set number of times
    #[derive(Default)]
    struct FakeBackend {
        samples: HashMap<String, Vec<MetricSample>>,
        missing: Vec<String>,
        transient_failures: DashMap<String, u32>,
        calls: DashMap<String, u32>,
    }

    impl FakeBackend {
        fn with_metric(mut self, name: &str, value: f64, count: u64) -> Self {
            self.samples.insert(
                name.to_string(),
                vec![MetricSample {
                    metric_name: name.to_string(),
                    average_value: value,
                    sample_count: count,
                }],
            );
            self
        }
    }

    #[async_trait]
    impl CloudBackend for FakeBackend {
        async fn list_regions(&self) -> Result<Vec<String>, BackendError> {
            Ok(vec!["r1".to_string()])
        }

        async fn list_resources(&self, _region: &str) -> Result<Vec<ResourceDescriptor>, BackendError> {
            Ok(Vec::new())
        }

        async fn get_metric(
            &self,
            _resource_id: &str,
            metric_name: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _period: Duration,
        ) -> Result<Vec<MetricSample>, BackendError> {
            *self.calls.entry(metric_name.to_string()).or_insert(0) += 1;
            if let Some(mut remaining) = self.transient_failures.get_mut(metric_name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BackendError::transport(TransportKind::Throttled, "slow down"));
                }
            }
            if self.missing.iter().any(|m| m == metric_name) {
                return Err(BackendError::business(BusinessCode::NotFound, "no such metric"));
            }
            Ok(self.samples.get(metric_name).cloned().unwrap_or_default())
        }
    }

    fn resource(bandwidth: Option<f64>) -> ResourceDescriptor {
        ResourceDescriptor {
            id: "i-1".to_string(),
            display_name: "web-1".to_string(),
            region: "r1".to_string(),
            kind: "ecs.c7.large".to_string(),
            core_count: 2,
            created_at: Utc::now(),
            charge_model: ChargeModel::Prepaid,
            public_bandwidth_mbps: bandwidth,
        }
    }

    fn window() -> MetricWindow {
        MetricWindow::trailing_days(Utc::now(), 14, Duration::from_secs(300)).unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn test_trailing_window() {
        let end = Utc::now();
        let w = MetricWindow::trailing_days(end, 7, Duration::from_secs(60)).unwrap();
        assert_eq!(w.end - w.start, ChronoDuration::days(7));
    }

    #[test]
    fn test_unrepresentable_window_is_rejected() {
        let period = Duration::from_secs(60);
        assert!(MetricWindow::trailing_days(Utc::now(), u32::MAX, period).is_none());
        assert!(MetricWindow::trailing_days(DateTime::<Utc>::MIN_UTC, 1, period).is_none());
    }

    #[tokio::test]
    async fn test_bundle_with_agent_metrics() {
        let backend = FakeBackend::default()
            .with_metric(metric_names::CPU_UTILIZATION, 3.0, 10)
            .with_metric(metric_names::DISK_READ_IOPS, 5.0, 10)
            .with_metric(metric_names::DISK_WRITE_IOPS, 6.0, 10)
            .with_metric(metric_names::MEMORY_UTILIZATION, 12.0, 10);
        let gateway = MetricGateway::new(Arc::new(backend), fast_retry());

        let bundle = gateway.metric_bundle(&resource(None), &window()).await.unwrap();
        assert!(bundle.has_agent);
        assert_eq!(bundle.get(metric_names::MEMORY_UTILIZATION).value, 12.0);
        // No data points for load: present but unobserved
        assert!(!bundle.get(metric_names::LOAD_AVERAGE_5M).observed);
        // No bandwidth allocation: metric never requested
        assert!(!bundle.values.contains_key(metric_names::PUBLIC_BANDWIDTH_OUT_MBPS));
    }

    #[tokio::test]
    async fn test_missing_agent_metrics_mean_no_agent() {
        let backend = FakeBackend {
            missing: metric_names::EXTENDED.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
        .with_metric(metric_names::CPU_UTILIZATION, 3.0, 10)
        .with_metric(metric_names::PUBLIC_BANDWIDTH_OUT_MBPS, 1.0, 10);
        let gateway = MetricGateway::new(Arc::new(backend), fast_retry());

        let bundle = gateway
            .metric_bundle(&resource(Some(10.0)), &window())
            .await
            .unwrap();
        assert!(!bundle.has_agent);
        assert!(bundle.get(metric_names::PUBLIC_BANDWIDTH_OUT_MBPS).observed);
    }

    #[tokio::test]
    async fn test_transient_metric_failures_are_retried() {
        let backend =
            Arc::new(FakeBackend::default().with_metric(metric_names::CPU_UTILIZATION, 3.0, 1));
        backend
            .transient_failures
            .insert(metric_names::CPU_UTILIZATION.to_string(), 2);
        let gateway = MetricGateway::new(backend.clone(), fast_retry());

        let bundle = gateway.metric_bundle(&resource(None), &window()).await.unwrap();
        assert_eq!(bundle.get(metric_names::CPU_UTILIZATION).value, 3.0);
        assert_eq!(*backend.calls.get(metric_names::CPU_UTILIZATION).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_basic_metric_rejection_fails_bundle() {
        let backend = FakeBackend {
            missing: vec![metric_names::DISK_READ_IOPS.to_string()],
            ..Default::default()
        };
        let gateway = MetricGateway::new(Arc::new(backend), fast_retry());

        let err = gateway
            .metric_bundle(&resource(None), &window())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
