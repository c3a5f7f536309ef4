//! Core data models for the idle resource scanner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric names requested from the cloud backend
pub mod metric_names {
    /// Average CPU utilization in percent (basic telemetry)
    pub const CPU_UTILIZATION: &str = "cpu_utilization";
    /// Disk read operations per second (basic telemetry)
    pub const DISK_READ_IOPS: &str = "disk_read_iops";
    /// Disk write operations per second (basic telemetry)
    pub const DISK_WRITE_IOPS: &str = "disk_write_iops";
    /// Outbound public bandwidth in Mbps (basic telemetry)
    pub const PUBLIC_BANDWIDTH_OUT_MBPS: &str = "public_bandwidth_out_mbps";
    /// 5-minute load average (agent telemetry)
    pub const LOAD_AVERAGE_5M: &str = "load_average_5m";
    /// Memory utilization in percent (agent telemetry)
    pub const MEMORY_UTILIZATION: &str = "memory_utilization";

    /// Metrics every instance reports without an in-guest agent
    pub const BASIC: &[&str] = &[CPU_UTILIZATION, DISK_READ_IOPS, DISK_WRITE_IOPS];

    /// Metrics only available when the in-guest agent is installed
    pub const EXTENDED: &[&str] = &[LOAD_AVERAGE_5M, MEMORY_UTILIZATION];
}

/// How an instance is billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeModel {
    Prepaid,
    PayAsYouGo,
    Spot,
}

/// Resource class scanned by one orchestrator pass; part of the cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    ComputeInstance,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::ComputeInstance => "compute_instance",
        }
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one provisioned resource from a single enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub display_name: String,
    pub region: String,
    /// Vendor instance type, e.g. `ecs.g7.2xlarge`
    pub kind: String,
    pub core_count: u32,
    pub created_at: DateTime<Utc>,
    pub charge_model: ChargeModel,
    /// Allocated public bandwidth capacity, if the resource has any
    #[serde(default)]
    pub public_bandwidth_mbps: Option<f64>,
}

/// One averaged data window returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric_name: String,
    pub average_value: f64,
    pub sample_count: u64,
}

/// Aggregated value of one metric over the scan window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: f64,
    /// False when the backend returned no data points for the window
    pub observed: bool,
}

impl MetricValue {
    pub fn observed(value: f64) -> Self {
        Self {
            value,
            observed: true,
        }
    }

    pub fn unobserved() -> Self {
        Self {
            value: 0.0,
            observed: false,
        }
    }

    /// Sample-count weighted mean; windows with no data points are ignored
    pub fn aggregate(samples: &[MetricSample]) -> Self {
        let (weighted, count) = samples
            .iter()
            .filter(|s| s.sample_count > 0 && s.average_value.is_finite())
            .fold((0.0, 0u64), |(sum, n), s| {
                (sum + s.average_value * s.sample_count as f64, n + s.sample_count)
            });

        if count == 0 {
            Self::unobserved()
        } else {
            Self::observed(weighted / count as f64)
        }
    }
}

/// Aggregated metrics for one resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricBundle {
    pub values: BTreeMap<String, MetricValue>,
    /// Whether extended (memory/load) telemetry was observed
    pub has_agent: bool,
}

impl MetricBundle {
    pub fn new(has_agent: bool) -> Self {
        Self {
            values: BTreeMap::new(),
            has_agent,
        }
    }

    pub fn insert(&mut self, metric_name: impl Into<String>, value: MetricValue) {
        self.values.insert(metric_name.into(), value);
    }

    /// Builder-style insert of an observed value
    pub fn with(mut self, metric_name: &str, value: f64) -> Self {
        self.insert(metric_name, MetricValue::observed(value));
        self
    }

    /// Missing entries read as unobserved
    pub fn get(&self, metric_name: &str) -> MetricValue {
        self.values
            .get(metric_name)
            .copied()
            .unwrap_or_else(MetricValue::unobserved)
    }
}

/// Classification outcome for one resource from one scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleVerdict {
    pub resource_id: String,
    pub display_name: String,
    pub region: String,
    pub is_idle: bool,
    /// Non-empty exactly when `is_idle`
    pub reasons: Vec<String>,
    /// Every low-usage condition that held, including a lone one
    pub signals: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Stage at which a scan item could not be evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    Enumeration,
    MetricFetch,
}

/// A region or resource that could not be evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub region: String,
    /// None when the whole region failed to enumerate
    pub resource_id: Option<String>,
    pub stage: ScanStage,
    pub error: String,
    pub retryable: bool,
}

/// Verdict set persisted in the result cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub verdicts: Vec<IdleVerdict>,
    pub failures: Vec<ScanFailure>,
}

/// Scan trigger issued by front-ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub tenant_id: String,
    pub window_days: u32,
    #[serde(default)]
    pub force_refresh: bool,
}

/// Result of one scan, fresh or cached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub tenant_id: String,
    pub verdicts: Vec<IdleVerdict>,
    pub failures: Vec<ScanFailure>,
    pub success_count: usize,
    pub failure_count: usize,
    pub from_cache: bool,
    /// Age of the cached snapshot in seconds when served from cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_secs: Option<u64>,
}

impl ScanReport {
    pub fn from_snapshot(
        tenant_id: impl Into<String>,
        snapshot: ScanSnapshot,
        from_cache: bool,
        cache_age_secs: Option<u64>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            success_count: snapshot.verdicts.len(),
            failure_count: snapshot.failures.len(),
            verdicts: snapshot.verdicts,
            failures: snapshot.failures,
            from_cache,
            cache_age_secs,
        }
    }

    /// Resources flagged as idle
    pub fn idle(&self) -> impl Iterator<Item = &IdleVerdict> {
        self.verdicts.iter().filter(|v| v.is_idle)
    }

    pub fn idle_count(&self) -> usize {
        self.idle().count()
    }
}

/// Credential scope for one tenant; passed explicitly to backend construction
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCredentials {
    pub tenant_id: String,
    pub access_key_id: String,
    #[serde(default)]
    pub access_key_secret: String,
}

impl std::fmt::Debug for TenantCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .finish()
    }
}
