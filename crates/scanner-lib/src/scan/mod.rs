//! Scan orchestration
//!
//! A scan walks `Idle -> EnumeratingRegions -> EnumeratingInstances ->
//! FetchingMetrics -> Classifying -> Done`, or jumps straight to `Done` when
//! the cache holds a fresh snapshot. Region probing and metric fan-out run on
//! separate worker budgets. A failing region or instance is recorded in the
//! report and never aborts its siblings.

use crate::cache::{CacheKey, ResultCache};
use crate::classifier::{ClassifierConfig, IdleClassifier};
use crate::error::{BackendError, ScanError};
use crate::executor::{BoundedExecutor, Progress, ProgressFn, WorkError};
use crate::gateway::{BackendFactory, MetricGateway, MetricWindow};
use crate::models::{
    IdleVerdict, ResourceClass, ResourceDescriptor, ScanFailure, ScanReport, ScanRequest,
    ScanSnapshot, ScanStage, TenantCredentials,
};
use crate::observability::{ScanMetrics, StructuredLogger};
use crate::retry::RetryPolicy;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};


/// Default worker budget for region enumeration
pub const DEFAULT_REGION_WORKERS: usize = 4;

/// Default worker budget for metric fetches
pub const DEFAULT_METRIC_WORKERS: usize = 16;

/// Default metric averaging period (5 minutes)
pub const DEFAULT_METRIC_PERIOD: Duration = Duration::from_secs(300);

/// Orchestrator tunables
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub region_workers: usize,
    pub metric_workers: usize,
    pub metric_period: Duration,
    pub retry: RetryPolicy,
    /// Cumulative bound on one scan; `None` relies on per-call retry bounds
    pub scan_deadline: Option<Duration>,
    /// Never serve scans from the cache
    pub force_no_cache: bool,
    pub classifier: ClassifierConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            region_workers: DEFAULT_REGION_WORKERS,
            metric_workers: DEFAULT_METRIC_WORKERS,
            metric_period: DEFAULT_METRIC_PERIOD,
            retry: RetryPolicy::default(),
            scan_deadline: None,
            force_no_cache: false,
            classifier: ClassifierConfig::default(),
        }
    }
}

/// Last known position of a tenant's scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    EnumeratingRegions,
    EnumeratingInstances,
    FetchingMetrics,
    Classifying,
    Done,
    Failed,
}

/// Drives scans for a fixed set of tenants
pub struct ScanOrchestrator {
    factory: Arc<dyn BackendFactory>,
    tenants: HashMap<String, TenantCredentials>,
    cache: ResultCache,
    classifier: IdleClassifier,
    config: ScanConfig,
    states: DashMap<String, ScanState>,
    metrics: ScanMetrics,
    logger: StructuredLogger,
}

impl ScanOrchestrator {
    pub fn new(
        factory: Arc<dyn BackendFactory>,
        tenants: impl IntoIterator<Item = TenantCredentials>,
        cache: ResultCache,
        config: ScanConfig,
    ) -> Self {
        let tenants: HashMap<_, _> = tenants
            .into_iter()
            .map(|credentials| (credentials.tenant_id.clone(), credentials))
            .collect();

        Self {
            factory,
            tenants,
            cache,
            classifier: IdleClassifier::new(config.classifier),
            config,
            states: DashMap::new(),
            metrics: ScanMetrics::new(),
            logger: StructuredLogger::new("orchestrator"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Configured tenant ids, sorted
    pub fn tenant_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.tenants.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn has_tenant(&self, tenant_id: &str) -> bool {
        self.tenants.contains_key(tenant_id)
    }

    /// Last state reached by a tenant's scan, `Idle` if never scanned
    pub fn state(&self, tenant_id: &str) -> ScanState {
        self.states
            .get(tenant_id)
            .map(|state| *state)
            .unwrap_or(ScanState::Idle)
    }

    /// Cache key holding a tenant's verdict snapshot
    pub fn cache_key(tenant_id: &str) -> CacheKey {
        CacheKey::new(tenant_id, ResourceClass::ComputeInstance)
    }

    fn set_state(&self, tenant_id: &str, state: ScanState) {
        debug!(tenant_id = %tenant_id, state = ?state, "Scan state changed");
        self.states.insert(tenant_id.to_string(), state);
    }

    /// Run one scan, serving a fresh cached snapshot unless refresh is forced.
    ///
    /// Only orchestration-level failures are returned as errors; per-region
    /// and per-instance failures are listed in the report.
    pub async fn scan(&self, request: ScanRequest) -> Result<ScanReport, ScanError> {
        let started = Instant::now();
        self.logger
            .log_scan_started(&request.tenant_id, request.window_days, request.force_refresh);

        let outcome = match self.config.scan_deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.run(&request))
                .await
                .unwrap_or(Err(ScanError::DeadlineExceeded(deadline))),
            None => self.run(&request).await,
        };

        let elapsed = started.elapsed();
        match &outcome {
            Ok(report) => {
                let source = if report.from_cache { "cached" } else { "fresh" };
                self.metrics.inc_scans(source);
                self.metrics
                    .observe_scan_duration(source, elapsed.as_secs_f64());
                self.logger
                    .log_scan_completed(report, elapsed.as_millis() as u64);
            }
            Err(e) => {
                if self.has_tenant(&request.tenant_id) {
                    self.set_state(&request.tenant_id, ScanState::Failed);
                }
                self.metrics.inc_scans("failed");
                self.logger.log_scan_failed(&request.tenant_id, e);
            }
        }
        outcome
    }

    async fn run(&self, request: &ScanRequest) -> Result<ScanReport, ScanError> {
        if request.window_days == 0 {
            return Err(ScanError::InvalidRequest(
                "window_days must be at least 1".to_string(),
            ));
        }
        let window = MetricWindow::trailing_days(
            Utc::now(),
            request.window_days,
            self.config.metric_period,
        )
        .ok_or_else(|| {
            ScanError::InvalidRequest(format!(
                "window_days {} is out of range",
                request.window_days
            ))
        })?;
        let tenant_id = request.tenant_id.as_str();
        let credentials = self
            .tenants
            .get(tenant_id)
            .ok_or_else(|| ScanError::UnknownTenant(tenant_id.to_string()))?;
        let key = Self::cache_key(tenant_id);

        self.set_state(tenant_id, ScanState::Idle);
        if !request.force_refresh && !self.config.force_no_cache {
            if let Some((snapshot, age)) = self.cache.get_with_age::<ScanSnapshot>(&key) {
                info!(tenant_id = %tenant_id, age_secs = age.as_secs(), "Serving scan from cache");
                self.set_state(tenant_id, ScanState::Done);
                return Ok(ScanReport::from_snapshot(
                    tenant_id,
                    snapshot,
                    true,
                    Some(age.as_secs()),
                ));
            }
        }

        let backend = self
            .factory
            .connect(credentials)
            .await
            .map_err(|source| ScanError::Connect {
                tenant_id: tenant_id.to_string(),
                source,
            })?;
        let gateway = MetricGateway::new(backend, self.config.retry);

        self.set_state(tenant_id, ScanState::EnumeratingRegions);
        let regions = gateway
            .list_regions()
            .await
            .map_err(|source| ScanError::RegionDiscovery {
                tenant_id: tenant_id.to_string(),
                source,
            })?;
        if regions.is_empty() {
            return Err(ScanError::NoRegions(tenant_id.to_string()));
        }

        let mut failures = Vec::new();

        self.set_state(tenant_id, ScanState::EnumeratingInstances);
        let resources = self
            .enumerate_resources(tenant_id, &gateway, regions, &mut failures)
            .await;

        self.set_state(tenant_id, ScanState::FetchingMetrics);
        let bundles = BoundedExecutor::new(self.config.metric_workers)
            .run(
                resources.clone(),
                {
                    let gateway = gateway.clone();
                    move |descriptor: ResourceDescriptor| {
                        let gateway = gateway.clone();
                        async move { gateway.metric_bundle(&descriptor, &window).await }
                    }
                },
                Some(progress_logger(tenant_id, "metric_fetch")),
            )
            .await;

        self.set_state(tenant_id, ScanState::Classifying);
        let mut verdicts = Vec::with_capacity(resources.len());
        for (descriptor, result) in resources.into_iter().zip(bundles) {
            match result {
                Ok(bundle) => {
                    let classification = self.classifier.classify(&descriptor, &bundle);
                    let verdict = IdleVerdict {
                        resource_id: descriptor.id,
                        display_name: descriptor.display_name,
                        region: descriptor.region,
                        is_idle: classification.is_idle,
                        reasons: classification.reasons,
                        signals: classification.signals,
                        evaluated_at: Utc::now(),
                    };
                    if verdict.is_idle {
                        self.logger.log_idle_resource(tenant_id, &verdict);
                    }
                    verdicts.push(verdict);
                }
                Err(e) => {
                    self.metrics
                        .inc_evaluation_failures(tenant_id, "metric_fetch");
                    failures.push(failure(
                        descriptor.region,
                        Some(descriptor.id),
                        ScanStage::MetricFetch,
                        e,
                    ));
                }
            }
        }

        let snapshot = ScanSnapshot { verdicts, failures };
        if let Err(e) = self.cache.put(&key, &snapshot) {
            warn!(tenant_id = %tenant_id, error = %e, "Failed to cache scan snapshot");
        }

        let report = ScanReport::from_snapshot(tenant_id, snapshot, false, None);
        self.metrics
            .add_resources_evaluated(tenant_id, report.success_count as u64);
        self.metrics
            .set_idle_resources(tenant_id, report.idle_count() as i64);
        self.set_state(tenant_id, ScanState::Done);
        Ok(report)
    }

    /// List instances in every region, pruning empty regions.
    ///
    /// Results are flattened in region order.
    async fn enumerate_resources(
        &self,
        tenant_id: &str,
        gateway: &MetricGateway,
        regions: Vec<String>,
        failures: &mut Vec<ScanFailure>,
    ) -> Vec<ResourceDescriptor> {
        let listed = BoundedExecutor::new(self.config.region_workers)
            .run(
                regions.clone(),
                {
                    let gateway = gateway.clone();
                    move |region: String| {
                        let gateway = gateway.clone();
                        async move { gateway.list_resources(&region).await }
                    }
                },
                Some(progress_logger(tenant_id, "enumeration")),
            )
            .await;

        let mut resources = Vec::new();
        for (region, result) in regions.into_iter().zip(listed) {
            match result {
                Ok(found) if found.is_empty() => {
                    debug!(tenant_id = %tenant_id, region = %region, "Pruned empty region");
                }
                Ok(found) => resources.extend(found),
                Err(e) => {
                    self.metrics
                        .inc_evaluation_failures(tenant_id, "enumeration");
                    failures.push(failure(region, None, ScanStage::Enumeration, e));
                }
            }
        }
        resources
    }
}

fn failure(
    region: String,
    resource_id: Option<String>,
    stage: ScanStage,
    error: WorkError<BackendError>,
) -> ScanFailure {
    let retryable = matches!(&error, WorkError::Failed(e) if e.is_retryable());
    warn!(
        region = %region,
        resource_id = ?resource_id,
        stage = ?stage,
        error = %error,
        "Scan item could not be evaluated"
    );
    ScanFailure {
        region,
        resource_id,
        stage,
        error: error.to_string(),
        retryable,
    }
}

fn progress_logger(tenant_id: &str, phase: &'static str) -> ProgressFn {
    let tenant_id = tenant_id.to_string();
    Arc::new(move |progress: Progress| {
        debug!(
            tenant_id = %tenant_id,
            phase = phase,
            completed = progress.completed,
            total = progress.total,
            "Scan progress"
        );
    })
}
