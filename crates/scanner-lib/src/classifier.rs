//! Idle classification
//!
//! Maps a resource descriptor and its aggregated metrics to a verdict.
//! Two static rule tables exist: one for instances with the in-guest agent
//! (load, memory, IOPS, bandwidth) and one for instances with basic
//! telemetry only (CPU, IOPS, bandwidth). The basic table never reads
//! memory or load values.
//!
//! A resource is idle only when at least `min_conditions` rules hold.

use crate::models::{metric_names, MetricBundle, MetricValue, ResourceDescriptor};
use serde::{Deserialize, Serialize};

/// How a metric with no observed data points is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingMetricPolicy {
    /// An unobserved metric never satisfies a low-usage rule
    #[default]
    Skip,
    /// An unobserved metric reads as 0 and may satisfy a rule
    TreatAsZero,
}

/// Thresholds for the idle rules
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Load average threshold as a fraction of core count
    pub load_fraction_of_cores: f64,
    /// Memory utilization threshold, percent
    pub memory_utilization_pct: f64,
    /// CPU utilization threshold, percent
    pub cpu_utilization_pct: f64,
    /// Combined read + write IOPS threshold
    pub combined_iops: f64,
    /// Used share of allocated public bandwidth
    pub bandwidth_fraction: f64,
    /// Rules that must hold before a resource is idle
    pub min_conditions: usize,
    pub missing_metrics: MissingMetricPolicy,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            load_fraction_of_cores: 0.05,
            memory_utilization_pct: 20.0,
            cpu_utilization_pct: 5.0,
            combined_iops: 100.0,
            bandwidth_fraction: 0.10,
            min_conditions: 2,
            missing_metrics: MissingMetricPolicy::Skip,
        }
    }
}

/// Output of [`IdleClassifier::classify`]
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub is_idle: bool,
    /// Non-empty exactly when `is_idle`
    pub reasons: Vec<String>,
    /// Every rule that held, in rule-table order
    pub signals: Vec<String>,
}

/// One low-usage rule; returns a reason when it holds
type Rule = fn(&RuleInput<'_>) -> Option<String>;

struct RuleInput<'a> {
    descriptor: &'a ResourceDescriptor,
    metrics: &'a MetricBundle,
    config: &'a ClassifierConfig,
}

impl RuleInput<'_> {
    /// Value usable for comparison under the missing-metric policy
    fn value(&self, metric_name: &str) -> Option<f64> {
        usable(self.metrics.get(metric_name), self.config.missing_metrics)
    }
}

fn usable(metric: MetricValue, policy: MissingMetricPolicy) -> Option<f64> {
    match (metric.observed, policy) {
        (true, _) if metric.value.is_finite() => Some(metric.value),
        (true, _) => None,
        (false, MissingMetricPolicy::TreatAsZero) => Some(0.0),
        (false, MissingMetricPolicy::Skip) => None,
    }
}

/// Rules for instances reporting agent telemetry
const EXTENDED_RULES: &[Rule] = &[low_load_average, low_memory, low_iops, low_bandwidth];

/// Rules for instances with basic telemetry only
const BASIC_RULES: &[Rule] = &[low_cpu, low_iops, low_bandwidth];

fn low_load_average(input: &RuleInput<'_>) -> Option<String> {
    let load = input.value(metric_names::LOAD_AVERAGE_5M)?;
    let cores = input.descriptor.core_count;
    let threshold = cores as f64 * input.config.load_fraction_of_cores;
    (load < threshold).then(|| {
        format!(
            "load average {:.2} below {:.2} ({:.0}% of {} cores)",
            load,
            threshold,
            input.config.load_fraction_of_cores * 100.0,
            cores
        )
    })
}

fn low_memory(input: &RuleInput<'_>) -> Option<String> {
    let memory = input.value(metric_names::MEMORY_UTILIZATION)?;
    let threshold = input.config.memory_utilization_pct;
    (memory < threshold)
        .then(|| format!("memory utilization {:.1}% below {:.1}%", memory, threshold))
}

fn low_cpu(input: &RuleInput<'_>) -> Option<String> {
    let cpu = input.value(metric_names::CPU_UTILIZATION)?;
    let threshold = input.config.cpu_utilization_pct;
    (cpu < threshold).then(|| format!("cpu utilization {:.1}% below {:.1}%", cpu, threshold))
}

fn low_iops(input: &RuleInput<'_>) -> Option<String> {
    let policy = input.config.missing_metrics;
    let read = usable(input.metrics.get(metric_names::DISK_READ_IOPS), policy);
    let write = usable(input.metrics.get(metric_names::DISK_WRITE_IOPS), policy);
    if read.is_none() && write.is_none() {
        return None;
    }
    let combined = read.unwrap_or(0.0) + write.unwrap_or(0.0);
    let threshold = input.config.combined_iops;
    (combined < threshold)
        .then(|| format!("combined disk IOPS {:.1} below {:.0}", combined, threshold))
}

fn low_bandwidth(input: &RuleInput<'_>) -> Option<String> {
    let capacity = input.descriptor.public_bandwidth_mbps.filter(|c| *c > 0.0)?;
    let used = input.value(metric_names::PUBLIC_BANDWIDTH_OUT_MBPS)?;
    let fraction = used / capacity;
    let threshold = input.config.bandwidth_fraction;
    (fraction < threshold).then(|| {
        format!(
            "public bandwidth {:.2} of {:.0} Mbps used ({:.1}%), below {:.0}%",
            used,
            capacity,
            fraction * 100.0,
            threshold * 100.0
        )
    })
}

/// Pure idle classifier
#[derive(Debug, Clone, Default)]
pub struct IdleClassifier {
    config: ClassifierConfig,
}

impl IdleClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Evaluate every rule of the table selected by `metrics.has_agent`
    pub fn classify(&self, descriptor: &ResourceDescriptor, metrics: &MetricBundle) -> Classification {
        let rules = if metrics.has_agent {
            EXTENDED_RULES
        } else {
            BASIC_RULES
        };

        let input = RuleInput {
            descriptor,
            metrics,
            config: &self.config,
        };
        let signals: Vec<String> = rules.iter().filter_map(|rule| rule(&input)).collect();

        let is_idle = signals.len() >= self.config.min_conditions.max(1);
        let reasons = if is_idle { signals.clone() } else { Vec::new() };

        Classification {
            is_idle,
            reasons,
            signals,
        }
    }
}
