//! Idle cloud resource scanner
//!
//! This crate provides the core functionality for:
//! - Enumerating tenant regions and instances with bounded concurrency
//! - Retrying transient backend failures with capped backoff
//! - Caching verdict snapshots under a TTL
//! - Classifying instances as idle from heterogeneous metrics
//! - Health checks and observability

pub mod cache;
pub mod classifier;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod health;
pub mod models;
pub mod observability;
pub mod retry;
pub mod scan;

pub use cache::{CacheKey, CacheStatus, FileCacheStore, MemoryCacheStore, ResultCache};
pub use classifier::{Classification, ClassifierConfig, IdleClassifier, MissingMetricPolicy};
pub use error::{BackendError, CacheError, ScanError};
pub use executor::BoundedExecutor;
pub use gateway::{BackendFactory, CloudBackend, MetricGateway};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ScanMetrics, StructuredLogger};
pub use retry::RetryPolicy;
pub use scan::{ScanConfig, ScanOrchestrator, ScanState};
