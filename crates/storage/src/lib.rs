pub mod breadcrumb_store;
pub mod failure_cache;
pub mod metrics;
pub mod raw_store;
pub mod telemetry;

pub use breadcrumb_store::BreadcrumbStore;
pub use failure_cache::{default_skip_statuses, failures_path, FailureCache, FailureEntry};
pub use metrics::{metrics_path, summary_path, MetricsSnapshot, MetricsTracker, Summary};
pub use raw_store::SectionStore;
pub use telemetry::{telemetry_path, TelemetryWriter};
