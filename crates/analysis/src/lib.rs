//! Metrics and reporting for the Chakravyuha pass pipeline.

pub mod metrics;
pub mod report;

pub use metrics::{collect_metrics, compare, Metrics};
pub use report::{Report, ReportData};
