//! Result aggregation and report export

pub mod aggregator;
pub mod generator;
pub mod models;

pub use aggregator::ResultAggregator;
pub use generator::{export_json, export_markdown, generate_markdown};
pub use models::{
    AgentOutcome, ReportMetadata, ReportMetrics, ReportSummary, RiskRating, RunReport,
    SeverityCounts,
};
