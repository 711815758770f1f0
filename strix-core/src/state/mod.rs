//! Run artifacts: audit log, metrics, run directory

pub mod audit;
pub mod metrics;
pub mod migrations;
pub mod run;
pub mod schema;

pub use audit::{AgentRecord, AuditSink, ObservationRecord, SqliteAuditLog, ToolCallRecord};
pub use metrics::{Metrics, MetricsTracker, TokenCounter, TokenCounts};
pub use migrations::run_migrations;
pub use run::{generate_run_name, RunDirectory};
