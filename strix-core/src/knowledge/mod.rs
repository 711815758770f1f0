//! Shared findings, notes and inter-agent messages

mod finding;
mod store;

pub use finding::{
    normalize_asset, normalize_class, CanonicalKey, Evidence, Finding, FindingSubmission, Severity,
};
pub use store::{AgentMessage, KnowledgeMirror, KnowledgeStore, Note, ReportOutcome};
