//! strix-core: orchestration graph for LLM-driven multi-agent security testing

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod agents;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod knowledge;
pub mod providers;
pub mod reports;
pub mod sandbox;
pub mod state;
pub mod targets;
pub mod tools;

pub use error::{Error, Result};
