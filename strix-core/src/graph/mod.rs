//! Orchestration graph: agent arena and the scheduler that drives it

pub mod arena;
pub mod scheduler;

pub use arena::{AgentArena, AgentNode, AgentSnapshot};
pub use scheduler::{RunOutcome, Scheduler, SchedulerDeps};
