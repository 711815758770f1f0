//! Agents: the decision type, conversation state and the reasoning loop

mod action;
mod conversation;
pub mod prompts;
mod runner;
mod traits;

pub use action::{
    arg_bool, arg_str, Action, FindingReport, SpawnRequest, FINISH_TOOLS, REPORT_TOOL, SPAWN_TOOL,
    WAIT_TOOLS,
};
pub use conversation::{Conversation, ConversationContext, Turn, HISTORY_WINDOW};
pub use prompts::Prompts;
pub use runner::{render_child_results, AgentRunner, AgentSpec, RunContext};
pub use traits::{
    AgentId, AgentState, Budget, GraphControl, TerminationReason, TerminationResult,
};
