//! Tool gateway and catalogue

pub mod definitions;
pub mod gateway;
pub mod result;

pub use definitions::{requires_sandbox, tool_definitions, SANDBOX_TOOLS};
pub use gateway::{capability_request, ToolGateway};
pub use result::{truncate_output, ToolErrorKind, ToolFailure, ToolResult, MAX_OBSERVATION_BYTES};
