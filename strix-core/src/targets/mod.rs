mod collection;
mod types;

pub use collection::{build_root_objective, TargetSet};
pub use types::{infer_target, sanitize_name, Target, TargetKind};
