use std::collections::HashMap;
use std::path::PathBuf;

use super::types::{infer_target, Target, TargetKind};
use crate::Result;

/// Every target of a run, with workspace subdirectories assigned
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    pub targets: Vec<Target>,
}

impl TargetSet {
    pub fn from_strings(inputs: &[String]) -> Result<Self> {
        let targets = inputs
            .iter()
            .map(|input| infer_target(input))
            .collect::<Result<Vec<_>>>()?;
        let mut set = Self { targets };
        set.assign_workspace_subdirs();
        Ok(set)
    }

    /// Give every source target a unique subdirectory: `name`, `name-2`, ...
    pub fn assign_workspace_subdirs(&mut self) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for target in &mut self.targets {
            let Some(base) = target.base_name() else {
                continue;
            };
            let count = counts.entry(base.clone()).or_insert(0);
            *count += 1;
            target.workspace_subdir = Some(if *count == 1 {
                base
            } else {
                format!("{base}-{count}")
            });
        }
    }

    /// Host directories to mount read-only into sandboxes, with their subdirectory names
    pub fn source_mounts(&self) -> Vec<(PathBuf, String)> {
        self.targets
            .iter()
            .filter_map(|t| match (&t.kind, &t.workspace_subdir) {
                (TargetKind::LocalCode { path }, Some(sub)) => Some((path.clone(), sub.clone())),
                _ => None,
            })
            .collect()
    }

    /// Target strings as the user gave them
    pub fn labels(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.raw.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Objective handed to the root agent
pub fn build_root_objective(targets: &TargetSet, instruction: Option<&str>) -> String {
    let mut repositories = Vec::new();
    let mut local_code = Vec::new();
    let mut urls = Vec::new();

    for target in &targets.targets {
        match &target.kind {
            // repositories are cloned by the agents themselves
            TargetKind::Repository { url } => repositories.push(format!(
                "- {url} (clone into: {})",
                target.workspace_path().unwrap_or_else(|| "/workspace".to_string())
            )),
            TargetKind::LocalCode { path } => local_code.push(format!(
                "- {} (available at: {})",
                path.display(),
                target.workspace_path().unwrap_or_else(|| "/workspace".to_string())
            )),
            TargetKind::WebApplication { url } => urls.push(format!("- {url}")),
        }
    }

    let mut objective = String::from("Perform a security assessment of the following targets.");
    for (heading, lines) in [
        ("Repositories", repositories),
        ("Local Codebases", local_code),
        ("URLs", urls),
    ] {
        if lines.is_empty() {
            continue;
        }
        objective.push_str(&format!("\n\n{heading}:\n"));
        objective.push_str(&lines.join("\n"));
    }

    if let Some(instruction) = instruction.map(str::trim).filter(|i| !i.is_empty()) {
        objective.push_str(&format!("\n\nSpecial instructions: {instruction}"));
    }
    objective
}
