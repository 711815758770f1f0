//! Per-run artifact directory

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::RunConfig;
use crate::{Error, Result};

#[rustfmt::skip]
const ADJECTIVES: &[&str] = &[
    "stealthy", "sneaky", "crafty", "elite", "phantom", "shadow", "silent",
    "rogue", "covert", "ninja", "ghost", "cyber", "digital", "binary",
    "encrypted", "obfuscated", "masked", "cloaked", "invisible", "anonymous",
];

#[rustfmt::skip]
const NOUNS: &[&str] = &[
    "exploit", "payload", "backdoor", "rootkit", "keylogger", "botnet", "trojan",
    "worm", "virus", "packet", "buffer", "shell", "daemon", "spider", "crawler",
    "scanner", "sniffer", "honeypot", "firewall", "breach",
];

/// Random `adjective-noun-NNN` name with NNN in 100..=999
pub fn generate_run_name() -> String {
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    let pick = |i: usize, len: usize| usize::from(bytes[i]) % len;
    let number = 100 + u16::from_le_bytes([bytes[2], bytes[3]]) % 900;
    format!(
        "{}-{}-{}",
        ADJECTIVES[pick(0, ADJECTIVES.len())],
        NOUNS[pick(1, NOUNS.len())],
        number
    )
}

/// `<runs_dir>/<run_name>/` and the files inside it
#[derive(Debug, Clone)]
pub struct RunDirectory {
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl RunDirectory {
    /// Create the directory; an existing run directory of the same name is an error
    pub fn create(runs_dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::Config(format!("invalid run name '{name}'")));
        }
        let path = runs_dir.as_ref().join(name);
        if path.exists() {
            return Err(Error::Config(format!(
                "run directory {} already exists",
                path.display()
            )));
        }
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            name: name.to_string(),
            path,
            created_at: Utc::now(),
        })
    }

    /// Create a directory under a fresh generated name
    pub fn create_unique(runs_dir: impl AsRef<Path>) -> Result<Self> {
        let runs_dir = runs_dir.as_ref();
        for _ in 0..32 {
            let name = generate_run_name();
            if !runs_dir.join(&name).exists() {
                return Self::create(runs_dir, &name);
            }
        }
        Err(Error::Config(format!(
            "could not find a free run name in {}",
            runs_dir.display()
        )))
    }

    pub fn audit_db(&self) -> PathBuf {
        self.path.join("audit.db")
    }

    pub fn config_file(&self) -> PathBuf {
        self.path.join("config.toml")
    }

    pub fn report_json(&self) -> PathBuf {
        self.path.join("report.json")
    }

    pub fn report_markdown(&self) -> PathBuf {
        self.path.join("report.md")
    }

    pub fn log_file(&self) -> PathBuf {
        self.path.join("strix.log")
    }

    /// Write the effective configuration with secrets redacted
    pub fn write_config(&self, config: &RunConfig) -> Result<()> {
        std::fs::write(self.config_file(), config.to_redacted_toml()?)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_run_name_shape() {
        for _ in 0..50 {
            let name = generate_run_name();
            let parts: Vec<&str> = name.split('-').collect();
            assert_eq!(parts.len(), 3, "{name}");
            assert!(ADJECTIVES.contains(&parts[0]));
            assert!(NOUNS.contains(&parts[1]));
            let n: u32 = parts[2].parse().unwrap();
            assert!((100..=999).contains(&n));
        }
    }

    #[test]
    fn test_create_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDirectory::create(tmp.path(), "ghost-shell-123").unwrap();
        assert!(run.path.is_dir());
        assert_eq!(run.audit_db(), tmp.path().join("ghost-shell-123/audit.db"));

        run.write_config(&RunConfig::default()).unwrap();
        assert!(run.config_file().exists());

        assert!(RunDirectory::create(tmp.path(), "ghost-shell-123").is_err());
        assert!(RunDirectory::create(tmp.path(), "../escape").is_err());
    }

    #[test]
    fn test_create_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let a = RunDirectory::create_unique(tmp.path()).unwrap();
        let b = RunDirectory::create_unique(tmp.path()).unwrap();
        assert_ne!(a.path, b.path);
    }
}
