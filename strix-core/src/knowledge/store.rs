//! Process-wide shared discovery state
//!
//! Holds findings (deduplicated by canonical key), tagged notes and the
//! per-agent message inboxes. Every operation takes the store lock for its
//! whole duration and hands back owned copies, so no caller can observe a
//! partially-applied write.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::finding::{CanonicalKey, Finding, FindingSubmission};
use crate::agents::AgentId;
use crate::{Error, Result};

/// Result of reporting a finding
#[derive(Debug, Clone)]
pub enum ReportOutcome {
    /// First submission for this key
    Created(Finding),
    /// Folded into an existing finding
    Merged(Finding),
}

impl ReportOutcome {
    pub fn finding(&self) -> &Finding {
        match self {
            ReportOutcome::Created(f) | ReportOutcome::Merged(f) => f,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ReportOutcome::Created(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportOutcome::Created(_) => "created",
            ReportOutcome::Merged(_) => "merged",
        }
    }
}

/// A free-form recon note filed under a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub tag: String,
    pub text: String,
    pub agent_id: AgentId,
    pub created_at: DateTime<Utc>,
}

/// A message from one agent to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub from: AgentId,
    pub to: AgentId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Durable copy of store writes; a failing mirror makes the store unavailable
#[async_trait]
pub trait KnowledgeMirror: Send + Sync {
    async fn persist_finding(&self, finding: &Finding) -> Result<()>;
    async fn persist_note(&self, note: &Note) -> Result<()>;
}

#[derive(Default)]
struct Inner {
    findings: HashMap<CanonicalKey, Finding>,
    /// Insertion order of keys
    order: Vec<CanonicalKey>,
    notes: HashMap<String, Vec<Note>>,
    inboxes: HashMap<AgentId, VecDeque<AgentMessage>>,
    unavailable: Option<String>,
}

impl Inner {
    fn check_available(&self) -> Result<()> {
        match &self.unavailable {
            Some(reason) => Err(Error::KnowledgeStore(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Shared knowledge for a run
#[derive(Clone, Default)]
pub struct KnowledgeStore {
    inner: Arc<Mutex<Inner>>,
    mirror: Option<Arc<dyn KnowledgeMirror>>,
}

impl KnowledgeStore {
    /// In-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that writes every finding and note through to `mirror`
    pub fn with_mirror(mirror: Arc<dyn KnowledgeMirror>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            mirror: Some(mirror),
        }
    }

    /// Record a finding, merging it into an existing one with the same canonical key
    pub async fn report_finding(&self, submission: FindingSubmission) -> Result<ReportOutcome> {
        let key = CanonicalKey::new(&submission.class, &submission.asset);
        if !key.is_complete() {
            return Err(Error::Tool(
                "finding needs both a vulnerability class and an affected asset".to_string(),
            ));
        }

        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let (finding, created) = match inner.findings.get(&key) {
            Some(existing) => {
                let mut merged = existing.clone();
                merged.merge(submission);
                (merged, false)
            }
            None => (Finding::from_submission(submission, key.clone()), true),
        };

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.persist_finding(&finding).await {
                error!(key = %key, error = %e, "Knowledge store mirror failed");
                let reason = format!("finding persistence failed: {e}");
                inner.unavailable = Some(reason.clone());
                return Err(Error::KnowledgeStore(reason));
            }
        }

        if created {
            inner.order.push(key.clone());
            info!(key = %key, severity = %finding.severity, "New finding recorded");
        } else {
            debug!(
                key = %key,
                severity = %finding.severity,
                evidence = finding.evidence.len(),
                "Finding merged"
            );
        }
        inner.findings.insert(key, finding.clone());

        Ok(if created {
            ReportOutcome::Created(finding)
        } else {
            ReportOutcome::Merged(finding)
        })
    }

    /// Append a note under `tag`; returns the note's position within the tag
    pub async fn note(&self, tag: &str, text: &str, agent_id: &AgentId) -> Result<usize> {
        let tag = normalize_tag(tag);
        if tag.is_empty() {
            return Err(Error::Tool("note tag must not be empty".to_string()));
        }
        if text.trim().is_empty() {
            return Err(Error::Tool("note text must not be empty".to_string()));
        }

        let note = Note {
            tag: tag.clone(),
            text: text.to_string(),
            agent_id: agent_id.clone(),
            created_at: Utc::now(),
        };

        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.persist_note(&note).await {
                error!(tag = %tag, error = %e, "Knowledge store mirror failed");
                let reason = format!("note persistence failed: {e}");
                inner.unavailable = Some(reason.clone());
                return Err(Error::KnowledgeStore(reason));
            }
        }

        let entries = inner.notes.entry(tag).or_default();
        entries.push(note);
        Ok(entries.len() - 1)
    }

    /// Notes under `tag`, in the order they were written
    pub async fn query(&self, tag: &str) -> Result<Vec<Note>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner
            .notes
            .get(&normalize_tag(tag))
            .cloned()
            .unwrap_or_default())
    }

    /// Every tag that has at least one note, sorted
    pub async fn tags(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut tags: Vec<String> = inner.notes.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Queue a message for `message.to`
    pub async fn send_message(&self, message: AgentMessage) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        inner
            .inboxes
            .entry(message.to.clone())
            .or_default()
            .push_back(message);
        Ok(())
    }

    /// Take every pending message for `agent_id`, oldest first
    pub async fn drain_messages(&self, agent_id: &AgentId) -> Vec<AgentMessage> {
        let mut inner = self.inner.lock().await;
        inner
            .inboxes
            .get_mut(agent_id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Snapshot of all findings in discovery order
    pub async fn findings(&self) -> Vec<Finding> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter_map(|key| inner.findings.get(key).cloned())
            .collect()
    }

    /// Snapshot of all notes grouped by tag
    pub async fn notes(&self) -> Vec<(String, Vec<Note>)> {
        let inner = self.inner.lock().await;
        let mut grouped: Vec<(String, Vec<Note>)> = inner
            .notes
            .iter()
            .map(|(tag, notes)| (tag.clone(), notes.clone()))
            .collect();
        grouped.sort_by(|a, b| a.0.cmp(&b.0));
        grouped
    }

    pub async fn finding_count(&self) -> usize {
        self.inner.lock().await.findings.len()
    }

    /// Reason the store stopped accepting writes, if it has
    pub async fn unavailable_reason(&self) -> Option<String> {
        self.inner.lock().await.unavailable.clone()
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}
