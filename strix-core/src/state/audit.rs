//! Append-only audit log of a run
//!
//! Every tool call, observation, finding and agent state change is written here
//! before the agent loop moves on, so a run can be replayed after a crash.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::run_migrations;
use crate::agents::{AgentId, AgentState, TerminationReason};
use crate::knowledge::{Finding, KnowledgeMirror, Note};
use crate::tools::ToolResult;
use crate::{Error, Result};

/// One agent state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub parent_id: Option<AgentId>,
    pub name: String,
    pub objective: String,
    pub state: AgentState,
    pub reason: Option<TerminationReason>,
    pub summary: Option<String>,
    pub steps_used: u32,
}

/// One executed tool call with its result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub agent_id: AgentId,
    pub step: u32,
    pub tool: String,
    pub args: Value,
    pub result: ToolResult,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ToolCallRecord {
    pub fn new(agent_id: &AgentId, step: u32, tool: &str, args: Value, started_at: DateTime<Utc>, result: ToolResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.clone(),
            step,
            tool: tool.to_string(),
            args,
            result,
            started_at,
            completed_at: Utc::now(),
        }
    }
}

/// Anything appended to an agent's conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub agent_id: AgentId,
    /// `reasoning`, `observation` or `notification`
    pub kind: String,
    pub content: String,
}

/// Durable, append-only record of a run. Not read by the core itself.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_agent(&self, record: &AgentRecord) -> Result<()>;
    async fn record_tool_call(&self, record: &ToolCallRecord) -> Result<()>;
    async fn record_observation(&self, record: &ObservationRecord) -> Result<()>;
    async fn record_finding(&self, finding: &Finding) -> Result<()>;
}

/// SQLite-backed audit log
pub struct SqliteAuditLog {
    run_id: String,
    conn: Mutex<Connection>,
}

impl SqliteAuditLog {
    /// Open (or create) the audit database at `path`
    pub fn open(path: impl AsRef<Path>, run_id: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, run_id.into())
    }

    /// In-memory database, for tests and dry runs
    pub fn open_in_memory(run_id: impl Into<String>) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, run_id.into())
    }

    fn init(conn: Connection, run_id: String) -> Result<Self> {
        run_migrations(&conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO run_meta (run_id, key, value) VALUES (?1, 'started_at', ?2)",
            params![run_id, Utc::now().to_rfc3339()],
        )?;
        Ok(Self {
            run_id,
            conn: Mutex::new(conn),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Io(std::io::Error::other("audit connection lock poisoned")))
    }

    /// Store a key/value pair for the run (status, finished_at, ...)
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO run_meta (run_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(run_id, key) DO UPDATE SET value = excluded.value",
            params![self.run_id, key, value],
        )?;
        Ok(())
    }

    /// Persist the run's counters
    pub fn save_metrics(&self, metrics: &super::Metrics) -> Result<()> {
        let conn = self.conn()?;
        metrics.save(&conn, &self.run_id)
    }

    /// Tool calls of one agent in step order: (step, tool, success)
    pub fn tool_calls_for(&self, agent_id: &AgentId) -> Result<Vec<(u32, String, bool)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT step, tool, success FROM tool_calls
             WHERE run_id = ?1 AND agent_id = ?2 ORDER BY step, started_at",
        )?;
        let rows = stmt
            .query_map(params![self.run_id, agent_id.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)? as u32,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Latest recorded state of every agent: (agent_id, state)
    pub fn agent_states(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT agent_id, state FROM agents a
             WHERE run_id = ?1 AND seq = (SELECT MAX(seq) FROM agents b WHERE b.run_id = a.run_id AND b.agent_id = a.agent_id)
             ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![self.run_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Persisted findings: (class, asset, severity, evidence entries)
    pub fn findings(&self) -> Result<Vec<(String, String, String, usize)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT class, asset, severity, evidence FROM findings WHERE run_id = ?1 ORDER BY discovered_at",
        )?;
        let rows = stmt
            .query_map(params![self.run_id], |row| {
                let evidence: String = row.get(3)?;
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, evidence))
            })?
            .collect::<std::result::Result<Vec<(String, String, String, String)>, _>>()?;

        rows.into_iter()
            .map(|(class, asset, severity, evidence)| {
                let entries: Vec<Value> = serde_json::from_str(&evidence)?;
                Ok((class, asset, severity, entries.len()))
            })
            .collect()
    }

    fn upsert_finding(&self, finding: &Finding) -> Result<()> {
        let evidence = serde_json::to_string(&finding.evidence)?;
        self.conn()?.execute(
            "INSERT INTO findings
             (id, run_id, class, asset, title, severity, discovered_by, discovered_at, evidence, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(run_id, class, asset) DO UPDATE SET
                title = excluded.title,
                severity = excluded.severity,
                evidence = excluded.evidence,
                updated_at = excluded.updated_at",
            params![
                finding.id,
                self.run_id,
                finding.key.class,
                finding.key.asset,
                finding.title,
                finding.severity.to_string(),
                finding.discovered_by.as_str(),
                finding.discovered_at.to_rfc3339(),
                evidence,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for SqliteAuditLog {
    async fn record_agent(&self, record: &AgentRecord) -> Result<()> {
        let reason = record
            .reason
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn()?.execute(
            "INSERT INTO agents
             (run_id, agent_id, parent_id, name, objective, state, reason, summary, steps_used, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                self.run_id,
                record.agent_id.as_str(),
                record.parent_id.as_ref().map(|p| p.as_str()),
                record.name,
                record.objective,
                record.state.as_str(),
                reason,
                record.summary,
                record.steps_used,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn record_tool_call(&self, record: &ToolCallRecord) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO tool_calls
             (id, run_id, agent_id, step, tool, args, success, error_kind, result, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                self.run_id,
                record.agent_id.as_str(),
                record.step,
                record.tool,
                serde_json::to_string(&record.args)?,
                record.result.success,
                record.result.error_kind().map(|k| k.as_str()),
                serde_json::to_string(&record.result)?,
                record.started_at.to_rfc3339(),
                record.completed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn record_observation(&self, record: &ObservationRecord) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO observations (run_id, agent_id, kind, content, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.run_id,
                record.agent_id.as_str(),
                record.kind,
                record.content,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn record_finding(&self, finding: &Finding) -> Result<()> {
        self.upsert_finding(finding)
    }
}

#[async_trait]
impl KnowledgeMirror for SqliteAuditLog {
    async fn persist_finding(&self, finding: &Finding) -> Result<()> {
        self.upsert_finding(finding)
    }

    async fn persist_note(&self, note: &Note) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO notes (run_id, tag, text, agent_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.run_id,
                note.tag,
                note.text,
                note.agent_id.as_str(),
                note.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
