//! Run-wide counters for tool calls, reasoning calls and token usage

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::Result;

/// Token usage counters
#[derive(Debug, Default)]
pub struct TokenCounter {
    pub input: AtomicU64,
    pub output: AtomicU64,
}

impl TokenCounter {
    /// Get current counts
    pub fn get(&self) -> TokenCounts {
        TokenCounts {
            input: self.input.load(Ordering::Relaxed),
            output: self.output.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of token counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
}

/// Run metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub tool_calls: u64,
    pub tool_failures: u64,
    pub reasoning_calls: u64,
    pub reasoning_failures: u64,
    pub agents_spawned: u64,
    pub tokens: TokenCounts,
}

impl Metrics {
    /// Load the metrics row of a run, if one was saved
    pub fn load(conn: &Connection, run_id: &str) -> Result<Option<Self>> {
        let metrics = conn
            .query_row(
                "SELECT tool_calls, tool_failures, reasoning_calls, reasoning_failures,
                        agents_spawned, tokens_input, tokens_output
                 FROM metrics WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(Self {
                        tool_calls: row.get::<_, i64>(0)? as u64,
                        tool_failures: row.get::<_, i64>(1)? as u64,
                        reasoning_calls: row.get::<_, i64>(2)? as u64,
                        reasoning_failures: row.get::<_, i64>(3)? as u64,
                        agents_spawned: row.get::<_, i64>(4)? as u64,
                        tokens: TokenCounts {
                            input: row.get::<_, i64>(5)? as u64,
                            output: row.get::<_, i64>(6)? as u64,
                        },
                    })
                },
            )
            .optional()?;
        Ok(metrics)
    }

    /// Upsert the metrics row of a run
    pub fn save(&self, conn: &Connection, run_id: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO metrics (run_id, tool_calls, tool_failures, reasoning_calls,
                                  reasoning_failures, agents_spawned, tokens_input, tokens_output, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))
             ON CONFLICT(run_id) DO UPDATE SET
                tool_calls = excluded.tool_calls,
                tool_failures = excluded.tool_failures,
                reasoning_calls = excluded.reasoning_calls,
                reasoning_failures = excluded.reasoning_failures,
                agents_spawned = excluded.agents_spawned,
                tokens_input = excluded.tokens_input,
                tokens_output = excluded.tokens_output,
                updated_at = excluded.updated_at",
            params![
                run_id,
                self.tool_calls as i64,
                self.tool_failures as i64,
                self.reasoning_calls as i64,
                self.reasoning_failures as i64,
                self.agents_spawned as i64,
                self.tokens.input as i64,
                self.tokens.output as i64,
            ],
        )?;
        Ok(())
    }
}

/// Thread-safe metrics tracker
#[derive(Debug, Clone, Default)]
pub struct MetricsTracker {
    tool_calls: Arc<AtomicU64>,
    tool_failures: Arc<AtomicU64>,
    reasoning_calls: Arc<AtomicU64>,
    reasoning_failures: Arc<AtomicU64>,
    agents_spawned: Arc<AtomicU64>,
    tokens: Arc<TokenCounter>,
}

impl MetricsTracker {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tool call and whether it succeeded
    pub fn record_tool_call(&self, success: bool) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one `decide` call, after retries
    pub fn record_reasoning_call(&self, success: bool) {
        self.reasoning_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.reasoning_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_agent_spawned(&self) {
        self.agents_spawned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record token usage
    pub fn record_tokens(&self, input: u64, output: u64) {
        self.tokens.input.fetch_add(input, Ordering::Relaxed);
        self.tokens.output.fetch_add(output, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> Metrics {
        Metrics {
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            tool_failures: self.tool_failures.load(Ordering::Relaxed),
            reasoning_calls: self.reasoning_calls.load(Ordering::Relaxed),
            reasoning_failures: self.reasoning_failures.load(Ordering::Relaxed),
            agents_spawned: self.agents_spawned.load(Ordering::Relaxed),
            tokens: self.tokens.get(),
        }
    }

    /// Save to database
    pub fn save(&self, conn: &Connection, run_id: &str) -> Result<()> {
        self.snapshot().save(conn, run_id)
    }
}
