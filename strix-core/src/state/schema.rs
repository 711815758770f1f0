//! Database schema definitions

/// SQL to create all tables
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS run_meta (
    run_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (run_id, key)
);

-- Agent lifecycle, one row per state change
CREATE TABLE IF NOT EXISTS agents (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    parent_id TEXT,
    name TEXT NOT NULL,
    objective TEXT NOT NULL,
    state TEXT NOT NULL,
    reason TEXT,
    summary TEXT,
    steps_used INTEGER,
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tool_calls (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    step INTEGER NOT NULL,
    tool TEXT NOT NULL,
    args TEXT NOT NULL,
    success INTEGER NOT NULL,
    error_kind TEXT,
    result TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT NOT NULL
);

-- Everything appended to an agent's conversation
CREATE TABLE IF NOT EXISTS observations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

-- Latest state of each finding; the knowledge store writes through here
CREATE TABLE IF NOT EXISTS findings (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    class TEXT NOT NULL,
    asset TEXT NOT NULL,
    title TEXT NOT NULL,
    severity TEXT NOT NULL,
    discovered_by TEXT NOT NULL,
    discovered_at TEXT NOT NULL,
    evidence TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(run_id, class, asset)
);

CREATE TABLE IF NOT EXISTS notes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    tag TEXT NOT NULL,
    text TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metrics (
    run_id TEXT PRIMARY KEY,
    tool_calls INTEGER NOT NULL DEFAULT 0,
    tool_failures INTEGER NOT NULL DEFAULT 0,
    reasoning_calls INTEGER NOT NULL DEFAULT 0,
    reasoning_failures INTEGER NOT NULL DEFAULT 0,
    agents_spawned INTEGER NOT NULL DEFAULT 0,
    tokens_input INTEGER NOT NULL DEFAULT 0,
    tokens_output INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_agents_run ON agents(run_id, agent_id);
CREATE INDEX IF NOT EXISTS idx_tool_calls_agent ON tool_calls(run_id, agent_id, step);
CREATE INDEX IF NOT EXISTS idx_observations_agent ON observations(run_id, agent_id);
CREATE INDEX IF NOT EXISTS idx_notes_tag ON notes(run_id, tag);
"#;
