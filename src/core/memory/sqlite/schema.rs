use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePool;

const KERNEL_SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS kernel_schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";
const KERNEL_SCHEMA_VERSION_KEY: &str = "kernel_schema_version";
const KERNEL_SCHEMA_VERSION: u32 = 1;

const TABLES: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS working_sets (
         problem_id TEXT PRIMARY KEY,
         body       TEXT NOT NULL,
         created_at TEXT NOT NULL,
         expires_at TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS shared_references (
         key        TEXT NOT NULL,
         version    INTEGER NOT NULL,
         value      TEXT NOT NULL,
         source     TEXT NOT NULL,
         created_at TEXT NOT NULL,
         updated_at TEXT NOT NULL,
         PRIMARY KEY (key, version)
     )",
    "CREATE TABLE IF NOT EXISTS episodes (
         seq        INTEGER PRIMARY KEY AUTOINCREMENT,
         id         TEXT NOT NULL UNIQUE,
         timestamp  TEXT NOT NULL,
         problem_id TEXT,
         entry_type TEXT NOT NULL,
         payload    TEXT NOT NULL,
         tags       TEXT NOT NULL DEFAULT '[]',
         supersedes TEXT
     )",
    "CREATE TABLE IF NOT EXISTS synthesized_patterns (
         id                   TEXT PRIMARY KEY,
         pattern_type         TEXT NOT NULL,
         input_signature      TEXT NOT NULL,
         recommended_action   TEXT NOT NULL,
         confidence           REAL NOT NULL,
         evidence_ids         TEXT NOT NULL,
         created_at           TEXT NOT NULL,
         last_strengthened_at TEXT NOT NULL,
         protected            INTEGER NOT NULL DEFAULT 0
     )",
];

const INDEXES_AND_TRIGGERS: [&str; 5] = [
    "CREATE INDEX IF NOT EXISTS idx_episodes_problem
         ON episodes(problem_id, seq)",
    "CREATE INDEX IF NOT EXISTS idx_episodes_type
         ON episodes(entry_type, seq)",
    "CREATE INDEX IF NOT EXISTS idx_working_sets_expiry
         ON working_sets(expires_at)",
    "CREATE TRIGGER IF NOT EXISTS episodes_no_update BEFORE UPDATE ON episodes
     BEGIN
         SELECT RAISE(ABORT, 'episodes are append-only');
     END",
    "CREATE TRIGGER IF NOT EXISTS episodes_no_delete BEFORE DELETE ON episodes
     BEGIN
         SELECT RAISE(ABORT, 'episodes are append-only');
     END",
];

async fn ensure_schema_version(pool: &SqlitePool) -> Result<()> {
    sqlx::query(KERNEL_SCHEMA_META_TABLE)
        .execute(pool)
        .await
        .context("create kernel_schema_meta table")?;

    let stored_version: Option<(String,)> =
        sqlx::query_as("SELECT value FROM kernel_schema_meta WHERE key = $1")
            .bind(KERNEL_SCHEMA_VERSION_KEY)
            .fetch_optional(pool)
            .await
            .context("load kernel schema version")?;

    if let Some((value,)) = stored_version {
        let parsed = value
            .parse::<u32>()
            .with_context(|| format!("invalid kernel schema version value: {value}"))?;
        anyhow::ensure!(
            parsed == KERNEL_SCHEMA_VERSION,
            "incompatible kernel schema version: stored={parsed}, expected={KERNEL_SCHEMA_VERSION}"
        );
        return Ok(());
    }

    sqlx::query("INSERT INTO kernel_schema_meta (key, value) VALUES ($1, $2)")
        .bind(KERNEL_SCHEMA_VERSION_KEY)
        .bind(KERNEL_SCHEMA_VERSION.to_string())
        .execute(pool)
        .await
        .context("persist kernel schema version")?;

    Ok(())
}

/// Create every compartment table. Idempotent.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    ensure_schema_version(pool).await?;
    for statement in TABLES.iter().chain(INDEXES_AND_TRIGGERS.iter()) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("apply schema statement: {}", first_line(statement)))?;
    }
    Ok(())
}

fn first_line(statement: &str) -> &str {
    statement.lines().next().unwrap_or(statement).trim()
}
