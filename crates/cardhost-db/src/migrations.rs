//! Versioned schema migrations tracked in a `_migrations` ledger table.
//!
//! Each [`Migration`] carries a version, a label and a SQL script. The runner
//! applies every migration newer than the highest recorded version, one
//! transaction per migration, and records the version as the last statement
//! of that transaction. A failing statement rolls the whole migration back
//! and stops the run.

use cardhost_common::{Error, Result};
use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::{debug, info};

/// A single schema change.
///
/// `script` may hold several statements separated by `;`. The split is naive:
/// a `;` inside a string literal or a trigger body breaks the statement, so
/// scripts must avoid both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub script: &'static str,
}

/// A row of the `_migrations` ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u32,
    /// Unix seconds.
    pub applied_at: i64,
}

/// Outcome of [`run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<u32>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Schema of the session store.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create sessions",
        script: SESSIONS_V1,
    },
    Migration {
        version: 2,
        description: "create action_log",
        script: ACTION_LOG_V2,
    },
    Migration {
        version: 3,
        description: "index sessions by saved_at",
        script: SAVED_AT_INDEX_V3,
    },
];

const SESSIONS_V1: &str = "
CREATE TABLE sessions (
    session_id TEXT PRIMARY KEY,
    compressed_state BLOB NOT NULL,
    saved_at INTEGER NOT NULL
);
";

const ACTION_LOG_V2: &str = "
CREATE TABLE action_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    action TEXT NOT NULL,
    recorded_at INTEGER NOT NULL
);

CREATE INDEX idx_action_log_session ON action_log(session_id, seq);
";

const SAVED_AT_INDEX_V3: &str = "
CREATE INDEX idx_sessions_saved_at ON sessions(saved_at DESC);
";

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
)";

/// Create the `_migrations` ledger if it does not exist yet.
pub fn ensure_ledger(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_LEDGER, [])
        .map_err(|e| Error::Database(format!("failed to create migration ledger: {e}")))?;
    Ok(())
}

/// Whether the `_migrations` table is present. Never creates it.
pub fn ledger_exists(conn: &Connection) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_migrations')",
        [],
        |row| row.get(0),
    )
    .map_err(|e| Error::Database(format!("failed to look up migration ledger: {e}")))
}

/// Highest applied version, `0` when nothing has been applied.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| Error::Database(format!("failed to read schema version: {e}")))
}

/// Ledger rows in ascending version order.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<AppliedMigration>> {
    let mut stmt = conn
        .prepare("SELECT version, applied_at FROM _migrations ORDER BY version ASC")
        .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                version: row.get(0)?,
                applied_at: row.get(1)?,
            })
        })
        .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to read ledger rows: {e}")))
}

/// Migrations newer than `current`, sorted by version.
pub fn pending_migrations(current: u32, migrations: &[Migration]) -> Vec<&Migration> {
    let mut pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| m.version > current)
        .collect();
    pending.sort_by_key(|m| m.version);
    pending
}

pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Bring `conn` up to the newest version in `migrations`.
///
/// The list does not need to be sorted. Versions already in the ledger are
/// skipped without looking at their scripts. On failure the failing
/// migration is rolled back, nothing after it runs, and the error is a
/// [`Error::Migration`].
pub fn run(conn: &mut Connection, migrations: &[Migration]) -> Result<MigrationReport> {
    let ordered = validated(migrations)?;

    ensure_ledger(conn)?;
    let from_version = current_version(conn)?;

    let mut applied = Vec::new();
    for migration in ordered.into_iter().filter(|m| m.version > from_version) {
        apply(conn, migration)?;
        applied.push(migration.version);
    }

    let to_version = applied.last().copied().unwrap_or(from_version);
    if applied.is_empty() {
        debug!("schema already at version {from_version}");
    } else {
        info!(
            "schema migrated from version {from_version} to {to_version} ({} applied)",
            applied.len()
        );
    }

    Ok(MigrationReport {
        from_version,
        to_version,
        applied,
    })
}

fn apply(conn: &mut Connection, migration: &Migration) -> Result<()> {
    info!(
        "applying migration {}: {}",
        migration.version, migration.description
    );

    let failed = |reason: String| Error::Migration {
        version: migration.version,
        reason,
    };

    // Dropping `tx` on any early return rolls the migration back.
    let tx = conn
        .transaction()
        .map_err(|e| failed(format!("failed to begin transaction: {e}")))?;

    for statement in split_statements(migration.script) {
        debug!(version = migration.version, "executing {statement}");
        tx.execute_batch(statement)
            .map_err(|e| failed(e.to_string()))?;
    }

    tx.execute(
        "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
        params![migration.version, Utc::now().timestamp()],
    )
    .map_err(|e| failed(format!("failed to record version: {e}")))?;

    tx.commit()
        .map_err(|e| failed(format!("failed to commit: {e}")))
}

/// Split a script on `;`, trimming each fragment and dropping empty ones.
pub fn split_statements(script: &str) -> impl Iterator<Item = &str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
}

fn validated(migrations: &[Migration]) -> Result<Vec<&Migration>> {
    let mut ordered: Vec<&Migration> = migrations.iter().collect();
    ordered.sort_by_key(|m| m.version);

    if ordered.first().is_some_and(|m| m.version == 0) {
        return Err(Error::Migration {
            version: 0,
            reason: "migration versions start at 1".into(),
        });
    }

    if let Some(pair) = ordered.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(Error::Migration {
            version: pair[0].version,
            reason: "duplicate migration version".into(),
        });
    }

    Ok(ordered)
}
