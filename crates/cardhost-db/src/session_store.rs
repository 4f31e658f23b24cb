use cardhost_common::{Error, Result};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::codec;
use crate::database;
use crate::migrations::{self, MIGRATIONS};

/// State handed over by the game engine.
///
/// Only the session id is interpreted; the rest of the value is stored as an
/// opaque JSON document. Floats must be finite: JSON has no NaN or infinity.
pub trait GameState: Serialize + DeserializeOwned {
    fn session_id(&self) -> &str;
}

/// A decoded snapshot and the time it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<S> {
    pub state: S,
    /// Unix milliseconds.
    pub saved_at: i64,
}

/// Listing entry; the snapshot body is not read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub saved_at: i64,
}

/// Rows removed by [`SessionStore::delete_session`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletedSession {
    pub action_log_rows: usize,
    pub session_rows: usize,
}

struct StoredSnapshot {
    compressed_state: Value,
    saved_at: i64,
}

impl StoredSnapshot {
    /// Any body that is not a blob is corruption, whatever its storage class.
    fn into_blob(self) -> Result<Vec<u8>> {
        match self.compressed_state {
            Value::Blob(bytes) => Ok(bytes),
            other => Err(Error::Corruption(format!(
                "snapshot body is stored as {}, expected a blob",
                other.data_type()
            ))),
        }
    }
}

/// Compressed game-session snapshots keyed by session id.
///
/// The store owns its connection and does no locking of its own; callers
/// serialize access.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    /// Open the database file, bring the schema up to date and wrap it.
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        let mut conn = database::open(db_path, busy_timeout)?;
        migrations::run(&mut conn, MIGRATIONS)?;
        info!("session store ready at {}", db_path.display());
        Ok(Self::new(conn))
    }

    pub fn in_memory() -> Result<Self> {
        let mut conn = database::open_in_memory()?;
        migrations::run(&mut conn, MIGRATIONS)?;
        Ok(Self::new(conn))
    }

    /// Wrap a handle whose schema has already been migrated.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Write `state`, replacing any earlier snapshot of the same session.
    /// Returns the `saved_at` that was recorded.
    ///
    /// A state that would not load back (a NaN or infinite `f64` is written
    /// as `null`) is rejected with [`Error::Serialization`] and nothing is
    /// stored.
    pub fn save_snapshot<S: GameState>(&self, state: &S) -> Result<i64> {
        let saved_at = Utc::now().timestamp_millis();
        self.save_snapshot_at(state, saved_at)?;
        Ok(saved_at)
    }

    /// [`Self::save_snapshot`] with a caller-supplied timestamp.
    pub fn save_snapshot_at<S: GameState>(&self, state: &S, saved_at: i64) -> Result<()> {
        let compressed = codec::encode_verified(state)?;
        debug!(
            session_id = state.session_id(),
            bytes = compressed.len(),
            "saving snapshot"
        );

        self.conn
            .execute(
                "INSERT OR REPLACE INTO sessions (session_id, compressed_state, saved_at)
                 VALUES (?1, ?2, ?3)",
                params![state.session_id(), compressed, saved_at],
            )
            .map_err(|e| Error::Database(format!("failed to save snapshot: {e}")))?;

        Ok(())
    }

    /// `Ok(None)` when the session was never saved. A stored body that no
    /// longer decodes is an [`Error::Corruption`].
    pub fn load_snapshot<S: DeserializeOwned>(
        &self,
        session_id: &str,
    ) -> Result<Option<Snapshot<S>>> {
        let stored = self
            .conn
            .query_row(
                "SELECT compressed_state, saved_at FROM sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(StoredSnapshot {
                        compressed_state: row.get(0)?,
                        saved_at: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load snapshot: {e}")))?;

        let Some(stored) = stored else {
            return Ok(None);
        };

        let saved_at = stored.saved_at;
        let state = codec::decode(&stored.into_blob()?)?;
        Ok(Some(Snapshot { state, saved_at }))
    }

    pub fn contains(&self, session_id: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE session_id = ?1)",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to look up session: {e}")))
    }

    /// Every stored session, most recently saved first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT session_id, saved_at FROM sessions
                 ORDER BY saved_at DESC, session_id ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare session listing: {e}")))?;

        let rows = stmt
            .query_map([], row_to_summary)
            .map_err(|e| Error::Database(format!("failed to list sessions: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read session rows: {e}")))
    }

    /// Remove the session and its action log in one transaction, children
    /// first. Deleting an unknown session is not an error.
    pub fn delete_session(&mut self, session_id: &str) -> Result<DeletedSession> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin delete: {e}")))?;

        let action_log_rows = tx
            .execute(
                "DELETE FROM action_log WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(|e| Error::Database(format!("failed to delete action log: {e}")))?;

        let session_rows = tx
            .execute(
                "DELETE FROM sessions WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(|e| Error::Database(format!("failed to delete session: {e}")))?;

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit delete: {e}")))?;

        debug!(session_id, action_log_rows, session_rows, "deleted session");
        Ok(DeletedSession {
            action_log_rows,
            session_rows,
        })
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionSummary> {
    Ok(SessionSummary {
        session_id: row.get(0)?,
        saved_at: row.get(1)?,
    })
}
