use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cardhost_common::Error;
use cardhost_db::migrations::{self, MIGRATIONS};
use cardhost_db::{SessionStore, database};
use chrono::DateTime;

pub fn migrate(db_path: &Path, busy_timeout: Duration, out: &mut impl Write) -> Result<()> {
    let mut conn = database::open(db_path, busy_timeout)?;
    let report = migrations::run(&mut conn, MIGRATIONS)
        .with_context(|| format!("failed to migrate {}", db_path.display()))?;

    if report.is_noop() {
        writeln!(out, "schema is up to date (version {})", report.to_version)?;
    } else {
        writeln!(
            out,
            "migrated schema from version {} to {}",
            report.from_version, report.to_version
        )?;
        for version in &report.applied {
            writeln!(out, "  applied {version}")?;
        }
    }

    Ok(())
}

/// Read-only: a missing file or ledger reads as version 0 and is left alone.
pub fn status(db_path: &Path, busy_timeout: Duration, out: &mut impl Write) -> Result<()> {
    let applied = if db_path.exists() {
        let conn = database::open_read_only(db_path, busy_timeout)?;
        if migrations::ledger_exists(&conn)? {
            migrations::applied_migrations(&conn)?
        } else {
            Vec::new()
        }
    } else {
        Vec::new()
    };
    let current = applied.iter().map(|m| m.version).max().unwrap_or(0);
    let pending = migrations::pending_migrations(current, MIGRATIONS);

    writeln!(out, "database:       {}", db_path.display())?;
    writeln!(out, "schema version: {current}")?;
    writeln!(
        out,
        "latest known:   {}",
        migrations::latest_version(MIGRATIONS)
    )?;

    writeln!(out, "applied:")?;
    if applied.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for migration in &applied {
        writeln!(
            out,
            "  {:>3}  {}",
            migration.version,
            format_seconds(migration.applied_at)
        )?;
    }

    writeln!(out, "pending:")?;
    if pending.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for migration in pending {
        writeln!(out, "  {:>3}  {}", migration.version, migration.description)?;
    }

    Ok(())
}

pub fn list_sessions(store: &SessionStore, json: bool, out: &mut impl Write) -> Result<()> {
    let sessions = store.list_sessions()?;

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&sessions)?)?;
        return Ok(());
    }

    if sessions.is_empty() {
        writeln!(out, "no saved sessions")?;
    }
    for session in &sessions {
        writeln!(
            out,
            "{}  {}",
            format_millis(session.saved_at),
            session.session_id
        )?;
    }

    Ok(())
}

pub fn show_session(store: &SessionStore, session_id: &str, out: &mut impl Write) -> Result<()> {
    let snapshot = match store.load_snapshot::<serde_json::Value>(session_id) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => bail!("session '{session_id}' not found"),
        Err(e @ Error::Corruption(_)) => {
            return Err(anyhow::Error::new(e).context(format!(
                "session '{session_id}' is unusable; remove it with `cardhost sessions delete {session_id}`"
            )));
        }
        Err(e) => return Err(e.into()),
    };

    writeln!(out, "session:  {session_id}")?;
    writeln!(out, "saved at: {}", format_millis(snapshot.saved_at))?;
    writeln!(out, "{}", serde_json::to_string_pretty(&snapshot.state)?)?;
    Ok(())
}

pub fn delete_session(
    store: &mut SessionStore,
    session_id: &str,
    out: &mut impl Write,
) -> Result<()> {
    let deleted = store.delete_session(session_id)?;

    if deleted.session_rows == 0 {
        writeln!(out, "session '{session_id}' was not stored")?;
    } else {
        writeln!(
            out,
            "deleted session '{session_id}' and {} action log row(s)",
            deleted.action_log_rows
        )?;
    }

    Ok(())
}

fn format_seconds(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn format_millis(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::{delete_session, list_sessions, migrate, show_session, status};
    use cardhost_db::database::{self, DEFAULT_BUSY_TIMEOUT};
    use cardhost_db::migrations;
    use cardhost_db::{GameState, SessionStore};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Hand {
        session_id: String,
        cards: Vec<String>,
    }

    impl GameState for Hand {
        fn session_id(&self) -> &str {
            &self.session_id
        }
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).expect("output should be UTF-8")
    }

    #[test]
    fn migrate_reports_applied_versions_then_noop() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let db_path = dir.path().join("cardhost.db");

        let mut first = Vec::new();
        migrate(&db_path, DEFAULT_BUSY_TIMEOUT, &mut first).expect("migrate should succeed");
        let first = output(first);
        assert!(first.contains("migrated schema from version 0 to 3"));
        assert!(first.contains("applied 3"));

        let mut second = Vec::new();
        migrate(&db_path, DEFAULT_BUSY_TIMEOUT, &mut second).expect("migrate should succeed");
        assert_eq!(output(second), "schema is up to date (version 3)\n");
    }

    #[test]
    fn status_lists_pending_migrations_on_a_fresh_database() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let db_path = dir.path().join("cardhost.db");

        let mut buf = Vec::new();
        status(&db_path, DEFAULT_BUSY_TIMEOUT, &mut buf).expect("status should succeed");
        let text = output(buf);

        assert!(text.contains("schema version: 0"));
        assert!(text.contains("latest known:   3"));
        assert!(text.contains("create sessions"));
        assert!(text.contains("index sessions by saved_at"));
        assert!(!db_path.exists());
    }

    #[test]
    fn status_leaves_an_unmigrated_database_untouched() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let db_path = dir.path().join("cardhost.db");
        database::open(&db_path, DEFAULT_BUSY_TIMEOUT)
            .expect("open should succeed")
            .execute_batch("CREATE TABLE notes (body TEXT)")
            .expect("failed to create table");

        let mut buf = Vec::new();
        status(&db_path, DEFAULT_BUSY_TIMEOUT, &mut buf).expect("status should succeed");
        assert!(output(buf).contains("schema version: 0"));

        let conn = database::open(&db_path, DEFAULT_BUSY_TIMEOUT).expect("reopen");
        assert!(!migrations::ledger_exists(&conn).expect("lookup should succeed"));
    }

    #[test]
    fn status_after_migrate_has_nothing_pending() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let db_path = dir.path().join("cardhost.db");
        migrate(&db_path, DEFAULT_BUSY_TIMEOUT, &mut Vec::new()).expect("migrate should succeed");

        let mut buf = Vec::new();
        status(&db_path, DEFAULT_BUSY_TIMEOUT, &mut buf).expect("status should succeed");
        let text = output(buf);

        assert!(text.contains("schema version: 3"));
        assert!(text.ends_with("pending:\n  (none)\n"));
    }

    #[test]
    fn session_commands_round_trip() {
        let mut store = SessionStore::in_memory().expect("failed to create store");
        store
            .save_snapshot_at(
                &Hand {
                    session_id: "den".into(),
                    cards: vec!["QS".into(), "AH".into()],
                },
                1_700_000_000_000,
            )
            .expect("save should succeed");

        let mut listed = Vec::new();
        list_sessions(&store, false, &mut listed).expect("list should succeed");
        assert_eq!(output(listed), "2023-11-14 22:13:20.000 UTC  den\n");

        let mut json = Vec::new();
        list_sessions(&store, true, &mut json).expect("list should succeed");
        let parsed: serde_json::Value =
            serde_json::from_slice(&json).expect("list output should be JSON");
        assert_eq!(parsed[0]["session_id"], "den");
        assert_eq!(parsed[0]["saved_at"], 1_700_000_000_000_i64);

        let mut shown = Vec::new();
        show_session(&store, "den", &mut shown).expect("show should succeed");
        assert!(output(shown).contains("\"QS\""));

        let mut deleted = Vec::new();
        delete_session(&mut store, "den", &mut deleted).expect("delete should succeed");
        assert_eq!(
            output(deleted),
            "deleted session 'den' and 0 action log row(s)\n"
        );

        let err = show_session(&store, "den", &mut Vec::new()).expect_err("session is gone");
        assert_eq!(err.to_string(), "session 'den' not found");
    }

    #[test]
    fn show_points_at_delete_for_corrupt_sessions() {
        let store = SessionStore::in_memory().expect("failed to create store");
        store
            .connection()
            .execute(
                "INSERT INTO sessions (session_id, compressed_state, saved_at) VALUES ('bad', x'0102', 1)",
                [],
            )
            .expect("failed to insert corrupt row");

        let err = show_session(&store, "bad", &mut Vec::new()).expect_err("corrupt body");
        assert!(err.to_string().contains("cardhost sessions delete bad"));
    }

    #[test]
    fn delete_of_unknown_session_is_reported() {
        let mut store = SessionStore::in_memory().expect("failed to create store");
        let mut buf = Vec::new();
        delete_session(&mut store, "ghost", &mut buf).expect("delete should succeed");
        assert_eq!(output(buf), "session 'ghost' was not stored\n");
    }
}
