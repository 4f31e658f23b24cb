//! Statement capture for tests, built on SQLite's trace hook.
//!
//! The hook fires once per executed statement on the calling thread, so each
//! test sees only its own statements.

use rusqlite::Connection;
use std::cell::RefCell;

thread_local! {
    static STATEMENTS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn record(sql: &str) {
    STATEMENTS.with(|s| s.borrow_mut().push(sql.trim().to_string()));
}

/// Start capturing statements executed on `conn`, dropping anything seen before.
pub fn start_trace(conn: &mut Connection) {
    STATEMENTS.with(|s| s.borrow_mut().clear());
    conn.trace(Some(record));
}

/// Stop capturing and return every statement seen since [`start_trace`].
pub fn finish_trace(conn: &mut Connection) -> Trace {
    conn.trace(None);
    Trace {
        statements: STATEMENTS.with(|s| std::mem::take(&mut *s.borrow_mut())),
    }
}

#[derive(Debug)]
pub struct Trace {
    pub statements: Vec<String>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Statements executed inside each committed transaction, in order.
    pub fn transactions(&self) -> Vec<Vec<&str>> {
        let mut out = Vec::new();
        let mut current: Option<Vec<&str>> = None;

        for sql in &self.statements {
            let upper = sql.to_uppercase();
            if upper.starts_with("BEGIN") {
                current = Some(Vec::new());
            } else if upper.starts_with("COMMIT") {
                if let Some(tx) = current.take() {
                    out.push(tx);
                }
            } else if upper.starts_with("ROLLBACK") {
                current = None;
            } else if let Some(tx) = current.as_mut() {
                tx.push(sql.as_str());
            }
        }

        out
    }

    pub fn begins(&self) -> usize {
        self.statements
            .iter()
            .filter(|sql| sql.to_uppercase().starts_with("BEGIN"))
            .count()
    }
}
