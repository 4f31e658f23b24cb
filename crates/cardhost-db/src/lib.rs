pub mod codec;
pub mod database;
pub mod migrations;
pub mod session_store;

#[cfg(test)]
mod test_support;

pub use migrations::{AppliedMigration, MIGRATIONS, Migration, MigrationReport};
pub use session_store::{DeletedSession, GameState, SessionStore, SessionSummary, Snapshot};
