use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// A migration script failed; its transaction was rolled back and the
    /// schema is left at the previous version.
    #[error("migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored snapshot could not be decompressed or decoded.
    #[error("corrupt snapshot: {0}")]
    Corruption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for failures that leave the schema in an unknown state.
    pub fn is_schema_fatal(&self) -> bool {
        matches!(self, Self::Migration { .. })
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }
}
