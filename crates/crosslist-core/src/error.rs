//! Error types for crosslist-core

use thiserror::Error;

use crate::model::{ItemAId, ItemBId, Side};

/// Result type alias for crosslist operations
pub type Result<T> = std::result::Result<T, CrosslistError>;

/// Main error type for crosslist operations
#[derive(Error, Debug)]
pub enum CrosslistError {
    /// Credentials were rejected; fatal for the pass
    #[error("Authentication failed for side {side}: {message}")]
    Authentication { side: Side, message: String },

    /// Network or HTTP failure talking to one of the systems
    #[error("Request to side {side} failed: {message}")]
    ExternalRequest { side: Side, message: String },

    /// A configured list does not exist on its system
    #[error("List '{list}' not found on side {side}")]
    ListNotFound { side: Side, list: String },

    /// The pair is already linked
    #[error("Items {item_a} and {item_b} are already linked")]
    DuplicateLink { item_a: ItemAId, item_b: ItemBId },

    /// Persistence-related errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The pass was cancelled between steps
    #[error("Sync pass cancelled")]
    Cancelled,

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl CrosslistError {
    /// Attach the side an external capability error came from.
    pub fn from_external(side: Side, err: ExternalError) -> Self {
        match err {
            ExternalError::Authentication(message) => {
                CrosslistError::Authentication { side, message }
            }
            ExternalError::Request(message) => CrosslistError::ExternalRequest { side, message },
            ExternalError::ListNotFound(list) => CrosslistError::ListNotFound { side, list },
        }
    }

    /// Whether the error must stop every remaining pass, not just the current one.
    pub fn is_authentication(&self) -> bool {
        matches!(self, CrosslistError::Authentication { .. })
    }
}

/// Errors reported by an external system's capabilities
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("list not found: {0}")]
    ListNotFound(String),
}

/// Persistence-specific errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Schema version mismatch
    #[error("Schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },

    /// A stored value could not be decoded
    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },
}

/// Configuration validation and loading errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Value is out of valid range
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// Required field is missing
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(String),

    /// Config file could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        PersistenceError::Database(err.to_string())
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        PersistenceError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for CrosslistError {
    fn from(err: rusqlite::Error) -> Self {
        CrosslistError::Persistence(PersistenceError::Database(err.to_string()))
    }
}

impl From<serde_json::Error> for CrosslistError {
    fn from(err: serde_json::Error) -> Self {
        CrosslistError::Persistence(PersistenceError::Serialization(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_errors_keep_their_side() {
        let err =
            CrosslistError::from_external(Side::B, ExternalError::ListNotFound("Groceries".into()));
        assert!(matches!(
            err,
            CrosslistError::ListNotFound { side: Side::B, ref list } if list == "Groceries"
        ));
        assert!(err.to_string().contains("Groceries"));
    }

    #[test]
    fn authentication_is_flagged() {
        let err =
            CrosslistError::from_external(Side::A, ExternalError::Authentication("expired".into()));
        assert!(err.is_authentication());
        assert!(!CrosslistError::Cancelled.is_authentication());
    }
}
