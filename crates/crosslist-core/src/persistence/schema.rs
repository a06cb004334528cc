//! SQLite schema for the state store

/// Schema version for migrations
pub const SCHEMA_VERSION: u32 = 1;

/// SQLite schema definition
pub struct Schema;

impl Schema {
    /// Get the complete schema SQL
    pub fn create_tables() -> &'static str {
        r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Side A items; timestamps are derived locally
CREATE TABLE IF NOT EXISTS items_a (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    list_id TEXT NOT NULL,
    name TEXT NOT NULL,
    checked INTEGER NOT NULL DEFAULT 0,
    attributes TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    last_modified_at INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    last_synced_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_items_a_external ON items_a(external_id);
CREATE INDEX IF NOT EXISTS idx_items_a_list ON items_a(list_id);
CREATE INDEX IF NOT EXISTS idx_items_a_deleted ON items_a(is_deleted);
CREATE INDEX IF NOT EXISTS idx_items_a_seen ON items_a(last_seen_at);
CREATE INDEX IF NOT EXISTS idx_items_a_modified ON items_a(last_modified_at);

-- Side B items; updated_at is supplied by side B
CREATE TABLE IF NOT EXISTS items_b (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    list_id TEXT NOT NULL,
    name TEXT NOT NULL,
    checked INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER,
    last_seen_at INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    last_synced_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_items_b_external ON items_b(external_id);
CREATE INDEX IF NOT EXISTS idx_items_b_list ON items_b(list_id);
CREATE INDEX IF NOT EXISTS idx_items_b_deleted ON items_b(is_deleted);
CREATE INDEX IF NOT EXISTS idx_items_b_updated ON items_b(updated_at);

-- Correspondence between the two sides
CREATE TABLE IF NOT EXISTS item_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_a_id INTEGER NOT NULL REFERENCES items_a(id),
    item_b_id INTEGER NOT NULL REFERENCES items_b(id),
    confidence REAL NOT NULL DEFAULT 1.0,
    linked_at INTEGER NOT NULL,
    UNIQUE(item_a_id, item_b_id)
);

CREATE INDEX IF NOT EXISTS idx_links_a ON item_links(item_a_id);
CREATE INDEX IF NOT EXISTS idx_links_b ON item_links(item_b_id);
CREATE INDEX IF NOT EXISTS idx_links_confidence ON item_links(confidence);

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS operation_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL,
    item_a_id INTEGER,
    item_b_id INTEGER,
    details TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_operation_log_operation ON operation_log(operation);
CREATE INDEX IF NOT EXISTS idx_operation_log_timestamp ON operation_log(timestamp);
CREATE INDEX IF NOT EXISTS idx_operation_log_a ON operation_log(item_a_id);
CREATE INDEX IF NOT EXISTS idx_operation_log_b ON operation_log(item_b_id);
"#
    }

    /// Get migration SQL for a specific version
    pub fn migration(from_version: u32, to_version: u32) -> Option<&'static str> {
        match (from_version, to_version) {
            // Add migrations here as the schema evolves
            // (1, 2) => Some("ALTER TABLE ..."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_sql_valid() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(Schema::create_tables()).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('items_a', 'items_b', 'item_links', 'operation_log')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_no_migrations_yet() {
        assert!(Schema::migration(0, SCHEMA_VERSION).is_none());
    }
}
