//! SQLite-backed state store
//!
//! Holds both sides' items, the links between them and the operation log.
//! Every call commits on its own; there is no cross-call transaction except
//! the rolled-back [`Projection`] used by dry runs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::schema::{Schema, SCHEMA_VERSION};
use crate::error::{CrosslistError, PersistenceError, Result};
use crate::model::{
    Attributes, ItemA, ItemAId, ItemB, ItemBId, Link, LinkId, LinkView, OperationKind,
    OperationLogEntry, PairState, RemoteItem, Side, Snapshot,
};

const ITEM_A_COLUMNS: &str = "a.id, a.external_id, a.list_id, a.name, a.checked, a.attributes, \
     a.created_at, a.last_seen_at, a.last_modified_at, a.is_deleted, a.last_synced_at";
const ITEM_A_WIDTH: usize = 11;

const ITEM_B_COLUMNS: &str = "b.id, b.external_id, b.list_id, b.name, b.checked, b.created_at, \
     b.updated_at, b.last_seen_at, b.is_deleted, b.last_synced_at";

const LINK_COLUMNS: &str = "l.id, l.item_a_id, l.item_b_id, l.confidence, l.linked_at";
const LINK_WIDTH: usize = 5;

const PROJECTION_SAVEPOINT: &str = "crosslist_projection";

/// Counts describing the current store contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub items_a: usize,
    pub deleted_a: usize,
    pub items_b: usize,
    pub deleted_b: usize,
    pub links: usize,
    pub unlinked_a: usize,
    pub unlinked_b: usize,
    pub operations: BTreeMap<OperationKind, usize>,
}

/// Durable record of both sides, their links and the operation log.
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (or create) a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(PersistenceError::from)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        info!(path = %path.display(), "Opened state store");
        Self::init_with_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_with_connection(conn)
    }

    fn init_with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create tables on a fresh database, migrate an older one
    fn initialize(conn: &Connection) -> Result<()> {
        let current_version = Self::get_schema_version(conn).unwrap_or(0);

        if current_version == 0 {
            conn.execute_batch(Schema::create_tables())?;
            Self::set_schema_version(conn, SCHEMA_VERSION)?;
        } else if current_version < SCHEMA_VERSION {
            for version in current_version..SCHEMA_VERSION {
                if let Some(migration) = Schema::migration(version, version + 1) {
                    conn.execute_batch(migration)?;
                }
            }
            Self::set_schema_version(conn, SCHEMA_VERSION)?;
        } else if current_version > SCHEMA_VERSION {
            return Err(PersistenceError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                actual: current_version,
            }
            .into());
        }

        Ok(())
    }

    fn get_schema_version(conn: &Connection) -> Option<u32> {
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<u32>>(0)
        })
        .ok()
        .flatten()
    }

    fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        Ok(())
    }

    /// Current schema version recorded in the database
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        Ok(Self::get_schema_version(&conn).unwrap_or(0))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            PersistenceError::Database(format!("connection lock poisoned: {}", e)).into()
        })
    }

    // ==================== Side A ====================

    /// Insert or refresh a side-A item observed now
    pub fn upsert_item_a(&self, item: &RemoteItem, list_id: &str) -> Result<ItemA> {
        self.upsert_item_a_at(item, list_id, Utc::now())
    }

    /// Insert or refresh a side-A item observed at `now`.
    ///
    /// `last_seen_at` always moves to `now`; `last_modified_at` moves only when
    /// `name` or `checked` differ from the stored row.
    pub fn upsert_item_a_at(
        &self,
        item: &RemoteItem,
        list_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ItemA> {
        let conn = self.conn()?;
        let attributes = serde_json::to_string(&item.attributes)?;

        match Self::find_item_a(&conn, &item.external_id)? {
            Some(existing) => {
                let changed = existing.checked != item.checked || existing.name != item.name;
                let last_modified = if changed { now } else { existing.last_modified_at };
                // Keeps last_modified_at <= last_seen_at even if the clock stepped back
                let last_seen = now.max(last_modified);

                conn.execute(
                    "UPDATE items_a
                     SET name = ?1, checked = ?2, attributes = ?3, list_id = ?4,
                         last_seen_at = ?5, last_modified_at = ?6, is_deleted = 0
                     WHERE id = ?7",
                    params![
                        item.name,
                        item.checked,
                        attributes,
                        list_id,
                        to_millis(last_seen),
                        to_millis(last_modified),
                        existing.id.0,
                    ],
                )?;

                if changed {
                    let details = serde_json::json!({
                        "name": item.name,
                        "checked": { "from": existing.checked, "to": item.checked },
                        "renamed_from": (existing.name != item.name).then(|| existing.name.clone()),
                    });
                    let details = details.to_string();
                    let op = OperationKind::Update;
                    append_log(&conn, op, Some(existing.id), None, &details, now);
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO items_a
                     (external_id, list_id, name, checked, attributes,
                      created_at, last_seen_at, last_modified_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6)",
                    params![
                        item.external_id,
                        list_id,
                        item.name,
                        item.checked,
                        attributes,
                        to_millis(now),
                    ],
                )?;
                let id = ItemAId(conn.last_insert_rowid());
                let details = serde_json::json!({ "name": item.name, "checked": item.checked });
                append_log(&conn, OperationKind::Create, Some(id), None, &details.to_string(), now);
            }
        }

        Self::find_item_a(&conn, &item.external_id)?
            .ok_or_else(|| CrosslistError::NotFound(format!("side-A item {}", item.external_id)))
    }

    /// Mark live side-A items not seen since `cutoff` as deleted
    pub fn tombstone_stale_items_a(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let count = Self::tombstone(&conn, Side::A, cutoff)?;
        if count > 0 {
            info!(count, %cutoff, "Tombstoned stale side-A items");
        }
        Ok(count)
    }

    /// Live side-A items that take part in no link
    pub fn unlinked_items_a(&self) -> Result<Vec<ItemA>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_A_COLUMNS} FROM items_a a
             LEFT JOIN item_links l ON l.item_a_id = a.id
             WHERE l.id IS NULL AND a.is_deleted = 0
             ORDER BY a.id"
        ))?;
        let items = stmt
            .query_map([], |row| row_to_item_a(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Get a side-A item by store id
    pub fn get_item_a(&self, id: ItemAId) -> Result<Option<ItemA>> {
        let conn = self.conn()?;
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_A_COLUMNS} FROM items_a a WHERE a.id = ?1"),
                [id.0],
                |row| row_to_item_a(row, 0),
            )
            .optional()?;
        Ok(item)
    }

    /// Get a side-A item by its external id
    pub fn item_a_by_external_id(&self, external_id: &str) -> Result<Option<ItemA>> {
        let conn = self.conn()?;
        Self::find_item_a(&conn, external_id)
    }

    fn find_item_a(conn: &Connection, external_id: &str) -> Result<Option<ItemA>> {
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_A_COLUMNS} FROM items_a a WHERE a.external_id = ?1"),
                [external_id],
                |row| row_to_item_a(row, 0),
            )
            .optional()?;
        Ok(item)
    }

    /// Overwrite the cached checked value of a side-A item after a write to side A
    pub fn set_checked_a(&self, id: ItemAId, checked: bool) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE items_a SET checked = ?1, last_synced_at = ?2 WHERE id = ?3",
            params![checked, to_millis(Utc::now()), id.0],
        )?;
        if updated == 0 {
            return Err(CrosslistError::NotFound(format!("side-A item {}", id)));
        }
        Ok(())
    }

    // ==================== Side B ====================

    /// Insert or refresh a side-B item observed now
    pub fn upsert_item_b(&self, item: &RemoteItem, list_id: &str) -> Result<ItemB> {
        self.upsert_item_b_at(item, list_id, Utc::now())
    }

    /// Insert or refresh a side-B item; `updated_at` always takes the supplied timestamp.
    pub fn upsert_item_b_at(
        &self,
        item: &RemoteItem,
        list_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ItemB> {
        let conn = self.conn()?;
        let updated_at = item.timestamp.map(to_millis);

        match Self::find_item_b(&conn, &item.external_id)? {
            Some(existing) => {
                conn.execute(
                    "UPDATE items_b
                     SET name = ?1, checked = ?2, list_id = ?3, updated_at = ?4,
                         last_seen_at = ?5, is_deleted = 0
                     WHERE id = ?6",
                    params![
                        item.name,
                        item.checked,
                        list_id,
                        updated_at,
                        to_millis(now),
                        existing.id.0,
                    ],
                )?;

                if existing.checked != item.checked || existing.name != item.name {
                    let details = serde_json::json!({
                        "name": item.name,
                        "checked": { "from": existing.checked, "to": item.checked },
                        "renamed_from": (existing.name != item.name).then(|| existing.name.clone()),
                    });
                    let details = details.to_string();
                    let op = OperationKind::Update;
                    append_log(&conn, op, None, Some(existing.id), &details, now);
                }
            }
            None => {
                let created_at = item.timestamp.unwrap_or(now);
                conn.execute(
                    "INSERT INTO items_b
                     (external_id, list_id, name, checked, created_at, updated_at, last_seen_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        item.external_id,
                        list_id,
                        item.name,
                        item.checked,
                        to_millis(created_at),
                        updated_at,
                        to_millis(now),
                    ],
                )?;
                let id = ItemBId(conn.last_insert_rowid());
                let details = serde_json::json!({ "name": item.name, "checked": item.checked });
                append_log(&conn, OperationKind::Create, None, Some(id), &details.to_string(), now);
            }
        }

        Self::find_item_b(&conn, &item.external_id)?
            .ok_or_else(|| CrosslistError::NotFound(format!("side-B item {}", item.external_id)))
    }

    /// Mark live side-B items not seen since `cutoff` as deleted
    pub fn tombstone_stale_items_b(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let count = Self::tombstone(&conn, Side::B, cutoff)?;
        if count > 0 {
            info!(count, %cutoff, "Tombstoned stale side-B items");
        }
        Ok(count)
    }

    /// Live side-B items that take part in no link
    pub fn unlinked_items_b(&self) -> Result<Vec<ItemB>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_B_COLUMNS} FROM items_b b
             LEFT JOIN item_links l ON l.item_b_id = b.id
             WHERE l.id IS NULL AND b.is_deleted = 0
             ORDER BY b.id"
        ))?;
        let items = stmt
            .query_map([], |row| row_to_item_b(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Get a side-B item by store id
    pub fn get_item_b(&self, id: ItemBId) -> Result<Option<ItemB>> {
        let conn = self.conn()?;
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_B_COLUMNS} FROM items_b b WHERE b.id = ?1"),
                [id.0],
                |row| row_to_item_b(row, 0),
            )
            .optional()?;
        Ok(item)
    }

    /// Get a side-B item by its external id
    pub fn item_b_by_external_id(&self, external_id: &str) -> Result<Option<ItemB>> {
        let conn = self.conn()?;
        Self::find_item_b(&conn, external_id)
    }

    fn find_item_b(conn: &Connection, external_id: &str) -> Result<Option<ItemB>> {
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_B_COLUMNS} FROM items_b b WHERE b.external_id = ?1"),
                [external_id],
                |row| row_to_item_b(row, 0),
            )
            .optional()?;
        Ok(item)
    }

    /// Overwrite the cached checked value of a side-B item after a write to side B
    pub fn set_checked_b(&self, id: ItemBId, checked: bool) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE items_b SET checked = ?1, last_synced_at = ?2 WHERE id = ?3",
            params![checked, to_millis(Utc::now()), id.0],
        )?;
        if updated == 0 {
            return Err(CrosslistError::NotFound(format!("side-B item {}", id)));
        }
        Ok(())
    }

    /// Soft-delete stale rows on one side, logging a DELETE for each.
    fn tombstone(conn: &Connection, side: Side, cutoff: DateTime<Utc>) -> Result<usize> {
        let table = match side {
            Side::A => "items_a",
            Side::B => "items_b",
        };
        let mut stmt = conn.prepare(&format!(
            "UPDATE {table} SET is_deleted = 1
             WHERE last_seen_at < ?1 AND is_deleted = 0
             RETURNING id, name"
        ))?;
        let removed = stmt
            .query_map([to_millis(cutoff)], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let now = Utc::now();
        for (id, name) in &removed {
            let details = serde_json::json!({ "name": name, "reason": "not_seen" });
            let (item_a, item_b) = match side {
                Side::A => (Some(ItemAId(*id)), None),
                Side::B => (None, Some(ItemBId(*id))),
            };
            append_log(conn, OperationKind::Delete, item_a, item_b, &details.to_string(), now);
        }
        Ok(removed.len())
    }

    // ==================== Links ====================

    /// Link two items. Fails with `DuplicateLink` if the pair is already linked.
    pub fn create_link(&self, item_a: ItemAId, item_b: ItemBId, confidence: f64) -> Result<Link> {
        let conn = self.conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO item_links (item_a_id, item_b_id, confidence, linked_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![item_a.0, item_b.0, confidence, to_millis(now)],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
                    return CrosslistError::DuplicateLink { item_a, item_b };
                }
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
                    let endpoints = format!("link endpoint {} / {}", item_a, item_b);
                    return CrosslistError::NotFound(endpoints);
                }
            }
            CrosslistError::from(e)
        })?;

        let link = Link {
            id: LinkId(conn.last_insert_rowid()),
            item_a_id: item_a,
            item_b_id: item_b,
            confidence,
            linked_at: from_millis(to_millis(now)),
        };

        let details = serde_json::json!({ "confidence": confidence });
        let details = details.to_string();
        append_log(&conn, OperationKind::Link, Some(item_a), Some(item_b), &details, now);

        Ok(link)
    }

    /// Every link joined with both items
    pub fn linked_pairs(&self) -> Result<Vec<LinkView>> {
        self.query_link_views("1 = 1")
    }

    /// Links whose live items disagree on `checked`
    pub fn conflicting_links(&self) -> Result<Vec<LinkView>> {
        self.query_link_views("a.checked != b.checked AND a.is_deleted = 0 AND b.is_deleted = 0")
    }

    fn query_link_views(&self, filter: &str) -> Result<Vec<LinkView>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LINK_COLUMNS}, {ITEM_A_COLUMNS}, {ITEM_B_COLUMNS}
             FROM item_links l
             JOIN items_a a ON a.id = l.item_a_id
             JOIN items_b b ON b.id = l.item_b_id
             WHERE {filter}
             ORDER BY l.id"
        ))?;
        let views = stmt
            .query_map([], |row| {
                Ok(LinkView {
                    link: row_to_link(row)?,
                    item_a: row_to_item_a(row, LINK_WIDTH)?,
                    item_b: row_to_item_b(row, LINK_WIDTH + ITEM_A_WIDTH)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(views)
    }

    /// Checked values of every linked pair, taken before a pass mutates anything
    pub fn snapshot(&self) -> Result<Snapshot> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.external_id, b.external_id, a.checked, b.checked
             FROM item_links l
             JOIN items_a a ON a.id = l.item_a_id
             JOIN items_b b ON b.id = l.item_b_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    (row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    PairState {
                        checked_a: row.get(2)?,
                        checked_b: row.get(3)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Snapshot, _>>()?;
        debug!(pairs = rows.len(), "Captured pre-pass snapshot");
        Ok(rows)
    }

    // ==================== Operation log ====================

    /// Append to the operation log. Failures are logged and swallowed.
    pub fn log_operation(
        &self,
        operation: OperationKind,
        item_a: Option<ItemAId>,
        item_b: Option<ItemBId>,
        details: &str,
    ) {
        match self.conn() {
            Ok(conn) => append_log(&conn, operation, item_a, item_b, details, Utc::now()),
            Err(e) => error!(%operation, error = %e, "Failed to log operation"),
        }
    }

    /// Newest operation log entries first
    pub fn recent_operations(&self, limit: usize) -> Result<Vec<OperationLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, operation, item_a_id, item_b_id, details, timestamp
             FROM operation_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, op, item_a, item_b, details, ts)| -> Result<OperationLogEntry> {
                let operation =
                    OperationKind::parse(&op).ok_or_else(|| PersistenceError::CorruptRow {
                        table: "operation_log",
                        message: format!("unknown operation '{}'", op),
                    })?;
                Ok(OperationLogEntry {
                    id,
                    operation,
                    item_a_id: item_a.map(ItemAId),
                    item_b_id: item_b.map(ItemBId),
                    details,
                    timestamp: from_millis(ts),
                })
            })
            .collect()
    }

    // ==================== Statistics ====================

    /// Counts of items, links and logged operations
    pub fn statistics(&self) -> Result<StoreStatistics> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        let mut stats = StoreStatistics {
            items_a: count("SELECT COUNT(*) FROM items_a WHERE is_deleted = 0")?,
            deleted_a: count("SELECT COUNT(*) FROM items_a WHERE is_deleted = 1")?,
            items_b: count("SELECT COUNT(*) FROM items_b WHERE is_deleted = 0")?,
            deleted_b: count("SELECT COUNT(*) FROM items_b WHERE is_deleted = 1")?,
            links: count("SELECT COUNT(*) FROM item_links")?,
            unlinked_a: count(
                "SELECT COUNT(*) FROM items_a a LEFT JOIN item_links l ON l.item_a_id = a.id
                 WHERE l.id IS NULL AND a.is_deleted = 0",
            )?,
            unlinked_b: count(
                "SELECT COUNT(*) FROM items_b b LEFT JOIN item_links l ON l.item_b_id = b.id
                 WHERE l.id IS NULL AND b.is_deleted = 0",
            )?,
            operations: BTreeMap::new(),
        };

        let mut stmt =
            conn.prepare("SELECT operation, COUNT(*) FROM operation_log GROUP BY operation")?;
        let ops = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (op, n) in ops {
            if let Some(kind) = OperationKind::parse(&op) {
                stats.operations.insert(kind, n as usize);
            }
        }

        Ok(stats)
    }

    // ==================== Projection ====================

    /// Open a projection: every write until it is dropped is rolled back.
    pub fn begin_projection(&self) -> Result<Projection<'_>> {
        let conn = self.conn()?;
        conn.execute_batch(&format!("SAVEPOINT {PROJECTION_SAVEPOINT}"))?;
        debug!("Opened dry-run projection");
        Ok(Projection {
            store: self,
            open: true,
        })
    }
}

/// Scope whose writes are discarded when it ends.
pub struct Projection<'a> {
    store: &'a StateStore,
    open: bool,
}

impl Projection<'_> {
    /// Roll back everything written since the projection began
    pub fn discard(mut self) -> Result<()> {
        self.open = false;
        self.rollback()
    }

    fn rollback(&self) -> Result<()> {
        let conn = self.store.conn()?;
        conn.execute_batch(&format!(
            "ROLLBACK TO {PROJECTION_SAVEPOINT}; RELEASE {PROJECTION_SAVEPOINT};"
        ))?;
        debug!("Discarded dry-run projection");
        Ok(())
    }
}

impl Drop for Projection<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.rollback() {
                error!(error = %e, "Failed to discard dry-run projection");
            }
        }
    }
}

/// Insert into the operation log; never fails the caller.
fn append_log(
    conn: &Connection,
    operation: OperationKind,
    item_a: Option<ItemAId>,
    item_b: Option<ItemBId>,
    details: &str,
    at: DateTime<Utc>,
) {
    let result = conn.execute(
        "INSERT INTO operation_log (operation, item_a_id, item_b_id, details, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            operation.as_str(),
            item_a.map(|id| id.0),
            item_b.map(|id| id.0),
            details,
            to_millis(at),
        ],
    );
    match result {
        Ok(_) => debug!(%operation, details, "Logged operation"),
        Err(e) => error!(%operation, error = %e, "Failed to log operation"),
    }
}

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_item_a(row: &Row<'_>, offset: usize) -> rusqlite::Result<ItemA> {
    let attributes_json: String = row.get(offset + 5)?;
    let attributes: Attributes = serde_json::from_str(&attributes_json).map_err(|e| {
        let column = offset + 5;
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ItemA {
        id: ItemAId(row.get(offset)?),
        external_id: row.get(offset + 1)?,
        list_id: row.get(offset + 2)?,
        name: row.get(offset + 3)?,
        checked: row.get(offset + 4)?,
        attributes,
        created_at: from_millis(row.get(offset + 6)?),
        last_seen_at: from_millis(row.get(offset + 7)?),
        last_modified_at: from_millis(row.get(offset + 8)?),
        is_deleted: row.get(offset + 9)?,
        last_synced_at: row.get::<_, Option<i64>>(offset + 10)?.map(from_millis),
    })
}

fn row_to_item_b(row: &Row<'_>, offset: usize) -> rusqlite::Result<ItemB> {
    Ok(ItemB {
        id: ItemBId(row.get(offset)?),
        external_id: row.get(offset + 1)?,
        list_id: row.get(offset + 2)?,
        name: row.get(offset + 3)?,
        checked: row.get(offset + 4)?,
        created_at: from_millis(row.get(offset + 5)?),
        updated_at: row.get::<_, Option<i64>>(offset + 6)?.map(from_millis),
        last_seen_at: from_millis(row.get(offset + 7)?),
        is_deleted: row.get(offset + 8)?,
        last_synced_at: row.get::<_, Option<i64>>(offset + 9)?.map(from_millis),
    })
}

fn row_to_link(row: &Row<'_>) -> rusqlite::Result<Link> {
    Ok(Link {
        id: LinkId(row.get(0)?),
        item_a_id: ItemAId(row.get(1)?),
        item_b_id: ItemBId(row.get(2)?),
        confidence: row.get(3)?,
        linked_at: from_millis(row.get(4)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn remote(id: &str, name: &str, checked: bool) -> RemoteItem {
        RemoteItem::new(id, name, checked)
    }

    #[test]
    fn upsert_a_inserts_with_equal_timestamps() {
        let store = StateStore::open_in_memory().unwrap();
        let item = store.upsert_item_a(&remote("p1", "Milk", false), "list-a").unwrap();

        assert_eq!(item.external_id, "p1");
        assert_eq!(item.list_id, "list-a");
        assert_eq!(item.created_at, item.last_seen_at);
        assert_eq!(item.last_seen_at, item.last_modified_at);
        assert!(!item.is_deleted);
    }

    #[test]
    fn upsert_a_unchanged_only_refreshes_last_seen() {
        let store = StateStore::open_in_memory().unwrap();
        let t0 = Utc::now() - Duration::minutes(10);
        let t1 = t0 + Duration::minutes(5);

        let first = store.upsert_item_a_at(&remote("p1", "Milk", false), "l", t0).unwrap();
        let second = store.upsert_item_a_at(&remote("p1", "Milk", false), "l", t1).unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.last_modified_at, first.last_modified_at);
        assert!(second.last_seen_at > first.last_seen_at);
    }

    #[test]
    fn upsert_a_change_bumps_last_modified() {
        let store = StateStore::open_in_memory().unwrap();
        let t0 = Utc::now() - Duration::minutes(10);
        let t1 = t0 + Duration::minutes(5);

        let first = store.upsert_item_a_at(&remote("p1", "Milk", false), "l", t0).unwrap();
        let second = store.upsert_item_a_at(&remote("p1", "Milk", true), "l", t1).unwrap();

        assert!(second.checked);
        assert!(second.last_modified_at > first.last_modified_at);
        assert_eq!(second.last_modified_at, second.last_seen_at);
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn attributes_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let item = remote("p1", "Milk", false).with_attribute("aisle", serde_json::json!("Dairy"));
        let stored = store.upsert_item_a(&item, "l").unwrap();
        assert_eq!(stored.attributes["aisle"], serde_json::json!("Dairy"));
    }

    #[test]
    fn upsert_b_overwrites_updated_at() {
        let store = StateStore::open_in_memory().unwrap();
        let ts = Utc::now() - Duration::hours(1);

        let first = store
            .upsert_item_b(&remote("s1", "milk", false).with_timestamp(ts), "l")
            .unwrap();
        assert_eq!(first.updated_at.map(to_millis), Some(to_millis(ts)));

        let second = store.upsert_item_b(&remote("s1", "milk", false), "l").unwrap();
        assert_eq!(second.updated_at, None);
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn tombstone_clears_on_reobservation() {
        let store = StateStore::open_in_memory().unwrap();
        let old = Utc::now() - Duration::minutes(10);
        store.upsert_item_a_at(&remote("p1", "Milk", false), "l", old).unwrap();

        let count = store.tombstone_stale_items_a(Utc::now() - Duration::minutes(1)).unwrap();
        assert_eq!(count, 1);
        assert!(store.unlinked_items_a().unwrap().is_empty());

        let last = &store.recent_operations(1).unwrap()[0];
        assert_eq!(last.operation, OperationKind::Delete);
        assert!(last.item_a_id.is_some());
        assert!(last.item_b_id.is_none());

        let back = store.upsert_item_a(&remote("p1", "Milk", false), "l").unwrap();
        assert!(!back.is_deleted);
        assert_eq!(store.unlinked_items_a().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_link_is_reported() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.upsert_item_a(&remote("p1", "Milk", false), "l").unwrap();
        let b = store.upsert_item_b(&remote("s1", "milk", false), "l").unwrap();

        store.create_link(a.id, b.id, 1.0).unwrap();
        let err = store.create_link(a.id, b.id, 1.0).unwrap_err();
        assert!(matches!(err, CrosslistError::DuplicateLink { .. }));
        assert_eq!(store.linked_pairs().unwrap().len(), 1);
    }

    #[test]
    fn link_to_missing_item_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.upsert_item_a(&remote("p1", "Milk", false), "l").unwrap();
        let err = store.create_link(a.id, ItemBId(999), 1.0).unwrap_err();
        assert!(matches!(err, CrosslistError::NotFound(_)));
    }

    #[test]
    fn conflicting_links_and_snapshot() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.upsert_item_a(&remote("p1", "Milk", true), "l").unwrap();
        let b = store.upsert_item_b(&remote("s1", "milk", false), "l").unwrap();
        store.create_link(a.id, b.id, 1.0).unwrap();

        let conflicts = store.conflicting_links().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].in_conflict());

        let snapshot = store.snapshot().unwrap();
        let state = snapshot[&("p1".to_string(), "s1".to_string())];
        assert!(state.checked_a);
        assert!(!state.checked_b);

        store.set_checked_b(b.id, true).unwrap();
        assert!(store.conflicting_links().unwrap().is_empty());
        assert!(store.get_item_b(b.id).unwrap().unwrap().last_synced_at.is_some());
    }

    #[test]
    fn operations_are_logged() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.upsert_item_a(&remote("p1", "Milk", false), "l").unwrap();
        let b = store.upsert_item_b(&remote("s1", "milk", false), "l").unwrap();
        store.create_link(a.id, b.id, 0.9).unwrap();
        store.log_operation(OperationKind::Conflict, Some(a.id), Some(b.id), "{}");

        let ops = store.recent_operations(10).unwrap();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0].operation, OperationKind::Conflict);
        assert_eq!(ops[1].operation, OperationKind::Link);

        let stats = store.statistics().unwrap();
        assert_eq!(stats.operations[&OperationKind::Create], 2);
        assert_eq!(stats.links, 1);
        assert_eq!(stats.unlinked_a, 0);
    }

    #[test]
    fn projection_rolls_back_on_drop() {
        let store = StateStore::open_in_memory().unwrap();
        store.upsert_item_a(&remote("p1", "Milk", false), "l").unwrap();

        {
            let _projection = store.begin_projection().unwrap();
            store.upsert_item_a(&remote("p2", "Eggs", false), "l").unwrap();
            store.upsert_item_a(&remote("p1", "Milk", true), "l").unwrap();
            assert_eq!(store.unlinked_items_a().unwrap().len(), 2);
        }

        let items = store.unlinked_items_a().unwrap();
        assert_eq!(items.len(), 1);
        assert!(!items[0].checked);
        assert_eq!(store.recent_operations(10).unwrap().len(), 1);
    }

    #[test]
    fn reopen_keeps_state_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        {
            let store = StateStore::open(&path).unwrap();
            store.upsert_item_a(&remote("p1", "Milk", false), "l").unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
        assert!(store.item_a_by_external_id("p1").unwrap().is_some());
    }
}
