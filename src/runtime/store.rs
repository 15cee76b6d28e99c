//! Durable entity state and reminder records backed by SQLite.
//!
//! State is stored as independently-keyed entries per `(kind, entity_id)`, so a
//! building's sensor values are separate rows rather than one composite blob.

use super::{EntityKind, ReminderRecord};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage backend for entity state and reminders.
///
/// Calls are blocking; the runtime drives them from the blocking pool while it
/// holds the owning entity's lock.
pub trait StateStore: Send + Sync + 'static {
    /// Load every state entry of one entity.
    fn load_state(&self, kind: EntityKind, entity_id: &str) -> Result<BTreeMap<String, Value>>;

    /// Upsert one state entry.
    fn save_state(&self, kind: EntityKind, entity_id: &str, key: &str, value: &Value)
        -> Result<()>;

    /// Delete one state entry. Returns false if it did not exist.
    fn remove_state(&self, kind: EntityKind, entity_id: &str, key: &str) -> Result<bool>;

    fn load_reminder(
        &self,
        kind: EntityKind,
        entity_id: &str,
        name: &str,
    ) -> Result<Option<ReminderRecord>>;

    /// Upsert a reminder record.
    fn save_reminder(&self, record: &ReminderRecord) -> Result<()>;

    /// Move an existing reminder's next fire time. Never creates a record, so a
    /// reminder unregistered mid-delivery stays gone. Returns false if absent.
    fn reschedule_reminder(
        &self,
        kind: EntityKind,
        entity_id: &str,
        name: &str,
        next_fire_at: DateTime<Utc>,
    ) -> Result<bool>;

    fn delete_reminder(&self, kind: EntityKind, entity_id: &str, name: &str) -> Result<bool>;

    /// All reminder records, used to resume timers at startup.
    fn load_reminders(&self) -> Result<Vec<ReminderRecord>>;
}

/// Run a store call on the blocking pool.
pub(crate) async fn run_blocking<T, F>(store: &Arc<dyn StateStore>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn StateStore) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .context("State store task failed")?
}

/// SQLite-backed [`StateStore`].
///
/// # Schema
/// ```sql
/// CREATE TABLE entity_state (
///     kind       TEXT NOT NULL,
///     entity_id  TEXT NOT NULL,
///     key        TEXT NOT NULL,
///     value      TEXT NOT NULL,  -- JSON
///     updated_at TEXT NOT NULL,  -- RFC 3339
///     PRIMARY KEY (kind, entity_id, key)
/// );
/// CREATE TABLE reminders (
///     kind         TEXT NOT NULL,
///     entity_id    TEXT NOT NULL,
///     name         TEXT NOT NULL,
///     due_time_ms  INTEGER NOT NULL,
///     period_ms    INTEGER NOT NULL,
///     next_fire_at TEXT NOT NULL,  -- RFC 3339
///     PRIMARY KEY (kind, entity_id, name)
/// );
/// ```
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Opens (or creates) the database at `db_path`. `":memory:"` gives a volatile store.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open state DB at {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory state DB")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entity_state (
                kind       TEXT NOT NULL,
                entity_id  TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kind, entity_id, key)
            );
            CREATE TABLE IF NOT EXISTS reminders (
                kind         TEXT NOT NULL,
                entity_id    TEXT NOT NULL,
                name         TEXT NOT NULL,
                due_time_ms  INTEGER NOT NULL,
                period_ms    INTEGER NOT NULL,
                next_fire_at TEXT NOT NULL,
                PRIMARY KEY (kind, entity_id, name)
            );",
        )
        .context("Failed to create state tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("State DB connection lock poisoned"))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp '{}'", raw))
}

type ReminderRow = (String, String, String, i64, i64, String);

fn reminder_from_row(row: ReminderRow) -> Result<ReminderRecord> {
    let (kind, entity_id, name, due_time_ms, period_ms, next_fire_at) = row;
    Ok(ReminderRecord {
        kind: kind.parse()?,
        entity_id,
        name,
        due_time_ms,
        period_ms,
        next_fire_at: parse_timestamp(&next_fire_at)?,
    })
}

impl StateStore for SqliteStateStore {
    fn load_state(&self, kind: EntityKind, entity_id: &str) -> Result<BTreeMap<String, Value>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM entity_state WHERE kind = ?1 AND entity_id = ?2")
            .context("Failed to prepare state query")?;

        let rows = stmt
            .query_map(params![kind.as_str(), entity_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("Failed to query entity state")?;

        let mut state = BTreeMap::new();
        for row in rows {
            let (key, raw) = row.context("Failed to read state row")?;
            let value: Value = serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt state entry '{}' for {} {}", key, kind, entity_id))?;
            state.insert(key, value);
        }

        Ok(state)
    }

    fn save_state(
        &self,
        kind: EntityKind,
        entity_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<()> {
        let raw = serde_json::to_string(value).context("Failed to serialize state entry")?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO entity_state (kind, entity_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(kind, entity_id, key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
            params![kind.as_str(), entity_id, key, raw, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to save state entry '{}'", key))?;
        Ok(())
    }

    fn remove_state(&self, kind: EntityKind, entity_id: &str, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM entity_state WHERE kind = ?1 AND entity_id = ?2 AND key = ?3",
                params![kind.as_str(), entity_id, key],
            )
            .with_context(|| format!("Failed to remove state entry '{}'", key))?;
        Ok(removed > 0)
    }

    fn load_reminder(
        &self,
        kind: EntityKind,
        entity_id: &str,
        name: &str,
    ) -> Result<Option<ReminderRecord>> {
        let conn = self.conn()?;
        let row: Option<ReminderRow> = conn
            .query_row(
                "SELECT kind, entity_id, name, due_time_ms, period_ms, next_fire_at
                 FROM reminders WHERE kind = ?1 AND entity_id = ?2 AND name = ?3",
                params![kind.as_str(), entity_id, name],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query reminder")?;

        row.map(reminder_from_row).transpose()
    }

    fn save_reminder(&self, record: &ReminderRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reminders (kind, entity_id, name, due_time_ms, period_ms, next_fire_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(kind, entity_id, name) DO UPDATE SET
                 due_time_ms = excluded.due_time_ms,
                 period_ms = excluded.period_ms,
                 next_fire_at = excluded.next_fire_at",
            params![
                record.kind.as_str(),
                record.entity_id,
                record.name,
                record.due_time_ms,
                record.period_ms,
                record.next_fire_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to save reminder '{}'", record.name))?;
        Ok(())
    }

    fn reschedule_reminder(
        &self,
        kind: EntityKind,
        entity_id: &str,
        name: &str,
        next_fire_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE reminders SET next_fire_at = ?4
                 WHERE kind = ?1 AND entity_id = ?2 AND name = ?3",
                params![kind.as_str(), entity_id, name, next_fire_at.to_rfc3339()],
            )
            .with_context(|| format!("Failed to reschedule reminder '{}'", name))?;
        Ok(updated > 0)
    }

    fn delete_reminder(&self, kind: EntityKind, entity_id: &str, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM reminders WHERE kind = ?1 AND entity_id = ?2 AND name = ?3",
                params![kind.as_str(), entity_id, name],
            )
            .with_context(|| format!("Failed to delete reminder '{}'", name))?;
        Ok(removed > 0)
    }

    fn load_reminders(&self) -> Result<Vec<ReminderRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT kind, entity_id, name, due_time_ms, period_ms, next_fire_at
                 FROM reminders ORDER BY kind, entity_id, name",
            )
            .context("Failed to prepare reminder query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })
            .context("Failed to query reminders")?
            .collect::<Result<Vec<ReminderRow>, _>>()
            .context("Failed to read reminder rows")?;

        rows.into_iter().map(reminder_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_state_entries_are_scoped_per_entity() {
        let store = SqliteStateStore::in_memory().unwrap();
        store
            .save_state(EntityKind::Building, "1", "T1", &json!(18.0))
            .unwrap();
        store
            .save_state(EntityKind::Building, "2", "T2", &json!(19.5))
            .unwrap();
        store
            .save_state(EntityKind::Sensor, "1", "readings", &json!([]))
            .unwrap();

        let building_1 = store.load_state(EntityKind::Building, "1").unwrap();
        assert_eq!(building_1.len(), 1);
        assert_eq!(building_1["T1"], json!(18.0));
    }

    #[test]
    fn test_save_state_overwrites() {
        let store = SqliteStateStore::in_memory().unwrap();
        store
            .save_state(EntityKind::Building, "1", "S1", &json!(21.5))
            .unwrap();
        store
            .save_state(EntityKind::Building, "1", "S1", &json!(22.0))
            .unwrap();

        let state = store.load_state(EntityKind::Building, "1").unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state["S1"], json!(22.0));
    }

    #[test]
    fn test_remove_state() {
        let store = SqliteStateStore::in_memory().unwrap();
        store
            .save_state(EntityKind::Sensor, "s1", "readings", &json!([]))
            .unwrap();

        assert!(store.remove_state(EntityKind::Sensor, "s1", "readings").unwrap());
        assert!(!store.remove_state(EntityKind::Sensor, "s1", "readings").unwrap());
        assert!(store.load_state(EntityKind::Sensor, "s1").unwrap().is_empty());
    }

    #[test]
    fn test_reminder_roundtrip_through_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("state.db");
        let next_fire_at = Utc::now();

        {
            let store = SqliteStateStore::new(&db_path).unwrap();
            store
                .save_reminder(&ReminderRecord {
                    kind: EntityKind::Building,
                    entity_id: "7".to_string(),
                    name: "PublishBuildingStatus".to_string(),
                    due_time_ms: 5000,
                    period_ms: 5000,
                    next_fire_at,
                })
                .unwrap();
        }

        let store = SqliteStateStore::new(&db_path).unwrap();
        let reminders = store.load_reminders().unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].kind, EntityKind::Building);
        assert_eq!(reminders[0].entity_id, "7");
        assert_eq!(reminders[0].period_ms, 5000);
        assert_eq!(
            reminders[0].next_fire_at.timestamp_millis(),
            next_fire_at.timestamp_millis()
        );

        let loaded = store
            .load_reminder(EntityKind::Building, "7", "PublishBuildingStatus")
            .unwrap();
        assert!(loaded.is_some());
        assert!(!store
            .reschedule_reminder(EntityKind::Building, "7", "Missing", Utc::now())
            .unwrap());
        assert!(store
            .delete_reminder(EntityKind::Building, "7", "PublishBuildingStatus")
            .unwrap());
        assert!(store.load_reminders().unwrap().is_empty());
    }
}
