// Two primary-keyed tables, `records` and `lookup`, backed here by a single
// SQLite connection per node. Both survive a process restart because the
// schema is created with CREATE TABLE IF NOT EXISTS rather than rebuilt.
//
// Only the Coordinator ever touches the lookup table; every role touches
// records. Both are owned by the dispatch loop that opened them (§5) --
// this type is not `Sync`, and isn't meant to be shared across threads.

use std::path::Path;

use ringkv_base::{err_kind, Kind, Result};
use rusqlite::{params, Connection, OptionalExtension};

#[cfg(test)]
use test_log::test;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordRow {
    pub key: String,
    pub value: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupRow {
    pub key: String,
    pub ring_size: i64,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| err_kind(Kind::Other, e.to_string()))?;
        let store = Store { conn };
        store.init()?;
        Ok(store)
    }

    pub fn open_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| err_kind(Kind::Other, e.to_string()))?;
        let store = Store { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS records (
                    key       TEXT PRIMARY KEY,
                    value     TEXT NOT NULL,
                    timestamp INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS lookup (
                    key       TEXT PRIMARY KEY,
                    ring_size INTEGER NOT NULL
                );
                ",
            )
            .map_err(|e| err_kind(Kind::Other, e.to_string()))?;
        Ok(())
    }

    // ── records ──────────────────────────────────────────────────────

    pub fn upsert_record(&self, key: &str, value: &str, now: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO records (key, value, timestamp) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, timestamp = excluded.timestamp",
                params![key, value, now],
            )
            .map_err(|e| err_kind(Kind::StoreConflict, e.to_string()))?;
        Ok(())
    }

    pub fn get_record(&self, key: &str) -> Result<Option<RecordRow>> {
        self.conn
            .query_row(
                "SELECT key, value, timestamp FROM records WHERE key = ?1",
                params![key],
                |row| {
                    Ok(RecordRow {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        timestamp: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|e| err_kind(Kind::Other, e.to_string()))
    }

    /// Returns whether a row existed and was removed.
    pub fn delete_record(&self, key: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM records WHERE key = ?1", params![key])
            .map_err(|e| err_kind(Kind::Other, e.to_string()))?;
        Ok(n > 0)
    }

    // ── lookup (coordinator-only) ────────────────────────────────────

    pub fn upsert_lookup(&self, key: &str, ring_size: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO lookup (key, ring_size) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET ring_size = excluded.ring_size",
                params![key, ring_size],
            )
            .map_err(|e| err_kind(Kind::StoreConflict, e.to_string()))?;
        Ok(())
    }

    pub fn get_lookup(&self, key: &str) -> Result<Option<LookupRow>> {
        self.conn
            .query_row(
                "SELECT key, ring_size FROM lookup WHERE key = ?1",
                params![key],
                |row| {
                    Ok(LookupRow {
                        key: row.get(0)?,
                        ring_size: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(|e| err_kind(Kind::Other, e.to_string()))
    }

    pub fn delete_lookup(&self, key: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM lookup WHERE key = ?1", params![key])
            .map_err(|e| err_kind(Kind::Other, e.to_string()))?;
        Ok(n > 0)
    }
}

#[test]
fn record_roundtrip() {
    let store = Store::open_memory().unwrap();
    assert!(store.get_record("A").unwrap().is_none());
    store.upsert_record("A", "hello", 100).unwrap();
    let row = store.get_record("A").unwrap().unwrap();
    assert_eq!(row.value, "hello");
    assert_eq!(row.timestamp, 100);
}

#[test]
fn record_upsert_overwrites() {
    let store = Store::open_memory().unwrap();
    store.upsert_record("A", "v1", 100).unwrap();
    store.upsert_record("A", "v2", 200).unwrap();
    let row = store.get_record("A").unwrap().unwrap();
    assert_eq!(row.value, "v2");
    assert_eq!(row.timestamp, 200);
}

#[test]
fn record_delete() {
    let store = Store::open_memory().unwrap();
    store.upsert_record("A", "v", 1).unwrap();
    assert!(store.delete_record("A").unwrap());
    assert!(store.get_record("A").unwrap().is_none());
    assert!(!store.delete_record("A").unwrap());
}

#[test]
fn lookup_roundtrip() {
    let store = Store::open_memory().unwrap();
    store.upsert_lookup("K", 3).unwrap();
    let row = store.get_lookup("K").unwrap().unwrap();
    assert_eq!(row.ring_size, 3);
    assert!(store.delete_lookup("K").unwrap());
    assert!(store.get_lookup("K").unwrap().is_none());
}
