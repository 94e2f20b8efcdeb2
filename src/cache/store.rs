//! Persistent memo store.
//!
//! Records live in SQLite (WAL mode) so they survive restarts and can be
//! read while another process writes. Every insert is one transaction, so a
//! lookup sees either the old record or the new one, never a partial row.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;

use super::fingerprint::Fingerprint;
use super::lru::{CacheStats, HotCache};
use crate::{AcceptError, AcceptResult};

/// Fingerprint → result mapping.
pub struct MemoStore {
    conn: Mutex<Connection>,
    hot: Mutex<HotCache>,
    force: bool,
}

impl MemoStore {
    /// Opens (or creates) the store at `db_path`.
    ///
    /// With `force` set, every lookup reports a miss and every insert
    /// overwrites, for the lifetime of this store.
    pub fn open(db_path: &Path, hot_capacity: usize, force: bool) -> AcceptResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).map_err(|e| corrupted_or(e, db_path))?;
        Self::init(conn, hot_capacity, force).map_err(|e| match e {
            AcceptError::Sqlite(inner) => corrupted_or(inner, db_path),
            other => other,
        })
    }

    /// Store that lives only as long as the process. Used by tests and
    /// one-off commands.
    pub fn in_memory(force: bool) -> AcceptResult<Self> {
        Self::init(Connection::open_in_memory()?, 64, force)
    }

    fn init(conn: Connection, hot_capacity: usize, force: bool) -> AcceptResult<Self> {
        // journal_mode returns a row, so it cannot go through execute_batch
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS memo (
                fingerprint TEXT PRIMARY KEY,
                function TEXT NOT NULL,
                result TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_memo_function ON memo(function);
        "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            hot: Mutex::new(HotCache::new(hot_capacity)),
            force,
        })
    }

    /// Whether this store ignores existing records.
    pub fn is_forced(&self) -> bool {
        self.force
    }

    /// Returns the memoized result for `fingerprint`, if any.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> AcceptResult<Option<Value>> {
        if self.force {
            self.hot.lock().map_err(|_| poisoned())?.record_miss();
            return Ok(None);
        }

        {
            let mut hot = self.hot.lock().map_err(|_| poisoned())?;
            if let Some(value) = hot.get(fingerprint).cloned() {
                hot.record_hit();
                return Ok(Some(value));
            }
        }

        let raw: Option<String> = {
            let conn = self.conn.lock().map_err(|_| poisoned())?;
            conn.query_row(
                "SELECT result FROM memo WHERE fingerprint = ?",
                params![fingerprint.as_str()],
                |row| row.get(0),
            )
            .optional()?
        };

        let mut hot = self.hot.lock().map_err(|_| poisoned())?;
        match raw {
            Some(raw) => {
                let value: Value = serde_json::from_str(&raw).map_err(|e| {
                    AcceptError::CacheCorrupted(format!(
                        "record {} is not valid JSON: {}",
                        fingerprint.short(),
                        e
                    ))
                })?;
                hot.insert(fingerprint.clone(), value.clone());
                hot.record_hit();
                Ok(Some(value))
            }
            None => {
                hot.record_miss();
                Ok(None)
            }
        }
    }

    /// Stores `result` under `fingerprint`, replacing any previous record.
    pub fn insert(&self, fingerprint: &Fingerprint, function: &str, result: &Value) -> AcceptResult<()> {
        let raw = serde_json::to_string(result)?;
        {
            let mut conn = self.conn.lock().map_err(|_| poisoned())?;
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM memo WHERE fingerprint = ?",
                params![fingerprint.as_str()],
            )?;
            tx.execute(
                "INSERT INTO memo (fingerprint, function, result, created_at)
                 VALUES (?, ?, ?, ?)",
                params![fingerprint.as_str(), function, raw, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
        }

        self.hot
            .lock()
            .map_err(|_| poisoned())?
            .insert(fingerprint.clone(), result.clone());

        tracing::trace!(fingerprint = %fingerprint.short(), function, "memo record stored");
        Ok(())
    }

    /// Removes the record for `fingerprint`.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> AcceptResult<()> {
        {
            let conn = self.conn.lock().map_err(|_| poisoned())?;
            conn.execute(
                "DELETE FROM memo WHERE fingerprint = ?",
                params![fingerprint.as_str()],
            )?;
        }
        self.hot.lock().map_err(|_| poisoned())?.invalidate(fingerprint);
        Ok(())
    }

    /// Removes every record. Returns how many were dropped.
    pub fn clear(&self) -> AcceptResult<usize> {
        let removed = {
            let conn = self.conn.lock().map_err(|_| poisoned())?;
            conn.execute("DELETE FROM memo", [])?
        };
        self.hot.lock().map_err(|_| poisoned())?.clear();
        Ok(removed)
    }

    /// Number of persisted records.
    pub fn len(&self) -> AcceptResult<usize> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memo", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> AcceptResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Fingerprints of all records for one handler.
    pub fn fingerprints_for(&self, function: &str) -> AcceptResult<Vec<Fingerprint>> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        let mut stmt =
            conn.prepare("SELECT fingerprint FROM memo WHERE function = ? ORDER BY fingerprint")?;
        let rows = stmt
            .query_map(params![function], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .map(Fingerprint::from_hex)
            .collect();
        Ok(rows)
    }

    /// Returns hit/miss statistics.
    pub fn stats(&self) -> CacheStats {
        self.hot
            .lock()
            .map(|hot| hot.stats())
            .unwrap_or_default()
    }
}

fn poisoned() -> AcceptError {
    AcceptError::CacheCorrupted("memo store lock poisoned".to_string())
}

fn corrupted_or(err: rusqlite::Error, path: &Path) -> AcceptError {
    match err.sqlite_error_code() {
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
            AcceptError::CacheCorrupted(format!(
                "{} is not a memo database; delete it or pass another path",
                path.display()
            ))
        }
        _ => AcceptError::Sqlite(err),
    }
}
