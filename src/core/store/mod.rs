mod config;
mod definitions;
mod requests;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;

/// Stored timestamps are local naive ISO-8601 so lexicographic SQL
/// comparison matches chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

const DB_VERSION: i64 = 3;

pub fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub fn stamp(dt: NaiveDateTime) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_stamp() -> String {
    stamp(now_local())
}

pub fn parse_stamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flexfetch")
}

/// Durable record of tracked report definitions and request lifecycles.
/// All components share one store handle; nothing touches the file
/// directly.
#[derive(Clone)]
pub struct ReportStore {
    db: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl ReportStore {
    pub fn open<P: AsRef<Path>>(db_dir: P) -> Result<Self> {
        let db_dir = db_dir.as_ref().to_path_buf();
        if !db_dir.exists() {
            std::fs::create_dir_all(&db_dir)?;
        }
        let db_path = db_dir.join("status.db");
        let db = Connection::open(&db_path)?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                name TEXT,
                category TEXT DEFAULT 'activity',
                interval_hours INTEGER,
                added_on DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS requests (
                request_id TEXT PRIMARY KEY,
                report_id TEXT,
                status TEXT,
                requested_at DATETIME,
                completed_at DATETIME,
                last_updated DATETIME,
                output_path TEXT,
                FOREIGN KEY (report_id) REFERENCES reports(id)
            )",
            [],
        )?;

        Self::migrate(&db)?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Upgrade databases created by older releases in place. Each step
    /// is idempotent; a failed ALTER means the column already exists.
    fn migrate(db: &Connection) -> Result<()> {
        let current: i64 = db
            .query_row(
                "SELECT value FROM config WHERE key = 'db_version' LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if current >= DB_VERSION {
            return Ok(());
        }
        info!("Migrating store schema from v{} to v{}", current, DB_VERSION);

        if current < 1 {
            let _ = db.execute("ALTER TABLE requests ADD COLUMN last_updated DATETIME", []);
        }
        if current < 2 {
            let _ = db.execute("ALTER TABLE reports ADD COLUMN interval_hours INTEGER", []);
        }
        if current < 3 {
            let _ = db.execute(
                "ALTER TABLE reports ADD COLUMN category TEXT DEFAULT 'activity'",
                [],
            );
        }

        db.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES ('db_version', ?1)",
            [DB_VERSION.to_string()],
        )?;
        Ok(())
    }
}

/// Store backed by a throwaway directory. The guard must outlive the
/// store.
#[cfg(test)]
pub(crate) fn test_store() -> (ReportStore, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let store = ReportStore::open(dir.path()).expect("open test store");
    (store, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_roundtrip_and_sort_lexicographically() {
        let a = now_local();
        let b = a + chrono::Duration::seconds(1);
        assert!(stamp(a) < stamp(b));
        // Stamps truncate to microseconds; reparse must be stable.
        let s = stamp(a);
        assert_eq!(parse_stamp(&s).map(stamp), Some(s));
    }

    #[test]
    fn parse_stamp_accepts_seconds_precision() {
        assert!(parse_stamp("2025-04-12T10:00:00").is_some());
        assert!(parse_stamp("not a time").is_none());
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let (store, dir) = test_store();
        drop(store);
        let again = ReportStore::open(dir.path()).expect("reopen");
        assert!(again.db_path().exists());
    }

    #[tokio::test]
    async fn migrates_v0_schema_in_place() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let db = Connection::open(dir.path().join("status.db")).unwrap();
            db.execute(
                "CREATE TABLE config (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
                [],
            )
            .unwrap();
            db.execute(
                "CREATE TABLE reports (
                    id TEXT PRIMARY KEY,
                    name TEXT,
                    added_on DATETIME DEFAULT CURRENT_TIMESTAMP
                )",
                [],
            )
            .unwrap();
            db.execute(
                "CREATE TABLE requests (
                    request_id TEXT PRIMARY KEY,
                    report_id TEXT,
                    status TEXT,
                    requested_at DATETIME,
                    completed_at DATETIME,
                    output_path TEXT
                )",
                [],
            )
            .unwrap();
            db.execute(
                "INSERT INTO reports (id, name) VALUES ('111', 'Legacy')",
                [],
            )
            .unwrap();
        }

        let store = ReportStore::open(dir.path()).expect("open migrates");
        let def = store.get_definition("111").await.unwrap().unwrap();
        assert_eq!(def.category, "activity");
        assert_eq!(def.interval_hours, None);
    }
}
