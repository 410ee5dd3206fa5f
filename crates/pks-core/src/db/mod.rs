//! SQLite storage substrate.
//!
//! One `Database` handle is shared (via `Arc`) by every component. It owns:
//!
//! - the writer connection, used for all mutations and maintenance transactions
//! - an optional read-only connection (file databases only, WAL mode) so that
//!   lookups and searches do not queue behind a long maintenance transaction
//! - the single-flight maintenance lock serialising decay, consolidation and
//!   imports against the same store

pub mod health;
pub mod migrations;

pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use migrations::LATEST_SCHEMA_VERSION;

use crate::error::{Error, Result};
use rusqlite::{Connection, OpenFlags, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, TryLockError};
use tracing::{debug, info};

/// Database connection wrapper.
///
/// Thread-safe via internal Mutexes. All writes go through the writer lock.
pub struct Database {
    conn: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    maintenance: Mutex<()>,
    running_job: Mutex<Option<&'static str>>,
    path: Option<PathBuf>,
}

/// Held while a maintenance job runs. Dropping it releases the lock.
pub struct MaintenanceGuard<'a> {
    job: &'static str,
    running_job: &'a Mutex<Option<&'static str>>,
    _lock: MutexGuard<'a, ()>,
}

impl MaintenanceGuard<'_> {
    /// Name of the job holding the lock
    pub fn job(&self) -> &'static str {
        self.job
    }
}

impl Drop for MaintenanceGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running_job.lock() {
            *running = None;
        }
    }
}

impl Database {
    /// Open (or create) a database file and bring its schema up to date
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
            reader: None,
            maintenance: Mutex::new(()),
            running_job: Mutex::new(None),
            path: Some(path.to_path_buf()),
        };
        db.init_schema()?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.execute_batch("PRAGMA busy_timeout=5000;")?;

        info!(path = %path.display(), "Opened pattern store");
        Ok(Self {
            reader: Some(Mutex::new(reader)),
            ..db
        })
    }

    /// Open a private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
            reader: None,
            maintenance: Mutex::new(()),
            running_job: Mutex::new(None),
            path: None,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Path of the database file, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create or upgrade the schema. Safe to call on every startup.
    pub fn init_schema(&self) -> Result<()> {
        self.migrate(LATEST_SCHEMA_VERSION).map(|_| ())
    }

    /// Migrate to `target`, returning `(old_version, new_version)`
    pub fn migrate(&self, target: u32) -> Result<(u32, u32)> {
        let mut conn = self.writer()?;
        let (old, new) = migrations::migrate(&mut conn, target)?;
        if old != new {
            info!(old, new, "Schema migrated");
        }
        Ok((old, new))
    }

    /// Current schema version
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.writer()?;
        migrations::current_version(&conn)
    }

    /// Check database connectivity
    pub fn ping(&self) -> Result<()> {
        let conn = self.writer()?;
        conn.execute_batch("SELECT 1").map_err(Error::Database)
    }

    /// Structural health report. Never fails; faults are captured in the status.
    pub fn health_check(&self) -> HealthReport {
        health::run(self)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection access
    // ─────────────────────────────────────────────────────────────────────────

    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Run `f` with the writer connection (single statements, no transaction)
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.writer()?;
        f(&conn)
    }

    /// Run `f` with the read connection, falling back to the writer for in-memory stores
    pub fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match &self.reader {
            Some(reader) => {
                let conn = reader.lock().map_err(|_| Error::LockPoisoned)?;
                f(&conn)
            }
            None => self.with_conn(f),
        }
    }

    /// Run `f` inside one transaction: committed on `Ok`, rolled back on `Err`
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance lock
    // ─────────────────────────────────────────────────────────────────────────

    /// Acquire the single-flight maintenance lock without waiting.
    ///
    /// Decay, consolidation and imports must not interleave against one store.
    pub fn begin_maintenance(&self, job: &'static str) -> Result<MaintenanceGuard<'_>> {
        let lock = match self.maintenance.try_lock() {
            Ok(lock) => lock,
            Err(TryLockError::WouldBlock) => {
                let running = self
                    .running_job
                    .lock()
                    .ok()
                    .and_then(|running| *running)
                    .unwrap_or("unknown");
                return Err(Error::MaintenanceBusy {
                    running: running.to_string(),
                });
            }
            Err(TryLockError::Poisoned(_)) => return Err(Error::LockPoisoned),
        };
        *self.running_job.lock().map_err(|_| Error::LockPoisoned)? = Some(job);
        debug!(job, "Maintenance lock acquired");
        Ok(MaintenanceGuard {
            job,
            running_job: &self.running_job,
            _lock: lock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), LATEST_SCHEMA_VERSION);

        db.init_schema().unwrap();
        db.init_schema().unwrap();
        assert_eq!(db.schema_version().unwrap(), LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_noop_when_current() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(
            db.migrate(LATEST_SCHEMA_VERSION).unwrap(),
            (LATEST_SCHEMA_VERSION, LATEST_SCHEMA_VERSION)
        );
        assert_eq!(db.migrate(1).unwrap(), (LATEST_SCHEMA_VERSION, LATEST_SCHEMA_VERSION));
    }

    #[test]
    fn test_migrate_stepwise() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(migrations::migrate(&mut conn, 1).unwrap(), (0, 1));
        assert_eq!(migrations::migrate(&mut conn, 2).unwrap(), (1, 2));
        assert!(migrations::migrate(&mut conn, 99).is_err());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO decay_log
                     (pattern_id, old_confidence, new_confidence, reason, timestamp)
                 VALUES ('p1', 0.5, 0.4, 'test', 0)",
                [],
            )?;
            Err(Error::validation("abort"))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM decay_log", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_maintenance_lock_is_single_flight() {
        let db = Database::open_in_memory().unwrap();
        let guard = db.begin_maintenance("decay").unwrap();
        assert_eq!(guard.job(), "decay");

        match db.begin_maintenance("consolidation") {
            Err(Error::MaintenanceBusy { running }) => assert_eq!(running, "decay"),
            _ => panic!("expected the second job to be rejected"),
        }

        drop(guard);
        assert!(db.begin_maintenance("consolidation").is_ok());
    }

    #[test]
    fn test_file_database_uses_reader() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_path(dir.path().join("nested").join("patterns.db")).unwrap();
        assert!(db.path().is_some());

        let count: i64 = db
            .with_reader(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
