use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use crate::errors::ScanError;
use crate::models::ScanRecord;
use crate::realtime::ChangeHub;

pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
    hub: Option<ChangeHub>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, ScanError> {
        // Ensure parent directory exists
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| ScanError::Persistence(format!("Failed to open database: {}", e)))?;

        // WAL lets readers proceed while the executor holds a write transaction
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| ScanError::Persistence(format!("Failed to set pragmas: {}", e)))?;

        let db = Self { conn: Arc::new(Mutex::new(conn)), hub: None };
        db.initialize()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, ScanError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ScanError::Persistence(format!("Failed to open in-memory db: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| ScanError::Persistence(format!("Failed to set pragmas: {}", e)))?;
        let db = Self { conn: Arc::new(Mutex::new(conn)), hub: None };
        db.initialize()?;
        Ok(db)
    }

    /// Publish every committed scan mutation on `hub`.
    pub fn with_change_hub(mut self, hub: ChangeHub) -> Self {
        self.hub = Some(hub);
        self
    }

    fn initialize(&self) -> Result<(), ScanError> {
        let conn = self.lock()?;
        conn.execute_batch(super::schema::CREATE_TABLES)
            .map_err(|e| ScanError::Persistence(format!("Failed to create tables: {}", e)))?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, ScanError> {
        self.conn
            .lock()
            .map_err(|_| ScanError::Persistence("Database connection lock poisoned".into()))
    }

    pub(crate) fn publish(&self, record: &ScanRecord) {
        if let Some(hub) = &self.hub {
            hub.publish(record);
        }
    }

    pub(crate) fn forget(&self, scan_id: &str) {
        if let Some(hub) = &self.hub {
            hub.forget_scan(scan_id);
        }
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self { conn: self.conn.clone(), hub: self.hub.clone() }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("notifies", &self.hub.is_some())
            .finish()
    }
}

/// Current time at the precision the store keeps.
pub(crate) fn db_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamp for the next mutation of a row last written at `previous`.
/// Strictly later than `previous` even if the clock has not advanced.
pub(crate) fn next_update_time(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = db_now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

/// Fixed-width RFC 3339 so that text comparison orders chronologically.
pub(crate) fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_db_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        ))
}

pub(crate) fn parse_opt_db_time(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_db_time(idx, &v)).transpose()
}
