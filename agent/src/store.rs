//! Permission store keyed by player guid.
//!
//! The store is the only source of permission levels. The agent asks it once
//! when a slot first appears and writes to it when a level is granted.
//!
//! # Schema
//!
//! The `admins` table has columns: `id`, `guid`, `name`, `ip_address`,
//! `admin_role`.

use crate::error::{AgentError, Result};
use crate::session::PermissionLevel;
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// A player record as inserted into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRecord {
    pub guid: String,
    pub name: String,
    pub address: String,
    pub level: PermissionLevel,
}

pub trait PermissionStore: Send + Sync {
    /// Level stored for `guid`, or `None` if the guid is unknown.
    fn lookup(&self, guid: &str) -> Result<Option<PermissionLevel>>;

    fn register(&self, record: &PermissionRecord) -> Result<()>;

    fn update_level(&self, guid: &str, level: PermissionLevel) -> Result<()>;
}

/// Durable store backed by `SQLite`.
pub struct SqlitePermissionStore {
    conn: Mutex<Connection>,
}

impl SqlitePermissionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        info!("Opened permission store {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS admins (
                id INTEGER PRIMARY KEY NOT NULL,
                guid TEXT NOT NULL,
                name TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                admin_role INTEGER DEFAULT 1
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_admins_guid ON admins(guid)",
            [],
        )?;
        Ok(())
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AgentError::StoreUnavailable("connection lock poisoned"))
    }

    /// Whether any record holds at least `level`.
    pub fn has_level(&self, level: PermissionLevel) -> Result<bool> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM admins WHERE admin_role >= ?1",
            params![level.value()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl PermissionStore for SqlitePermissionStore {
    fn lookup(&self, guid: &str) -> Result<Option<PermissionLevel>> {
        let conn = self.connection()?;
        let value: Option<i64> = conn
            .query_row(
                "SELECT admin_role FROM admins WHERE guid = ?1",
                params![guid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(PermissionLevel::from_value))
    }

    fn register(&self, record: &PermissionRecord) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO admins (guid, name, ip_address, admin_role) VALUES (?1, ?2, ?3, ?4)",
            params![record.guid, record.name, record.address, record.level.value()],
        )?;
        Ok(())
    }

    fn update_level(&self, guid: &str, level: PermissionLevel) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE admins SET admin_role = ?1 WHERE guid = ?2",
            params![level.value(), guid],
        )?;
        Ok(())
    }
}

/// Volatile store for tests and dry runs.
#[derive(Default)]
pub struct MemoryPermissionStore {
    records: Mutex<HashMap<String, PermissionRecord>>,
}

impl MemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = PermissionRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.guid.clone(), record))
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, PermissionRecord>>> {
        self.records
            .lock()
            .map_err(|_| AgentError::StoreUnavailable("record lock poisoned"))
    }
}

impl PermissionStore for MemoryPermissionStore {
    fn lookup(&self, guid: &str) -> Result<Option<PermissionLevel>> {
        Ok(self.records()?.get(guid).map(|record| record.level))
    }

    fn register(&self, record: &PermissionRecord) -> Result<()> {
        self.records()?.insert(record.guid.clone(), record.clone());
        Ok(())
    }

    fn update_level(&self, guid: &str, level: PermissionLevel) -> Result<()> {
        if let Some(record) = self.records()?.get_mut(guid) {
            record.level = level;
        }
        Ok(())
    }
}
