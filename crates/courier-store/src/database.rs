//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.  The connection sits behind
//! a mutex that each CRUD helper holds only for its own statement (or its own
//! transaction), so a `Database` can be shared across tasks with `Arc`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/courier/courier.db`
    /// - macOS:   `~/Library/Application Support/com.courier.courier/courier.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\courier\courier\data\courier.db`
    pub fn new() -> Result<Self> {
        Self::open_at(&Self::default_path()?)
    }

    /// Platform default location of the database file.
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "courier", "courier").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("courier.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Self::init(conn)
    }

    /// Open a private in-memory database.  Used by tests and by ephemeral
    /// single-process deployments.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the underlying connection for the duration of one operation.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn()
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}
