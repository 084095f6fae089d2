//! Inventory store
//!
//! SQLite-backed persistence shared by all services. Location:
//! /var/lib/inventory/inventory.db (system) or ~/.local/share/inventory/inventory.db (user)
//!
//! Every mutation runs inside [`InventoryStore::transaction`], reads use
//! [`InventoryStore::read`];
//! nested sub-operations use savepoints on the transaction they receive.

use crate::error::{InventoryError, Result};
use rusqlite::{params, Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Schema version for migrations
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS platform (
    id TEXT PRIMARY KEY,
    vendor TEXT NOT NULL,
    model TEXT NOT NULL,
    UNIQUE(vendor, model)
);

CREATE TABLE IF NOT EXISTS image (
    id TEXT PRIMARY KEY,
    modcount INTEGER NOT NULL DEFAULT 0,
    org TEXT,
    category TEXT,
    type TEXT NOT NULL,
    name TEXT NOT NULL,
    state TEXT NOT NULL,
    role TEXT NOT NULL,
    element_id TEXT,
    element_name TEXT,
    platform_id TEXT NOT NULL REFERENCES platform(id),
    major INTEGER NOT NULL,
    minor INTEGER NOT NULL,
    patch INTEGER NOT NULL,
    prerelease TEXT,
    ext TEXT,
    build_id TEXT,
    build_date TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_image_scope_version ON image(
    platform_id, role, COALESCE(element_id, ''), type, name,
    major, minor, patch, COALESCE(prerelease, '')
);
CREATE INDEX IF NOT EXISTS idx_image_family ON image(platform_id, role, type, name);
CREATE INDEX IF NOT EXISTS idx_image_state ON image(state);

CREATE TABLE IF NOT EXISTS image_checksum (
    image_id TEXT NOT NULL REFERENCES image(id) ON DELETE CASCADE,
    algorithm TEXT NOT NULL,
    digest TEXT NOT NULL,
    PRIMARY KEY (image_id, algorithm)
);

CREATE TABLE IF NOT EXISTS package_version (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org TEXT NOT NULL,
    name TEXT NOT NULL,
    major INTEGER NOT NULL,
    minor INTEGER NOT NULL,
    patch INTEGER NOT NULL,
    prerelease TEXT,
    build_date TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_package_version ON package_version(
    org, name, major, minor, patch, COALESCE(prerelease, '')
);

CREATE TABLE IF NOT EXISTS package_version_checksum (
    package_version_id INTEGER NOT NULL REFERENCES package_version(id) ON DELETE CASCADE,
    algorithm TEXT NOT NULL,
    digest TEXT NOT NULL,
    PRIMARY KEY (package_version_id, algorithm)
);

CREATE TABLE IF NOT EXISTS image_package (
    image_id TEXT NOT NULL REFERENCES image(id) ON DELETE CASCADE,
    package_version_id INTEGER NOT NULL REFERENCES package_version(id),
    PRIMARY KEY (image_id, package_version_id)
);

CREATE TABLE IF NOT EXISTS application (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS image_application (
    image_id TEXT NOT NULL REFERENCES image(id) ON DELETE CASCADE,
    application_id INTEGER NOT NULL REFERENCES application(id),
    PRIMARY KEY (image_id, application_id)
);

CREATE TABLE IF NOT EXISTS element_image (
    element_id TEXT NOT NULL,
    image_id TEXT NOT NULL REFERENCES image(id),
    state TEXT NOT NULL,
    deployed_at TEXT NOT NULL,
    PRIMARY KEY (element_id, image_id)
);
CREATE INDEX IF NOT EXISTS idx_element_image_image ON element_image(image_id);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Shared SQLite connection. Cloning shares the same connection.
#[derive(Clone)]
pub struct InventoryStore {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl InventoryStore {
    /// Open or create the store at a specific path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening inventory database at: {}", path.display());
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Private in-memory store, used by tools and tests
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Default database location
    pub fn default_path() -> PathBuf {
        let system_path = PathBuf::from("/var/lib/inventory/inventory.db");
        if system_path.parent().map(|p| p.exists()).unwrap_or(false) {
            return system_path;
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("inventory")
            .join("inventory.db")
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        debug!("Inventory schema v{} ready", SCHEMA_VERSION);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // Transactions roll back on drop, so a poisoned connection is still consistent.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` in one transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock();
        let mut tx = conn.transaction()?;
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Read-only access without an explicit transaction
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock();
        f(&*conn)
    }

    /// Database path (None for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

impl std::fmt::Debug for InventoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Creates a savepoint on `tx`, runs `f`, and releases it on success.
/// On failure only the savepoint is rolled back; the outer transaction stays usable.
pub(crate) fn nested<T, F>(tx: &mut Transaction<'_>, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    let sp = tx.savepoint()?;
    let value = f(&*sp)?;
    sp.commit().map_err(InventoryError::from)?;
    Ok(value)
}
