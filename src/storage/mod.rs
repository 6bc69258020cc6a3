// src/storage/mod.rs — SQLite persistence

pub mod schema;
pub mod store;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use store::{ExperimentRow, Store};

/// Store handle shared by the services of one process. One lock per store.
pub type SharedStore = Arc<Mutex<Store>>;

/// Owner of the SQLite connection.
pub struct Database {
    pub store: Store,
}

impl Database {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        schema::run_migrations(&conn)?;

        Ok(Self {
            store: Store::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            store: Store::new(conn),
        })
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self.store))
    }
}
