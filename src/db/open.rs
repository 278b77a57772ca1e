use std::path::Path;

use log::info;
use rusqlite::Connection;

/// included ledger schema
static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/db/schema.sql"));

pub struct Ledger {
    pub(super) conn: Connection,
}

impl Ledger {
    pub fn open(path: &Path) -> rusqlite::Result<Ledger> {
        if !path.exists() {
            info!("Creating new job ledger {}", path.display())
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> rusqlite::Result<Ledger> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> rusqlite::Result<Ledger> {
        conn.execute(SCHEMA, [])?;
        Ok(Ledger { conn })
    }
}
