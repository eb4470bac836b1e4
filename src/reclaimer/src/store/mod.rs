//! Connector implementations.
//!
//! [`MemoryStore`] keeps everything in process and backs the tests and
//! `memory` database DSNs. [`SqliteStore`] is what the service runs against.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use crate::connector::Connectors;

/// Open the store named by a database DSN and hand out its connectors.
///
/// `memory://` yields an empty [`MemoryStore`]; anything else is treated as
/// a SQLite DSN.
pub async fn connectors_from_dsn(dsn: &str) -> anyhow::Result<Connectors> {
    if dsn.starts_with("memory:") {
        log::warn!("Using in-memory store; nothing will be reclaimed from a real database");
        return Ok(Connectors::from_store(Arc::new(MemoryStore::new())));
    }

    let store = SqliteStore::connect(dsn)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database {dsn}: {e}"))?;
    Ok(Connectors::from_store(Arc::new(store)))
}
