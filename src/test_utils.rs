/// # Test Utilities Module
///
/// Fixtures shared by the unit tests: a registry whose default server is a
/// temporary SQLite file with a small sample schema.

use crate::core::db::connection::{ServerDescriptor, ServerRegistry, DEFAULT_SERVER_ID};
use crate::core::db::query::{read_first_row, QueryExecutor};
use crate::core::Result;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Registry backed by a throwaway database file
pub struct RegistryFixture {
    pub registry: Arc<ServerRegistry>,
    pub path: PathBuf,
    _dir: TempDir,
}

impl RegistryFixture {
    /// Creates an empty database and registers it as the default server
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path().join("bridge.db");
        Connection::open(&path)?;

        let fixture = RegistryFixture {
            registry: Arc::new(ServerRegistry::new()),
            path,
            _dir: dir,
        };
        fixture.registry.register(fixture.descriptor(DEFAULT_SERVER_ID));
        Ok(fixture)
    }

    /// Creates the fixture with sample tables and rows
    pub fn with_sample_data() -> Result<Self> {
        let fixture = Self::new()?;
        let conn = Connection::open(&fixture.path)?;
        conn.execute_batch(
            "
            CREATE TABLE readings (
                id INTEGER PRIMARY KEY,
                sensor TEXT NOT NULL,
                value REAL
            );
            CREATE TABLE switches (
                name TEXT PRIMARY KEY,
                state TEXT
            );
            CREATE TABLE levels (
                id INTEGER PRIMARY KEY,
                value INTEGER
            );
            CREATE TABLE history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value TEXT,
                recorded_at TEXT
            );

            INSERT INTO readings (id, sensor, value) VALUES (1, 'kitchen', 21.5);
            INSERT INTO readings (id, sensor, value) VALUES (2, 'hall', 19);
            INSERT INTO readings (id, sensor, value) VALUES (3, 'attic', 25.25);
            INSERT INTO switches (name, state) VALUES ('porch', 'OFF');
            INSERT INTO switches (name, state) VALUES ('garage', 'ON');
            INSERT INTO levels (id, value) VALUES (1, 0);
        ",
        )?;
        Ok(fixture)
    }

    /// A complete descriptor pointing at the fixture database
    pub fn descriptor(&self, server_id: &str) -> ServerDescriptor {
        ServerDescriptor::new(server_id)
            .with_url(format!("sqlite://{}", self.path.display()))
            .with_credentials("bridge", "bridge")
    }

    pub fn executor(&self) -> QueryExecutor {
        QueryExecutor::new(Arc::clone(&self.registry))
    }

    /// Reads one value through a separate connection, bypassing the registry
    pub fn query_scalar(&self, sql: &str) -> Option<String> {
        let conn = Connection::open(&self.path).ok()?;
        read_first_row(&conn, sql).ok()?.into_value()
    }
}

#[macro_export]
macro_rules! assert_bridge_error {
    ($result:expr, $expected_type:ident, $context:expr) => {
        match $result {
            Err($crate::core::BridgeError::$expected_type(_)) => {}
            Ok(_) => panic!("Expected {} error but got Ok in {}", stringify!($expected_type), $context),
            Err(other) => panic!("Expected {} but got {:?} in {}", stringify!($expected_type), other, $context),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BridgeError;

    #[test]
    fn test_sample_data_fixture() {
        let fixture = RegistryFixture::with_sample_data().unwrap();
        assert_eq!(
            fixture.query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'readings'"),
            Some("1".to_string())
        );
        assert!(fixture.registry.default_server().is_some());
    }

    #[test]
    fn test_error_assertion_macro() {
        let result: Result<i32> = Err(BridgeError::Execution("Test error".to_string()));
        assert_bridge_error!(result, Execution, "macro test");
    }
}
