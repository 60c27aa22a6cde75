//! Helpers for integration tests.

use pushkind_courier::db::{DbPool, establish_connection_pool, init_schema};
use tempfile::TempDir;

/// Temporary database used in integration tests.
pub struct TestDb {
    _dir: TempDir,
    pool: DbPool,
}

impl TestDb {
    #[allow(dead_code)]
    pub fn new(filename: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temporary directory.");
        let path = dir.path().join(filename);

        let pool = establish_connection_pool(path.to_str().expect("Non UTF-8 database path."))
            .expect("Failed to establish SQLite connection.");
        init_schema(&pool).expect("Failed to create database schema.");
        TestDb { _dir: dir, pool }
    }

    #[allow(dead_code)]
    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }
}
