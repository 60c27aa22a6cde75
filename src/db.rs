//! SQLite connection pool and schema bootstrap.

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;

use crate::errors::Error;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS emails (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender TEXT NOT NULL,
    recipient TEXT NOT NULL,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    is_sent BOOL NOT NULL DEFAULT 0,
    opened BOOL NOT NULL DEFAULT 0,
    created_at TIMESTAMP NOT NULL,
    sent_at TIMESTAMP,
    opened_at TIMESTAMP
);
CREATE INDEX IF NOT EXISTS emails_recipient_idx ON emails (recipient);";

/// Per-connection pragmas so concurrent workers wait on the write lock
/// instead of failing with `SQLITE_BUSY`.
#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Builds an r2d2 pool for the SQLite database at `database_url`.
pub fn establish_connection_pool(database_url: &str) -> Result<DbPool, Error> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    Ok(Pool::builder()
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)?)
}

/// Creates the tables used by the worker if they do not exist yet.
pub fn init_schema(pool: &DbPool) -> Result<(), Error> {
    let mut conn = pool.get()?;
    conn.batch_execute(SCHEMA)
        .map_err(|e| Error::Config(format!("Cannot initialise database schema: {e}")))
}
