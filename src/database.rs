//! Shared SQLite handle for the record log and the transcript.
//!
//! Diesel connections are synchronous and not `Sync`, so a single connection
//! is kept behind a mutex. Critical sections are one statement or one
//! transaction long.

use diesel::connection::SimpleConnection;
use diesel::sqlite::SqliteConnection;
use parking_lot::Mutex;
use tracing::info;

use crate::config::establish_connection;
use crate::error::ConfigError;

const SCHEMA: &str = r#"
PRAGMA busy_timeout = 5000;
CREATE TABLE IF NOT EXISTS memory_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    owner_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    record_id BIGINT NOT NULL,
    text TEXT NOT NULL,
    vector BLOB NOT NULL,
    metadata TEXT NOT NULL,
    embedding_model TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL,
    UNIQUE (owner_id, project_id, record_id)
);
CREATE TABLE IF NOT EXISTS chat_turns (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    project_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    model TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS chat_turns_by_project ON chat_turns (project_id, id);
"#;

pub struct Database {
    connection: Mutex<SqliteConnection>,
}

impl Database {
    /// Connect to `db_url` and create the tables if they are missing.
    ///
    /// `":memory:"` gives a private in-process database, which is what the tests use.
    pub fn open(db_url: &str) -> Result<Self, ConfigError> {
        let mut connection = establish_connection(db_url)?;
        connection.batch_execute(SCHEMA)?;
        info!("Opened database {}", db_url);

        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&mut SqliteConnection) -> T) -> T {
        let mut connection = self.connection.lock();
        f(&mut connection)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
