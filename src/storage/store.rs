use crate::query::error::QueryError;
use duckdb::Connection;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Shared handle to the event database.
///
/// The root connection only hands out clones; every query runs on its own
/// connection inside a blocking task, so independent queries proceed in
/// parallel.
#[derive(Clone)]
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
}

impl EventStore {
    /// Open the database at `path`, or an in-memory one, and migrate it.
    pub fn open(path: Option<&Path>) -> Result<Self, duckdb::Error> {
        let conn = match path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        crate::storage::migrations::run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// A new connection to the same database.
    pub fn connection(&self) -> Result<Connection, QueryError> {
        Ok(self.conn.lock().try_clone()?)
    }

    /// Run `f` on a fresh connection in the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T, QueryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, QueryError> + Send + 'static,
    {
        let conn = self.connection()?;
        tokio::task::spawn_blocking(move || f(&conn))
            .await
            .map_err(|e| QueryError::Task(format!("Query task failed: {e}")))?
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore").finish_non_exhaustive()
    }
}
