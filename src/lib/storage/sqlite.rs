use std::{collections::BTreeMap, fs, path::Path, time::Duration};

use parking_lot::Mutex;
use rusqlite::{Connection, params};
use tracing::debug;

use crate::{
    document::{Document, StoredValue},
    error::StoreError,
    query::SortBy,
};

use super::{DocumentFilter, DocumentStore, GroupedRow, StoreResult, ensure_id, find_in, group_in};

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// SQLite-backed store. Documents are kept as tagged JSON, one row per
/// `(bucket, _id)`; filtering and grouping run in process over a bucket scan.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|err| StoreError::Fatal(err.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                bucket TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (bucket, id)
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_bucket(&self, bucket: &str) -> StoreResult<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT body FROM documents WHERE bucket = ?1 ORDER BY rowid")?;
        let bodies = stmt
            .query_map(params![bucket], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        debug!(bucket, documents = bodies.len(), "loaded bucket");
        bodies.iter().map(|body| decode(body)).collect()
    }
}

fn encode(document: &Document) -> StoreResult<String> {
    let stored: BTreeMap<&String, StoredValue> = document
        .iter()
        .map(|(key, value)| (key, StoredValue::from(value)))
        .collect();
    serde_json::to_string(&stored).map_err(|err| StoreError::Fatal(err.to_string()))
}

fn decode(body: &str) -> StoreResult<Document> {
    let stored: BTreeMap<String, StoredValue> =
        serde_json::from_str(body).map_err(|err| StoreError::Fatal(err.to_string()))?;
    Ok(stored
        .into_iter()
        .map(|(key, value)| (key, value.into()))
        .collect())
}

impl DocumentStore for SqliteStore {
    fn find(
        &self,
        bucket: &str,
        filter: &DocumentFilter,
        sort: &SortBy,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Document>> {
        let documents = self.load_bucket(bucket)?;
        Ok(find_in(&documents, filter, sort, limit))
    }

    fn group(
        &self,
        bucket: &str,
        keys: &[String],
        filter: &DocumentFilter,
        collect: &[String],
    ) -> StoreResult<Vec<GroupedRow>> {
        let documents = self.load_bucket(bucket)?;
        Ok(group_in(&documents, keys, filter, collect))
    }

    fn save(&self, bucket: &str, mut document: Document) -> StoreResult<()> {
        let id = ensure_id(&mut document);
        let body = encode(&document)?;
        self.conn.lock().execute(
            "INSERT INTO documents (bucket, id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT (bucket, id) DO UPDATE SET body = excluded.body",
            params![bucket, id, body],
        )?;
        Ok(())
    }
}
