//! SQLite storage backend.
//!
//! One table per store: `id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT`.
//! The body is the item as JSON without its key field.

use async_trait::async_trait;
use harmonized_types::{Data, RecordKey, StorageError};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::backend::StorageBackend;

const MEMORY_PATH: &str = ":memory:";

pub struct SqliteBackend {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), conn: Arc::new(Mutex::new(None)) }
    }

    /// Private in-memory database, gone when the backend is dropped.
    pub fn in_memory() -> Self {
        Self::new(MEMORY_PATH)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` on the blocking pool with the open connection.
    async fn with_connection<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard.as_ref().ok_or_else(|| StorageError::Unavailable {
                message: "SQLite connection is not open".to_string(),
            })?;
            f(conn)
        })
        .await
        .map_err(|e| StorageError::Database { message: e.to_string() })?
    }
}

fn db_err(err: rusqlite::Error) -> StorageError {
    StorageError::Database { message: err.to_string() }
}

fn table_name(store: &str) -> String {
    format!("\"store_{}\"", store.replace('"', "\"\""))
}

fn ensure_table(conn: &Connection, table: &str) -> Result<(), StorageError> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                body TEXT NOT NULL
            )"
        ),
        [],
    )
    .map_err(db_err)?;
    Ok(())
}

fn sql_key(key: &RecordKey) -> Result<i64, StorageError> {
    key.as_i64().ok_or_else(|| StorageError::InvalidKey { key: key.to_string() })
}

fn decode_body(body: &str, key_field: &str, id: i64) -> Result<Data, StorageError> {
    let mut item: Data = serde_json::from_str(body)?;
    item.insert(key_field.to_string(), id.into());
    Ok(item)
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn open(&self) -> Result<(), StorageError> {
        let path = self.path.clone();
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let opened = if path.as_os_str() == MEMORY_PATH {
                Connection::open_in_memory().map_err(db_err)?
            } else {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let opened = Connection::open(&path).map_err(db_err)?;
                opened.execute_batch("PRAGMA journal_mode=WAL;").map_err(db_err)?;
                opened
            };
            *conn.lock() = Some(opened);
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Database { message: e.to_string() })?
    }

    async fn get(
        &self,
        store: &str,
        key_field: &str,
        key: &RecordKey,
    ) -> Result<Option<Data>, StorageError> {
        let table = table_name(store);
        let key_field = key_field.to_string();
        let id = sql_key(key)?;
        self.with_connection(move |conn| {
            ensure_table(conn, &table)?;
            let body: Option<String> = conn
                .query_row(&format!("SELECT body FROM {table} WHERE id = ?1"), params![id], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(db_err)?;
            body.map(|body| decode_body(&body, &key_field, id)).transpose()
        })
        .await
    }

    async fn put(
        &self,
        store: &str,
        key_field: &str,
        mut item: Data,
    ) -> Result<RecordKey, StorageError> {
        let table = table_name(store);
        let key = item.remove(key_field).as_ref().and_then(RecordKey::from_value);
        let id = key.as_ref().map(sql_key).transpose()?;
        let body = serde_json::to_string(&item)?;
        self.with_connection(move |conn| {
            ensure_table(conn, &table)?;
            let id = match id {
                Some(id) => {
                    conn.execute(
                        &format!("INSERT OR REPLACE INTO {table} (id, body) VALUES (?1, ?2)"),
                        params![id, body],
                    )
                    .map_err(db_err)?;
                    id
                },
                None => {
                    conn.execute(&format!("INSERT INTO {table} (body) VALUES (?1)"), params![body])
                        .map_err(db_err)?;
                    conn.last_insert_rowid()
                },
            };
            Ok(RecordKey::Int(id))
        })
        .await
    }

    async fn remove(&self, store: &str, key: &RecordKey) -> Result<(), StorageError> {
        let table = table_name(store);
        let id = sql_key(key)?;
        self.with_connection(move |conn| {
            ensure_table(conn, &table)?;
            conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])
                .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get_all(&self, store: &str, key_field: &str) -> Result<Vec<Data>, StorageError> {
        let table = table_name(store);
        let key_field = key_field.to_string();
        self.with_connection(move |conn| {
            ensure_table(conn, &table)?;
            let mut stmt =
                conn.prepare(&format!("SELECT id, body FROM {table} ORDER BY id")).map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
                .map_err(db_err)?;

            let mut items = Vec::new();
            for row in rows {
                let (id, body) = row.map_err(db_err)?;
                items.push(decode_body(&body, &key_field, id)?);
            }
            Ok(items)
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: serde_json::Value) -> Data {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_put_assigns_increasing_keys() {
        let backend = SqliteBackend::in_memory();
        backend.open().await.unwrap();

        let first = backend.put("users", "_id", item(json!({"name": "A"}))).await.unwrap();
        let second = backend.put("users", "_id", item(json!({"name": "B"}))).await.unwrap();
        assert_eq!(first, RecordKey::Int(1));
        assert_eq!(second, RecordKey::Int(2));

        let loaded = backend.get("users", "_id", &second).await.unwrap().unwrap();
        assert_eq!(serde_json::Value::Object(loaded), json!({"name": "B", "_id": 2}));
    }

    #[tokio::test]
    async fn test_put_with_key_updates_in_place() {
        let backend = SqliteBackend::in_memory();
        backend.open().await.unwrap();

        let key = backend.put("users", "_id", item(json!({"name": "A"}))).await.unwrap();
        backend.put("users", "_id", item(json!({"_id": 1, "name": "A2", "id": 77}))).await.unwrap();

        let all = backend.get_all("users", "_id").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["name"], json!("A2"));
        assert_eq!(all[0]["id"], json!(77));

        backend.remove("users", &key).await.unwrap();
        assert!(backend.get_all("users", "_id").await.unwrap().is_empty());
        // Removing again is fine
        backend.remove("users", &key).await.unwrap();
    }

    #[tokio::test]
    async fn test_stores_are_separate_tables() {
        let backend = SqliteBackend::in_memory();
        backend.open().await.unwrap();
        backend.put("a", "_id", item(json!({"x": 1}))).await.unwrap();
        assert!(backend.get_all("b", "_id").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("harmonized.db");

        let backend = SqliteBackend::new(&path);
        backend.open().await.unwrap();
        backend.put("users", "_id", item(json!({"name": "A"}))).await.unwrap();
        drop(backend);

        let reopened = SqliteBackend::new(&path);
        reopened.open().await.unwrap();
        let all = reopened.get_all("users", "_id").await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_not_open_is_unavailable() {
        let backend = SqliteBackend::in_memory();
        let err = backend.get_all("users", "_id").await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_string_key_rejected() {
        let backend = SqliteBackend::in_memory();
        backend.open().await.unwrap();
        let err = backend.remove("users", &RecordKey::from("abc")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }
}
