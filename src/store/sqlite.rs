//! SQLite-backed metadata index
//!
//! One table, one row per known path:
//!
//! ```text
//! s3fs_file(uri TEXT PRIMARY KEY, filesize INTEGER, timestamp INTEGER,
//!           dir INTEGER, version TEXT)
//! ```
//!
//! The connection sits behind a `parking_lot::Mutex`; every query runs
//! on tokio's blocking pool so WAL writes and fsyncs never stall a
//! runtime worker. SQLite serializes writers, which gives last-write-wins
//! for concurrent upserts of the same uri.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::{Result, S3fsError};
use crate::keymap::ObjectPath;
use crate::store::{descendant_prefix, normalize_record, FileRecord, MetadataStore};

const SELECT_COLUMNS: &str = "SELECT uri, filesize, timestamp, dir, version FROM s3fs_file";

pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    /// Open (or create) the index at `path`.
    ///
    /// `":memory:"` gives a private in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_db()?;
        info!("Opened metadata index at {}", path);
        Ok(store)
    }

    /// Apply pragmas and create the table. Idempotent.
    fn init_db(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS s3fs_file (
                uri       TEXT PRIMARY KEY NOT NULL,
                filesize  INTEGER NOT NULL DEFAULT 0,
                timestamp INTEGER NOT NULL DEFAULT 0,
                dir       INTEGER NOT NULL DEFAULT 0,
                version   TEXT NOT NULL DEFAULT ''
            );
            ",
        )?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking thread pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| S3fsError::Cache(format!("index task failed: {}", e)))?;
        Ok(result?)
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let size: i64 = row.get(1)?;
    let timestamp: i64 = row.get(2)?;
    let dir: i64 = row.get(3)?;
    Ok(FileRecord {
        uri: row.get(0)?,
        size: size.max(0) as u64,
        timestamp: timestamp.max(0) as u64,
        is_dir: dir != 0,
        version: row.get(4)?,
    })
}

fn insert_record(conn: &Connection, record: &FileRecord) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR REPLACE INTO s3fs_file (uri, filesize, timestamp, dir, version)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.uri,
            record.size as i64,
            record.timestamp as i64,
            record.is_dir as i64,
            record.version,
        ],
    )
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get(&self, uri: &str) -> Result<Option<FileRecord>> {
        let uri = ObjectPath::parse(uri)?.uri();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("{} WHERE uri = ?1", SELECT_COLUMNS),
                params![uri],
                map_row,
            )
            .optional()
        })
        .await
    }

    async fn upsert(&self, record: FileRecord) -> Result<()> {
        let record = normalize_record(record)?;
        self.with_conn(move |conn| insert_record(conn, &record).map(|_| ()))
            .await
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let uri = ObjectPath::parse(uri)?.uri();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM s3fs_file WHERE uri = ?1", params![uri])
                .map(|_| ())
        })
        .await
    }

    async fn delete_many(&self, uris: &[String]) -> Result<()> {
        let uris = uris
            .iter()
            .map(|u| ObjectPath::parse(u).map(|p| p.uri()))
            .collect::<Result<Vec<_>>>()?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM s3fs_file WHERE uri = ?1")?;
                for uri in &uris {
                    stmt.execute(params![uri])?;
                }
            }
            tx.commit()
        })
        .await
    }

    async fn list_children(&self, uri: &str) -> Result<Vec<FileRecord>> {
        let prefix = descendant_prefix(&ObjectPath::parse(uri)?);
        let prefix_len = prefix.chars().count() as i64;

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE substr(uri, 1, ?2) = ?1
                     AND length(uri) > ?2
                     AND instr(substr(uri, ?2 + 1), '/') = 0
                 ORDER BY uri",
                SELECT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![prefix, prefix_len], map_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    async fn count_descendants(&self, uri: &str) -> Result<u64> {
        let prefix = descendant_prefix(&ObjectPath::parse(uri)?);
        let prefix_len = prefix.chars().count() as i64;

        let count: i64 = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM s3fs_file
                     WHERE substr(uri, 1, ?2) = ?1 AND length(uri) > ?2",
                    params![prefix, prefix_len],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn replace_all(&self, records: Vec<FileRecord>) -> Result<()> {
        let records = records
            .into_iter()
            .map(normalize_record)
            .collect::<Result<Vec<_>>>()?;
        let count = records.len();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM s3fs_file", [])?;
            for record in &records {
                insert_record(&tx, record)?;
            }
            tx.commit()
        })
        .await?;
        debug!("Replaced metadata index with {} record(s)", count);
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        let count: i64 = self
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM s3fs_file", [], |row| row.get(0)))
            .await?;
        Ok(count.max(0) as u64)
    }
}
