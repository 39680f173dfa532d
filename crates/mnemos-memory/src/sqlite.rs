//! SQLite-backed embedding collections.
//!
//! A [`SqliteClient`] owns one database connection (one file per store
//! directory) and hands out [`SqliteCollection`] handles that share it.
//!
//! # Storage layout
//!
//! | table         | column     | type    | description                               |
//! |---------------|------------|---------|-------------------------------------------|
//! | `collections` | name       | TEXT    | Stable collection name (primary key)      |
//! |               | metric     | TEXT    | `cosine`, `l2` or `ip`                    |
//! |               | dimension  | INTEGER | Fixed by the first upsert (NULL before)   |
//! | `entries`     | collection | TEXT    | Owning collection                         |
//! |               | id         | TEXT    | Entry id, unique per collection           |
//! |               | embedding  | BLOB    | Little-endian f32 vector (4 × N bytes)    |
//! |               | metadata   | TEXT    | Flat metadata map as a JSON object        |
//!
//! Re-upserting an id updates the row in place, so scans keep returning
//! entries in first-insertion order.
//!
//! # Example
//!
//! ```rust
//! use mnemos_memory::collection::{DistanceMetric, EmbeddingCollection, Metadata};
//! use mnemos_memory::sqlite::SqliteClient;
//!
//! let client = SqliteClient::open_in_memory().unwrap();
//! let col = client.get_or_create_collection("scenes", DistanceMetric::Cosine).unwrap();
//!
//! col.upsert(&["kitchen_01::scene".to_string()], &[vec![1.0, 0.0]], &[Metadata::new()])
//!     .unwrap();
//!
//! let hits = col.query(&[1.0, 0.0], 1, None).unwrap();
//! assert_eq!(hits[0].id, "kitchen_01::scene");
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::collection::{
    CollectionEntry, CollectionError, CollectionMatch, DistanceMetric, EmbeddingCollection,
    Metadata, MetadataFilter,
};

/// File name of the database inside a store directory.
pub const DATABASE_FILE: &str = "mnemos.sqlite3";

// ─────────────────────────────────────────────────────────────────────────────
// Embedding serialisation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn decode_metadata(json: &str) -> Result<Metadata, CollectionError> {
    Ok(serde_json::from_str(json)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteClient
// ─────────────────────────────────────────────────────────────────────────────

/// Shared connection from which collections are created or reopened.
#[derive(Clone)]
pub struct SqliteClient {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteClient {
    /// Open (or create) a persistent database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CollectionError> {
        Self::init(Connection::open(path)?)
    }

    /// Open (or create) [`DATABASE_FILE`] inside `dir`, creating the
    /// directory first if needed.
    pub fn open_dir(dir: impl AsRef<Path>) -> Result<Self, CollectionError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Self::open(dir.join(DATABASE_FILE))
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, CollectionError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CollectionError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS collections (
                name      TEXT NOT NULL PRIMARY KEY,
                metric    TEXT NOT NULL,
                dimension INTEGER
            );
            CREATE TABLE IF NOT EXISTS entries (
                collection TEXT NOT NULL,
                id         TEXT NOT NULL,
                embedding  BLOB NOT NULL,
                metadata   TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Return the collection called `name`, creating it with `metric` if it
    /// does not exist yet.
    ///
    /// The metric of an existing collection is never changed; a differing
    /// request is logged and the stored metric wins.
    pub fn get_or_create_collection(
        &self,
        name: &str,
        metric: DistanceMetric,
    ) -> Result<SqliteCollection, CollectionError> {
        let conn = lock(&self.conn, name)?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT metric FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        let metric = match stored {
            Some(stored) => {
                let stored: DistanceMetric = stored.parse()?;
                if stored != metric {
                    warn!(
                        collection = name,
                        stored = %stored,
                        requested = %metric,
                        "collection already exists with a different metric; keeping stored metric"
                    );
                }
                stored
            }
            None => {
                conn.execute(
                    "INSERT INTO collections (name, metric) VALUES (?1, ?2)",
                    params![name, metric.as_str()],
                )?;
                debug!(collection = name, metric = %metric, "created collection");
                metric
            }
        };

        Ok(SqliteCollection {
            name: name.to_string(),
            metric,
            conn: Arc::clone(&self.conn),
        })
    }
}

fn lock<'a>(
    conn: &'a Mutex<Connection>,
    collection: &str,
) -> Result<MutexGuard<'a, Connection>, CollectionError> {
    conn.lock()
        .map_err(|_| CollectionError::Poisoned(collection.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteCollection
// ─────────────────────────────────────────────────────────────────────────────

/// One named collection inside a [`SqliteClient`] database.
///
/// Similarity queries score every entry of the collection exactly.
#[derive(Clone)]
pub struct SqliteCollection {
    name: String,
    metric: DistanceMetric,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCollection {
    fn dimension(&self, conn: &Connection) -> Result<Option<usize>, CollectionError> {
        let dim: Option<i64> = conn.query_row(
            "SELECT dimension FROM collections WHERE name = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(dim.map(|d| d as usize))
    }

    fn check_dimension(&self, expected: usize, actual: usize) -> Result<(), CollectionError> {
        if expected == actual {
            Ok(())
        } else {
            Err(CollectionError::DimensionMismatch {
                collection: self.name.clone(),
                expected,
                actual,
            })
        }
    }

    /// Vectors must be non-empty and every component finite.
    fn check_vector(&self, embedding: &[f32]) -> Result<(), CollectionError> {
        if embedding.is_empty() {
            return Err(CollectionError::EmptyEmbedding {
                collection: self.name.clone(),
            });
        }
        if !embedding.iter().all(|v| v.is_finite()) {
            return Err(CollectionError::NonFiniteEmbedding {
                collection: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Every `(id, metadata)` pair in insertion order, without touching the
    /// embedding column.
    fn read_metadata(&self, conn: &Connection) -> Result<Vec<(String, Metadata)>, CollectionError> {
        let mut stmt = conn.prepare(
            "SELECT id, metadata
             FROM entries
             WHERE collection = ?1
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![self.name], |row| {
            let id: String = row.get(0)?;
            let meta: String = row.get(1)?;
            Ok((id, meta))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, meta) = row?;
            entries.push((id, decode_metadata(&meta)?));
        }
        Ok(entries)
    }

    fn read_all(
        &self,
        conn: &Connection,
    ) -> Result<Vec<(String, Vec<f32>, Metadata)>, CollectionError> {
        let mut stmt = conn.prepare(
            "SELECT id, embedding, metadata
             FROM entries
             WHERE collection = ?1
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![self.name], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let meta: String = row.get(2)?;
            Ok((id, blob, meta))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, blob, meta) = row?;
            entries.push((id, bytes_to_embedding(&blob), decode_metadata(&meta)?));
        }
        Ok(entries)
    }
}

impl EmbeddingCollection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn upsert(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<(), CollectionError> {
        if ids.len() != embeddings.len() || ids.len() != metadatas.len() {
            return Err(CollectionError::BatchLength {
                collection: self.name.clone(),
                ids: ids.len(),
                embeddings: embeddings.len(),
                metadatas: metadatas.len(),
            });
        }
        let Some(first) = embeddings.first() else {
            return Ok(());
        };
        let dim = first.len();
        for e in embeddings {
            self.check_vector(e)?;
            self.check_dimension(dim, e.len())?;
        }

        let mut conn = lock(&self.conn, &self.name)?;
        let tx = conn.transaction()?;
        match self.dimension(&tx)? {
            Some(stored) => self.check_dimension(stored, dim)?,
            None => {
                tx.execute(
                    "UPDATE collections SET dimension = ?1 WHERE name = ?2",
                    params![dim as i64, self.name],
                )?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO entries (collection, id, embedding, metadata)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (collection, id) DO UPDATE SET
                     embedding = excluded.embedding,
                     metadata  = excluded.metadata",
            )?;
            for ((id, embedding), metadata) in ids.iter().zip(embeddings).zip(metadatas) {
                let json = serde_json::to_string(metadata)?;
                stmt.execute(params![self.name, id, embedding_to_bytes(embedding), json])?;
            }
        }
        tx.commit()?;
        debug!(collection = %self.name, count = ids.len(), "upserted entries");
        Ok(())
    }

    fn get(&self, ids: &[String]) -> Result<Vec<CollectionEntry>, CollectionError> {
        let conn = lock(&self.conn, &self.name)?;
        let mut stmt =
            conn.prepare("SELECT metadata FROM entries WHERE collection = ?1 AND id = ?2")?;
        let mut found = Vec::new();
        for id in ids {
            let meta: Option<String> = stmt
                .query_row(params![self.name, id], |row| row.get(0))
                .optional()?;
            if let Some(meta) = meta {
                found.push(CollectionEntry {
                    id: id.clone(),
                    metadata: decode_metadata(&meta)?,
                });
            }
        }
        Ok(found)
    }

    fn scan(
        &self,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<CollectionEntry>, CollectionError> {
        let conn = lock(&self.conn, &self.name)?;
        let entries = self
            .read_metadata(&conn)?
            .into_iter()
            .filter(|(_, meta)| filter.is_none_or(|f| f.matches(meta)))
            .map(|(id, metadata)| CollectionEntry { id, metadata })
            .collect();
        Ok(entries)
    }

    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<CollectionMatch>, CollectionError> {
        self.check_vector(embedding)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = lock(&self.conn, &self.name)?;
        if let Some(stored) = self.dimension(&conn)? {
            self.check_dimension(stored, embedding.len())?;
        }
        let mut matches: Vec<CollectionMatch> = self
            .read_all(&conn)?
            .into_iter()
            .filter(|(_, _, meta)| filter.is_none_or(|f| f.matches(meta)))
            .map(|(id, vector, metadata)| CollectionMatch {
                distance: self.metric.distance(&vector, embedding),
                id,
                metadata,
            })
            .collect();
        drop(conn);

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(k);
        debug!(collection = %self.name, k, returned = matches.len(), "similarity query");
        Ok(matches)
    }

    fn delete(&self, ids: &[String]) -> Result<(), CollectionError> {
        let mut conn = lock(&self.conn, &self.name)?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM entries WHERE collection = ?1 AND id = ?2")?;
            for id in ids {
                removed += stmt.execute(params![self.name, id])?;
            }
        }
        tx.commit()?;
        debug!(collection = %self.name, requested = ids.len(), removed, "deleted entries");
        Ok(())
    }

    fn count(&self) -> Result<usize, CollectionError> {
        let conn = lock(&self.conn, &self.name)?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE collection = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
