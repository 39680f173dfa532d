//! The embedding-collection contract.
//!
//! An [`EmbeddingCollection`] is a named, similarity-searchable container
//! keyed by string id that stores one vector plus one flat [`Metadata`] map
//! per entry.  The multi-modal store only ever talks to collections through
//! this trait; [`SqliteCollection`][crate::sqlite::SqliteCollection] is the
//! bundled implementation.
//!
//! # Contract
//!
//! * `upsert` – create-or-replace every `(id, embedding, metadata)` triple of
//!   the batch.  The first upsert fixes the collection's dimension.
//! * `get` – read the metadata of the requested ids; missing ids are skipped.
//! * `scan` – read every entry (optionally filtered), in insertion order.
//! * `query` – the `k` entries nearest to a query vector under the
//!   collection's [`DistanceMetric`], ascending by distance.
//! * `delete` – remove ids; missing ids are a successful no-op.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by a collection backend.
#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    UnknownMetric(#[from] UnknownMetric),
    #[error("collection {collection} holds {expected}-dimensional embeddings, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },
    #[error("collection {collection}: embeddings must be non-empty")]
    EmptyEmbedding { collection: String },
    #[error("collection {collection}: embeddings must not contain NaN or infinite values")]
    NonFiniteEmbedding { collection: String },
    #[error(
        "collection {collection}: batch lengths differ (ids={ids}, embeddings={embeddings}, metadatas={metadatas})"
    )]
    BatchLength {
        collection: String,
        ids: usize,
        embeddings: usize,
        metadatas: usize,
    },
    #[error("collection {0}: connection lock poisoned")]
    Poisoned(String),
}

/// A distance metric name that is not one of `cosine`, `l2`, `ip`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown distance metric: {0:?}")]
pub struct UnknownMetric(pub String);

// ─────────────────────────────────────────────────────────────────────────────
// Flat metadata
// ─────────────────────────────────────────────────────────────────────────────

/// One scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(f) => Some(*f),
            MetadataValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Str(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Str(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        MetadataValue::Float(f)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Flat key/value metadata attached to one collection entry.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Equality predicate on a single metadata key.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    pub key: String,
    pub value: MetadataValue,
}

impl MetadataFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata.get(&self.key) == Some(&self.value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Distance metrics
// ─────────────────────────────────────────────────────────────────────────────

/// Distance metric of a collection, fixed when the collection is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 − cos(a, b)`; `0` for identical directions.
    #[default]
    Cosine,
    /// Squared Euclidean distance.
    L2,
    /// `1 − a·b`.
    Ip,
}

impl DistanceMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
            DistanceMetric::Ip => "ip",
        }
    }

    /// Distance between two equal-length vectors (smaller is nearer).
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            DistanceMetric::Ip => 1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" => Ok(DistanceMetric::L2),
            "ip" => Ok(DistanceMetric::Ip),
            other => Err(UnknownMetric(other.to_string())),
        }
    }
}

/// Compute the cosine similarity between two equal-length vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entries and the trait
// ─────────────────────────────────────────────────────────────────────────────

/// An entry read back by id or by scan.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionEntry {
    pub id: String,
    pub metadata: Metadata,
}

/// One ranked similarity-query result.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMatch {
    pub id: String,
    pub metadata: Metadata,
    pub distance: f32,
}

/// A named similarity-searchable container of `(id, vector, metadata)`.
///
/// Implementations serialise their own internal mutations; callers add no
/// locking on top.
pub trait EmbeddingCollection: Send + Sync {
    /// Stable collection name.
    fn name(&self) -> &str;

    /// Metric fixed at creation time.
    fn metric(&self) -> DistanceMetric;

    /// Create-or-replace every entry in the batch.
    fn upsert(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<(), CollectionError>;

    /// Read the metadata of `ids`, skipping ids that are not present.
    fn get(&self, ids: &[String]) -> Result<Vec<CollectionEntry>, CollectionError>;

    /// Read every entry matching `filter` (all entries when `None`).
    fn scan(
        &self,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<CollectionEntry>, CollectionError>;

    /// Return up to `k` entries nearest to `embedding`, nearest first.
    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<CollectionMatch>, CollectionError>;

    /// Remove `ids`; ids that are not present are ignored.
    fn delete(&self, ids: &[String]) -> Result<(), CollectionError>;

    /// Number of stored entries.
    fn count(&self) -> Result<usize, CollectionError>;
}
