//! `mnemos-memory` – Perception memory for a mobile robot.
//!
//! Stores what the robot has seen (objects and scenes) and who it has met
//! (people), each with a metric position in the SLAM frame and one or more
//! embeddings, on a local SQLite substrate.
//!
//! # Modules
//!
//! - [`collection`] – the [`EmbeddingCollection`][collection::EmbeddingCollection]
//!   contract: named `(id, vector, flat metadata)` containers with
//!   nearest-neighbour query and distance metrics.
//! - [`sqlite`] – [`SqliteCollection`][sqlite::SqliteCollection], the bundled
//!   collection backend, and the [`SqliteClient`][sqlite::SqliteClient] that
//!   owns the database file.
//! - [`metadata`] – fixed-shape metadata per entity kind and its flat
//!   round-trip, including coordinate reconstruction.
//! - [`store`] – [`MultiModalStore`][store::MultiModalStore]: fans entity
//!   writes out across per-modality collections and answers point lookups,
//!   similarity queries, scene-radius scans and objects-in-scene listings.

pub mod collection;
pub mod metadata;
pub mod sqlite;
pub mod store;

pub use collection::{DistanceMetric, EmbeddingCollection};
pub use metadata::{ObjectMetadata, PersonMetadata, SceneMetadata};
pub use store::{Hit, MultiModalStore, StoreError};
