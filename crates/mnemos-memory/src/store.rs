//! Multi-modal entity store.
//!
//! [`MultiModalStore`] keeps one [`EmbeddingCollection`] per [`Modality`]
//! and maps whole entities onto them:
//!
//! * **Writes fan out.**  An entity is stored once per modality it supplies,
//!   under the composite key `<entity_id>::<modality>`.  Re-upserting
//!   overwrites each modality entry in place.
//! * **Reads reconstruct.**  Flat metadata is turned back into
//!   [`ObjectMetadata`], [`SceneMetadata`] or [`PersonMetadata`] with the
//!   coordinate triple rebuilt.
//! * **Two query paths.**  Embedding similarity goes to the collection's
//!   own (approximate) nearest-neighbour search; spatial proximity of scenes
//!   is an exact linear scan with Euclidean distance.
//!
//! # Consistency
//!
//! There is no cross-collection atomicity.  If one modality write fails
//! after another has committed, the error is returned as
//! [`StoreError::PartialWrite`] and the committed entries stay in place;
//! retrying the full upsert overwrites every modality, and
//! [`MultiModalStore::delete`] removes whatever was written.  Concurrent
//! writers to the same composite key race on last-write-wins.
//!
//! # Example
//!
//! ```rust
//! use mnemos_memory::collection::DistanceMetric;
//! use mnemos_memory::metadata::SceneMetadata;
//! use mnemos_memory::store::MultiModalStore;
//! use mnemos_types::SceneRecord;
//!
//! let store = MultiModalStore::open_in_memory(DistanceMetric::Cosine).unwrap();
//! store
//!     .upsert(&SceneRecord {
//!         scene_id: "kitchen_01".to_string(),
//!         scene_xyz: vec![2.0, 2.5, 0.0],
//!         scene_image_ref: "images/kitchen_01.png".to_string(),
//!         scene_embedding: vec![0.1, 0.9],
//!     })
//!     .unwrap();
//!
//! let near = store.find_scenes_by_radius(&[2.0, 2.0, 0.0], 1.0, 5).unwrap();
//! assert_eq!(near[0].metadata.scene_id, "kitchen_01");
//!
//! let scene: SceneMetadata = store.get("kitchen_01").unwrap().unwrap();
//! assert_eq!(scene.scene_xyz.y, 2.5);
//! ```

use std::collections::HashSet;
use std::path::Path;

use mnemos_types::{CompositeKey, EntityKind, Modality, ValidationError, Xyz, validate_embedding};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::collection::{
    CollectionError, DistanceMetric, EmbeddingCollection, Metadata, MetadataFilter,
};
use crate::metadata::{
    EMBEDDING_TYPE, EntityMetadata, EntityRecord, MetadataError, ObjectMetadata, SCENE_REF,
    SceneMetadata,
};
use crate::sqlite::{SqliteClient, SqliteCollection};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors returned by [`MultiModalStore`].
///
/// A missing entity is never an error: point lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Some modalities of the entity were written, then one failed.
    #[error(
        "partial write of {entity_id}: committed {committed:?}, failed on {failed}: {source}"
    )]
    PartialWrite {
        entity_id: String,
        committed: Vec<Modality>,
        failed: Modality,
        #[source]
        source: CollectionError,
    },

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error("unreadable metadata for {id} in {collection}: {source}")]
    Metadata {
        collection: String,
        id: String,
        #[source]
        source: MetadataError,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// CollectionSet
// ─────────────────────────────────────────────────────────────────────────────

/// One collection handle per modality.
pub struct CollectionSet<C> {
    pub image: C,
    pub location: C,
    pub scene: C,
    pub face: C,
    pub pose: C,
}

impl<C> CollectionSet<C> {
    /// Build every handle with `open`, called once per modality in
    /// [`Modality::ALL`] order.
    pub fn try_build<E>(mut open: impl FnMut(Modality) -> Result<C, E>) -> Result<Self, E> {
        Ok(Self {
            image: open(Modality::Image)?,
            location: open(Modality::Location)?,
            scene: open(Modality::Scene)?,
            face: open(Modality::Face)?,
            pose: open(Modality::Pose)?,
        })
    }

    pub fn get(&self, modality: Modality) -> &C {
        match modality {
            Modality::Image => &self.image,
            Modality::Location => &self.location,
            Modality::Scene => &self.scene,
            Modality::Face => &self.face,
            Modality::Pose => &self.pose,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hit
// ─────────────────────────────────────────────────────────────────────────────

/// One ranked query result.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit<M> {
    pub metadata: M,
    /// Embedding distance for similarity queries, Euclidean distance in
    /// metres for radius queries.
    pub distance: f64,
}

impl<M: EntityMetadata> Hit<M> {
    pub fn entity_id(&self) -> &str {
        self.metadata.entity_id()
    }

    pub fn xyz(&self) -> Xyz {
        self.metadata.xyz()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MultiModalStore
// ─────────────────────────────────────────────────────────────────────────────

/// Stores objects, scenes, and people across per-modality collections.
pub struct MultiModalStore<C = SqliteCollection> {
    collections: CollectionSet<C>,
}

impl MultiModalStore<SqliteCollection> {
    /// Open (or create) a persistent store inside `dir`.
    ///
    /// `metric` applies to collections created now; existing collections
    /// keep the metric they were created with.
    pub fn open(dir: impl AsRef<Path>, metric: DistanceMetric) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let client = SqliteClient::open_dir(dir)?;
        info!(path = %dir.display(), metric = %metric, "opened multi-modal store");
        Self::with_client(&client, metric)
    }

    /// Open a temporary in-memory store (useful for testing).
    pub fn open_in_memory(metric: DistanceMetric) -> Result<Self, StoreError> {
        Self::with_client(&SqliteClient::open_in_memory()?, metric)
    }

    fn with_client(client: &SqliteClient, metric: DistanceMetric) -> Result<Self, StoreError> {
        let collections = CollectionSet::try_build(|modality| {
            client.get_or_create_collection(modality.collection_name(), metric)
        })?;
        Ok(Self::from_collections(collections))
    }
}

impl<C: EmbeddingCollection> MultiModalStore<C> {
    /// Wrap an existing set of collection handles.
    pub fn from_collections(collections: CollectionSet<C>) -> Self {
        Self { collections }
    }

    /// The collection holding `modality`.
    pub fn collection(&self, modality: Modality) -> &C {
        self.collections.get(modality)
    }

    /// Number of entries stored for `modality`.
    pub fn count(&self, modality: Modality) -> Result<usize, StoreError> {
        Ok(self.collection(modality).count()?)
    }

    /// Create or replace every modality entry `record` supplies.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Validation`] – nothing was written.
    /// * [`StoreError::Collection`] – the first modality write failed;
    ///   nothing was written.
    /// * [`StoreError::PartialWrite`] – a later modality write failed after
    ///   earlier ones committed.
    pub fn upsert<R: EntityRecord>(&self, record: &R) -> Result<(), StoreError> {
        let xyz = record.validate()?;
        let entity_id = record.entity_id();
        let mut committed = Vec::new();

        for (modality, embedding) in record.embeddings() {
            let key = CompositeKey::new(entity_id, modality).to_string();
            let flat = record.metadata(xyz, modality).to_flat();
            let written = self
                .collection(modality)
                .upsert(&[key], &[embedding.to_vec()], &[flat]);

            if let Err(source) = written {
                if committed.is_empty() {
                    return Err(source.into());
                }
                warn!(
                    entity_id,
                    committed = ?committed,
                    failed = %modality,
                    error = %source,
                    "multi-modality upsert failed part-way; committed entries left in place"
                );
                return Err(StoreError::PartialWrite {
                    entity_id: entity_id.to_string(),
                    committed,
                    failed: modality,
                    source,
                });
            }
            committed.push(modality);
        }

        let kind = <R::Metadata as EntityMetadata>::KIND;
        debug!(entity_id, kind = %kind, modalities = ?committed, "upserted entity");
        Ok(())
    }

    /// Look up one entity by id.
    ///
    /// The kind's modalities are tried in priority order (objects: image
    /// then location; people: face then pose) and the first entry found is
    /// returned.  Absence is `Ok(None)`.
    pub fn get<M: EntityMetadata>(&self, entity_id: &str) -> Result<Option<M>, StoreError> {
        for &modality in M::KIND.modalities() {
            let collection = self.collection(modality);
            let key = CompositeKey::new(entity_id, modality).to_string();
            if let Some(entry) = collection.get(std::slice::from_ref(&key))?.into_iter().next() {
                return decode(collection.name(), &entry.id, &entry.metadata).map(Some);
            }
        }
        Ok(None)
    }

    /// Similarity search over one modality, nearest first.
    ///
    /// Results are restricted to entries whose `embedding_type` equals
    /// `modality`.  Ranking is whatever the collection's nearest-neighbour
    /// search returns; no re-ranking or deduplication is applied.
    pub fn query_by_embedding<M: EntityMetadata>(
        &self,
        embedding: &[f32],
        modality: Modality,
        k: usize,
    ) -> Result<Vec<Hit<M>>, StoreError> {
        if modality.kind() != M::KIND {
            return Err(StoreError::InvalidArgument(format!(
                "modality {modality} does not belong to {} entities; expected one of: {}",
                M::KIND,
                modality_list(M::KIND)
            )));
        }
        validate_embedding(modality, embedding)?;
        let collection = self.collection(modality);
        let filter = MetadataFilter::eq(EMBEDDING_TYPE, modality.as_str());
        collection
            .query(embedding, k, Some(&filter))?
            .into_iter()
            .map(|m| {
                Ok(Hit {
                    metadata: decode(collection.name(), &m.id, &m.metadata)?,
                    distance: f64::from(m.distance),
                })
            })
            .collect()
    }

    /// Exact proximity search over every stored scene.
    ///
    /// Returns the scenes whose Euclidean distance to `query_xyz` is at most
    /// `radius`, nearest first, truncated to `k`.  Cost is one full scan of
    /// the scene collection; all distances come from that single snapshot.
    pub fn find_scenes_by_radius(
        &self,
        query_xyz: &[f64],
        radius: f64,
        k: usize,
    ) -> Result<Vec<Hit<SceneMetadata>>, StoreError> {
        let origin = Xyz::from_slice("query_xyz", query_xyz)?;
        if !radius.is_finite() || radius < 0.0 {
            return Err(ValidationError::InvalidRadius(radius).into());
        }
        let hits = self.radius_scan(Modality::Scene, origin, radius, k)?;
        debug!(origin = %origin, radius, k, returned = hits.len(), "scene radius scan");
        Ok(hits)
    }

    fn radius_scan<M: EntityMetadata>(
        &self,
        modality: Modality,
        origin: Xyz,
        radius: f64,
        k: usize,
    ) -> Result<Vec<Hit<M>>, StoreError> {
        let collection = self.collection(modality);
        let mut hits = Vec::new();
        for entry in collection.scan(None)? {
            let metadata: M = decode(collection.name(), &entry.id, &entry.metadata)?;
            let distance = metadata.xyz().distance_to(&origin);
            if distance <= radius {
                hits.push(Hit { metadata, distance });
            }
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    /// Every object recorded with `scene_id`, each object id once.
    ///
    /// Object collections are scanned in priority order; when an object has
    /// several modality entries the first one seen is kept.
    pub fn get_entities_by_scene(&self, scene_id: &str) -> Result<Vec<ObjectMetadata>, StoreError> {
        let filter = MetadataFilter::eq(SCENE_REF, scene_id);
        let mut seen = HashSet::new();
        let mut objects = Vec::new();

        for &modality in EntityKind::Object.modalities() {
            let collection = self.collection(modality);
            for entry in collection.scan(Some(&filter))? {
                let object: ObjectMetadata = decode(collection.name(), &entry.id, &entry.metadata)?;
                if seen.insert(object.object_id.clone()) {
                    objects.push(object);
                }
            }
        }
        Ok(objects)
    }

    /// Remove every modality entry of `entity_id`.  Missing entries are not
    /// an error.
    pub fn delete(&self, kind: EntityKind, entity_id: &str) -> Result<(), StoreError> {
        for &modality in kind.modalities() {
            let key = CompositeKey::new(entity_id, modality).to_string();
            self.collection(modality).delete(&[key])?;
        }
        debug!(entity_id, kind = %kind, "deleted entity");
        Ok(())
    }
}

/// Rebuild an entry's metadata and check it against the entry's own key.
fn decode<M: EntityMetadata>(collection: &str, id: &str, flat: &Metadata) -> Result<M, StoreError> {
    let metadata = M::from_flat(flat).and_then(|metadata| {
        let key = CompositeKey::parse(id);
        let matches = key.as_ref().is_some_and(|key| {
            key.entity_id() == metadata.entity_id() && key.modality() == metadata.modality()
        });
        if matches {
            Ok(metadata)
        } else {
            Err(MetadataError::KeyMismatch {
                key: id.to_string(),
                entity_id: metadata.entity_id().to_string(),
                modality: metadata.modality(),
            })
        }
    });
    metadata.map_err(|source| StoreError::Metadata {
        collection: collection.to_string(),
        id: id.to_string(),
        source,
    })
}

fn modality_list(kind: EntityKind) -> String {
    kind.modalities()
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
