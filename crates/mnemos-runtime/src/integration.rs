//! Perception-memory facade.
//!
//! [`PerceptionMemory`] is what the rest of the robot talks to: perception
//! reports detections through the `record_*` methods, planners ask
//! `find_*` questions, and navigation pulls bare coordinates.  It owns one
//! [`MultiModalStore`] and adds no state of its own beyond query defaults.
//!
//! # Example
//!
//! ```rust
//! use mnemos_runtime::{MemoryConfig, PerceptionMemory};
//! use mnemos_types::{ObjectRecord, SceneRecord};
//!
//! let memory = PerceptionMemory::open(&MemoryConfig::default()).unwrap();
//! memory
//!     .record_scene(&SceneRecord {
//!         scene_id: "kitchen_01".to_string(),
//!         scene_xyz: vec![2.5, 3.1, 0.0],
//!         scene_image_ref: "images/kitchen_01.png".to_string(),
//!         scene_embedding: vec![0.3, 0.7],
//!     })
//!     .unwrap();
//! memory
//!     .record_object(&ObjectRecord {
//!         object_id: "mug_01".to_string(),
//!         object_xyz: vec![1.0, 2.0, 0.0],
//!         object_image_ref: "images/mug_01.png".to_string(),
//!         object_embedding: vec![1.0, 0.0],
//!         location_embedding: vec![0.0, 1.0],
//!         scene_id: Some("kitchen_01".to_string()),
//!     })
//!     .unwrap();
//!
//! let goal = memory.get_coordinates("mug_01").unwrap().unwrap();
//! assert_eq!(goal.to_array(), [1.0, 2.0, 0.0]);
//!
//! let nearby = memory.find_scenes(None, Some(&[2.4, 3.0, 0.0][..]), None, None).unwrap();
//! assert_eq!(nearby[0].entity_id(), "kitchen_01");
//! ```

use mnemos_memory::collection::EmbeddingCollection;
use mnemos_memory::metadata::{ObjectMetadata, PersonMetadata, SceneMetadata};
use mnemos_memory::sqlite::SqliteCollection;
use mnemos_memory::store::{Hit, MultiModalStore, StoreError};
use mnemos_types::{
    EntityKind, Modality, ObjectRecord, PersonRecord, SceneRecord, ValidationError, Xyz,
};
use tracing::{info, warn};

use crate::config::MemoryConfig;

/// Entry point for perception events, retrieval intents and navigation
/// lookups.
pub struct PerceptionMemory<C = SqliteCollection> {
    store: MultiModalStore<C>,
    default_k: usize,
    default_radius: f64,
}

impl PerceptionMemory<SqliteCollection> {
    /// Open the store described by `config`.
    ///
    /// Without a `persist_directory` the store lives in memory and is lost
    /// when the process exits.  A negative or non-finite `default_radius`
    /// is rejected up front.
    pub fn open(config: &MemoryConfig) -> Result<Self, StoreError> {
        let radius = config.default_radius;
        if !radius.is_finite() || radius < 0.0 {
            return Err(ValidationError::InvalidRadius(radius).into());
        }
        let store = match &config.persist_directory {
            Some(dir) => MultiModalStore::open(dir, config.distance_metric)?,
            None => {
                warn!("no persist_directory configured; perception store is in-memory only");
                MultiModalStore::open_in_memory(config.distance_metric)?
            }
        };
        Ok(Self::new(store).with_defaults(config.default_k, config.default_radius))
    }
}

impl<C: EmbeddingCollection> PerceptionMemory<C> {
    /// Wrap an already-open store with the stock defaults (`k = 5`,
    /// `radius = 1.0`).
    pub fn new(store: MultiModalStore<C>) -> Self {
        let defaults = MemoryConfig::default();
        Self {
            store,
            default_k: defaults.default_k,
            default_radius: defaults.default_radius,
        }
    }

    /// Override the result count and scene radius used when a query leaves
    /// them out.
    pub fn with_defaults(mut self, k: usize, radius: f64) -> Self {
        self.default_k = k;
        self.default_radius = radius;
        self
    }

    pub fn store(&self) -> &MultiModalStore<C> {
        &self.store
    }

    // ── Ingest ───────────────────────────────────────────────────────────────

    pub fn record_object(&self, object: &ObjectRecord) -> Result<(), StoreError> {
        self.store.upsert(object)?;
        info!(
            object_id = %object.object_id,
            scene_id = object.scene().unwrap_or("-"),
            "stored object"
        );
        Ok(())
    }

    pub fn record_scene(&self, scene: &SceneRecord) -> Result<(), StoreError> {
        self.store.upsert(scene)?;
        info!(scene_id = %scene.scene_id, "stored scene");
        Ok(())
    }

    pub fn record_person(&self, person: &PersonRecord) -> Result<(), StoreError> {
        self.store.upsert(person)?;
        info!(
            person_id = %person.person_id,
            face = person.face_embedding.is_some(),
            pose = person.pose_embedding.is_some(),
            "stored person"
        );
        Ok(())
    }

    // ── Similarity retrieval ─────────────────────────────────────────────────

    /// Objects most similar to `query` in `modality` (image or location).
    pub fn find_objects(
        &self,
        query: &[f32],
        modality: Modality,
        k: Option<usize>,
    ) -> Result<Vec<Hit<ObjectMetadata>>, StoreError> {
        self.store
            .query_by_embedding(query, modality, k.unwrap_or(self.default_k))
    }

    /// Scenes near `slam_coords` (exact radius scan) or, failing that,
    /// similar to `query_embedding`.
    ///
    /// Coordinates take precedence when both keys are supplied.  `radius`
    /// only applies to the coordinate path.
    pub fn find_scenes(
        &self,
        query_embedding: Option<&[f32]>,
        slam_coords: Option<&[f64]>,
        radius: Option<f64>,
        k: Option<usize>,
    ) -> Result<Vec<Hit<SceneMetadata>>, StoreError> {
        let k = k.unwrap_or(self.default_k);
        match (slam_coords, query_embedding) {
            (Some(xyz), _) => self.store.find_scenes_by_radius(
                xyz,
                radius.unwrap_or(self.default_radius),
                k,
            ),
            (None, Some(embedding)) => {
                self.store.query_by_embedding(embedding, Modality::Scene, k)
            }
            (None, None) => Err(missing_keys("find_scenes", &["query_embedding", "slam_coords"])),
        }
    }

    /// Scenes within `radius` metres of `xyz`, nearest first.
    pub fn find_scenes_near(
        &self,
        xyz: &[f64],
        radius: f64,
        k: usize,
    ) -> Result<Vec<Hit<SceneMetadata>>, StoreError> {
        self.store.find_scenes_by_radius(xyz, radius, k)
    }

    /// People most similar to `face`, or to `pose` when no face is given.
    pub fn find_people(
        &self,
        face: Option<&[f32]>,
        pose: Option<&[f32]>,
        k: Option<usize>,
    ) -> Result<Vec<Hit<PersonMetadata>>, StoreError> {
        let k = k.unwrap_or(self.default_k);
        match (face, pose) {
            (Some(face), _) => self.store.query_by_embedding(face, Modality::Face, k),
            (None, Some(pose)) => self.store.query_by_embedding(pose, Modality::Pose, k),
            (None, None) => Err(missing_keys("find_people", &["face_embedding", "pose_embedding"])),
        }
    }

    // ── Point lookups ────────────────────────────────────────────────────────

    pub fn get_object(&self, object_id: &str) -> Result<Option<ObjectMetadata>, StoreError> {
        self.store.get(object_id)
    }

    pub fn get_scene(&self, scene_id: &str) -> Result<Option<SceneMetadata>, StoreError> {
        self.store.get(scene_id)
    }

    pub fn get_person(&self, person_id: &str) -> Result<Option<PersonMetadata>, StoreError> {
        self.store.get(person_id)
    }

    /// Look a person up by the identifier assigned by face recognition,
    /// which is also their person id.
    pub fn get_person_by_face_id(
        &self,
        face_id: &str,
    ) -> Result<Option<PersonMetadata>, StoreError> {
        self.get_person(face_id)
    }

    pub fn get_objects_in_scene(&self, scene_id: &str) -> Result<Vec<ObjectMetadata>, StoreError> {
        self.store.get_entities_by_scene(scene_id)
    }

    // ── Navigation ───────────────────────────────────────────────────────────

    /// Position of whatever entity carries `entity_id`.
    ///
    /// Objects are checked first, then scenes, then people.
    pub fn get_coordinates(&self, entity_id: &str) -> Result<Option<Xyz>, StoreError> {
        if let Some(xyz) = self.get_object_coordinates(entity_id)? {
            return Ok(Some(xyz));
        }
        if let Some(xyz) = self.get_scene_coordinates(entity_id)? {
            return Ok(Some(xyz));
        }
        self.get_person_coordinates(entity_id)
    }

    pub fn get_object_coordinates(&self, object_id: &str) -> Result<Option<Xyz>, StoreError> {
        Ok(self.get_object(object_id)?.map(|o| o.object_xyz))
    }

    pub fn get_scene_coordinates(&self, scene_id: &str) -> Result<Option<Xyz>, StoreError> {
        Ok(self.get_scene(scene_id)?.map(|s| s.scene_xyz))
    }

    pub fn get_person_coordinates(&self, person_id: &str) -> Result<Option<Xyz>, StoreError> {
        Ok(self.get_person(person_id)?.map(|p| p.people_xyz))
    }

    // ── Removal ──────────────────────────────────────────────────────────────

    pub fn forget_object(&self, object_id: &str) -> Result<(), StoreError> {
        self.store.delete(EntityKind::Object, object_id)
    }

    pub fn forget_scene(&self, scene_id: &str) -> Result<(), StoreError> {
        self.store.delete(EntityKind::Scene, scene_id)
    }

    pub fn forget_person(&self, person_id: &str) -> Result<(), StoreError> {
        self.store.delete(EntityKind::Person, person_id)
    }
}

fn missing_keys(operation: &str, expected: &[&str]) -> StoreError {
    StoreError::InvalidArgument(format!(
        "{operation} needs one of: {}",
        expected.join(", ")
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use mnemos_memory::DistanceMetric;

    use super::*;

    fn memory() -> PerceptionMemory {
        PerceptionMemory::new(MultiModalStore::open_in_memory(DistanceMetric::Cosine).unwrap())
    }

    fn scene(id: &str, xyz: [f64; 3], embedding: Vec<f32>) -> SceneRecord {
        SceneRecord {
            scene_id: id.to_string(),
            scene_xyz: xyz.to_vec(),
            scene_image_ref: format!("images/{id}.png"),
            scene_embedding: embedding,
        }
    }

    fn object(id: &str, xyz: [f64; 3], scene_id: Option<&str>) -> ObjectRecord {
        ObjectRecord {
            object_id: id.to_string(),
            object_xyz: xyz.to_vec(),
            object_image_ref: format!("images/{id}.png"),
            object_embedding: vec![1.0, 0.0, 0.0],
            location_embedding: vec![0.0, 1.0, 0.0],
            scene_id: scene_id.map(str::to_string),
        }
    }

    fn person(id: &str, face: Option<Vec<f32>>, pose: Option<Vec<f32>>) -> PersonRecord {
        PersonRecord {
            person_id: id.to_string(),
            people_xyz: vec![4.0, 5.0, 0.0],
            face_embedding: face,
            pose_embedding: pose,
            timeframe: Some("2024-01-01T10:30:00".to_string()),
            chat_history_ref: None,
        }
    }

    #[test]
    fn find_without_keys_is_invalid_argument() {
        let m = memory();
        match m.find_scenes(None, None, None, None).unwrap_err() {
            StoreError::InvalidArgument(msg) => {
                assert!(msg.contains("query_embedding"));
                assert!(msg.contains("slam_coords"));
            }
            other => panic!("unexpected error: {other}"),
        }
        match m.find_people(None, None, None).unwrap_err() {
            StoreError::InvalidArgument(msg) => {
                assert!(msg.contains("face_embedding"));
                assert!(msg.contains("pose_embedding"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn find_objects_by_image() {
        let m = memory();
        m.record_object(&object("mug_01", [1.0, 2.0, 0.0], None)).unwrap();

        let hits = m.find_objects(&[1.0, 0.0, 0.0], Modality::Image, Some(1)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id(), "mug_01");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn find_objects_rejects_person_modality() {
        let m = memory();
        assert!(matches!(
            m.find_objects(&[1.0], Modality::Face, None),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn find_scenes_prefers_coordinates() {
        let m = memory();
        m.record_scene(&scene("near", [0.0, 0.0, 0.0], vec![0.0, 1.0])).unwrap();
        m.record_scene(&scene("far", [50.0, 0.0, 0.0], vec![1.0, 0.0])).unwrap();

        // The embedding points at "far", the coordinates at "near".
        let hits = m
            .find_scenes(Some(&[1.0, 0.0][..]), Some(&[0.0, 0.0, 0.0][..]), Some(1.0), Some(5))
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.entity_id()).collect();
        assert_eq!(ids, ["near"]);

        let by_embedding = m.find_scenes(Some(&[1.0, 0.0][..]), None, None, Some(1)).unwrap();
        assert_eq!(by_embedding[0].entity_id(), "far");
    }

    #[test]
    fn find_scenes_uses_configured_defaults() {
        let m = memory().with_defaults(1, 10.0);
        m.record_scene(&scene("a", [0.0, 0.0, 0.0], vec![1.0])).unwrap();
        m.record_scene(&scene("b", [5.0, 0.0, 0.0], vec![1.0])).unwrap();

        let hits = m.find_scenes(None, Some(&[0.0, 0.0, 0.0][..]), None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id(), "a");
    }

    #[test]
    fn find_scenes_near_scenario() {
        let m = memory();
        for (id, x) in [("s0", 0.0), ("s1", 1.0), ("s5", 5.0)] {
            m.record_scene(&scene(id, [x, 0.0, 0.0], vec![1.0, 1.0])).unwrap();
        }
        let hits = m.find_scenes_near(&[0.0, 0.0, 0.0], 2.0, 5).unwrap();
        let found: Vec<_> = hits.iter().map(|h| (h.entity_id(), h.distance)).collect();
        assert_eq!(found, [("s0", 0.0), ("s1", 1.0)]);
    }

    #[test]
    fn find_people_prefers_face() {
        let m = memory();
        m.record_person(&person("alice", Some(vec![1.0, 0.0]), Some(vec![0.0, 1.0]))).unwrap();
        m.record_person(&person("bob", Some(vec![0.0, 1.0]), Some(vec![1.0, 0.0]))).unwrap();

        let hits = m.find_people(Some(&[1.0, 0.0][..]), Some(&[1.0, 0.0][..]), Some(1)).unwrap();
        assert_eq!(hits[0].entity_id(), "alice");
        assert_eq!(hits[0].metadata.embedding_type, Modality::Face);

        let by_pose = m.find_people(None, Some(&[1.0, 0.0][..]), Some(1)).unwrap();
        assert_eq!(by_pose[0].entity_id(), "bob");
        assert_eq!(by_pose[0].metadata.embedding_type, Modality::Pose);
    }

    #[test]
    fn person_with_face_only_is_retrievable() {
        let m = memory();
        m.record_person(&person("p1", Some(vec![0.3, 0.7]), None)).unwrap();

        let p = m.get_person("p1").unwrap().unwrap();
        assert_eq!(p.timeframe.as_deref(), Some("2024-01-01T10:30:00"));
        assert_eq!(m.get_person_by_face_id("p1").unwrap(), Some(p));
    }

    #[test]
    fn objects_in_scene() {
        let m = memory();
        m.record_scene(&scene("kitchen_01", [2.5, 3.1, 0.0], vec![1.0])).unwrap();
        m.record_object(&object("mug_01", [1.0, 2.0, 0.0], Some("kitchen_01"))).unwrap();
        m.record_object(&object("cup_01", [0.5, 1.8, 0.0], Some("kitchen_01"))).unwrap();
        m.record_object(&object("drill", [9.0, 9.0, 0.0], Some("garage"))).unwrap();

        let mut ids: Vec<_> = m
            .get_objects_in_scene("kitchen_01")
            .unwrap()
            .into_iter()
            .map(|o| o.object_id)
            .collect();
        ids.sort();
        assert_eq!(ids, ["cup_01", "mug_01"]);
    }

    #[test]
    fn coordinates_for_every_kind() {
        let m = memory();
        m.record_object(&object("mug_01", [1.0, 2.0, 0.0], None)).unwrap();
        m.record_scene(&scene("kitchen_01", [2.5, 3.1, 0.0], vec![1.0])).unwrap();
        m.record_person(&person("p1", None, Some(vec![1.0]))).unwrap();

        assert_eq!(m.get_coordinates("mug_01").unwrap(), Some(Xyz::new(1.0, 2.0, 0.0)));
        assert_eq!(m.get_coordinates("kitchen_01").unwrap(), Some(Xyz::new(2.5, 3.1, 0.0)));
        assert_eq!(m.get_coordinates("p1").unwrap(), Some(Xyz::new(4.0, 5.0, 0.0)));
        assert_eq!(m.get_coordinates("nowhere").unwrap(), None);

        assert_eq!(m.get_scene_coordinates("mug_01").unwrap(), None);
        let xyz = m.get_object_coordinates("mug_01").unwrap().unwrap();
        let (x, y, z): (f64, f64, f64) = xyz.into();
        assert_eq!((x, y, z), (1.0, 2.0, 0.0));
    }

    #[test]
    fn forget_removes_entities() {
        let m = memory();
        m.record_object(&object("mug_01", [1.0, 2.0, 0.0], None)).unwrap();
        m.record_scene(&scene("kitchen_01", [0.0, 0.0, 0.0], vec![1.0])).unwrap();
        m.record_person(&person("p1", Some(vec![1.0]), Some(vec![1.0]))).unwrap();

        m.forget_object("mug_01").unwrap();
        m.forget_scene("kitchen_01").unwrap();
        m.forget_person("p1").unwrap();

        assert!(m.get_object("mug_01").unwrap().is_none());
        assert!(m.get_scene("kitchen_01").unwrap().is_none());
        assert!(m.get_person("p1").unwrap().is_none());
        assert!(m.find_scenes_near(&[0.0, 0.0, 0.0], 1.0, 5).unwrap().is_empty());
    }

    #[test]
    fn invalid_record_is_not_admitted() {
        let m = memory();
        let mut bad = object("mug_01", [0.0; 3], None);
        bad.object_xyz = vec![1.0, 2.0, 3.0, 4.0];
        assert!(matches!(m.record_object(&bad), Err(StoreError::Validation(_))));
        assert!(matches!(
            m.record_person(&person("nobody", None, None)),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn open_from_config_persists() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = MemoryConfig {
            persist_directory: Some(dir.path().join("store")),
            ..MemoryConfig::default()
        };
        {
            let m = PerceptionMemory::open(&cfg).unwrap();
            m.record_scene(&scene("hall", [1.0, 1.0, 0.0], vec![1.0])).unwrap();
        }
        let m = PerceptionMemory::open(&cfg).unwrap();
        assert_eq!(m.get_scene_coordinates("hall").unwrap(), Some(Xyz::new(1.0, 1.0, 0.0)));
    }

    #[test]
    fn open_rejects_unusable_default_radius() {
        let cfg = MemoryConfig {
            default_radius: -1.0,
            ..MemoryConfig::default()
        };
        assert!(matches!(
            PerceptionMemory::open(&cfg),
            Err(StoreError::Validation(ValidationError::InvalidRadius(_)))
        ));
        let cfg = MemoryConfig {
            default_radius: f64::NAN,
            ..MemoryConfig::default()
        };
        assert!(PerceptionMemory::open(&cfg).is_err());
    }

    #[test]
    fn open_without_directory_is_in_memory() {
        let m = PerceptionMemory::open(&MemoryConfig::default()).unwrap();
        m.record_scene(&scene("hall", [1.0, 1.0, 0.0], vec![1.0])).unwrap();
        assert_eq!(m.store().count(Modality::Scene).unwrap(), 1);
    }
}
