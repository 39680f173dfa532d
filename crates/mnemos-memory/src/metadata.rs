//! Fixed-shape metadata and its flat round-trip.
//!
//! Collections only store flat key/value maps.  Each entity kind has one
//! struct here that enumerates the fields it writes, and an explicit
//! [`EntityMetadata::from_flat`] that rebuilds the structured [`Xyz`] from
//! the three scalar coordinate fields.
//!
//! | kind   | id field    | coordinate fields              | other fields                         |
//! |--------|-------------|--------------------------------|--------------------------------------|
//! | object | `object_id` | `object_x` `object_y` `object_z` | `object_image_ref`, `scene_id`?     |
//! | scene  | `scene_id`  | `scene_x` `scene_y` `scene_z`    | `scene_image_ref`                   |
//! | person | `person_id` | `people_x` `people_y` `people_z` | `timeframe`?, `chat_history_ref`?   |
//!
//! Every entry also carries `embedding_type`, the modality it was written
//! for.

use mnemos_types::{
    EntityKind, Modality, ObjectRecord, PersonRecord, SceneRecord, ValidationError, Xyz,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collection::{Metadata, MetadataValue};

/// Metadata key holding the modality discriminator.
pub const EMBEDDING_TYPE: &str = "embedding_type";

/// Metadata key of the denormalised object → scene reference.
pub const SCENE_REF: &str = "scene_id";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// A stored flat map that cannot be turned back into its struct.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    #[error("missing metadata field {0:?}")]
    MissingField(&'static str),
    #[error("metadata field {field:?} is not a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("unknown embedding_type {0:?}")]
    UnknownModality(String),
    #[error("embedding_type {found} does not belong to a {expected} entry")]
    ModalityMismatch { expected: EntityKind, found: Modality },
    #[error("stored key {key:?} does not match entity {entity_id:?} ({modality})")]
    KeyMismatch {
        key: String,
        entity_id: String,
        modality: Modality,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Structured metadata of one entity kind.
pub trait EntityMetadata: Sized {
    const KIND: EntityKind;

    fn entity_id(&self) -> &str;

    fn xyz(&self) -> Xyz;

    /// Modality of the physical entry this metadata was read from.
    fn modality(&self) -> Modality;

    /// Flatten into the key/value form stored next to an embedding.
    fn to_flat(&self) -> Metadata;

    /// Rebuild from a stored flat map.
    fn from_flat(flat: &Metadata) -> Result<Self, MetadataError>;
}

/// A perception record that can be fanned out over modality collections.
pub trait EntityRecord {
    type Metadata: EntityMetadata;

    fn entity_id(&self) -> &str;

    /// Check the record and return its coordinates.
    fn validate(&self) -> Result<Xyz, ValidationError>;

    /// Metadata to attach to the entry written for `modality`.
    fn metadata(&self, xyz: Xyz, modality: Modality) -> Self::Metadata;

    /// The `(modality, embedding)` pairs this record actually supplies.
    fn embeddings(&self) -> Vec<(Modality, &[f32])>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Flat-field helpers
// ─────────────────────────────────────────────────────────────────────────────

fn required_str(flat: &Metadata, field: &'static str) -> Result<String, MetadataError> {
    match flat.get(field) {
        None => Err(MetadataError::MissingField(field)),
        Some(v) => v.as_str().map(str::to_string).ok_or(MetadataError::WrongType {
            field,
            expected: "string",
        }),
    }
}

fn optional_str(flat: &Metadata, field: &'static str) -> Result<Option<String>, MetadataError> {
    match flat.get(field) {
        None => Ok(None),
        Some(_) => required_str(flat, field).map(Some),
    }
}

fn required_f64(flat: &Metadata, field: &'static str) -> Result<f64, MetadataError> {
    match flat.get(field) {
        None => Err(MetadataError::MissingField(field)),
        Some(v) => v.as_f64().ok_or(MetadataError::WrongType {
            field,
            expected: "number",
        }),
    }
}

/// Rebuild the coordinate triple from its `x`, `y`, `z` fields, in that order.
fn reconstruct_xyz(flat: &Metadata, fields: [&'static str; 3]) -> Result<Xyz, MetadataError> {
    let [fx, fy, fz] = fields;
    Ok(Xyz::new(
        required_f64(flat, fx)?,
        required_f64(flat, fy)?,
        required_f64(flat, fz)?,
    ))
}

fn write_xyz(flat: &mut Metadata, fields: [&'static str; 3], xyz: Xyz) {
    for (field, value) in fields.into_iter().zip(xyz.to_array()) {
        flat.insert(field.to_string(), MetadataValue::Float(value));
    }
}

fn modality_of(flat: &Metadata, kind: EntityKind) -> Result<Modality, MetadataError> {
    let raw = required_str(flat, EMBEDDING_TYPE)?;
    let modality: Modality = raw
        .parse()
        .map_err(|_| MetadataError::UnknownModality(raw.clone()))?;
    if modality.kind() != kind {
        return Err(MetadataError::ModalityMismatch {
            expected: kind,
            found: modality,
        });
    }
    Ok(modality)
}

fn put(flat: &mut Metadata, field: &str, value: impl Into<MetadataValue>) {
    flat.insert(field.to_string(), value.into());
}

// ─────────────────────────────────────────────────────────────────────────────
// Objects
// ─────────────────────────────────────────────────────────────────────────────

const OBJECT_XYZ: [&str; 3] = ["object_x", "object_y", "object_z"];

/// Metadata of one object entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub object_id: String,
    pub object_xyz: Xyz,
    pub object_image_ref: String,
    /// Scene the object was observed in; enables scene → objects lookups.
    pub scene_id: Option<String>,
    pub embedding_type: Modality,
}

impl EntityMetadata for ObjectMetadata {
    const KIND: EntityKind = EntityKind::Object;

    fn entity_id(&self) -> &str {
        &self.object_id
    }

    fn xyz(&self) -> Xyz {
        self.object_xyz
    }

    fn modality(&self) -> Modality {
        self.embedding_type
    }

    fn to_flat(&self) -> Metadata {
        let mut flat = Metadata::new();
        put(&mut flat, "object_id", self.object_id.as_str());
        write_xyz(&mut flat, OBJECT_XYZ, self.object_xyz);
        put(&mut flat, "object_image_ref", self.object_image_ref.as_str());
        if let Some(scene) = &self.scene_id {
            put(&mut flat, SCENE_REF, scene.as_str());
        }
        put(&mut flat, EMBEDDING_TYPE, self.embedding_type.as_str());
        flat
    }

    fn from_flat(flat: &Metadata) -> Result<Self, MetadataError> {
        Ok(Self {
            object_id: required_str(flat, "object_id")?,
            object_xyz: reconstruct_xyz(flat, OBJECT_XYZ)?,
            object_image_ref: required_str(flat, "object_image_ref")?,
            scene_id: optional_str(flat, SCENE_REF)?,
            embedding_type: modality_of(flat, Self::KIND)?,
        })
    }
}

impl EntityRecord for ObjectRecord {
    type Metadata = ObjectMetadata;

    fn entity_id(&self) -> &str {
        &self.object_id
    }

    fn validate(&self) -> Result<Xyz, ValidationError> {
        ObjectRecord::validate(self)
    }

    fn metadata(&self, xyz: Xyz, modality: Modality) -> ObjectMetadata {
        ObjectMetadata {
            object_id: self.object_id.clone(),
            object_xyz: xyz,
            object_image_ref: self.object_image_ref.clone(),
            scene_id: self.scene().map(str::to_string),
            embedding_type: modality,
        }
    }

    fn embeddings(&self) -> Vec<(Modality, &[f32])> {
        vec![
            (Modality::Image, self.object_embedding.as_slice()),
            (Modality::Location, self.location_embedding.as_slice()),
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenes
// ─────────────────────────────────────────────────────────────────────────────

const SCENE_XYZ: [&str; 3] = ["scene_x", "scene_y", "scene_z"];

/// Metadata of one scene entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub scene_id: String,
    /// SLAM position of the scene.
    pub scene_xyz: Xyz,
    pub scene_image_ref: String,
    pub embedding_type: Modality,
}

impl EntityMetadata for SceneMetadata {
    const KIND: EntityKind = EntityKind::Scene;

    fn entity_id(&self) -> &str {
        &self.scene_id
    }

    fn xyz(&self) -> Xyz {
        self.scene_xyz
    }

    fn modality(&self) -> Modality {
        self.embedding_type
    }

    fn to_flat(&self) -> Metadata {
        let mut flat = Metadata::new();
        put(&mut flat, "scene_id", self.scene_id.as_str());
        write_xyz(&mut flat, SCENE_XYZ, self.scene_xyz);
        put(&mut flat, "scene_image_ref", self.scene_image_ref.as_str());
        put(&mut flat, EMBEDDING_TYPE, self.embedding_type.as_str());
        flat
    }

    fn from_flat(flat: &Metadata) -> Result<Self, MetadataError> {
        Ok(Self {
            scene_id: required_str(flat, "scene_id")?,
            scene_xyz: reconstruct_xyz(flat, SCENE_XYZ)?,
            scene_image_ref: required_str(flat, "scene_image_ref")?,
            embedding_type: modality_of(flat, Self::KIND)?,
        })
    }
}

impl EntityRecord for SceneRecord {
    type Metadata = SceneMetadata;

    fn entity_id(&self) -> &str {
        &self.scene_id
    }

    fn validate(&self) -> Result<Xyz, ValidationError> {
        SceneRecord::validate(self)
    }

    fn metadata(&self, xyz: Xyz, modality: Modality) -> SceneMetadata {
        SceneMetadata {
            scene_id: self.scene_id.clone(),
            scene_xyz: xyz,
            scene_image_ref: self.scene_image_ref.clone(),
            embedding_type: modality,
        }
    }

    fn embeddings(&self) -> Vec<(Modality, &[f32])> {
        vec![(Modality::Scene, self.scene_embedding.as_slice())]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// People
// ─────────────────────────────────────────────────────────────────────────────

const PEOPLE_XYZ: [&str; 3] = ["people_x", "people_y", "people_z"];

/// Metadata of one person entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonMetadata {
    pub person_id: String,
    pub people_xyz: Xyz,
    pub timeframe: Option<String>,
    pub chat_history_ref: Option<String>,
    pub embedding_type: Modality,
}

impl EntityMetadata for PersonMetadata {
    const KIND: EntityKind = EntityKind::Person;

    fn entity_id(&self) -> &str {
        &self.person_id
    }

    fn xyz(&self) -> Xyz {
        self.people_xyz
    }

    fn modality(&self) -> Modality {
        self.embedding_type
    }

    fn to_flat(&self) -> Metadata {
        let mut flat = Metadata::new();
        put(&mut flat, "person_id", self.person_id.as_str());
        write_xyz(&mut flat, PEOPLE_XYZ, self.people_xyz);
        if let Some(t) = &self.timeframe {
            put(&mut flat, "timeframe", t.as_str());
        }
        if let Some(c) = &self.chat_history_ref {
            put(&mut flat, "chat_history_ref", c.as_str());
        }
        put(&mut flat, EMBEDDING_TYPE, self.embedding_type.as_str());
        flat
    }

    fn from_flat(flat: &Metadata) -> Result<Self, MetadataError> {
        Ok(Self {
            person_id: required_str(flat, "person_id")?,
            people_xyz: reconstruct_xyz(flat, PEOPLE_XYZ)?,
            timeframe: optional_str(flat, "timeframe")?,
            chat_history_ref: optional_str(flat, "chat_history_ref")?,
            embedding_type: modality_of(flat, Self::KIND)?,
        })
    }
}

impl EntityRecord for PersonRecord {
    type Metadata = PersonMetadata;

    fn entity_id(&self) -> &str {
        &self.person_id
    }

    fn validate(&self) -> Result<Xyz, ValidationError> {
        PersonRecord::validate(self)
    }

    fn metadata(&self, xyz: Xyz, modality: Modality) -> PersonMetadata {
        PersonMetadata {
            person_id: self.person_id.clone(),
            people_xyz: xyz,
            timeframe: self.timeframe.clone().filter(|t| !t.is_empty()),
            chat_history_ref: self.chat_history_ref.clone().filter(|c| !c.is_empty()),
            embedding_type: modality,
        }
    }

    fn embeddings(&self) -> Vec<(Modality, &[f32])> {
        let mut out = Vec::with_capacity(2);
        if let Some(face) = &self.face_embedding {
            out.push((Modality::Face, face.as_slice()));
        }
        if let Some(pose) = &self.pose_embedding {
            out.push((Modality::Pose, pose.as_slice()));
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn mug() -> ObjectRecord {
        ObjectRecord {
            object_id: "mug_01".to_string(),
            object_xyz: vec![1.0, 2.0, 0.0],
            object_image_ref: "images/mug_01.png".to_string(),
            object_embedding: vec![1.0, 0.0],
            location_embedding: vec![0.0, 1.0],
            scene_id: Some("kitchen_01".to_string()),
        }
    }

    #[test]
    fn object_flat_field_layout() {
        let obj = mug();
        let flat = obj.metadata(Xyz::new(1.0, 2.0, 0.0), Modality::Image).to_flat();
        let keys: Vec<_> = flat.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            [
                "embedding_type",
                "object_id",
                "object_image_ref",
                "object_x",
                "object_y",
                "object_z",
                "scene_id"
            ]
        );
        assert_eq!(flat["embedding_type"], MetadataValue::from("image"));
        assert_eq!(flat["object_y"], MetadataValue::Float(2.0));
    }

    #[test]
    fn object_without_scene_omits_scene_field() {
        let mut obj = mug();
        obj.scene_id = None;
        let flat = obj.metadata(Xyz::new(0.0, 0.0, 0.0), Modality::Location).to_flat();
        assert!(!flat.contains_key(SCENE_REF));
        assert_eq!(ObjectMetadata::from_flat(&flat).unwrap().scene_id, None);
    }

    #[test]
    fn reconstruction_is_bit_exact() {
        let xyz = Xyz::new(0.1 + 0.2, -1.0e-300, 7.25);
        let meta = SceneMetadata {
            scene_id: "kitchen_01".to_string(),
            scene_xyz: xyz,
            scene_image_ref: "images/kitchen_01.png".to_string(),
            embedding_type: Modality::Scene,
        };
        let back = SceneMetadata::from_flat(&meta.to_flat()).unwrap();
        assert_eq!(back.scene_xyz.x.to_bits(), xyz.x.to_bits());
        assert_eq!(back.scene_xyz.y.to_bits(), xyz.y.to_bits());
        assert_eq!(back.scene_xyz.z.to_bits(), xyz.z.to_bits());
        assert_eq!(back, meta);
    }

    #[test]
    fn integer_coordinates_are_widened() {
        let mut flat = Metadata::new();
        flat.insert("scene_id".into(), "s".into());
        flat.insert("scene_x".into(), MetadataValue::Int(2));
        flat.insert("scene_y".into(), MetadataValue::Float(3.0));
        flat.insert("scene_z".into(), MetadataValue::Int(0));
        flat.insert("scene_image_ref".into(), "".into());
        flat.insert(EMBEDDING_TYPE.into(), "scene".into());
        let meta = SceneMetadata::from_flat(&flat).unwrap();
        assert_eq!(meta.scene_xyz, Xyz::new(2.0, 3.0, 0.0));
    }

    #[test]
    fn missing_coordinate_is_an_error() {
        let mut flat = mug().metadata(Xyz::new(1.0, 2.0, 3.0), Modality::Image).to_flat();
        flat.remove("object_z");
        assert_eq!(
            ObjectMetadata::from_flat(&flat).unwrap_err(),
            MetadataError::MissingField("object_z")
        );
    }

    #[test]
    fn wrong_type_is_an_error() {
        let mut flat = mug().metadata(Xyz::new(1.0, 2.0, 3.0), Modality::Image).to_flat();
        flat.insert("object_x".into(), "one".into());
        assert!(matches!(
            ObjectMetadata::from_flat(&flat).unwrap_err(),
            MetadataError::WrongType { field: "object_x", .. }
        ));
    }

    #[test]
    fn foreign_modality_is_rejected() {
        let mut flat = mug().metadata(Xyz::new(1.0, 2.0, 3.0), Modality::Image).to_flat();
        flat.insert(EMBEDDING_TYPE.into(), "face".into());
        assert!(matches!(
            ObjectMetadata::from_flat(&flat).unwrap_err(),
            MetadataError::ModalityMismatch { .. }
        ));
        flat.insert(EMBEDDING_TYPE.into(), "smell".into());
        assert!(matches!(
            ObjectMetadata::from_flat(&flat).unwrap_err(),
            MetadataError::UnknownModality(_)
        ));
    }

    #[test]
    fn person_embeddings_only_lists_supplied_modalities() {
        let p = PersonRecord {
            person_id: "p1".to_string(),
            people_xyz: vec![4.0, 5.0, 0.0],
            face_embedding: Some(vec![0.3, 0.7]),
            pose_embedding: None,
            timeframe: Some("2024-01-01T10:30:00".to_string()),
            chat_history_ref: Some(String::new()),
        };
        let mods: Vec<_> = p.embeddings().into_iter().map(|(m, _)| m).collect();
        assert_eq!(mods, [Modality::Face]);

        let meta = p.metadata(Xyz::new(4.0, 5.0, 0.0), Modality::Face);
        let back = PersonMetadata::from_flat(&meta.to_flat()).unwrap();
        assert_eq!(back.timeframe.as_deref(), Some("2024-01-01T10:30:00"));
        assert_eq!(back.chat_history_ref, None);
    }
}
