//! `mnemos-types` – shared value objects for the perception memory.
//!
//! Upstream vision produces [`ObjectRecord`], [`SceneRecord`], and
//! [`PersonRecord`] values; `mnemos-memory` fans them out into one
//! similarity-searchable collection per [`Modality`] and hands back
//! reconstructed [`Xyz`] coordinates for navigation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the entity id and the modality in a [`CompositeKey`].
pub const KEY_SEPARATOR: &str = "::";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Rejections raised before anything is written or queried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} must have length 3, got {len}")]
    CoordinateLength { field: &'static str, len: usize },

    #[error("{field} contains a non-finite component")]
    NonFiniteCoordinate { field: &'static str },

    #[error("entity id must not be empty")]
    EmptyId,

    #[error("{modality} embedding must not be empty")]
    EmptyEmbedding { modality: Modality },

    #[error("{modality} embedding contains a non-finite component")]
    NonFiniteEmbedding { modality: Modality },

    #[error("{entity_id} supplies no embedding; expected one of: {expected}")]
    MissingEmbedding {
        entity_id: String,
        expected: &'static str,
    },

    #[error("radius must be a finite, non-negative number, got {0}")]
    InvalidRadius(f64),

    #[error("unknown modality: {0:?}")]
    UnknownModality(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// EntityKind / Modality
// ─────────────────────────────────────────────────────────────────────────────

/// The three kinds of physical entity the memory tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Object,
    Scene,
    Person,
}

impl EntityKind {
    /// Modalities this kind may supply, in point-lookup priority order.
    pub fn modalities(self) -> &'static [Modality] {
        match self {
            EntityKind::Object => &[Modality::Image, Modality::Location],
            EntityKind::Scene => &[Modality::Scene],
            EntityKind::Person => &[Modality::Face, Modality::Pose],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Object => "object",
            EntityKind::Scene => "scene",
            EntityKind::Person => "person",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named embedding space.
///
/// Every modality belongs to exactly one [`EntityKind`] and is persisted in
/// its own collection (see [`Modality::collection_name`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Object visual appearance.
    Image,
    /// Object spatial context.
    Location,
    /// Whole-scene appearance.
    Scene,
    /// Facial identity.
    Face,
    /// Body pose.
    Pose,
}

impl Modality {
    pub const ALL: [Modality; 5] = [
        Modality::Image,
        Modality::Location,
        Modality::Scene,
        Modality::Face,
        Modality::Pose,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Image => "image",
            Modality::Location => "location",
            Modality::Scene => "scene",
            Modality::Face => "face",
            Modality::Pose => "pose",
        }
    }

    /// The entity kind that owns this modality.
    pub fn kind(self) -> EntityKind {
        match self {
            Modality::Image | Modality::Location => EntityKind::Object,
            Modality::Scene => EntityKind::Scene,
            Modality::Face | Modality::Pose => EntityKind::Person,
        }
    }

    /// Stable name of the collection holding this modality's entries.
    pub fn collection_name(self) -> &'static str {
        match self {
            Modality::Image => "objects_image",
            Modality::Location => "objects_location",
            Modality::Scene => "scenes",
            Modality::Face => "people_face",
            Modality::Pose => "people_pose",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Modality::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownModality(s.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CompositeKey
// ─────────────────────────────────────────────────────────────────────────────

/// Physical storage key of one entity's one modality entry:
/// `<entity_id>::<modality>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    entity_id: String,
    modality: Modality,
}

impl CompositeKey {
    pub fn new(entity_id: impl Into<String>, modality: Modality) -> Self {
        Self {
            entity_id: entity_id.into(),
            modality,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// Split a stored key back into its parts.
    ///
    /// The split happens at the *last* separator, so entity ids that
    /// themselves contain `::` survive the round-trip.
    pub fn parse(key: &str) -> Option<Self> {
        let (entity_id, modality) = key.rsplit_once(KEY_SEPARATOR)?;
        let modality = modality.parse().ok()?;
        Some(Self::new(entity_id, modality))
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.entity_id, KEY_SEPARATOR, self.modality)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Xyz
// ─────────────────────────────────────────────────────────────────────────────

/// A 3-D position in the robot's world frame (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Xyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Xyz {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Validate a raw coordinate slice coming from perception.
    ///
    /// `field` names the offending record field in the error.
    pub fn from_slice(field: &'static str, xyz: &[f64]) -> Result<Self, ValidationError> {
        let [x, y, z] = xyz else {
            return Err(ValidationError::CoordinateLength {
                field,
                len: xyz.len(),
            });
        };
        if !(x.is_finite() && y.is_finite() && z.is_finite()) {
            return Err(ValidationError::NonFiniteCoordinate { field });
        }
        Ok(Self::new(*x, *y, *z))
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: &Xyz) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Xyz {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl From<(f64, f64, f64)> for Xyz {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Self::new(x, y, z)
    }
}

impl From<Xyz> for (f64, f64, f64) {
    fn from(p: Xyz) -> Self {
        (p.x, p.y, p.z)
    }
}

impl fmt::Display for Xyz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Reject an embedding (stored or used as a query) that carries no
/// components or any NaN / infinite component.
pub fn validate_embedding(modality: Modality, embedding: &[f32]) -> Result<(), ValidationError> {
    if embedding.is_empty() {
        Err(ValidationError::EmptyEmbedding { modality })
    } else if !embedding.iter().all(|v| v.is_finite()) {
        Err(ValidationError::NonFiniteEmbedding { modality })
    } else {
        Ok(())
    }
}

fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        Err(ValidationError::EmptyId)
    } else {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// A detected physical object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub object_id: String,
    /// Position of the object; must hold exactly three components.
    pub object_xyz: Vec<f64>,
    /// Opaque reference to the stored crop (e.g. `"images/mug_01.png"`).
    pub object_image_ref: String,
    /// Appearance-space embedding.
    pub object_embedding: Vec<f32>,
    /// Spatial-context embedding.
    pub location_embedding: Vec<f32>,
    /// Scene this object was observed in, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<String>,
}

impl ObjectRecord {
    /// Validate id, coordinates, and both embeddings.
    pub fn validate(&self) -> Result<Xyz, ValidationError> {
        validate_id(&self.object_id)?;
        let xyz = Xyz::from_slice("object_xyz", &self.object_xyz)?;
        validate_embedding(Modality::Image, &self.object_embedding)?;
        validate_embedding(Modality::Location, &self.location_embedding)?;
        Ok(xyz)
    }

    /// The scene reference, treating an empty string as "no scene".
    pub fn scene(&self) -> Option<&str> {
        self.scene_id.as_deref().filter(|s| !s.is_empty())
    }
}

/// A captured scene with its SLAM pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub scene_id: String,
    /// SLAM position; must hold exactly three components.
    pub scene_xyz: Vec<f64>,
    pub scene_image_ref: String,
    pub scene_embedding: Vec<f32>,
}

impl SceneRecord {
    pub fn validate(&self) -> Result<Xyz, ValidationError> {
        validate_id(&self.scene_id)?;
        let xyz = Xyz::from_slice("scene_xyz", &self.scene_xyz)?;
        validate_embedding(Modality::Scene, &self.scene_embedding)?;
        Ok(xyz)
    }
}

/// A detected person. At least one of the face or pose embeddings must be
/// present for the person to be retrievable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub person_id: String,
    pub people_xyz: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose_embedding: Option<Vec<f32>>,
    /// Observation timestamp as supplied by perception.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    /// Opaque reference into the chat-history store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history_ref: Option<String>,
}

impl PersonRecord {
    pub fn validate(&self) -> Result<Xyz, ValidationError> {
        validate_id(&self.person_id)?;
        let xyz = Xyz::from_slice("people_xyz", &self.people_xyz)?;
        if self.face_embedding.is_none() && self.pose_embedding.is_none() {
            return Err(ValidationError::MissingEmbedding {
                entity_id: self.person_id.clone(),
                expected: "face_embedding, pose_embedding",
            });
        }
        if let Some(face) = &self.face_embedding {
            validate_embedding(Modality::Face, face)?;
        }
        if let Some(pose) = &self.pose_embedding {
            validate_embedding(Modality::Pose, pose)?;
        }
        Ok(xyz)
    }
}
