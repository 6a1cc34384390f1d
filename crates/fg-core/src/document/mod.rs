//! Host document abstraction
//!
//! The engine never owns geometry. Everything it knows about bodies, faces,
//! edges, vertices, features and sketches comes through [`HostDocument`],
//! which a CAD host adapter (or the in-memory simulator) implements.
//!
//! Queries are fail-soft: each returns `None` when the host cannot answer,
//! and callers treat a missing answer as "this candidate lacks that metric".
//! Only mutations return errors.

mod memory;

pub use memory::{Fault, MemoryDocument};

use glam::DVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feature::FeatureOp;
use crate::geometry::{BoundingBox, ConstructionPlane};
use crate::units::LengthUnit;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);
    };
}

handle_type!(
    /// Handle of a body in the host document
    BodyId
);
handle_type!(
    /// Handle of a face
    FaceId
);
handle_type!(
    /// Handle of an edge
    EdgeId
);
handle_type!(
    /// Handle of a vertex
    VertexId
);
handle_type!(
    /// Handle of a timeline feature
    FeatureId
);
handle_type!(
    /// Handle of a sketch
    SketchId
);
handle_type!(
    /// Handle of a sketch curve
    CurveId
);

/// Any entity that carries an identity token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Body(BodyId),
    Face(FaceId),
    Edge(EdgeId),
    Vertex(VertexId),
    Feature(FeatureId),
    Sketch(SketchId),
    Curve(CurveId),
}

/// Physical properties in internal units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhysicalProperties {
    /// Volume in internal units³
    pub volume: Option<f64>,
    /// Surface area in internal units²
    pub area: Option<f64>,
    /// Mass in kilograms
    pub mass: Option<f64>,
    /// Density in kg per internal unit³
    pub density: Option<f64>,
}

/// Where a new sketch is placed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SketchPlacement {
    /// Origin construction plane, optionally offset to pass through `origin`
    Plane {
        plane: ConstructionPlane,
        origin: Option<DVec3>,
    },
    /// On a planar face
    Face(FaceId),
}

/// Error raised by a host mutation
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
    /// Feature left behind by a partially successful operation
    pub partial: Option<FeatureId>,
}

impl HostError {
    /// Create a new host error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            partial: None,
        }
    }

    /// Attach a partially created feature that must be cleaned up
    pub fn with_partial(mut self, feature: FeatureId) -> Self {
        self.partial = Some(feature);
        self
    }
}

/// Result type for host mutations
pub type HostResult<T> = Result<T, HostError>;

/// The document and geometry provider consumed by the engine.
///
/// All lengths are in the host's internal unit; the engine converts with
/// [`crate::units::UnitScale`].
pub trait HostDocument: Send + Sync {
    /// Name of the open document
    fn name(&self) -> &str;

    /// Internal length unit, if the host reports one
    fn internal_units(&self) -> Option<LengthUnit>;

    /// Convert a length in internal units to millimetres
    fn convert_length_to_mm(&self, value: f64) -> Option<f64>;

    // ========== Bodies ==========

    /// All bodies, including hidden and non-solid ones
    fn bodies(&self) -> Vec<BodyId>;
    fn body_name(&self, body: BodyId) -> Option<String>;
    fn body_is_solid(&self, body: BodyId) -> Option<bool>;
    fn body_is_visible(&self, body: BodyId) -> Option<bool>;
    fn body_faces(&self, body: BodyId) -> Option<Vec<FaceId>>;
    fn body_edges(&self, body: BodyId) -> Option<Vec<EdgeId>>;
    fn body_vertices(&self, body: BodyId) -> Option<Vec<VertexId>>;
    fn body_bounding_box(&self, body: BodyId) -> Option<BoundingBox>;
    fn body_physical(&self, body: BodyId) -> Option<PhysicalProperties>;

    // ========== Faces ==========

    fn face_body(&self, face: FaceId) -> Option<BodyId>;
    fn face_is_planar(&self, face: FaceId) -> Option<bool>;
    fn face_centroid(&self, face: FaceId) -> Option<DVec3>;
    fn face_area(&self, face: FaceId) -> Option<f64>;
    /// Surface normal; only defined for planar faces
    fn face_normal(&self, face: FaceId) -> Option<DVec3>;
    fn face_bounding_box(&self, face: FaceId) -> Option<BoundingBox>;
    fn face_edges(&self, face: FaceId) -> Option<Vec<EdgeId>>;

    // ========== Edges and vertices ==========

    fn edge_body(&self, edge: EdgeId) -> Option<BodyId>;
    fn edge_length(&self, edge: EdgeId) -> Option<f64>;
    fn edge_midpoint(&self, edge: EdgeId) -> Option<DVec3>;
    /// Start and end vertices
    fn edge_vertices(&self, edge: EdgeId) -> Option<(VertexId, VertexId)>;
    fn vertex_point(&self, vertex: VertexId) -> Option<DVec3>;

    /// Stable identity token of an entity
    fn entity_token(&self, entity: EntityRef) -> Option<String>;

    // ========== Timeline ==========

    /// Features in timeline order
    fn features(&self) -> Vec<FeatureId>;
    /// Feature type name, e.g. `ExtrudeFeature`
    fn feature_kind(&self, feature: FeatureId) -> Option<String>;
    fn feature_name(&self, feature: FeatureId) -> Option<String>;
    /// Name of the body the feature belongs to
    fn feature_body_name(&self, feature: FeatureId) -> Option<String>;
    fn feature_timeline_index(&self, feature: FeatureId) -> Option<usize>;

    // ========== Sketches ==========

    fn sketches(&self) -> Vec<SketchId>;
    fn sketch_name(&self, sketch: SketchId) -> Option<String>;
    fn sketch_curves(&self, sketch: SketchId) -> Option<Vec<CurveId>>;
    /// Closed profiles, each listed by the curves that bound it
    fn sketch_profiles(&self, sketch: SketchId) -> Option<Vec<Vec<CurveId>>>;

    // ========== Mutations ==========

    /// Recompute the whole model
    fn recompute(&mut self) -> HostResult<()>;

    /// Create a timeline feature; `op` is expressed in internal units
    fn create_feature(&mut self, op: &FeatureOp) -> HostResult<FeatureId>;

    fn delete_feature(&mut self, feature: FeatureId) -> HostResult<()>;

    fn create_sketch(
        &mut self,
        placement: SketchPlacement,
        name: Option<&str>,
    ) -> HostResult<SketchId>;

    /// Add a line between two sketch-plane points
    fn sketch_add_line(&mut self, sketch: SketchId, start: DVec3, end: DVec3)
    -> HostResult<CurveId>;

    /// Add an axis-aligned rectangle from two opposite sketch-plane corners
    fn sketch_add_rectangle(
        &mut self,
        sketch: SketchId,
        corner1: DVec3,
        corner2: DVec3,
    ) -> HostResult<Vec<CurveId>>;

    fn sketch_add_circle(
        &mut self,
        sketch: SketchId,
        center: DVec3,
        radius: f64,
    ) -> HostResult<CurveId>;
}
