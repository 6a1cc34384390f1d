//! In-memory host document
//!
//! Models every body as an axis-aligned box plus "details" (extra faces and
//! edges left behind by holes, fillets, pockets and shells). Features are kept
//! as an ordered history and the model is rebuilt from the base bodies on
//! recompute or delete, so deleting a feature restores the geometry it changed.
//!
//! Used as the offline host of the command server and by the tests.

use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;

use glam::{DQuat, DVec2, DVec3};
use uuid::Uuid;

use super::{
    BodyId, CurveId, EdgeId, EntityRef, FaceId, FeatureId, HostDocument, HostError, HostResult,
    PhysicalProperties, SketchId, SketchPlacement, VertexId,
};
use crate::feature::{BooleanOp, Extent, FeatureBase, FeatureOp, MirrorPlane, RevolveAxis};
use crate::geometry::{Axis, BoundingBox};
use crate::units::LengthUnit;

const INDEX_BITS: u32 = 20;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const BOX_FACES: usize = 6;
const BOX_EDGES: usize = 12;
const BOX_VERTICES: usize = 8;
/// Depth used for through-all extrudes, in internal units
const THROUGH_ALL_LENGTH: f64 = 1000.0;
/// Steel, kg/cm³
const DEFAULT_DENSITY: f64 = 7.85e-3;

fn pack(body: BodyId, index: usize) -> u64 {
    (body.0 << INDEX_BITS) | index as u64
}

fn unpack(raw: u64) -> (BodyId, usize) {
    (BodyId(raw >> INDEX_BITS), (raw & INDEX_MASK) as usize)
}

/// Failures the document can be told to produce on its next operations
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// The next `create_feature` raises; optionally leaving a partial feature behind
    FailApply { message: String, leave_partial: bool },
    /// The next `recompute` raises
    FailRecompute,
    /// The next `delete_feature` raises
    FailDelete,
    /// The next created feature also adds this many faces
    ExtraFaces(u32),
    /// The next created feature also adds this many bodies
    ExtraBodies(u32),
}

// ============== Geometry records ==============

#[derive(Debug, Clone, PartialEq)]
struct FaceGeom {
    centroid: DVec3,
    /// `None` for curved faces
    normal: Option<DVec3>,
    area: f64,
    bounds: BoundingBox,
}

#[derive(Debug, Clone, PartialEq)]
struct EdgeGeom {
    start: DVec3,
    end: DVec3,
    midpoint: DVec3,
    length: f64,
}

impl EdgeGeom {
    fn straight(start: DVec3, end: DVec3) -> Self {
        Self {
            start,
            end,
            midpoint: (start + end) * 0.5,
            length: start.distance(end),
        }
    }

    /// Closed circular seam, represented by one point on the circle
    fn seam(point: DVec3, midpoint: DVec3, length: f64) -> Self {
        Self {
            start: point,
            end: point,
            midpoint,
            length,
        }
    }
}

/// Extra topology attached to a body by a feature
#[derive(Debug, Clone, PartialEq, Default)]
struct Detail {
    faces: Vec<FaceGeom>,
    edges: Vec<EdgeGeom>,
    removed_volume: f64,
}

impl Detail {
    fn mapped(&self, point: &dyn Fn(DVec3) -> DVec3, dir: &dyn Fn(DVec3) -> DVec3) -> Detail {
        Detail {
            faces: self
                .faces
                .iter()
                .map(|f| FaceGeom {
                    centroid: point(f.centroid),
                    normal: f.normal.map(dir),
                    area: f.area,
                    bounds: map_box(&f.bounds, point),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| EdgeGeom {
                    start: point(e.start),
                    end: point(e.end),
                    midpoint: point(e.midpoint),
                    length: e.length,
                })
                .collect(),
            removed_volume: self.removed_volume,
        }
    }
}

fn box_vertex(bounds: &BoundingBox, v: usize) -> DVec3 {
    DVec3::new(
        if v & 1 == 0 { bounds.min.x } else { bounds.max.x },
        if v & 2 == 0 { bounds.min.y } else { bounds.max.y },
        if v & 4 == 0 { bounds.min.z } else { bounds.max.z },
    )
}

/// Vertex indices of box edge `e`; edges 0..4 run along X, 4..8 along Y, 8..12 along Z
fn box_edge_vertices(e: usize) -> (usize, usize) {
    let axis = e / 4;
    let k = e % 4;
    let others: [usize; 2] = match axis {
        0 => [1, 2],
        1 => [0, 2],
        _ => [0, 1],
    };
    let start = ((k & 1) << others[0]) | (((k >> 1) & 1) << others[1]);
    (start, start | (1 << axis))
}

fn box_face_edges(face: usize) -> Vec<usize> {
    let axis = face / 2;
    let side = face % 2;
    (0..BOX_EDGES)
        .filter(|&e| {
            let (a, b) = box_edge_vertices(e);
            (a >> axis) & 1 == side && (b >> axis) & 1 == side
        })
        .collect()
}

fn box_face(bounds: &BoundingBox, face: usize) -> FaceGeom {
    let axis = Axis::ALL[face / 2];
    let i = axis.index();
    let positive = face % 2 == 1;
    let coord = if positive { bounds.max[i] } else { bounds.min[i] };
    let mut min = bounds.min;
    let mut max = bounds.max;
    min[i] = coord;
    max[i] = coord;
    let size = bounds.size();
    let mut centroid = bounds.center();
    centroid[i] = coord;
    FaceGeom {
        centroid,
        normal: Some(if positive { axis.unit() } else { -axis.unit() }),
        area: size[(i + 1) % 3] * size[(i + 2) % 3],
        bounds: BoundingBox { min, max },
    }
}

fn map_box(bounds: &BoundingBox, point: &dyn Fn(DVec3) -> DVec3) -> BoundingBox {
    BoundingBox::from_points((0..BOX_VERTICES).map(|v| point(box_vertex(bounds, v))))
        .unwrap_or(*bounds)
}

fn touches(a: &BoundingBox, b: &BoundingBox) -> bool {
    (0..3).all(|i| a.min[i] <= b.max[i] && b.min[i] <= a.max[i])
}

/// Faces and edges of a box-shaped cavity; faces in `open` are left out
fn cavity_detail(inner: &BoundingBox, open: [bool; BOX_FACES], removed_volume: f64) -> Detail {
    let faces = (0..BOX_FACES)
        .filter(|&f| !open[f])
        .map(|f| {
            let mut face = box_face(inner, f);
            face.normal = face.normal.map(|n| -n);
            face
        })
        .collect();
    let edges = (0..BOX_EDGES)
        .map(|e| {
            let (a, b) = box_edge_vertices(e);
            EdgeGeom::straight(box_vertex(inner, a), box_vertex(inner, b))
        })
        .collect();
    Detail {
        faces,
        edges,
        removed_volume,
    }
}

/// Two unit vectors spanning the plane with the given normal
fn plane_basis(normal: DVec3) -> (DVec3, DVec3) {
    let a = normal.abs();
    if a.z >= a.x && a.z >= a.y {
        (DVec3::X, DVec3::Y)
    } else if a.x >= a.y {
        (DVec3::Y, DVec3::Z)
    } else {
        (DVec3::X, DVec3::Z)
    }
}

// ============== Bodies ==============

#[derive(Debug, Clone, PartialEq)]
struct Shape {
    bounds: BoundingBox,
    visible: bool,
    solid: bool,
    density: f64,
    open_faces: [bool; BOX_FACES],
    details: Vec<Detail>,
}

impl Shape {
    fn new(bounds: BoundingBox) -> Self {
        Self {
            bounds,
            visible: true,
            solid: true,
            density: DEFAULT_DENSITY,
            open_faces: [false; BOX_FACES],
            details: Vec::new(),
        }
    }

    fn detail_faces(&self) -> impl Iterator<Item = (usize, &FaceGeom)> {
        self.details
            .iter()
            .enumerate()
            .flat_map(|(d, detail)| detail.faces.iter().map(move |f| (d, f)))
    }

    fn detail_edges(&self) -> impl Iterator<Item = &EdgeGeom> {
        self.details.iter().flat_map(|d| d.edges.iter())
    }

    fn face_indices(&self) -> Vec<usize> {
        let extra = self.detail_faces().count();
        (0..BOX_FACES)
            .filter(|&f| !self.open_faces[f])
            .chain(BOX_FACES..BOX_FACES + extra)
            .collect()
    }

    fn edge_count(&self) -> usize {
        BOX_EDGES + self.detail_edges().count()
    }

    fn vertex_count(&self) -> usize {
        BOX_VERTICES + 2 * self.detail_edges().count()
    }

    fn face(&self, index: usize) -> Option<FaceGeom> {
        if index < BOX_FACES {
            (!self.open_faces[index]).then(|| box_face(&self.bounds, index))
        } else {
            self.detail_faces()
                .nth(index - BOX_FACES)
                .map(|(_, f)| f.clone())
        }
    }

    fn face_edge_indices(&self, index: usize) -> Option<Vec<usize>> {
        if index < BOX_FACES {
            return (!self.open_faces[index]).then(|| box_face_edges(index));
        }
        let (detail, _) = self.detail_faces().nth(index - BOX_FACES)?;
        let offset = BOX_EDGES
            + self.details[..detail]
                .iter()
                .map(|d| d.edges.len())
                .sum::<usize>();
        Some((offset..offset + self.details[detail].edges.len()).collect())
    }

    fn edge(&self, index: usize) -> Option<EdgeGeom> {
        if index < BOX_EDGES {
            let (a, b) = box_edge_vertices(index);
            Some(EdgeGeom::straight(
                box_vertex(&self.bounds, a),
                box_vertex(&self.bounds, b),
            ))
        } else {
            self.detail_edges().nth(index - BOX_EDGES).cloned()
        }
    }

    fn edge_vertex_indices(&self, index: usize) -> Option<(usize, usize)> {
        if index < BOX_EDGES {
            Some(box_edge_vertices(index))
        } else if index < self.edge_count() {
            let k = index - BOX_EDGES;
            Some((BOX_VERTICES + 2 * k, BOX_VERTICES + 2 * k + 1))
        } else {
            None
        }
    }

    fn vertex(&self, index: usize) -> Option<DVec3> {
        if index < BOX_VERTICES {
            return Some(box_vertex(&self.bounds, index));
        }
        let k = index - BOX_VERTICES;
        let edge = self.detail_edges().nth(k / 2)?;
        Some(if k % 2 == 0 { edge.start } else { edge.end })
    }

    fn volume(&self) -> f64 {
        let removed: f64 = self.details.iter().map(|d| d.removed_volume).sum();
        (self.bounds.volume() - removed).max(0.0)
    }

    fn area(&self) -> f64 {
        self.face_indices()
            .into_iter()
            .filter_map(|f| self.face(f))
            .map(|f| f.area)
            .sum()
    }

    fn mapped(&self, point: &dyn Fn(DVec3) -> DVec3, dir: &dyn Fn(DVec3) -> DVec3) -> Shape {
        Shape {
            bounds: map_box(&self.bounds, point),
            details: self.details.iter().map(|d| d.mapped(point, dir)).collect(),
            ..self.clone()
        }
    }
}

// ============== Sketches ==============

#[derive(Debug, Clone, Copy, PartialEq)]
struct Frame {
    origin: DVec3,
    u: DVec3,
    v: DVec3,
    normal: DVec3,
}

impl Frame {
    fn to_model(&self, p: DVec2) -> DVec3 {
        self.origin + self.u * p.x + self.v * p.y
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CurveShape {
    Line { start: DVec2, end: DVec2 },
    Circle { center: DVec2, radius: f64 },
}

#[derive(Debug, Clone)]
struct SketchRecord {
    id: SketchId,
    name: String,
    frame: Frame,
    curves: Vec<(CurveId, CurveShape)>,
    profiles: Vec<Vec<CurveId>>,
}

impl SketchRecord {
    /// Corners of a profile's bounding rectangle, in model space
    fn profile_corners(&self, index: usize) -> Option<Vec<DVec3>> {
        let profile = self.profiles.get(index)?;
        let mut points = Vec::new();
        for curve in profile {
            let (_, shape) = self.curves.iter().find(|(id, _)| id == curve)?;
            match *shape {
                CurveShape::Line { start, end } => points.extend([start, end]),
                CurveShape::Circle { center, radius } => {
                    points.extend([center - DVec2::splat(radius), center + DVec2::splat(radius)])
                }
            }
        }
        let first = *points.first()?;
        let (lo, hi) = points
            .iter()
            .fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
        Some(
            [
                DVec2::new(lo.x, lo.y),
                DVec2::new(hi.x, lo.y),
                DVec2::new(hi.x, hi.y),
                DVec2::new(lo.x, hi.y),
            ]
            .into_iter()
            .map(|p| self.frame.to_model(p))
            .collect(),
        )
    }
}

// ============== Features ==============

#[derive(Debug, Clone)]
struct FeatureRecord {
    id: FeatureId,
    name: String,
    op: FeatureOp,
    /// Partially created features take no part in rebuilds
    suppressed: bool,
    extra_faces: u32,
    extra_bodies: u32,
}

/// What a feature added during the last rebuild
#[derive(Debug, Clone, Default)]
struct Produced {
    bodies: Vec<BodyId>,
    details: Vec<(BodyId, Detail)>,
    touched: Vec<BodyId>,
}

type Model = BTreeMap<BodyId, Shape>;

/// In-memory [`HostDocument`] backed by box geometry and a replayable history
#[derive(Debug)]
pub struct MemoryDocument {
    name: String,
    unit: LengthUnit,
    conversion_available: bool,
    base: Model,
    model: Model,
    features: Vec<FeatureRecord>,
    produced: HashMap<FeatureId, Produced>,
    sketches: Vec<SketchRecord>,
    tokens: HashMap<EntityRef, String>,
    names: HashMap<BodyId, String>,
    created_ids: HashMap<(FeatureId, usize), BodyId>,
    kind_counters: HashMap<&'static str, u32>,
    body_counter: u32,
    next_id: u64,
    faults: Vec<Fault>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

impl MemoryDocument {
    /// Create an empty document with centimetre internal units
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: LengthUnit::Centimeter,
            conversion_available: true,
            base: Model::new(),
            model: Model::new(),
            features: Vec::new(),
            produced: HashMap::new(),
            sketches: Vec::new(),
            tokens: HashMap::new(),
            names: HashMap::new(),
            created_ids: HashMap::new(),
            kind_counters: HashMap::new(),
            body_counter: 0,
            next_id: 0,
            faults: Vec::new(),
        }
    }

    /// Use a different internal unit
    pub fn with_unit(mut self, unit: LengthUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Make `convert_length_to_mm` unavailable, as some hosts do
    pub fn without_conversion(mut self) -> Self {
        self.conversion_available = false;
        self
    }

    /// Add a box body from two corners in internal units
    pub fn add_box(&mut self, name: &str, min: DVec3, max: DVec3) -> BodyId {
        let id = BodyId(self.alloc_id());
        self.ensure_token(EntityRef::Body(id));
        self.body_counter += 1;
        self.names.insert(id, name.to_string());
        let shape = Shape::new(BoundingBox::new(min, max));
        self.base.insert(id, shape.clone());
        self.model.insert(id, shape);
        id
    }

    pub fn set_visible(&mut self, body: BodyId, visible: bool) {
        self.edit_base(body, |s| s.visible = visible);
    }

    pub fn set_solid(&mut self, body: BodyId, solid: bool) {
        self.edit_base(body, |s| s.solid = solid);
    }

    /// Density in kg per internal unit³
    pub fn set_density(&mut self, body: BodyId, density: f64) {
        self.edit_base(body, |s| s.density = density);
    }

    /// Queue a fault for the next matching operation
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    /// Body with the given name in the current model
    pub fn body_by_name(&self, name: &str) -> Option<BodyId> {
        self.model
            .keys()
            .copied()
            .find(|id| self.names.get(id).is_some_and(|n| n == name))
    }

    fn edit_base(&mut self, body: BodyId, edit: impl Fn(&mut Shape)) {
        if let Some(shape) = self.base.get_mut(&body) {
            edit(shape);
        }
        if let Some(shape) = self.model.get_mut(&body) {
            edit(shape);
        }
    }

    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_token(&mut self, entity: EntityRef) -> String {
        self.tokens
            .entry(entity)
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    fn take_fault(&mut self, matches: impl Fn(&Fault) -> bool) -> Option<Fault> {
        let pos = self.faults.iter().position(matches)?;
        Some(self.faults.remove(pos))
    }

    fn shape(&self, body: BodyId) -> Option<&Shape> {
        self.model.get(&body)
    }

    fn sketch(&self, sketch: SketchId) -> Option<&SketchRecord> {
        self.sketches.iter().find(|s| s.id == sketch)
    }

    fn sketch_mut(&mut self, sketch: SketchId) -> HostResult<&mut SketchRecord> {
        self.sketches
            .iter_mut()
            .find(|s| s.id == sketch)
            .ok_or_else(|| HostError::new(format!("Sketch {} not found", sketch.0)))
    }

    fn add_curve(&mut self, sketch: SketchId, shape: CurveShape) -> HostResult<CurveId> {
        let id = CurveId(self.alloc_id());
        self.ensure_token(EntityRef::Curve(id));
        self.sketch_mut(sketch)?.curves.push((id, shape));
        Ok(id)
    }

    // ============== History ==============

    /// Rebuild the model from the base bodies and the feature history
    fn rebuild(&mut self) {
        let records = self.features.clone();
        let mut model = self.base.clone();
        self.produced.clear();
        for record in records.iter().filter(|r| !r.suppressed) {
            match self.apply_record(&mut model, record) {
                Ok(produced) => {
                    self.produced.insert(record.id, produced);
                }
                Err(e) => tracing::warn!("Feature {} failed: {}", record.name, e),
            }
        }
        self.model = model;
    }

    fn apply_record(&mut self, model: &mut Model, record: &FeatureRecord) -> HostResult<Produced> {
        let mut produced = Produced::default();
        match &record.op {
            FeatureOp::FaceExtrude {
                face,
                distance,
                direction,
                operation,
            } => {
                let (body, index, geom) = planar_face(model, *face)?;
                if index >= BOX_FACES {
                    return Err(HostError::new("Face extrude requires an outer face"));
                }
                let normal = geom.normal.unwrap_or(DVec3::Z);
                let tip = geom.centroid + normal * direction.sign() * *distance;
                let bounds = model[&body].bounds;
                let axis = index / 2;
                let mut min = bounds.min;
                let mut max = bounds.max;
                min[axis] = geom.centroid[axis].min(tip[axis]);
                max[axis] = geom.centroid[axis].max(tip[axis]);
                let tool = BoundingBox { min, max };
                self.combine(model, record.id, *operation, tool, vec![body], &mut produced)?;
            }
            FeatureOp::ProfileExtrude {
                sketch,
                profile_index,
                extent,
                direction,
                operation,
                target,
            } => {
                let record_sketch = self
                    .sketch(*sketch)
                    .ok_or_else(|| HostError::new("Sketch not found"))?;
                let corners = record_sketch
                    .profile_corners(*profile_index)
                    .ok_or_else(|| HostError::new("Profile not found"))?;
                let depth = extent.distance().unwrap_or(THROUGH_ALL_LENGTH);
                let offset = record_sketch.frame.normal * direction.sign() * depth;
                let tool = BoundingBox::from_points(
                    corners.iter().copied().chain(corners.iter().map(|c| *c + offset)),
                )
                .ok_or_else(|| HostError::new("Empty profile"))?;
                let targets = combine_targets(model, *operation, &tool, *target)?;
                self.combine(model, record.id, *operation, tool, targets, &mut produced)?;
            }
            FeatureOp::Fillet { edges, radius } => {
                if edges.is_empty() {
                    return Err(HostError::new("No edges to fillet"));
                }
                for edge in edges {
                    let (body, index) = unpack(edge.0);
                    let shape = model
                        .get(&body)
                        .ok_or_else(|| HostError::new("Edge not found"))?;
                    let geom = shape
                        .edge(index)
                        .ok_or_else(|| HostError::new("Edge not found"))?;
                    let size = shape.bounds.size();
                    if *radius * 2.0 >= size.min_element() {
                        return Err(HostError::new("Fillet radius is too large for the body"));
                    }
                    let inward = (shape.bounds.center() - geom.midpoint).normalize_or_zero();
                    let shift = inward * *radius;
                    let face = FaceGeom {
                        centroid: geom.midpoint + shift * 0.3,
                        normal: None,
                        area: geom.length * *radius * PI / 2.0,
                        bounds: BoundingBox::new(geom.start, geom.end + shift),
                    };
                    let detail = Detail {
                        faces: vec![face],
                        edges: vec![
                            EdgeGeom::straight(geom.start + shift, geom.end + shift),
                            EdgeGeom::straight(
                                geom.start + shift * 0.5,
                                geom.end + shift * 0.5,
                            ),
                        ],
                        removed_volume: (1.0 - PI / 4.0) * *radius * *radius * geom.length,
                    };
                    attach(model, body, detail, &mut produced);
                }
            }
            FeatureOp::Hole {
                face,
                center,
                diameter,
                extent,
            } => {
                let (body, _, geom) = planar_face(model, *face)?;
                let normal = geom.normal.unwrap_or(DVec3::Z);
                let bounds = model[&body].bounds;
                let body_depth = (bounds.size() * normal.abs()).element_sum();
                let depth = extent.distance().unwrap_or(body_depth).min(body_depth);
                let radius = *diameter / 2.0;
                let in_plane = geom.bounds.size();
                let (u, v) = plane_basis(normal);
                if *diameter >= (in_plane * u).length().min((in_plane * v).length()) {
                    return Err(HostError::new("Hole diameter exceeds the face"));
                }
                // project the requested center onto the face plane
                let top = *center - normal * (*center - geom.centroid).dot(normal);
                let bottom = top - normal * depth;
                let mut detail = Detail {
                    faces: vec![FaceGeom {
                        centroid: (top + bottom) * 0.5,
                        normal: None,
                        area: PI * *diameter * depth,
                        bounds: BoundingBox::new(
                            top - (u + v) * radius,
                            bottom + (u + v) * radius,
                        ),
                    }],
                    edges: vec![
                        EdgeGeom::seam(top + u * radius, top, PI * *diameter),
                        EdgeGeom::seam(bottom + u * radius, bottom, PI * *diameter),
                    ],
                    removed_volume: PI * radius * radius * depth,
                };
                if depth < body_depth {
                    detail.faces.push(FaceGeom {
                        centroid: bottom,
                        normal: Some(normal),
                        area: PI * radius * radius,
                        bounds: BoundingBox::new(bottom - (u + v) * radius, bottom + (u + v) * radius),
                    });
                }
                attach(model, body, detail, &mut produced);
            }
            FeatureOp::Shell {
                body,
                remove_faces,
                thickness,
                inside,
            } => {
                let shape = model
                    .get_mut(body)
                    .ok_or_else(|| HostError::new("Body not found"))?;
                if shape.open_faces.iter().any(|o| *o) {
                    return Err(HostError::new("Body is already shelled"));
                }
                let mut open = [false; BOX_FACES];
                for face in remove_faces {
                    let (owner, index) = unpack(face.0);
                    if owner != *body || index >= BOX_FACES {
                        return Err(HostError::new("Shell can only remove outer faces of the body"));
                    }
                    open[index] = true;
                }
                let mut outer = shape.bounds;
                let mut inner = shape.bounds;
                for f in (0..BOX_FACES).filter(|f| !open[*f]) {
                    let axis = f / 2;
                    let positive = f % 2 == 1;
                    let (grow, shrink) = if positive {
                        (*thickness, -*thickness)
                    } else {
                        (-*thickness, *thickness)
                    };
                    if *inside {
                        if positive {
                            inner.max[axis] += shrink;
                        } else {
                            inner.min[axis] += shrink;
                        }
                    } else if positive {
                        outer.max[axis] += grow;
                    } else {
                        outer.min[axis] += grow;
                    }
                }
                let size = inner.size();
                if size.min_element() <= 0.0 {
                    return Err(HostError::new("Shell thickness is too large for the body"));
                }
                shape.bounds = outer;
                shape.open_faces = open;
                let detail = cavity_detail(&inner, open, inner.volume());
                attach(model, *body, detail, &mut produced);
            }
            FeatureOp::RectangularPattern {
                base,
                axis1,
                count1,
                spacing1,
                axis2,
                count2,
                spacing2,
            } => {
                let mut offsets = Vec::new();
                for i in 0..*count1 {
                    for j in 0..*count2 {
                        if i == 0 && j == 0 {
                            continue;
                        }
                        offsets.push(
                            axis1.unit() * *spacing1 * f64::from(i)
                                + axis2.unit() * *spacing2 * f64::from(j),
                        );
                    }
                }
                for offset in offsets {
                    let point = move |p: DVec3| p + offset;
                    self.replicate(model, record.id, *base, &point, &|d: DVec3| d, &mut produced)?;
                }
            }
            FeatureOp::CircularPattern {
                base,
                axis,
                count,
                angle_deg,
            } => {
                let full = *angle_deg >= 360.0 - 1e-9;
                let steps = if full { *count } else { count.saturating_sub(1).max(1) };
                let step = angle_deg.to_radians() / f64::from(steps);
                for k in 1..*count {
                    let rotation = DQuat::from_axis_angle(axis.unit(), step * f64::from(k));
                    let point = move |p: DVec3| rotation * p;
                    self.replicate(model, record.id, *base, &point, &point, &mut produced)?;
                }
            }
            FeatureOp::Mirror { base, plane } => {
                let (origin, normal) = match plane {
                    MirrorPlane::Construction(p) => (DVec3::ZERO, p.normal()),
                    MirrorPlane::Face(face) => {
                        let (_, _, geom) = planar_face(model, *face)?;
                        (geom.centroid, geom.normal.unwrap_or(DVec3::Z))
                    }
                };
                let point = move |p: DVec3| p - normal * 2.0 * (p - origin).dot(normal);
                let dir = move |d: DVec3| d - normal * 2.0 * d.dot(normal);
                self.replicate(model, record.id, *base, &point, &dir, &mut produced)?;
            }
            FeatureOp::Revolve {
                sketch,
                profile_index,
                axis,
                operation,
                ..
            } => {
                let corners = self
                    .sketch(*sketch)
                    .ok_or_else(|| HostError::new("Sketch not found"))?
                    .profile_corners(*profile_index)
                    .ok_or_else(|| HostError::new("Profile not found"))?;
                let (start, end) = match axis {
                    RevolveAxis::Line { start, end } => (*start, *end),
                    RevolveAxis::Edge(edge) => {
                        let (body, index) = unpack(edge.0);
                        let geom = model
                            .get(&body)
                            .and_then(|s| s.edge(index))
                            .ok_or_else(|| HostError::new("Axis edge not found"))?;
                        (geom.start, geom.end)
                    }
                };
                let dir = (end - start).normalize_or_zero();
                if dir == DVec3::ZERO {
                    return Err(HostError::new("Revolve axis has zero length"));
                }
                let mut t_min = f64::INFINITY;
                let mut t_max = f64::NEG_INFINITY;
                let mut radius: f64 = 0.0;
                for c in &corners {
                    let t = (*c - start).dot(dir);
                    t_min = t_min.min(t);
                    t_max = t_max.max(t);
                    radius = radius.max((*c - start - dir * t).length());
                }
                if radius <= 0.0 {
                    return Err(HostError::new("Profile lies on the revolve axis"));
                }
                let half = DVec3::new(
                    radius * (1.0 - dir.x * dir.x).max(0.0).sqrt(),
                    radius * (1.0 - dir.y * dir.y).max(0.0).sqrt(),
                    radius * (1.0 - dir.z * dir.z).max(0.0).sqrt(),
                );
                let a = start + dir * t_min;
                let b = start + dir * t_max;
                let tool = BoundingBox::new(a - half, a + half).union(&BoundingBox::new(b - half, b + half));
                let targets = combine_targets(model, *operation, &tool, None)?;
                self.combine(model, record.id, *operation, tool, targets, &mut produced)?;
            }
        }

        if record.extra_faces > 0 {
            let body = produced
                .touched
                .first()
                .or(produced.bodies.first())
                .copied()
                .or_else(|| model.keys().next().copied());
            if let Some(body) = body {
                let center = model[&body].bounds.center();
                let face = FaceGeom {
                    centroid: center,
                    normal: None,
                    area: 0.0,
                    bounds: BoundingBox::new(center, center),
                };
                let detail = Detail {
                    faces: vec![face; record.extra_faces as usize],
                    ..Detail::default()
                };
                attach(model, body, detail, &mut produced);
            }
        }
        for k in 0..record.extra_bodies {
            let origin = DVec3::new(100.0 + 2.0 * f64::from(k), 0.0, 0.0);
            let shape = Shape::new(BoundingBox::new(origin, origin + DVec3::ONE));
            self.spawn(model, record.id, shape, &mut produced);
        }
        Ok(produced)
    }

    /// Apply a boolean tool box to the targets
    fn combine(
        &mut self,
        model: &mut Model,
        feature: FeatureId,
        operation: BooleanOp,
        tool: BoundingBox,
        targets: Vec<BodyId>,
        produced: &mut Produced,
    ) -> HostResult<()> {
        if operation == BooleanOp::New {
            self.spawn(model, feature, Shape::new(tool), produced);
            return Ok(());
        }
        for body in targets {
            let shape = model
                .get_mut(&body)
                .ok_or_else(|| HostError::new("Target body not found"))?;
            match operation {
                BooleanOp::Join => shape.bounds = shape.bounds.union(&tool),
                BooleanOp::Intersect => {
                    shape.bounds = shape
                        .bounds
                        .intersection(&tool)
                        .ok_or_else(|| HostError::new("Intersection is empty"))?;
                }
                BooleanOp::Cut => {
                    if let Some(pocket) = cut(shape, &tool)? {
                        attach(model, body, pocket, produced);
                        continue;
                    }
                }
                BooleanOp::New => {}
            }
            produced.touched.push(body);
        }
        Ok(())
    }

    /// Copy the base body, or whatever the base feature produced, through a transform
    fn replicate(
        &mut self,
        model: &mut Model,
        feature: FeatureId,
        base: FeatureBase,
        point: &dyn Fn(DVec3) -> DVec3,
        dir: &dyn Fn(DVec3) -> DVec3,
        produced: &mut Produced,
    ) -> HostResult<()> {
        match base {
            FeatureBase::Body(body) => {
                let shape = model
                    .get(&body)
                    .ok_or_else(|| HostError::new("Base body not found"))?
                    .mapped(point, dir);
                self.spawn(model, feature, shape, produced);
            }
            FeatureBase::Feature(source) => {
                let source = self
                    .produced
                    .get(&source)
                    .cloned()
                    .ok_or_else(|| HostError::new("Base feature not found"))?;
                if source.bodies.is_empty() && source.details.is_empty() {
                    return Err(HostError::new("Base feature has no geometry to copy"));
                }
                for body in &source.bodies {
                    if let Some(shape) = model.get(body) {
                        let copy = shape.mapped(point, dir);
                        self.spawn(model, feature, copy, produced);
                    }
                }
                for (body, detail) in &source.details {
                    if model.contains_key(body) {
                        attach(model, *body, detail.mapped(point, dir), produced);
                    }
                }
            }
        }
        Ok(())
    }

    /// Insert a body created by `feature`, reusing its id across rebuilds
    fn spawn(
        &mut self,
        model: &mut Model,
        feature: FeatureId,
        mut shape: Shape,
        produced: &mut Produced,
    ) -> BodyId {
        let slot = (feature, produced.bodies.len());
        let id = match self.created_ids.get(&slot) {
            Some(id) => *id,
            None => {
                let id = BodyId(self.alloc_id());
                self.created_ids.insert(slot, id);
                id
            }
        };
        if !self.names.contains_key(&id) {
            self.body_counter += 1;
            self.names.insert(id, format!("Body{}", self.body_counter));
        }
        self.ensure_token(EntityRef::Body(id));
        shape.visible = true;
        model.insert(id, shape);
        produced.bodies.push(id);
        id
    }
}

fn attach(model: &mut Model, body: BodyId, detail: Detail, produced: &mut Produced) {
    if let Some(shape) = model.get_mut(&body) {
        shape.details.push(detail.clone());
        produced.details.push((body, detail));
        produced.touched.push(body);
    }
}

fn planar_face(model: &Model, face: FaceId) -> HostResult<(BodyId, usize, FaceGeom)> {
    let (body, index) = unpack(face.0);
    let geom = model
        .get(&body)
        .and_then(|s| s.face(index))
        .ok_or_else(|| HostError::new("Face not found"))?;
    if geom.normal.is_none() {
        return Err(HostError::new("Face is not planar"));
    }
    Ok((body, index, geom))
}

fn combine_targets(
    model: &Model,
    operation: BooleanOp,
    tool: &BoundingBox,
    explicit: Option<BodyId>,
) -> HostResult<Vec<BodyId>> {
    if operation == BooleanOp::New {
        return Ok(Vec::new());
    }
    if let Some(body) = explicit {
        return if model.contains_key(&body) {
            Ok(vec![body])
        } else {
            Err(HostError::new("Target body not found"))
        };
    }
    let targets: Vec<BodyId> = model
        .iter()
        .filter(|(_, s)| s.visible && s.solid && touches(&s.bounds, tool))
        .map(|(id, _)| *id)
        .collect();
    if targets.is_empty() {
        return Err(HostError::new(format!(
            "No body touches the {} tool",
            operation
        )));
    }
    Ok(targets)
}

/// Subtract a tool box; trims the body when the tool covers a whole end,
/// otherwise returns the pocket left behind
fn cut(shape: &mut Shape, tool: &BoundingBox) -> HostResult<Option<Detail>> {
    let bounds = shape.bounds;
    let inter = bounds
        .intersection(tool)
        .ok_or_else(|| HostError::new("Cut tool does not intersect the body"))?;
    if inter == bounds {
        return Err(HostError::new("Cut would remove the entire body"));
    }
    for i in 0..3 {
        let spans_others = (0..3)
            .filter(|&j| j != i)
            .all(|j| inter.min[j] <= bounds.min[j] && inter.max[j] >= bounds.max[j]);
        if !spans_others {
            continue;
        }
        if inter.min[i] <= bounds.min[i] {
            shape.bounds.min[i] = inter.max[i];
            return Ok(None);
        }
        if inter.max[i] >= bounds.max[i] {
            shape.bounds.max[i] = inter.min[i];
            return Ok(None);
        }
    }
    let mut open = [false; BOX_FACES];
    for (f, slot) in open.iter_mut().enumerate() {
        let i = f / 2;
        *slot = if f % 2 == 1 {
            inter.max[i] >= bounds.max[i]
        } else {
            inter.min[i] <= bounds.min[i]
        };
    }
    Ok(Some(cavity_detail(&inter, open, inter.volume())))
}

impl HostDocument for MemoryDocument {
    fn name(&self) -> &str {
        &self.name
    }

    fn internal_units(&self) -> Option<LengthUnit> {
        Some(self.unit)
    }

    fn convert_length_to_mm(&self, value: f64) -> Option<f64> {
        self.conversion_available
            .then(|| value * self.unit.mm_per_unit())
    }

    fn bodies(&self) -> Vec<BodyId> {
        self.model.keys().copied().collect()
    }

    fn body_name(&self, body: BodyId) -> Option<String> {
        self.shape(body)?;
        self.names.get(&body).cloned()
    }

    fn body_is_solid(&self, body: BodyId) -> Option<bool> {
        self.shape(body).map(|s| s.solid)
    }

    fn body_is_visible(&self, body: BodyId) -> Option<bool> {
        self.shape(body).map(|s| s.visible)
    }

    fn body_faces(&self, body: BodyId) -> Option<Vec<FaceId>> {
        let shape = self.shape(body)?;
        Some(
            shape
                .face_indices()
                .into_iter()
                .map(|i| FaceId(pack(body, i)))
                .collect(),
        )
    }

    fn body_edges(&self, body: BodyId) -> Option<Vec<EdgeId>> {
        let shape = self.shape(body)?;
        Some(
            (0..shape.edge_count())
                .map(|i| EdgeId(pack(body, i)))
                .collect(),
        )
    }

    fn body_vertices(&self, body: BodyId) -> Option<Vec<VertexId>> {
        let shape = self.shape(body)?;
        Some(
            (0..shape.vertex_count())
                .map(|i| VertexId(pack(body, i)))
                .collect(),
        )
    }

    fn body_bounding_box(&self, body: BodyId) -> Option<BoundingBox> {
        self.shape(body).map(|s| s.bounds)
    }

    fn body_physical(&self, body: BodyId) -> Option<PhysicalProperties> {
        let shape = self.shape(body)?;
        let volume = shape.volume();
        Some(PhysicalProperties {
            volume: Some(volume),
            area: Some(shape.area()),
            mass: Some(volume * shape.density),
            density: Some(shape.density),
        })
    }

    fn face_body(&self, face: FaceId) -> Option<BodyId> {
        let (body, index) = unpack(face.0);
        self.shape(body)?.face(index).map(|_| body)
    }

    fn face_is_planar(&self, face: FaceId) -> Option<bool> {
        self.face_geom(face).map(|f| f.normal.is_some())
    }

    fn face_centroid(&self, face: FaceId) -> Option<DVec3> {
        self.face_geom(face).map(|f| f.centroid)
    }

    fn face_area(&self, face: FaceId) -> Option<f64> {
        self.face_geom(face).map(|f| f.area)
    }

    fn face_normal(&self, face: FaceId) -> Option<DVec3> {
        self.face_geom(face)?.normal
    }

    fn face_bounding_box(&self, face: FaceId) -> Option<BoundingBox> {
        self.face_geom(face).map(|f| f.bounds)
    }

    fn face_edges(&self, face: FaceId) -> Option<Vec<EdgeId>> {
        let (body, index) = unpack(face.0);
        let edges = self.shape(body)?.face_edge_indices(index)?;
        Some(edges.into_iter().map(|e| EdgeId(pack(body, e))).collect())
    }

    fn edge_body(&self, edge: EdgeId) -> Option<BodyId> {
        let (body, index) = unpack(edge.0);
        self.shape(body)?.edge(index).map(|_| body)
    }

    fn edge_length(&self, edge: EdgeId) -> Option<f64> {
        self.edge_geom(edge).map(|e| e.length)
    }

    fn edge_midpoint(&self, edge: EdgeId) -> Option<DVec3> {
        self.edge_geom(edge).map(|e| e.midpoint)
    }

    fn edge_vertices(&self, edge: EdgeId) -> Option<(VertexId, VertexId)> {
        let (body, index) = unpack(edge.0);
        let (a, b) = self.shape(body)?.edge_vertex_indices(index)?;
        Some((VertexId(pack(body, a)), VertexId(pack(body, b))))
    }

    fn vertex_point(&self, vertex: VertexId) -> Option<DVec3> {
        let (body, index) = unpack(vertex.0);
        self.shape(body)?.vertex(index)
    }

    fn entity_token(&self, entity: EntityRef) -> Option<String> {
        let derived = |raw: u64, tag: char| {
            let (body, index) = unpack(raw);
            self.shape(body)?;
            let body_token = self.tokens.get(&EntityRef::Body(body))?;
            Some(format!("{body_token}/{tag}{index}"))
        };
        match entity {
            EntityRef::Face(f) => derived(f.0, 'f'),
            EntityRef::Edge(e) => derived(e.0, 'e'),
            EntityRef::Vertex(v) => derived(v.0, 'v'),
            EntityRef::Body(b) => {
                self.shape(b)?;
                self.tokens.get(&entity).cloned()
            }
            EntityRef::Feature(_) | EntityRef::Sketch(_) | EntityRef::Curve(_) => {
                self.tokens.get(&entity).cloned()
            }
        }
    }

    fn features(&self) -> Vec<FeatureId> {
        self.features.iter().map(|f| f.id).collect()
    }

    fn feature_kind(&self, feature: FeatureId) -> Option<String> {
        self.feature_record(feature)
            .map(|f| f.op.type_name().to_string())
    }

    fn feature_name(&self, feature: FeatureId) -> Option<String> {
        self.feature_record(feature).map(|f| f.name.clone())
    }

    fn feature_body_name(&self, feature: FeatureId) -> Option<String> {
        let produced = self.produced.get(&feature)?;
        let body = produced
            .touched
            .first()
            .or(produced.bodies.first())?;
        self.names.get(body).cloned()
    }

    fn feature_timeline_index(&self, feature: FeatureId) -> Option<usize> {
        self.features.iter().position(|f| f.id == feature)
    }

    fn sketches(&self) -> Vec<SketchId> {
        self.sketches.iter().map(|s| s.id).collect()
    }

    fn sketch_name(&self, sketch: SketchId) -> Option<String> {
        self.sketch(sketch).map(|s| s.name.clone())
    }

    fn sketch_curves(&self, sketch: SketchId) -> Option<Vec<CurveId>> {
        self.sketch(sketch)
            .map(|s| s.curves.iter().map(|(id, _)| *id).collect())
    }

    fn sketch_profiles(&self, sketch: SketchId) -> Option<Vec<Vec<CurveId>>> {
        self.sketch(sketch).map(|s| s.profiles.clone())
    }

    fn recompute(&mut self) -> HostResult<()> {
        if self
            .take_fault(|f| matches!(f, Fault::FailRecompute))
            .is_some()
        {
            return Err(HostError::new("Recompute failed"));
        }
        self.rebuild();
        Ok(())
    }

    fn create_feature(&mut self, op: &FeatureOp) -> HostResult<FeatureId> {
        let id = FeatureId(self.alloc_id());
        self.ensure_token(EntityRef::Feature(id));
        let kind = op.type_name();
        let counter = self.kind_counters.entry(kind).or_insert(0);
        *counter += 1;
        let name = format!("{}{}", kind.trim_end_matches("Feature"), counter);
        let mut record = FeatureRecord {
            id,
            name,
            op: op.clone(),
            suppressed: false,
            extra_faces: 0,
            extra_bodies: 0,
        };

        if let Some(Fault::FailApply {
            message,
            leave_partial,
        }) = self.take_fault(|f| matches!(f, Fault::FailApply { .. }))
        {
            if leave_partial {
                record.suppressed = true;
                self.features.push(record);
                return Err(HostError::new(message).with_partial(id));
            }
            return Err(HostError::new(message));
        }
        if let Some(Fault::ExtraFaces(n)) = self.take_fault(|f| matches!(f, Fault::ExtraFaces(_))) {
            record.extra_faces = n;
        }
        if let Some(Fault::ExtraBodies(n)) = self.take_fault(|f| matches!(f, Fault::ExtraBodies(_))) {
            record.extra_bodies = n;
        }

        let mut model = self.model.clone();
        let produced = self.apply_record(&mut model, &record)?;
        self.model = model;
        self.produced.insert(id, produced);
        tracing::debug!("Created feature {} ({})", record.name, kind);
        self.features.push(record);
        Ok(id)
    }

    fn delete_feature(&mut self, feature: FeatureId) -> HostResult<()> {
        if self.take_fault(|f| matches!(f, Fault::FailDelete)).is_some() {
            return Err(HostError::new("Delete refused by host"));
        }
        let index = self
            .features
            .iter()
            .position(|f| f.id == feature)
            .ok_or_else(|| HostError::new(format!("Feature {} not found", feature.0)))?;
        self.features.remove(index);
        self.rebuild();
        Ok(())
    }

    fn create_sketch(
        &mut self,
        placement: SketchPlacement,
        name: Option<&str>,
    ) -> HostResult<SketchId> {
        let frame = match placement {
            SketchPlacement::Plane { plane, origin } => {
                let normal = plane.normal();
                let (u, v) = plane.basis();
                let offset = origin.map(|o| normal * o.dot(normal)).unwrap_or(DVec3::ZERO);
                Frame {
                    origin: offset,
                    u,
                    v,
                    normal,
                }
            }
            SketchPlacement::Face(face) => {
                let (_, _, geom) = planar_face(&self.model, face)?;
                let normal = geom.normal.unwrap_or(DVec3::Z);
                let (u, v) = plane_basis(normal);
                // sketch coordinates share the model origin projected onto the face plane
                Frame {
                    origin: normal * geom.centroid.dot(normal),
                    u,
                    v,
                    normal,
                }
            }
        };
        let id = SketchId(self.alloc_id());
        self.ensure_token(EntityRef::Sketch(id));
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Sketch{}", self.sketches.len() + 1));
        self.sketches.push(SketchRecord {
            id,
            name,
            frame,
            curves: Vec::new(),
            profiles: Vec::new(),
        });
        Ok(id)
    }

    fn sketch_add_line(
        &mut self,
        sketch: SketchId,
        start: DVec3,
        end: DVec3,
    ) -> HostResult<CurveId> {
        let (start, end) = (start.truncate(), end.truncate());
        if start.distance(end) <= 0.0 {
            return Err(HostError::new("Line has zero length"));
        }
        self.add_curve(sketch, CurveShape::Line { start, end })
    }

    fn sketch_add_rectangle(
        &mut self,
        sketch: SketchId,
        corner1: DVec3,
        corner2: DVec3,
    ) -> HostResult<Vec<CurveId>> {
        self.sketch_mut(sketch)?;
        let (a, b) = (corner1.truncate(), corner2.truncate());
        let lo = a.min(b);
        let hi = a.max(b);
        if hi.x <= lo.x || hi.y <= lo.y {
            return Err(HostError::new("Rectangle has zero area"));
        }
        let corners = [
            lo,
            DVec2::new(hi.x, lo.y),
            hi,
            DVec2::new(lo.x, hi.y),
        ];
        let mut ids = Vec::with_capacity(4);
        for i in 0..4 {
            let line = CurveShape::Line {
                start: corners[i],
                end: corners[(i + 1) % 4],
            };
            ids.push(self.add_curve(sketch, line)?);
        }
        self.sketch_mut(sketch)?.profiles.push(ids.clone());
        Ok(ids)
    }

    fn sketch_add_circle(
        &mut self,
        sketch: SketchId,
        center: DVec3,
        radius: f64,
    ) -> HostResult<CurveId> {
        if radius <= 0.0 {
            return Err(HostError::new("Circle radius must be positive"));
        }
        let id = self.add_curve(
            sketch,
            CurveShape::Circle {
                center: center.truncate(),
                radius,
            },
        )?;
        self.sketch_mut(sketch)?.profiles.push(vec![id]);
        Ok(id)
    }
}

impl MemoryDocument {
    fn face_geom(&self, face: FaceId) -> Option<FaceGeom> {
        let (body, index) = unpack(face.0);
        self.shape(body)?.face(index)
    }

    fn edge_geom(&self, edge: EdgeId) -> Option<EdgeGeom> {
        let (body, index) = unpack(edge.0);
        self.shape(body)?.edge(index)
    }

    fn feature_record(&self, feature: FeatureId) -> Option<&FeatureRecord> {
        self.features.iter().find(|f| f.id == feature)
    }
}
