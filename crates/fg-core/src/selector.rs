//! Deterministic entity selection
//!
//! A selector scores every candidate of a pool and the winner is the first
//! candidate under the total order
//! `(-score, -magnitude (or 1 when absent), position, token)`,
//! so the same document always yields the same entity no matter in which
//! order the host enumerates it.

use std::cmp::Ordering;
use std::str::FromStr;

use glam::DVec3;

use crate::document::{EdgeId, EntityRef, FaceId, HostDocument, VertexId};
use crate::entity;
use crate::error::{EngineError, EngineResult};
use crate::geometry::{Axis, SignedAxis};
use crate::units::UnitScale;

/// Returned by `FromStr` when a selector string is not recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownSelector;

/// Parse a selector, reporting failures against the request field name
pub fn parse_selector<T>(field: &str, value: &str) -> EngineResult<T>
where
    T: FromStr<Err = UnknownSelector>,
{
    value
        .parse()
        .map_err(|_| EngineError::InvalidSelector(format!("Unsupported {field}: {value}")))
}

/// Face ranking rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceSelector {
    LargestPlanar,
    LargestArea,
    NormalClosest(SignedAxis),
    MaxBBox(Axis),
    MinBBox(Axis),
    MaxCentroid(Axis),
}

impl FaceSelector {
    /// Whether only planar faces qualify
    pub fn requires_planar(&self) -> bool {
        matches!(self, FaceSelector::LargestPlanar | FaceSelector::NormalClosest(_))
    }

    /// Short name reported as `score_type`
    pub fn score_type(&self) -> &'static str {
        match self {
            FaceSelector::LargestPlanar => "largest_planar",
            FaceSelector::LargestArea => "largest_area",
            FaceSelector::NormalClosest(_) => "normal_closest",
            FaceSelector::MaxBBox(_) => "max_bbox",
            FaceSelector::MinBBox(_) => "min_bbox",
            FaceSelector::MaxCentroid(_) => "max_centroid",
        }
    }
}

impl FromStr for FaceSelector {
    type Err = UnknownSelector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let axis_suffix = |prefix: &str| -> Option<Axis> { s.strip_prefix(prefix)?.parse().ok() };
        match s {
            "largest_planar" => return Ok(FaceSelector::LargestPlanar),
            "largest_area" => return Ok(FaceSelector::LargestArea),
            _ => {}
        }
        if let Some(axis) = s.strip_prefix("normal_closest:") {
            return axis
                .trim()
                .parse()
                .map(FaceSelector::NormalClosest)
                .map_err(|_| UnknownSelector);
        }
        if let Some(axis) = axis_suffix("max_bbox_") {
            return Ok(FaceSelector::MaxBBox(axis));
        }
        if let Some(axis) = axis_suffix("min_bbox_") {
            return Ok(FaceSelector::MinBBox(axis));
        }
        if let Some(axis) = axis_suffix("max_centroid_") {
            return Ok(FaceSelector::MaxCentroid(axis));
        }
        Err(UnknownSelector)
    }
}

/// Edge ranking rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSelector {
    LongestEdge,
    /// Edge direction closest to an axis
    NormalClosest(SignedAxis),
    ClosestToPoint,
}

impl FromStr for EdgeSelector {
    type Err = UnknownSelector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "longest_edge" => Ok(EdgeSelector::LongestEdge),
            "closest_to_point" => Ok(EdgeSelector::ClosestToPoint),
            _ => s
                .strip_prefix("normal_closest:")
                .and_then(|axis| axis.trim().parse().ok())
                .map(EdgeSelector::NormalClosest)
                .ok_or(UnknownSelector),
        }
    }
}

/// Vertex ranking rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexSelector {
    ClosestToPoint,
}

impl FromStr for VertexSelector {
    type Err = UnknownSelector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closest_to_point" => Ok(VertexSelector::ClosestToPoint),
            _ => Err(UnknownSelector),
        }
    }
}

// ============== Candidates ==============

/// One scored entity; lengths and positions in millimetres
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<H> {
    pub entity: H,
    pub score: f64,
    /// Area (faces) or length (edges); vertices have none
    pub magnitude: Option<f64>,
    /// Centroid, midpoint or vertex position
    pub position: DVec3,
    /// Identity token, empty when the host has none
    pub token: String,
    /// Face normal, when one was read while scoring
    pub normal: Option<DVec3>,
}

/// Collapses -0.0 onto 0.0 so negated zero scores tie
fn canonical(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

impl<H> Candidate<H> {
    /// Total ranking order; the smallest candidate wins
    pub fn rank(&self, other: &Self) -> Ordering {
        let neg = |v: f64| canonical(-v);
        neg(self.score)
            .total_cmp(&neg(other.score))
            .then_with(|| {
                neg(self.magnitude.unwrap_or(-1.0))
                    .total_cmp(&neg(other.magnitude.unwrap_or(-1.0)))
            })
            .then_with(|| {
                let (a, b) = (self.position, other.position);
                canonical(a.x)
                    .total_cmp(&canonical(b.x))
                    .then_with(|| canonical(a.y).total_cmp(&canonical(b.y)))
                    .then_with(|| canonical(a.z).total_cmp(&canonical(b.z)))
            })
            .then_with(|| self.token.cmp(&other.token))
    }
}

/// Winning candidate and the size of the pool it was picked from
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<H> {
    pub winner: Candidate<H>,
    pub considered: usize,
}

/// Pick the best candidate, `None` for an empty pool
pub fn pick<H>(candidates: Vec<Candidate<H>>) -> Option<Selection<H>> {
    let considered = candidates.len();
    candidates
        .into_iter()
        .min_by(|a, b| a.rank(b))
        .map(|winner| Selection { winner, considered })
}

// ============== Faces ==============

/// Score every face that has the data `selector` needs
pub fn face_candidates(
    doc: &dyn HostDocument,
    faces: &[FaceId],
    selector: FaceSelector,
    planar_only: bool,
    scale: &UnitScale,
) -> Vec<Candidate<FaceId>> {
    let planar_only = planar_only || selector.requires_planar();
    faces
        .iter()
        .filter_map(|&face| {
            if planar_only && doc.face_is_planar(face) != Some(true) {
                return None;
            }
            let centroid = scale.point_to_mm(doc.face_centroid(face)?);
            let area = doc.face_area(face).map(|a| scale.area_to_mm2(a));
            let mut normal = None;
            let score = match selector {
                FaceSelector::LargestPlanar | FaceSelector::LargestArea => area?,
                FaceSelector::NormalClosest(axis) => {
                    let n = doc.face_normal(face)?;
                    normal = Some(n.normalize_or_zero());
                    n.dot(axis.unit())
                }
                FaceSelector::MaxBBox(axis) => {
                    scale.to_mm(axis.component(doc.face_bounding_box(face)?.max))
                }
                FaceSelector::MinBBox(axis) => {
                    -scale.to_mm(axis.component(doc.face_bounding_box(face)?.min))
                }
                FaceSelector::MaxCentroid(axis) => axis.component(centroid),
            };
            Some(Candidate {
                entity: face,
                score,
                magnitude: area,
                position: centroid,
                token: entity::token_or_empty(doc, EntityRef::Face(face)),
                normal,
            })
        })
        .collect()
}

/// Select a face among `faces`
pub fn select_face(
    doc: &dyn HostDocument,
    faces: &[FaceId],
    selector: FaceSelector,
    scale: &UnitScale,
) -> EngineResult<Selection<FaceId>> {
    let candidates = face_candidates(doc, faces, selector, false, scale);
    tracing::debug!(
        "Face selector {:?} considered {} candidates",
        selector,
        candidates.len()
    );
    pick(candidates).ok_or_else(|| {
        EngineError::not_found(if selector.requires_planar() {
            "No planar faces matched selector."
        } else {
            "No faces matched selector."
        })
    })
}

// ============== Edges and vertices ==============

fn require_point(point_mm: Option<DVec3>) -> EngineResult<DVec3> {
    point_mm.ok_or_else(|| {
        EngineError::InvalidInput("point_mm is required for closest_to_point".into())
    })
}

/// Score every edge that has the data `selector` needs
pub fn edge_candidates(
    doc: &dyn HostDocument,
    edges: &[EdgeId],
    selector: EdgeSelector,
    point_mm: Option<DVec3>,
    scale: &UnitScale,
) -> EngineResult<Vec<Candidate<EdgeId>>> {
    let target = match selector {
        EdgeSelector::ClosestToPoint => Some(require_point(point_mm)?),
        _ => None,
    };
    Ok(edges
        .iter()
        .filter_map(|&edge| {
            let midpoint = doc.edge_midpoint(edge).or_else(|| {
                entity::edge_endpoints(doc, edge).map(|(a, b)| (a + b) * 0.5)
            })?;
            let midpoint = scale.point_to_mm(midpoint);
            let length = doc.edge_length(edge).map(|l| scale.to_mm(l));
            let score = match selector {
                EdgeSelector::LongestEdge => length?,
                EdgeSelector::NormalClosest(axis) => {
                    entity::edge_direction(doc, edge)?.dot(axis.unit())
                }
                EdgeSelector::ClosestToPoint => {
                    -midpoint.distance_squared(target.unwrap_or_default())
                }
            };
            Some(Candidate {
                entity: edge,
                score,
                magnitude: length,
                position: midpoint,
                token: entity::token_or_empty(doc, EntityRef::Edge(edge)),
                normal: None,
            })
        })
        .collect())
}

/// Select an edge among `edges`
pub fn select_edge(
    doc: &dyn HostDocument,
    edges: &[EdgeId],
    selector: EdgeSelector,
    point_mm: Option<DVec3>,
    scale: &UnitScale,
) -> EngineResult<Selection<EdgeId>> {
    let candidates = edge_candidates(doc, edges, selector, point_mm, scale)?;
    pick(candidates).ok_or_else(|| EngineError::not_found("No edges matched selector."))
}

/// Select a vertex among `vertices`
pub fn select_vertex(
    doc: &dyn HostDocument,
    vertices: &[VertexId],
    selector: VertexSelector,
    point_mm: Option<DVec3>,
    scale: &UnitScale,
) -> EngineResult<Selection<VertexId>> {
    let VertexSelector::ClosestToPoint = selector;
    let target = require_point(point_mm)?;
    let candidates = vertices
        .iter()
        .filter_map(|&vertex| {
            let position = scale.point_to_mm(doc.vertex_point(vertex)?);
            Some(Candidate {
                entity: vertex,
                score: -position.distance_squared(target),
                magnitude: None,
                position,
                token: entity::token_or_empty(doc, EntityRef::Vertex(vertex)),
                normal: None,
            })
        })
        .collect();
    pick(candidates).ok_or_else(|| EngineError::not_found("No vertices matched selector."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{BodyId, MemoryDocument};
    use approx::assert_relative_eq;

    fn candidate(score: f64, magnitude: Option<f64>, position: DVec3, token: &str) -> Candidate<u32> {
        Candidate {
            entity: 0,
            score,
            magnitude,
            position,
            token: token.into(),
            normal: None,
        }
    }

    fn block() -> (MemoryDocument, BodyId) {
        let mut doc = MemoryDocument::new("Test");
        // 40 x 20 x 10 mm
        let body = doc.add_box("Block", DVec3::ZERO, DVec3::new(4.0, 2.0, 1.0));
        (doc, body)
    }

    #[test]
    fn test_parse_face_selectors() {
        assert_eq!("largest_planar".parse(), Ok(FaceSelector::LargestPlanar));
        assert_eq!(
            "normal_closest:-Y".parse(),
            Ok(FaceSelector::NormalClosest(SignedAxis::new(Axis::Y, true)))
        );
        assert_eq!("max_bbox_z".parse(), Ok(FaceSelector::MaxBBox(Axis::Z)));
        assert_eq!("min_bbox_X".parse(), Ok(FaceSelector::MinBBox(Axis::X)));
        assert_eq!("max_centroid_x".parse(), Ok(FaceSelector::MaxCentroid(Axis::X)));
        assert_eq!("normal_closest:Z".parse::<FaceSelector>(), Err(UnknownSelector));
        assert_eq!("max_bbox_w".parse::<FaceSelector>(), Err(UnknownSelector));
    }

    #[test]
    fn test_parse_selector_error_message() {
        let err = parse_selector::<EdgeSelector>("edge_selector", "shortest_edge").unwrap_err();
        assert_eq!(err, EngineError::InvalidSelector("Unsupported edge_selector: shortest_edge".into()));
        assert_eq!(
            parse_selector::<VertexSelector>("vertex_selector", "closest_to_point").unwrap(),
            VertexSelector::ClosestToPoint
        );
    }

    #[test]
    fn test_tie_break_prefers_lower_position() {
        let a = candidate(100.0, Some(100.0), DVec3::ZERO, "b");
        let b = candidate(100.0, Some(100.0), DVec3::X, "a");
        let sel = pick(vec![b, a.clone()]).unwrap();
        assert_eq!(sel.winner, a);
        assert_eq!(sel.considered, 2);
    }

    #[test]
    fn test_tie_break_on_token_last() {
        let a = candidate(1.0, None, DVec3::ZERO, "a");
        let b = candidate(1.0, None, DVec3::ZERO, "b");
        assert_eq!(pick(vec![b, a.clone()]).unwrap().winner, a);
    }

    #[test]
    fn test_missing_magnitude_ranks_after_present() {
        let with = candidate(5.0, Some(0.5), DVec3::X, "z");
        let without = candidate(5.0, None, DVec3::ZERO, "a");
        assert_eq!(pick(vec![without, with.clone()]).unwrap().winner, with);
    }

    #[test]
    fn test_negative_zero_scores_tie() {
        let a = candidate(-0.0, None, DVec3::ZERO, "a");
        let b = candidate(0.0, None, DVec3::ZERO, "b");
        assert_eq!(a.rank(&b), Ordering::Less);
        assert_eq!(b.rank(&a), Ordering::Greater);
    }

    #[test]
    fn test_selection_is_order_independent() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let mut faces = doc.body_faces(body).unwrap();
        let first = select_face(&doc, &faces, FaceSelector::LargestArea, &scale).unwrap();
        faces.reverse();
        let second = select_face(&doc, &faces, FaceSelector::LargestArea, &scale).unwrap();
        faces.rotate_left(2);
        let third = select_face(&doc, &faces, FaceSelector::LargestArea, &scale).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, third);
        // top and bottom tie on area; the bottom (z = 0) centroid sorts first
        assert_relative_eq!(first.winner.position.z, 0.0);
        assert_relative_eq!(first.winner.score, 800.0);
    }

    #[test]
    fn test_normal_closest_picks_top() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let faces = doc.body_faces(body).unwrap();
        let sel = select_face(&doc, &faces, "normal_closest:+Z".parse().unwrap(), &scale).unwrap();
        assert_eq!(doc.face_normal(sel.winner.entity), Some(DVec3::Z));
        assert_eq!(sel.winner.normal, Some(DVec3::Z));
        assert_eq!(sel.considered, 6);
    }

    #[test]
    fn test_min_bbox_scores_negated_min() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let faces = doc.body_faces(body).unwrap();
        let sel = select_face(&doc, &faces, FaceSelector::MinBBox(Axis::X), &scale).unwrap();
        // five faces touch x = 0; the largest of them (the bottom) wins
        assert_relative_eq!(sel.winner.score, 0.0);
        assert_relative_eq!(sel.winner.magnitude.unwrap(), 800.0);
        assert_relative_eq!(sel.winner.position.z, 0.0);
    }

    #[test]
    fn test_planar_filter_excludes_curved() {
        use crate::document::HostDocument as _;
        use crate::feature::{Extent, FeatureOp};

        let (mut doc, body) = block();
        let top = doc.body_faces(body).unwrap()[5];
        doc.create_feature(&FeatureOp::Hole {
            face: top,
            center: DVec3::new(2.0, 1.0, 1.0),
            diameter: 0.4,
            extent: Extent::ThroughAll,
        })
        .unwrap();
        let scale = UnitScale::from_document(&doc);
        let faces = doc.body_faces(body).unwrap();
        assert_eq!(faces.len(), 7);
        let planar = face_candidates(&doc, &faces, FaceSelector::LargestPlanar, false, &scale);
        assert_eq!(planar.len(), 6);
        let any = face_candidates(&doc, &faces, FaceSelector::LargestArea, false, &scale);
        assert_eq!(any.len(), 7);
    }

    #[test]
    fn test_longest_edge_and_closest_point() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let edges = doc.body_edges(body).unwrap();
        let longest = select_edge(&doc, &edges, EdgeSelector::LongestEdge, None, &scale).unwrap();
        assert_relative_eq!(longest.winner.score, 40.0);
        assert_relative_eq!(longest.winner.position.y, 0.0);
        assert_relative_eq!(longest.winner.position.z, 0.0);

        let near = select_edge(
            &doc,
            &edges,
            EdgeSelector::ClosestToPoint,
            Some(DVec3::new(40.0, 20.0, 5.0)),
            &scale,
        )
        .unwrap();
        assert_relative_eq!(near.winner.position.x, 40.0);
        assert_relative_eq!(near.winner.position.y, 20.0);
        assert_relative_eq!(near.winner.score, 0.0);
    }

    #[test]
    fn test_closest_to_point_requires_point() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let edges = doc.body_edges(body).unwrap();
        let err = select_edge(&doc, &edges, EdgeSelector::ClosestToPoint, None, &scale).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let vertices = doc.body_vertices(body).unwrap();
        let err = select_vertex(&doc, &vertices, VertexSelector::ClosestToPoint, None, &scale)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_vertex_closest_to_point() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let vertices = doc.body_vertices(body).unwrap();
        let sel = select_vertex(
            &doc,
            &vertices,
            VertexSelector::ClosestToPoint,
            Some(DVec3::new(41.0, -1.0, 9.0)),
            &scale,
        )
        .unwrap();
        assert_eq!(sel.winner.position, DVec3::new(40.0, 0.0, 10.0));
        assert_relative_eq!(sel.winner.score, -3.0);
    }

    #[test]
    fn test_empty_pool_is_not_found() {
        let (doc, _) = block();
        let scale = UnitScale::from_document(&doc);
        let err = select_face(&doc, &[], FaceSelector::LargestPlanar, &scale).unwrap_err();
        assert_eq!(err.to_string(), "No planar faces matched selector.");
        assert_eq!(err.kind(), "not_found");
    }
}
