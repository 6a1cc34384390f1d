//! Body and face measurement in millimetres
//!
//! Each metric is read independently; one that the host cannot provide is
//! reported as `None` instead of failing the whole measurement.

use std::cmp::Ordering;
use std::str::FromStr;

use glam::DVec3;
use serde::Serialize;

use crate::document::{BodyId, EntityRef, FaceId, HostDocument};
use crate::entity::{self, TopologyCounts};
use crate::error::{EngineError, EngineResult};
use crate::geometry::{Axis, BoundingBox};
use crate::selector::{self, FaceSelector};
use crate::units::{PointMm, UnitScale};

/// Axis-aligned bounds in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BboxMm {
    pub min: PointMm,
    pub max: PointMm,
    pub size: PointMm,
}

impl BboxMm {
    /// Convert host bounds to millimetres
    pub fn from_internal(bounds: &BoundingBox, scale: &UnitScale) -> Self {
        let min = scale.point_to_mm(bounds.min);
        let max = scale.point_to_mm(bounds.max);
        Self {
            min: min.into(),
            max: max.into(),
            size: (max - min).into(),
        }
    }

    /// Bounds of two opposite corners given in millimetres
    pub fn from_corners_mm(a: DVec3, b: DVec3) -> Self {
        let bounds = BoundingBox::new(a, b);
        Self {
            min: bounds.min.into(),
            max: bounds.max.into(),
            size: bounds.size().into(),
        }
    }
}

/// Physical properties in millimetre units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PhysicalMm {
    pub volume_mm3: Option<f64>,
    pub area_mm2: Option<f64>,
    pub density_kg_m3: Option<f64>,
    pub mass_kg: Option<f64>,
}

impl PhysicalMm {
    /// Physical properties of a body; all `None` when the host has none
    pub fn of_body(doc: &dyn HostDocument, body: BodyId, scale: &UnitScale) -> Self {
        let Some(props) = doc.body_physical(body) else {
            return Self::default();
        };
        Self {
            volume_mm3: props.volume.map(|v| scale.volume_to_mm3(v)),
            area_mm2: props.area.map(|a| scale.area_to_mm2(a)),
            density_kg_m3: props.density.map(|d| scale.density_to_kg_m3(d)),
            mass_kg: props.mass,
        }
    }
}

/// Snapshot of one body, captured before or after a mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BodyMeasurement {
    pub body_name: Option<String>,
    pub body_id: Option<String>,
    pub bbox_mm: Option<BboxMm>,
    pub volume_mm3: Option<f64>,
    pub area_mm2: Option<f64>,
    pub mass_kg: Option<f64>,
    pub density_kg_m3: Option<f64>,
    pub counts: TopologyCounts,
    /// Body the new body was made from, for new-body operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_body: Option<Box<BodyMeasurement>>,
}

impl BodyMeasurement {
    /// Measure a body
    pub fn of_body(doc: &dyn HostDocument, body: BodyId, scale: &UnitScale) -> Self {
        let physical = PhysicalMm::of_body(doc, body, scale);
        Self {
            body_name: doc.body_name(body),
            body_id: doc.entity_token(EntityRef::Body(body)),
            bbox_mm: doc
                .body_bounding_box(body)
                .map(|b| BboxMm::from_internal(&b, scale)),
            volume_mm3: physical.volume_mm3,
            area_mm2: physical.area_mm2,
            mass_kg: physical.mass_kg,
            density_kg_m3: physical.density_kg_m3,
            counts: TopologyCounts::of_body(doc, body),
            source_body: None,
        }
    }

    /// Attach the measurement of the body a new body was made from
    pub fn with_source(mut self, source: BodyMeasurement) -> Self {
        self.source_body = Some(Box::new(source));
        self
    }

    pub fn has_bbox(&self) -> bool {
        self.bbox_mm.is_some()
    }

    pub fn has_volume(&self) -> bool {
        self.volume_mm3.is_some()
    }
}

/// Face properties in millimetres
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMeasurement {
    pub id: Option<String>,
    pub area_mm2: Option<f64>,
    pub centroid_mm: Option<PointMm>,
    /// Unit normal, planar faces only
    pub normal: Option<PointMm>,
    pub bbox_mm: Option<BboxMm>,
}

impl FaceMeasurement {
    pub fn of_face(doc: &dyn HostDocument, face: FaceId, scale: &UnitScale) -> Self {
        Self {
            id: doc.entity_token(EntityRef::Face(face)),
            area_mm2: doc.face_area(face).map(|a| scale.area_to_mm2(a)),
            centroid_mm: doc.face_centroid(face).map(|c| scale.point_to_mm(c).into()),
            normal: doc
                .face_normal(face)
                .and_then(|n| n.try_normalize())
                .map(PointMm::from),
            bbox_mm: doc
                .face_bounding_box(face)
                .map(|b| BboxMm::from_internal(&b, scale)),
        }
    }
}

// ============== Face span ==============

/// How the span of a face's bottom edges is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanMode {
    /// Length of the longest bottom edge
    #[default]
    MaxEdgeLength,
    /// Extent of the bottom vertices along the in-plane axis of largest spread
    ProjectedExtent,
}

impl SpanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SpanMode::MaxEdgeLength => "max_edge_length",
            SpanMode::ProjectedExtent => "projected_extent",
        }
    }
}

impl FromStr for SpanMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max_edge_length" => Ok(SpanMode::MaxEdgeLength),
            "projected_extent" => Ok(SpanMode::ProjectedExtent),
            _ => Err(EngineError::InvalidInput(format!("Unsupported span_mode: {s}"))),
        }
    }
}

/// An edge of the selected face lying on the body's bottom plane
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BottomEdge {
    pub id: Option<String>,
    pub length_mm: f64,
    pub v0_mm: PointMm,
    pub v1_mm: PointMm,
    pub v0_id: Option<String>,
    pub v1_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BottomEdges {
    pub eps_mm: f64,
    pub z_ref_mm: f64,
    pub edges: Vec<BottomEdge>,
}

/// The reported span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    pub mode: &'static str,
    pub value_mm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis: Option<&'static str>,
    pub endpoints_mm: [PointMm; 2],
    pub vertex_ids: [Option<String>; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SelectionScore {
    pub score: f64,
    pub score_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanFace {
    pub selector: String,
    pub require_planar: bool,
    #[serde(flatten)]
    pub measurement: FaceMeasurement,
    pub selection: SelectionScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpanTrace {
    pub faces: usize,
    pub edges: usize,
}

/// Result of a face span measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceSpan {
    pub face: SpanFace,
    pub bottom: BottomEdges,
    pub span: Span,
    pub candidates_considered: SpanTrace,
}

/// Options of a face span measurement
#[derive(Debug, Clone, PartialEq)]
pub struct FaceSpanQuery {
    /// Selector text, echoed in the result
    pub selector_text: String,
    pub selector: FaceSelector,
    pub require_planar: bool,
    pub mode: SpanMode,
    pub eps_mm: f64,
}

/// In-plane axis with the largest spread of `points`, skipping the axis the
/// normal is most aligned with
fn projection_axis(normal: Option<DVec3>, points: &[DVec3]) -> Axis {
    let excluded = normal.and_then(|n| n.try_normalize()).map(|n| {
        let a = n.abs();
        // first axis wins ties
        Axis::ALL
            .into_iter()
            .fold(Axis::X, |best, axis| {
                if axis.component(a) > best.component(a) {
                    axis
                } else {
                    best
                }
            })
    });
    let range = |axis: Axis| {
        let values = points.iter().map(|p| axis.component(*p));
        let lo = values.clone().fold(f64::INFINITY, f64::min);
        let hi = values.fold(f64::NEG_INFINITY, f64::max);
        if points.is_empty() { 0.0 } else { hi - lo }
    };
    Axis::ALL
        .into_iter()
        .filter(|axis| Some(*axis) != excluded)
        .fold(None, |best: Option<(Axis, f64)>, axis| {
            let r = range(axis);
            match best {
                Some((_, best_range)) if r <= best_range => best,
                _ => Some((axis, r)),
            }
        })
        .map_or(Axis::X, |(axis, _)| axis)
}

fn point_order(a: DVec3, b: DVec3) -> Ordering {
    a.x.total_cmp(&b.x)
        .then_with(|| a.y.total_cmp(&b.y))
        .then_with(|| a.z.total_cmp(&b.z))
}

/// Select a face of `body` and measure the span of its bottom edges
pub fn measure_face_span(
    doc: &dyn HostDocument,
    body: BodyId,
    query: &FaceSpanQuery,
    scale: &UnitScale,
) -> EngineResult<FaceSpan> {
    let faces = doc
        .body_faces(body)
        .ok_or_else(|| EngineError::not_found("Failed to enumerate faces."))?;
    let candidates = selector::face_candidates(doc, &faces, query.selector, query.require_planar, scale);
    let considered = candidates.len();
    let winner = selector::pick(candidates)
        .ok_or_else(|| EngineError::not_found("No faces matched selector."))?
        .winner;
    let face = winner.entity;

    let bounds = doc
        .body_bounding_box(body)
        .ok_or_else(|| EngineError::not_found("Failed to read body bounding box."))?;
    let z_ref_mm = scale.to_mm(bounds.min.z);

    let face_edges = doc.face_edges(face).unwrap_or_default();
    let mut bottom: Vec<(BottomEdge, DVec3, DVec3)> = face_edges
        .iter()
        .filter_map(|&edge| {
            let (v0, v1) = doc.edge_vertices(edge)?;
            let p0 = scale.point_to_mm(doc.vertex_point(v0)?);
            let p1 = scale.point_to_mm(doc.vertex_point(v1)?);
            if (p0.z - z_ref_mm).abs() > query.eps_mm || (p1.z - z_ref_mm).abs() > query.eps_mm {
                return None;
            }
            let length_mm = scale.to_mm(doc.edge_length(edge)?);
            let item = BottomEdge {
                id: doc.entity_token(EntityRef::Edge(edge)),
                length_mm,
                v0_mm: p0.into(),
                v1_mm: p1.into(),
                v0_id: doc.entity_token(EntityRef::Vertex(v0)),
                v1_id: doc.entity_token(EntityRef::Vertex(v1)),
            };
            Some((item, p0, p1))
        })
        .collect();
    if bottom.is_empty() {
        return Err(EngineError::not_found(format!(
            "No bottom edges found within epsilon (eps_mm={}, z_ref_mm={z_ref_mm}).",
            query.eps_mm
        )));
    }

    bottom.sort_by(|(a, a0, a1), (b, b0, b1)| {
        b.length_mm
            .total_cmp(&a.length_mm)
            .then_with(|| a.id.as_deref().unwrap_or("").cmp(b.id.as_deref().unwrap_or("")))
            .then_with(|| point_order(*a0, *b0))
            .then_with(|| point_order(*a1, *b1))
    });

    let measurement = FaceMeasurement::of_face(doc, face, scale);
    let span = match query.mode {
        SpanMode::MaxEdgeLength => {
            let (edge, _, _) = &bottom[0];
            Span {
                mode: query.mode.as_str(),
                value_mm: edge.length_mm,
                edge_id: edge.id.clone(),
                axis: None,
                endpoints_mm: [edge.v0_mm, edge.v1_mm],
                vertex_ids: [edge.v0_id.clone(), edge.v1_id.clone()],
            }
        }
        SpanMode::ProjectedExtent => {
            let mut points: Vec<(DVec3, Option<String>)> = bottom
                .iter()
                .flat_map(|(edge, p0, p1)| [(*p0, edge.v0_id.clone()), (*p1, edge.v1_id.clone())])
                .collect();
            let positions: Vec<DVec3> = points.iter().map(|(p, _)| *p).collect();
            let axis = projection_axis(doc.face_normal(face), &positions);
            points.sort_by(|(a, _), (b, _)| {
                axis.component(*a)
                    .total_cmp(&axis.component(*b))
                    .then_with(|| point_order(*a, *b))
            });
            let (lo, lo_id) = points[0].clone();
            let (hi, hi_id) = points[points.len() - 1].clone();
            Span {
                mode: query.mode.as_str(),
                value_mm: axis.component(hi) - axis.component(lo),
                edge_id: None,
                axis: Some(axis.lower_name()),
                endpoints_mm: [lo.into(), hi.into()],
                vertex_ids: [lo_id, hi_id],
            }
        }
    };

    tracing::debug!(
        "Face span {} = {} mm over {} bottom edges",
        query.mode.as_str(),
        span.value_mm,
        bottom.len()
    );
    Ok(FaceSpan {
        face: SpanFace {
            selector: query.selector_text.clone(),
            require_planar: query.require_planar,
            measurement,
            selection: SelectionScore {
                score: winner.score,
                score_type: query.selector.score_type(),
            },
        },
        bottom: BottomEdges {
            eps_mm: query.eps_mm,
            z_ref_mm,
            edges: bottom.into_iter().map(|(edge, _, _)| edge).collect(),
        },
        span,
        candidates_considered: SpanTrace {
            faces: considered,
            edges: face_edges.len(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_SPAN_EPS_MM;
    use crate::document::MemoryDocument;
    use approx::assert_relative_eq;

    fn block() -> (MemoryDocument, BodyId) {
        let mut doc = MemoryDocument::new("Test");
        let body = doc.add_box("Block", DVec3::ZERO, DVec3::new(4.0, 2.0, 1.0));
        (doc, body)
    }

    fn query(selector: &str, mode: SpanMode) -> FaceSpanQuery {
        FaceSpanQuery {
            selector_text: selector.into(),
            selector: selector.parse().unwrap(),
            require_planar: false,
            mode,
            eps_mm: DEFAULT_SPAN_EPS_MM,
        }
    }

    #[test]
    fn test_body_measurement_in_mm() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let m = BodyMeasurement::of_body(&doc, body, &scale);
        assert_eq!(m.body_name.as_deref(), Some("Block"));
        let bbox = m.bbox_mm.unwrap();
        assert_relative_eq!(bbox.size.x, 40.0);
        assert_relative_eq!(bbox.size.z, 10.0);
        assert_relative_eq!(m.volume_mm3.unwrap(), 8000.0);
        assert_relative_eq!(m.area_mm2.unwrap(), 2.0 * (800.0 + 400.0 + 200.0));
        // 7.85 g/cm³
        assert_relative_eq!(m.density_kg_m3.unwrap(), 7850.0, epsilon = 1e-6);
        assert_relative_eq!(m.mass_kg.unwrap(), 8.0 * 7.85e-3);
        assert_eq!(m.counts.faces, 6);
        assert!(m.source_body.is_none());
    }

    #[test]
    fn test_source_body_serialized_only_when_present() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let m = BodyMeasurement::of_body(&doc, body, &scale);
        let plain = serde_json::to_value(&m).unwrap();
        assert!(plain.get("source_body").is_none());
        let with = serde_json::to_value(m.clone().with_source(m)).unwrap();
        assert_eq!(with["source_body"]["body_name"], "Block");
    }

    #[test]
    fn test_face_measurement_of_top() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let top = doc.body_faces(body).unwrap()[5];
        let m = FaceMeasurement::of_face(&doc, top, &scale);
        assert_relative_eq!(m.area_mm2.unwrap(), 800.0);
        assert_relative_eq!(m.centroid_mm.unwrap().z, 10.0);
        assert_relative_eq!(m.normal.unwrap().z, 1.0);
    }

    #[test]
    fn test_span_max_edge_length_on_end_face() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let span = measure_face_span(&doc, body, &query("max_centroid_x", SpanMode::MaxEdgeLength), &scale)
            .unwrap();
        // +X face: its only bottom edge runs along Y at x = 40
        assert_relative_eq!(span.face.selection.score, 40.0);
        assert_eq!(span.face.selection.score_type, "max_centroid");
        assert_eq!(span.bottom.edges.len(), 1);
        assert_relative_eq!(span.span.value_mm, 20.0);
        assert_relative_eq!(span.bottom.z_ref_mm, 0.0);
        assert_eq!(span.candidates_considered.faces, 6);
        assert_eq!(span.candidates_considered.edges, 4);
    }

    #[test]
    fn test_span_projected_extent_on_bottom() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let span = measure_face_span(
            &doc,
            body,
            &query("normal_closest:-Z", SpanMode::ProjectedExtent),
            &scale,
        )
        .unwrap();
        assert_eq!(span.bottom.edges.len(), 4);
        // longest bottom edges first
        assert_relative_eq!(span.bottom.edges[0].length_mm, 40.0);
        assert_eq!(span.span.axis, Some("x"));
        assert_relative_eq!(span.span.value_mm, 40.0);
        assert_relative_eq!(span.span.endpoints_mm[0].x, 0.0);
        assert_relative_eq!(span.span.endpoints_mm[1].x, 40.0);
    }

    #[test]
    fn test_span_without_bottom_edges() {
        let (doc, body) = block();
        let scale = UnitScale::from_document(&doc);
        let err = measure_face_span(&doc, body, &query("normal_closest:+Z", SpanMode::MaxEdgeLength), &scale)
            .unwrap_err();
        assert!(err.to_string().starts_with("No bottom edges found within epsilon"));
    }

    #[test]
    fn test_projection_axis_skips_normal() {
        let points = [DVec3::ZERO, DVec3::new(1.0, 0.0, 5.0)];
        assert_eq!(projection_axis(Some(DVec3::Z), &points), Axis::X);
        assert_eq!(projection_axis(None, &points), Axis::Z);
    }

    #[test]
    fn test_parse_span_mode() {
        assert_eq!("projected_extent".parse::<SpanMode>().unwrap(), SpanMode::ProjectedExtent);
        assert!("widest".parse::<SpanMode>().is_err());
    }
}
