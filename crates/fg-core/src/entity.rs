//! Entity identity and enumeration
//!
//! Bodies are filtered to visible solids unless stated otherwise. A body whose
//! solid or visible flag cannot be read is skipped rather than failing the
//! request.

use std::collections::BTreeSet;

use glam::DVec3;
use serde::Serialize;

use crate::document::{
    BodyId, CurveId, EdgeId, EntityRef, FaceId, FeatureId, HostDocument, SketchId,
};
use crate::error::{EngineError, EngineResult};

/// Which bodies take part in body resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyScope {
    /// Solid and visible
    VisibleSolid,
    /// Solid, hidden or not
    AllSolid,
}

/// Identity token, or the empty string when the host has none
pub fn token_or_empty(doc: &dyn HostDocument, entity: EntityRef) -> String {
    doc.entity_token(entity).unwrap_or_default()
}

/// Bodies in `scope`, in host order
pub fn solid_bodies(doc: &dyn HostDocument, scope: BodyScope) -> Vec<BodyId> {
    doc.bodies()
        .into_iter()
        .filter(|body| {
            let solid = doc.body_is_solid(*body);
            let visible = doc.body_is_visible(*body);
            match (scope, solid, visible) {
                (_, None, _) => false,
                (BodyScope::VisibleSolid, Some(s), Some(v)) => s && v,
                (BodyScope::VisibleSolid, Some(_), None) => false,
                (BodyScope::AllSolid, Some(s), _) => s,
            }
        })
        .collect()
}

/// Visible solid bodies, in host order
pub fn visible_solid_bodies(doc: &dyn HostDocument) -> Vec<BodyId> {
    solid_bodies(doc, BodyScope::VisibleSolid)
}

/// Sorted names of the given bodies
pub fn sorted_names(doc: &dyn HostDocument, bodies: &[BodyId]) -> Vec<String> {
    let mut names: Vec<String> = bodies.iter().filter_map(|b| doc.body_name(*b)).collect();
    names.sort();
    names
}

/// Resolve a body by name, or the single visible solid body when no name is given
pub fn resolve_body(doc: &dyn HostDocument, name: Option<&str>) -> EngineResult<BodyId> {
    resolve_body_scoped(doc, name, BodyScope::VisibleSolid)
}

/// Resolve a body within `scope`
pub fn resolve_body_scoped(
    doc: &dyn HostDocument,
    name: Option<&str>,
    scope: BodyScope,
) -> EngineResult<BodyId> {
    let bodies = solid_bodies(doc, scope);
    if let Some(name) = name.filter(|n| !n.is_empty()) {
        return bodies
            .iter()
            .copied()
            .find(|b| doc.body_name(*b).as_deref() == Some(name))
            .ok_or_else(|| {
                let candidates = sorted_names(doc, &bodies);
                EngineError::not_found_with(
                    format!("Body not found: {name}. Candidates: {candidates:?}"),
                    candidates,
                )
            });
    }
    match bodies.as_slice() {
        [only] => Ok(*only),
        [] => Err(EngineError::not_found_with(
            match scope {
                BodyScope::VisibleSolid => "No visible solid body found.",
                BodyScope::AllSolid => "No solid bodies found.",
            },
            Vec::new(),
        )),
        _ => Err(EngineError::not_found_with(
            match scope {
                BodyScope::VisibleSolid => "Multiple visible bodies; specify body_name.",
                BodyScope::AllSolid => "Multiple bodies found; specify body_name.",
            },
            sorted_names(doc, &bodies),
        )),
    }
}

/// Identity used to tell bodies apart across a mutation: token, else name
pub fn body_key(doc: &dyn HostDocument, body: BodyId) -> Option<String> {
    doc.entity_token(EntityRef::Body(body))
        .or_else(|| doc.body_name(body))
}

/// Identity keys of the given bodies
pub fn body_keys(doc: &dyn HostDocument, bodies: &[BodyId]) -> BTreeSet<String> {
    bodies.iter().filter_map(|b| body_key(doc, *b)).collect()
}

/// Face, edge and vertex counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TopologyCounts {
    pub faces: usize,
    pub edges: usize,
    pub vertices: usize,
}

impl TopologyCounts {
    /// Counts of one body; unreadable collections count as zero
    pub fn of_body(doc: &dyn HostDocument, body: BodyId) -> Self {
        Self {
            faces: doc.body_faces(body).map_or(0, |f| f.len()),
            edges: doc.body_edges(body).map_or(0, |e| e.len()),
            vertices: doc.body_vertices(body).map_or(0, |v| v.len()),
        }
    }

    /// Summed counts of several bodies
    pub fn total(doc: &dyn HostDocument, bodies: &[BodyId]) -> Self {
        bodies
            .iter()
            .map(|b| Self::of_body(doc, *b))
            .fold(Self::default(), |acc, c| Self {
                faces: acc.faces + c.faces,
                edges: acc.edges + c.edges,
                vertices: acc.vertices + c.vertices,
            })
    }
}

/// Start and end points of an edge
pub fn edge_endpoints(doc: &dyn HostDocument, edge: EdgeId) -> Option<(DVec3, DVec3)> {
    let (start, end) = doc.edge_vertices(edge)?;
    Some((doc.vertex_point(start)?, doc.vertex_point(end)?))
}

/// Normalized start-to-end direction; `None` for closed or degenerate edges
pub fn edge_direction(doc: &dyn HostDocument, edge: EdgeId) -> Option<DVec3> {
    let (start, end) = edge_endpoints(doc, edge)?;
    let v = end - start;
    let len = v.length();
    (len > 0.0).then(|| v / len)
}

// ============== Lookup by token ==============

/// Face with the given token on any visible solid body
pub fn find_face(doc: &dyn HostDocument, token: &str) -> Option<FaceId> {
    visible_solid_bodies(doc)
        .into_iter()
        .flat_map(|b| doc.body_faces(b).unwrap_or_default())
        .find(|f| doc.entity_token(EntityRef::Face(*f)).as_deref() == Some(token))
}

/// Edge with the given token on any visible solid body
pub fn find_edge(doc: &dyn HostDocument, token: &str) -> Option<EdgeId> {
    visible_solid_bodies(doc)
        .into_iter()
        .flat_map(|b| doc.body_edges(b).unwrap_or_default())
        .find(|e| doc.entity_token(EntityRef::Edge(*e)).as_deref() == Some(token))
}

pub fn find_feature(doc: &dyn HostDocument, token: &str) -> Option<FeatureId> {
    doc.features()
        .into_iter()
        .find(|f| doc.entity_token(EntityRef::Feature(*f)).as_deref() == Some(token))
}

pub fn find_sketch(doc: &dyn HostDocument, token: &str) -> Option<SketchId> {
    doc.sketches()
        .into_iter()
        .find(|s| doc.entity_token(EntityRef::Sketch(*s)).as_deref() == Some(token))
}

pub fn find_curve(doc: &dyn HostDocument, sketch: SketchId, token: &str) -> Option<CurveId> {
    doc.sketch_curves(sketch)?
        .into_iter()
        .find(|c| doc.entity_token(EntityRef::Curve(*c)).as_deref() == Some(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;

    fn two_bodies() -> (MemoryDocument, BodyId, BodyId) {
        let mut doc = MemoryDocument::new("Test");
        let a = doc.add_box("Bracket", DVec3::ZERO, DVec3::ONE);
        let b = doc.add_box("Arm", DVec3::splat(2.0), DVec3::splat(3.0));
        (doc, a, b)
    }

    #[test]
    fn test_resolve_by_name() {
        let (doc, a, _) = two_bodies();
        assert_eq!(resolve_body(&doc, Some("Bracket")).unwrap(), a);
    }

    #[test]
    fn test_resolve_missing_lists_sorted_candidates() {
        let (doc, _, _) = two_bodies();
        let err = resolve_body(&doc, Some("Nope")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Body not found: Nope. Candidates: [\"Arm\", \"Bracket\"]"
        );
        assert_eq!(
            err.candidates().unwrap(),
            &["Arm".to_string(), "Bracket".to_string()]
        );
    }

    #[test]
    fn test_resolve_ambiguous_and_empty() {
        let (mut doc, a, b) = two_bodies();
        let err = resolve_body(&doc, None).unwrap_err();
        assert_eq!(err.to_string(), "Multiple visible bodies; specify body_name.");

        doc.set_visible(a, false);
        assert_eq!(resolve_body(&doc, None).unwrap(), b);

        doc.set_solid(b, false);
        let err = resolve_body(&doc, None).unwrap_err();
        assert_eq!(err.to_string(), "No visible solid body found.");
        assert_eq!(err.candidates().unwrap().len(), 0);
    }

    #[test]
    fn test_hidden_scope() {
        let (mut doc, a, _) = two_bodies();
        doc.set_visible(a, false);
        assert_eq!(visible_solid_bodies(&doc).len(), 1);
        assert_eq!(solid_bodies(&doc, BodyScope::AllSolid).len(), 2);
        assert_eq!(
            resolve_body_scoped(&doc, Some("Bracket"), BodyScope::AllSolid).unwrap(),
            a
        );
    }

    #[test]
    fn test_topology_totals() {
        let (doc, a, b) = two_bodies();
        let total = TopologyCounts::total(&doc, &[a, b]);
        assert_eq!(total.faces, 12);
        assert_eq!(total.edges, 24);
        assert_eq!(total.vertices, 16);
    }

    #[test]
    fn test_find_by_token() {
        let (doc, a, _) = two_bodies();
        let face = doc.body_faces(a).unwrap()[2];
        let token = doc.entity_token(EntityRef::Face(face)).unwrap();
        assert_eq!(find_face(&doc, &token), Some(face));
        assert_eq!(find_face(&doc, "missing"), None);
        let edge = doc.body_edges(a).unwrap()[0];
        let token = doc.entity_token(EntityRef::Edge(edge)).unwrap();
        assert_eq!(find_edge(&doc, &token), Some(edge));
    }

    #[test]
    fn test_edge_direction_is_normalized() {
        let (doc, a, _) = two_bodies();
        for edge in doc.body_edges(a).unwrap() {
            let dir = edge_direction(&doc, edge).unwrap();
            assert!((dir.length() - 1.0).abs() < 1e-12);
        }
    }
}
