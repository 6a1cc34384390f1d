//! Read-only commands

use serde::Serialize;
use serde_json::{Value, json};

use super::Args;
use crate::constants::DEFAULT_SPAN_EPS_MM;
use crate::document::{BodyId, EntityRef, FeatureId, HostDocument};
use crate::entity::{self, BodyScope, TopologyCounts};
use crate::error::{EngineError, EngineResult};
use crate::measure::{self, BboxMm, FaceMeasurement, FaceSpanQuery, PhysicalMm, SpanMode};
use crate::selector::{self, Candidate, EdgeSelector, FaceSelector, Selection, VertexSelector};
use crate::units::{PointMm, UnitScale};

/// Serialize response data
fn to_data<T: Serialize>(value: &T) -> EngineResult<Value> {
    serde_json::to_value(value).map_err(|e| EngineError::Internal(e.to_string()))
}

/// Document name, internal units and visible solid bodies
pub fn status(doc: &dyn HostDocument, _args: Args<'_>) -> EngineResult<Value> {
    let bodies = entity::visible_solid_bodies(doc);
    let names = entity::sorted_names(doc, &bodies);
    Ok(json!({
        "document": { "name": doc.name() },
        "units": {
            "default_length_units": doc.internal_units().map(|u| u.as_str()),
            "mm_per_unit": UnitScale::from_document(doc).length_factor(),
        },
        "bodies": {
            "visible_solid_count": names.len(),
            "names": names,
        },
    }))
}

/// Names of the visible solid bodies, in document order
pub fn list_bodies(doc: &dyn HostDocument, _args: Args<'_>) -> EngineResult<Value> {
    let names: Vec<String> = entity::visible_solid_bodies(doc)
        .into_iter()
        .filter_map(|b| doc.body_name(b))
        .collect();
    Ok(json!({ "bodies": names }))
}

/// Counts, bounds and physical properties of one body
pub fn get_body_info(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<Value> {
    let scope = if args.flag("include_hidden", false) {
        BodyScope::AllSolid
    } else {
        BodyScope::VisibleSolid
    };
    let body_name = args.text("body_name");
    let body = entity::resolve_body_scoped(doc, body_name.as_deref(), scope)?;
    let scale = UnitScale::from_document(doc);
    let bounds = doc
        .body_bounding_box(body)
        .ok_or_else(|| EngineError::not_found("Failed to read body bounding box."))?;

    Ok(json!({
        "body": {
            "name": doc.body_name(body),
            "id": doc.entity_token(EntityRef::Body(body)),
        },
        "counts": TopologyCounts::of_body(doc, body),
        "bbox_mm": BboxMm::from_internal(&bounds, &scale),
        "physical_mm": PhysicalMm::of_body(doc, body, &scale),
        "transform": { "is_identity": true },
        "units": "mm",
    }))
}

/// Bounding box size of one body
pub fn measure_bbox(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<Value> {
    let body_name = args.text("body_name");
    let body = entity::resolve_body(doc, body_name.as_deref())?;
    let scale = UnitScale::from_document(doc);
    let bounds = doc
        .body_bounding_box(body)
        .ok_or_else(|| EngineError::not_found("Failed to read body bounding box."))?;
    let bbox = BboxMm::from_internal(&bounds, &scale);
    Ok(json!({
        "body": doc.body_name(body),
        "x_mm": bbox.size.x,
        "y_mm": bbox.size.y,
        "z_mm": bbox.size.z,
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct FeatureSummary {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    body_name: Option<String>,
}

impl FeatureSummary {
    fn of(doc: &dyn HostDocument, feature: FeatureId) -> Self {
        Self {
            id: doc.entity_token(EntityRef::Feature(feature)),
            name: doc.feature_name(feature),
            kind: doc.feature_kind(feature),
            body_name: doc.feature_body_name(feature),
        }
    }
}

/// Timeline features, optionally filtered by a case-insensitive type fragment
pub fn list_features(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<Value> {
    let filter = args.text("filter_type").map(|f| f.to_lowercase());
    let mut features: Vec<FeatureSummary> = doc
        .features()
        .into_iter()
        .map(|f| FeatureSummary::of(doc, f))
        .filter(|f| match (&filter, &f.kind) {
            (None, _) => true,
            (Some(filter), Some(kind)) => kind.to_lowercase().contains(filter.as_str()),
            (Some(_), None) => false,
        })
        .collect();
    features.sort_by(|a, b| {
        let key = |f: &FeatureSummary| {
            (
                f.kind.clone().unwrap_or_default(),
                f.name.clone().unwrap_or_default(),
                f.id.clone().unwrap_or_default(),
            )
        };
        key(a).cmp(&key(b))
    });
    Ok(json!({ "features": features }))
}

/// One feature with its timeline position
pub fn get_feature_info(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<Value> {
    let token = args
        .text("feature_id")
        .ok_or_else(|| EngineError::InvalidInput("feature_id is required".into()))?;
    let feature = entity::find_feature(doc, &token)
        .ok_or_else(|| EngineError::not_found(format!("feature_id not found: {token}")))?;
    let summary = FeatureSummary::of(doc, feature);
    Ok(json!({
        "id": summary.id,
        "name": summary.name,
        "type": summary.kind,
        "body_name": summary.body_name,
        "timeline_index": doc.feature_timeline_index(feature),
    }))
}

fn resolved<H>(
    entity_type: &str,
    selector: &str,
    body: BodyId,
    doc: &dyn HostDocument,
    id: Option<String>,
    selection: Selection<H>,
) -> Value {
    let Candidate {
        score,
        magnitude,
        position,
        normal,
        ..
    } = selection.winner;
    json!({
        "entity_type": entity_type,
        "selector": selector,
        "body_name": doc.body_name(body),
        "id": id,
        "score": score,
        "magnitude": magnitude,
        "position_mm": PointMm::from(position),
        "normal": normal.map(PointMm::from),
        "candidates_considered": selection.considered,
    })
}

/// Run a face, edge or vertex selector against one body without mutating
pub fn resolve_entity(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<Value> {
    let entity_type = args.text_or("entity_type", "face");
    let selector_text = args
        .text("selector")
        .ok_or_else(|| EngineError::InvalidInput("selector is required".into()))?;
    let point_mm = args.point("point_mm", "point_mm must be an object with x,y,z")?;
    let scale = UnitScale::from_document(doc);

    match entity_type.as_str() {
        "face" => {
            let selector: FaceSelector = selector::parse_selector("selector", &selector_text)?;
            let body_name = args.text("body_name");
            let body = entity::resolve_body(doc, body_name.as_deref())?;
            let faces = doc.body_faces(body).unwrap_or_default();
            let selection = selector::select_face(doc, &faces, selector, &scale)?;
            let id = doc.entity_token(EntityRef::Face(selection.winner.entity));
            let mut data = resolved("face", &selector_text, body, doc, id, selection.clone());
            data["face"] = serde_json::to_value(FaceMeasurement::of_face(
                doc,
                selection.winner.entity,
                &scale,
            ))
            .map_err(|e| EngineError::Internal(e.to_string()))?;
            Ok(data)
        }
        "edge" => {
            let selector: EdgeSelector = selector::parse_selector("selector", &selector_text)?;
            let body_name = args.text("body_name");
            let body = entity::resolve_body(doc, body_name.as_deref())?;
            let edges = doc.body_edges(body).unwrap_or_default();
            let selection = selector::select_edge(doc, &edges, selector, point_mm, &scale)?;
            let id = doc.entity_token(EntityRef::Edge(selection.winner.entity));
            Ok(resolved("edge", &selector_text, body, doc, id, selection))
        }
        "vertex" => {
            let selector: VertexSelector = selector::parse_selector("selector", &selector_text)?;
            let body_name = args.text("body_name");
            let body = entity::resolve_body(doc, body_name.as_deref())?;
            let vertices = doc.body_vertices(body).unwrap_or_default();
            let selection = selector::select_vertex(doc, &vertices, selector, point_mm, &scale)?;
            let id = doc.entity_token(EntityRef::Vertex(selection.winner.entity));
            Ok(resolved("vertex", &selector_text, body, doc, id, selection))
        }
        other => Err(EngineError::InvalidInput(format!(
            "Unsupported entity_type: {other}"
        ))),
    }
}

/// Span of the bottom edges of a selected face
pub fn measure_face_span(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<Value> {
    let selector_text = args.text_or("face_selector", "max_centroid_x");
    let selector: FaceSelector = selector::parse_selector("face_selector", &selector_text)?;
    let eps_mm = args.number_or("eps_mm", DEFAULT_SPAN_EPS_MM, "eps_mm must be a number")?;
    let mode: SpanMode = args.text_or("span_mode", SpanMode::default().as_str()).parse()?;
    let body_name = args.text("body_name");
    let body = entity::resolve_body(doc, body_name.as_deref())?;
    let scale = UnitScale::from_document(doc);

    let query = FaceSpanQuery {
        selector_text,
        selector,
        require_planar: args.flag("require_planar", false),
        mode,
        eps_mm,
    };
    let span = measure::measure_face_span(doc, body, &query, &scale)?;
    Ok(json!({
        "body": { "name": doc.body_name(body) },
        "face": to_data(&span.face)?,
        "bottom": to_data(&span.bottom)?,
        "span": to_data(&span.span)?,
        "trace": { "candidates_considered": to_data(&span.candidates_considered)? },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::QueryFn;
    use crate::document::MemoryDocument;
    use crate::feature::{BooleanOp, ExtrudeDirection, FeatureOp};
    use approx::assert_relative_eq;
    use glam::DVec3;

    fn run(f: QueryFn, doc: &MemoryDocument, request: Value) -> EngineResult<Value> {
        f(doc, Args::new(&request))
    }

    fn block() -> (MemoryDocument, BodyId) {
        let mut doc = MemoryDocument::new("Part");
        let body = doc.add_box("Block", DVec3::ZERO, DVec3::new(4.0, 2.0, 1.0));
        (doc, body)
    }

    #[test]
    fn test_status_lists_sorted_names() {
        let (mut doc, _) = block();
        doc.add_box("Arm", DVec3::splat(10.0), DVec3::splat(11.0));
        let data = run(status, &doc, json!({})).unwrap();
        assert_eq!(data["document"]["name"], "Part");
        assert_eq!(data["units"]["default_length_units"], "cm");
        assert_eq!(data["bodies"]["visible_solid_count"], 2);
        assert_eq!(data["bodies"]["names"], json!(["Arm", "Block"]));
    }

    #[test]
    fn test_list_bodies_skips_hidden() {
        let (mut doc, body) = block();
        doc.add_box("Arm", DVec3::splat(10.0), DVec3::splat(11.0));
        doc.set_visible(body, false);
        let data = run(list_bodies, &doc, json!({})).unwrap();
        assert_eq!(data["bodies"], json!(["Arm"]));
    }

    #[test]
    fn test_get_body_info_in_mm() {
        let (doc, _) = block();
        let data = run(get_body_info, &doc, json!({ "body_name": "Block" })).unwrap();
        assert_eq!(data["body"]["name"], "Block");
        assert_eq!(data["counts"]["faces"], 6);
        assert_relative_eq!(data["bbox_mm"]["size"]["x"].as_f64().unwrap(), 40.0);
        assert_relative_eq!(
            data["physical_mm"]["volume_mm3"].as_f64().unwrap(),
            8000.0,
            max_relative = 1e-9
        );
        assert_relative_eq!(
            data["physical_mm"]["density_kg_m3"].as_f64().unwrap(),
            7850.0,
            max_relative = 1e-9
        );
        assert_eq!(data["transform"]["is_identity"], true);
        assert_eq!(data["units"], "mm");
    }

    #[test]
    fn test_get_body_info_hidden_needs_flag() {
        let (mut doc, body) = block();
        doc.set_visible(body, false);
        let err = run(get_body_info, &doc, json!({})).unwrap_err();
        assert_eq!(err.kind(), "not_found");
        let data = run(get_body_info, &doc, json!({ "include_hidden": true })).unwrap();
        assert_eq!(data["body"]["name"], "Block");
    }

    #[test]
    fn test_measure_bbox() {
        let (doc, _) = block();
        let data = run(measure_bbox, &doc, json!({})).unwrap();
        assert_eq!(data["body"], "Block");
        assert_relative_eq!(data["x_mm"].as_f64().unwrap(), 40.0);
        assert_relative_eq!(data["z_mm"].as_f64().unwrap(), 10.0);
    }

    #[test]
    fn test_features_listing_and_info() {
        let (mut doc, body) = block();
        let top = doc.body_faces(body).unwrap()[5];
        let op = FeatureOp::FaceExtrude {
            face: top,
            distance: 0.5,
            direction: ExtrudeDirection::Normal,
            operation: BooleanOp::Join,
        };
        let feature = doc.create_feature(&op).unwrap();
        let data = run(list_features, &doc, json!({ "filter_type": "extrude" })).unwrap();
        let features = data["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["type"], "ExtrudeFeature");
        let none = run(list_features, &doc, json!({ "filter_type": "fillet" })).unwrap();
        assert!(none["features"].as_array().unwrap().is_empty());

        let token = doc.entity_token(EntityRef::Feature(feature)).unwrap();
        let info = run(get_feature_info, &doc, json!({ "feature_id": token })).unwrap();
        assert_eq!(info["timeline_index"], 0);
        assert_eq!(info["name"], features[0]["name"]);

        let err = run(get_feature_info, &doc, json!({ "feature_id": "nope" })).unwrap_err();
        assert_eq!(err.to_string(), "feature_id not found: nope");
        let err = run(get_feature_info, &doc, json!({})).unwrap_err();
        assert_eq!(err.to_string(), "feature_id is required");
    }

    #[test]
    fn test_resolve_entity_face_and_vertex() {
        let (doc, _) = block();
        let data = run(
            resolve_entity,
            &doc,
            json!({ "entity_type": "face", "selector": "normal_closest:+Z" }),
        )
        .unwrap();
        assert_relative_eq!(data["position_mm"]["z"].as_f64().unwrap(), 10.0);
        assert_eq!(data["candidates_considered"], 6);
        assert_relative_eq!(data["face"]["area_mm2"].as_f64().unwrap(), 800.0);

        let vertex = run(
            resolve_entity,
            &doc,
            json!({
                "entity_type": "vertex",
                "selector": "closest_to_point",
                "point_mm": { "x": 41.0, "y": 21.0, "z": 11.0 },
            }),
        )
        .unwrap();
        assert_relative_eq!(vertex["position_mm"]["x"].as_f64().unwrap(), 40.0);
        assert_relative_eq!(vertex["position_mm"]["y"].as_f64().unwrap(), 20.0);
    }

    #[test]
    fn test_resolve_entity_errors() {
        let (doc, _) = block();
        let err = run(resolve_entity, &doc, json!({ "selector": "biggest" })).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported selector: biggest");
        assert_eq!(err.kind(), "invalid_selector");
        let err = run(
            resolve_entity,
            &doc,
            json!({ "entity_type": "edge", "selector": "closest_to_point" }),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "point_mm is required for closest_to_point");
        let err = run(
            resolve_entity,
            &doc,
            json!({ "entity_type": "loop", "selector": "x" }),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn test_measure_face_span_defaults() {
        let (doc, _) = block();
        let data = run(measure_face_span, &doc, json!({})).unwrap();
        assert_eq!(data["body"]["name"], "Block");
        assert_eq!(data["face"]["selector"], "max_centroid_x");
        assert_eq!(data["span"]["mode"], "max_edge_length");
        assert_relative_eq!(data["span"]["value_mm"].as_f64().unwrap(), 20.0);
        assert_eq!(data["trace"]["candidates_considered"]["faces"], 6);
    }

    #[test]
    fn test_measure_face_span_rejects_bad_input() {
        let (doc, _) = block();
        let err = run(measure_face_span, &doc, json!({ "eps_mm": "wide" })).unwrap_err();
        assert_eq!(err.to_string(), "eps_mm must be a number");
        let err = run(measure_face_span, &doc, json!({ "span_mode": "diagonal" })).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported span_mode: diagonal");
        let err = run(measure_face_span, &doc, json!({ "face_selector": "max_x" })).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported face_selector: max_x");
    }
}
