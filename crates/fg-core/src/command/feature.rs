//! Planners of the guarded feature commands
//!
//! Each planner validates its request, resolves selectors against the live
//! document and returns a [`FeaturePlan`]. Nothing here mutates the document;
//! the session hands the plan to [`crate::mutator`].

use glam::DVec3;
use serde_json::{Value, json};

use super::{Args, point_value};
use crate::constants::{
    FULL_TURN_DEG, MAX_DISTANCE_MM, MAX_EXTRUDE_MM, MAX_PATTERN_INSTANCES,
    MAX_PROFILE_DISTANCE_MM, MAX_RADIUS_MM,
};
use crate::document::{BodyId, CurveId, EntityRef, FaceId, HostDocument, SketchId};
use crate::entity;
use crate::error::{EngineError, EngineResult};
use crate::feature::{
    BooleanOp, CandidateTrace, ExtrudeDirection, Extent, FeatureBase, FeatureOp, FeaturePlan,
    MirrorPlane, OperationKind, RevolveAxis,
};
use crate::geometry::{Axis, ConstructionPlane};
use crate::selector::{self, EdgeSelector, FaceSelector};
use crate::units::{PointMm, UnitScale};

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidInput(message.into())
}

/// A positive length no larger than `max`
fn bounded_length(
    args: &Args<'_>,
    key: &str,
    not_numeric: &str,
    limit_name: &str,
    max: f64,
) -> EngineResult<f64> {
    let value = args.number(key, not_numeric)?;
    if value <= 0.0 {
        return Err(invalid(format!("{key} must be > 0")));
    }
    if value > max {
        return Err(invalid(format!("{key} exceeds {limit_name} ({max})")));
    }
    Ok(value)
}

fn operation(args: &Args<'_>) -> EngineResult<BooleanOp> {
    args.text_or("operation", BooleanOp::New.as_str()).parse()
}

fn direction(args: &Args<'_>) -> EngineResult<ExtrudeDirection> {
    args.text_or("direction", ExtrudeDirection::Normal.as_str())
        .parse()
}

fn face_token(doc: &dyn HostDocument, face: FaceId) -> Option<String> {
    doc.entity_token(EntityRef::Face(face))
}

fn resolve_named_body(doc: &dyn HostDocument, args: &Args<'_>) -> EngineResult<BodyId> {
    let name = args.text("body_name");
    entity::resolve_body(doc, name.as_deref())
}

fn find_sketch(doc: &dyn HostDocument, field: &str, token: &str) -> EngineResult<SketchId> {
    entity::find_sketch(doc, token)
        .ok_or_else(|| EngineError::not_found(format!("{field} not found: {token}")))
}

fn find_face(doc: &dyn HostDocument, token: &str) -> EngineResult<FaceId> {
    entity::find_face(doc, token)
        .ok_or_else(|| EngineError::not_found(format!("face_id not found: {token}")))
}

// ============== Extrude ==============

const FACE_SPAN_SKIPPED: &str = "face_span not computed (no selector provided)";

/// Extrude a planar face of a body
pub fn extrude_feature(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<FeaturePlan> {
    let selector_text = args.text_or("face_selector", "largest_planar");
    let face_selector: FaceSelector = selector::parse_selector("face_selector", &selector_text)?;
    let operation = operation(&args)?;
    let direction = direction(&args)?;
    let distance_mm = bounded_length(
        &args,
        "distance_mm",
        "distance_mm must be a number",
        "MAX_EXTRUDE_MM",
        MAX_EXTRUDE_MM,
    )?;
    let body = resolve_named_body(doc, &args)?;
    let scale = UnitScale::from_document(doc);

    let faces = doc.body_faces(body).unwrap_or_default();
    let candidates = selector::face_candidates(doc, &faces, face_selector, true, &scale);
    let selection = selector::pick(candidates)
        .ok_or_else(|| EngineError::not_found("No planar faces matched selector."))?;
    let face = selection.winner.entity;
    tracing::debug!(
        "Extrude face {:?} picked from {} candidates",
        face,
        selection.considered
    );
    let area_mm2 = doc.face_area(face).map(|a| scale.area_to_mm2(a));
    let normal = doc
        .face_normal(face)
        .and_then(|n| n.try_normalize())
        .map(PointMm::from);

    let summary = json!({
        "body_name": doc.body_name(body),
        "face": {
            "id": face_token(doc, face),
            "selector": selector_text,
            "centroid_mm": PointMm::from(selection.winner.position),
            "normal": normal,
            "area_mm2": area_mm2,
        },
        "operation": operation.as_str(),
        "distance_mm": distance_mm,
        "direction": direction.as_str(),
    });
    let op = FeatureOp::FaceExtrude {
        face,
        distance: distance_mm,
        direction,
        operation,
    };
    Ok(FeaturePlan::new(OperationKind::FaceExtrude, op, summary)
        .with_target(Some(body))
        .with_operation(operation)
        .with_trace(CandidateTrace {
            faces: Some(selection.considered),
            ..CandidateTrace::default()
        })
        .with_warning(FACE_SPAN_SKIPPED))
}

/// Extrude a closed profile of a sketch
pub fn extrude_profile(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<FeaturePlan> {
    let sketch_token = args
        .text("sketch_id")
        .ok_or_else(|| invalid("sketch_id is required"))?;
    let profile_index = args.integer_or("profile_index", 0, "profile_index must be an integer")?;
    let through_all = args.flag("through_all", false);
    let extent = if through_all {
        Extent::ThroughAll
    } else {
        Extent::Distance(bounded_length(
            &args,
            "distance_mm",
            "distance_mm must be a number",
            "MAX_DISTANCE_MM",
            MAX_PROFILE_DISTANCE_MM,
        )?)
    };
    let direction = direction(&args)?;
    let operation = operation(&args)?;

    let sketch = find_sketch(doc, "sketch_id", &sketch_token)?;
    let profile_count = doc.sketch_profiles(sketch).map_or(0, |p| p.len());
    let index = usize::try_from(profile_index)
        .ok()
        .filter(|i| *i < profile_count)
        .ok_or_else(|| EngineError::not_found(format!("Profile not found at index {profile_index}")))?;

    let body_name = args.text("body_name");
    let target = match body_name.as_deref() {
        Some(name) => Some(entity::resolve_body(doc, Some(name))?),
        None => None,
    };

    let summary = json!({
        "sketch_id": sketch_token,
        "profile_index": index,
        "operation": operation.as_str(),
        "distance_mm": extent.distance(),
        "direction": direction.as_str(),
        "body_name": body_name,
        "through_all": through_all,
    });
    let op = FeatureOp::ProfileExtrude {
        sketch,
        profile_index: index,
        extent,
        direction,
        operation,
        target: target.filter(|_| operation.is_combine()),
    };
    Ok(FeaturePlan::new(OperationKind::ProfileExtrude, op, summary)
        .with_target(target)
        .with_operation(operation))
}

// ============== Fillet ==============

/// Fillet one edge, given by id or by selector
pub fn fillet_feature(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<FeaturePlan> {
    let edge_id = args.text("edge_id");
    let edge_selector = args.text("edge_selector");
    if edge_id.is_none() && edge_selector.is_none() {
        return Err(invalid("edge_id or edge_selector is required"));
    }
    let radius_mm = bounded_length(
        &args,
        "radius_mm",
        "radius_mm must be numeric",
        "MAX_RADIUS_MM",
        MAX_RADIUS_MM,
    )?;

    let (edge, body, trace) = if let Some(token) = &edge_id {
        let edge = entity::find_edge(doc, token)
            .ok_or_else(|| EngineError::not_found(format!("edge_id not found: {token}")))?;
        (edge, doc.edge_body(edge), CandidateTrace::default())
    } else {
        let text = edge_selector.as_deref().unwrap_or_default();
        let selector: EdgeSelector = selector::parse_selector("edge_selector", text)?;
        let body = resolve_named_body(doc, &args)?;
        let point_mm = args.point("point_mm", "point_mm must be an object with x,y,z")?;
        let scale = UnitScale::from_document(doc);
        let edges = doc.body_edges(body).unwrap_or_default();
        let selection = selector::select_edge(doc, &edges, selector, point_mm, &scale)?;
        let trace = CandidateTrace {
            edges: Some(selection.considered),
            ..CandidateTrace::default()
        };
        (selection.winner.entity, Some(body), trace)
    };

    let summary = json!({
        "edge_id": doc.entity_token(EntityRef::Edge(edge)),
        "edge_selector": edge_selector,
        "radius_mm": radius_mm,
    });
    let op = FeatureOp::Fillet {
        edges: vec![edge],
        radius: radius_mm,
    };
    Ok(FeaturePlan::new(OperationKind::Fillet, op, summary)
        .with_target(body)
        .with_trace(trace))
}

// ============== Hole ==============

/// Simple hole on a face, given by id or by selector
pub fn hole_feature(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<FeaturePlan> {
    const NOT_NUMERIC: &str = "center_mm and diameter_mm must be numeric";
    let face_id = args.text("face_id");
    let face_selector = args.text("face_selector");
    if face_id.is_none() && face_selector.is_none() {
        return Err(invalid("face_selector or face_id is required"));
    }
    let center_value = args
        .get("center_mm")
        .filter(|v| v.is_object())
        .ok_or_else(|| invalid("center_mm must be an object with x,y,z"))?;
    let center = point_value(center_value, NOT_NUMERIC)?;
    let diameter_mm = args.number("diameter_mm", NOT_NUMERIC)?;
    if diameter_mm <= 0.0 {
        return Err(invalid("diameter_mm must be > 0"));
    }
    let through_all = args.flag("through_all", false);
    let extent = if through_all {
        Extent::ThroughAll
    } else {
        Extent::Distance(bounded_length(
            &args,
            "depth_mm",
            "depth_mm must be numeric when through_all is false",
            "MAX_DISTANCE_MM",
            MAX_DISTANCE_MM,
        )?)
    };

    let (face, body, trace) = if let Some(token) = &face_id {
        let face = find_face(doc, token)?;
        (face, doc.face_body(face), CandidateTrace::default())
    } else {
        let text = face_selector.as_deref().unwrap_or_default();
        let selector: FaceSelector = selector::parse_selector("face_selector", text)?;
        let body = resolve_named_body(doc, &args)?;
        let scale = UnitScale::from_document(doc);
        let faces = doc.body_faces(body).unwrap_or_default();
        let selection = selector::select_face(doc, &faces, selector, &scale)?;
        let trace = CandidateTrace {
            faces: Some(selection.considered),
            ..CandidateTrace::default()
        };
        (selection.winner.entity, Some(body), trace)
    };

    let summary = json!({
        "body_name": body.and_then(|b| doc.body_name(b)),
        "face": {
            "id": face_token(doc, face),
            "selector": face_selector,
        },
        "center_mm": PointMm::from(center),
        "diameter_mm": diameter_mm,
        "depth_mm": extent.distance(),
        "through_all": through_all,
    });
    let op = FeatureOp::Hole {
        face,
        center,
        diameter: diameter_mm,
        extent,
    };
    Ok(FeaturePlan::new(OperationKind::Hole, op, summary)
        .with_target(body)
        .with_trace(trace))
}

// ============== Shell ==============

/// Hollow a body, opening the given faces or its largest planar face
pub fn shell_feature(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<FeaturePlan> {
    let thickness_mm = bounded_length(
        &args,
        "thickness_mm",
        "thickness_mm must be numeric",
        "MAX_DISTANCE_MM",
        MAX_DISTANCE_MM,
    )?;
    let inside = args.flag("inside", true);
    let body = resolve_named_body(doc, &args)?;

    let requested = args
        .string_list("remove_faces", "remove_faces must be a list of face ids")?
        .filter(|ids| !ids.is_empty());
    let mut trace = CandidateTrace::default();
    let (remove_faces, remove_ids) = match requested {
        Some(ids) => {
            let faces: Vec<FaceId> = ids
                .iter()
                .filter_map(|id| entity::find_face(doc, id))
                .collect();
            if faces.len() != ids.len() {
                return Err(EngineError::not_found("One or more remove_faces ids not found"));
            }
            (faces, ids)
        }
        None => {
            let scale = UnitScale::from_document(doc);
            let faces = doc.body_faces(body).unwrap_or_default();
            match selector::select_face(doc, &faces, FaceSelector::LargestPlanar, &scale) {
                Ok(selection) => {
                    trace.faces = Some(selection.considered);
                    let face = selection.winner.entity;
                    let ids = face_token(doc, face).into_iter().collect();
                    (vec![face], ids)
                }
                Err(e) => {
                    tracing::debug!("Shell without an open face: {}", e);
                    (Vec::new(), Vec::new())
                }
            }
        }
    };

    let summary = json!({
        "body_name": doc.body_name(body),
        "thickness_mm": thickness_mm,
        "remove_faces": remove_ids,
        "inside": inside,
    });
    let op = FeatureOp::Shell {
        body,
        remove_faces,
        thickness: thickness_mm,
        inside,
    };
    Ok(FeaturePlan::new(OperationKind::Shell, op, summary)
        .with_target(Some(body))
        .with_trace(trace))
}

// ============== Pattern and mirror ==============

/// Feature or body a pattern or mirror copies
struct Base {
    base: FeatureBase,
    label: Value,
    body: Option<BodyId>,
}

fn resolve_base(doc: &dyn HostDocument, args: &Args<'_>) -> EngineResult<Base> {
    if let Some(token) = args.text("feature_id") {
        let feature = entity::find_feature(doc, &token)
            .ok_or_else(|| EngineError::not_found(format!("feature_id not found: {token}")))?;
        return Ok(Base {
            base: FeatureBase::Feature(feature),
            label: json!({ "feature_id": token, "feature_type": doc.feature_kind(feature) }),
            body: None,
        });
    }
    let body = resolve_named_body(doc, args)?;
    Ok(Base {
        base: FeatureBase::Body(body),
        label: json!({ "body_name": doc.body_name(body) }),
        body: Some(body),
    })
}

fn count(value: i64, message: &str) -> EngineResult<u32> {
    u32::try_from(value)
        .ok()
        .filter(|c| *c > 0)
        .ok_or_else(|| invalid(message))
}

fn parse_axis(text: Option<String>) -> Option<Axis> {
    text?.parse().ok()
}

/// Rectangular or circular pattern of a feature or a body
pub fn pattern_feature(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<FeaturePlan> {
    let pattern_type = args.text("pattern_type").unwrap_or_default();
    if pattern_type != "rectangular" && pattern_type != "circular" {
        return Err(invalid("pattern_type must be rectangular or circular"));
    }
    let Base { base, label, body } = resolve_base(doc, &args)?;

    let (op, summary) = if pattern_type == "rectangular" {
        const NOT_NUMERIC: &str =
            "count1/count2 must be ints and spacing1/spacing2 must be numbers";
        let count1 = args.integer("count1", NOT_NUMERIC)?;
        let count2 = args.integer("count2", NOT_NUMERIC)?;
        let spacing1 = args.number("spacing1_mm", NOT_NUMERIC)?;
        let spacing2 = args.number("spacing2_mm", NOT_NUMERIC)?;
        let count1 = count(count1, "count1 and count2 must be > 0")?;
        let count2 = count(count2, "count1 and count2 must be > 0")?;
        if u64::from(count1) * u64::from(count2) > u64::from(MAX_PATTERN_INSTANCES) {
            return Err(invalid(format!(
                "count1 * count2 exceeds MAX_PATTERN_INSTANCES ({MAX_PATTERN_INSTANCES})"
            )));
        }
        if spacing1 <= 0.0 || spacing2 <= 0.0 {
            return Err(invalid("spacing1_mm and spacing2_mm must be > 0"));
        }
        if spacing1 > MAX_DISTANCE_MM || spacing2 > MAX_DISTANCE_MM {
            return Err(invalid(format!(
                "spacing exceeds MAX_DISTANCE_MM ({MAX_DISTANCE_MM})"
            )));
        }
        let (Some(axis1), Some(axis2)) =
            (parse_axis(args.text("axis1")), parse_axis(args.text("axis2")))
        else {
            return Err(invalid("axis1 and axis2 must be X, Y, or Z"));
        };
        let summary = json!({
            "pattern_type": pattern_type,
            "base": label,
            "axis1": axis1.to_string(),
            "axis2": axis2.to_string(),
            "count1": count1,
            "count2": count2,
            "spacing1_mm": spacing1,
            "spacing2_mm": spacing2,
        });
        let op = FeatureOp::RectangularPattern {
            base,
            axis1,
            count1,
            spacing1,
            axis2,
            count2,
            spacing2,
        };
        (op, summary)
    } else {
        const NOT_NUMERIC: &str = "count must be int and angle_deg must be numeric";
        let count_value = args.integer("count", NOT_NUMERIC)?;
        let angle_deg = args.number_or("angle_deg", FULL_TURN_DEG, NOT_NUMERIC)?;
        let count = count(count_value, "count must be > 0")?;
        if count > MAX_PATTERN_INSTANCES {
            return Err(invalid(format!(
                "count exceeds MAX_PATTERN_INSTANCES ({MAX_PATTERN_INSTANCES})"
            )));
        }
        let axis =
            parse_axis(args.text("axis")).ok_or_else(|| invalid("axis must be X, Y, or Z"))?;
        let summary = json!({
            "pattern_type": pattern_type,
            "base": label,
            "axis": axis.to_string(),
            "count": count,
            "angle_deg": angle_deg,
        });
        let op = FeatureOp::CircularPattern {
            base,
            axis,
            count,
            angle_deg,
        };
        (op, summary)
    };
    Ok(FeaturePlan::new(OperationKind::Pattern, op, summary).with_target(body))
}

/// Mirror a feature or a body about an origin plane or a planar face
pub fn mirror_feature(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<FeaturePlan> {
    if args.get("feature_id").is_none() && args.get("body_name").is_none() {
        return Err(invalid("feature_id or body_name is required"));
    }
    let Base { base, label, body } = resolve_base(doc, &args)?;
    let face_id = args.text("face_id");
    let mirror_plane = args.text("mirror_plane");
    let plane = match &face_id {
        Some(token) => MirrorPlane::Face(find_face(doc, token)?),
        None => mirror_plane
            .as_deref()
            .and_then(|p| p.to_uppercase().parse::<ConstructionPlane>().ok())
            .map(MirrorPlane::Construction)
            .ok_or_else(|| invalid("mirror_plane must be XY, YZ, XZ, or face_id must be provided"))?,
    };
    let summary = json!({
        "base": label,
        "mirror_plane": mirror_plane,
        "face_id": face_id,
    });
    Ok(
        FeaturePlan::new(OperationKind::Mirror, FeatureOp::Mirror { base, plane }, summary)
            .with_target(body),
    )
}

// ============== Revolve ==============

/// Index of the profile bounded by all of `curve_ids`, or the first profile
fn find_profile(
    doc: &dyn HostDocument,
    sketch: SketchId,
    curve_ids: &[String],
) -> Option<usize> {
    let profiles = doc.sketch_profiles(sketch)?;
    if curve_ids.is_empty() {
        return (!profiles.is_empty()).then_some(0);
    }
    let wanted: Vec<CurveId> = curve_ids
        .iter()
        .map(|id| entity::find_curve(doc, sketch, id))
        .collect::<Option<_>>()?;
    profiles
        .iter()
        .position(|curves| wanted.iter().all(|c| curves.contains(c)))
}

fn axis_line(value: &Value) -> EngineResult<(DVec3, DVec3)> {
    let line = value
        .as_object()
        .ok_or_else(|| invalid("axis_line_mm must be an object with p1 and p2"))?;
    let (Some(p1), Some(p2)) = (
        line.get("p1").filter(|p| p.is_object()),
        line.get("p2").filter(|p| p.is_object()),
    ) else {
        return Err(invalid("axis_line_mm must include p1 and p2 points"));
    };
    const NOT_NUMERIC: &str = "axis_line_mm points must be numeric";
    Ok((point_value(p1, NOT_NUMERIC)?, point_value(p2, NOT_NUMERIC)?))
}

/// Revolve a sketch profile about an edge, a selected edge or a line
pub fn revolve_feature(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<FeaturePlan> {
    let sketch_token = args
        .text("profile_sketch_id")
        .ok_or_else(|| invalid("profile_sketch_id is required"))?;
    let angle_deg = args.number_or("angle_deg", FULL_TURN_DEG, "angle_deg must be numeric")?;
    let operation = operation(&args)?;
    let sketch = find_sketch(doc, "profile_sketch_id", &sketch_token)?;
    let curve_ids = args
        .string_list("profile_curve_ids", "profile_curve_ids must be a list of curve ids")?
        .unwrap_or_default();
    let profile_index = find_profile(doc, sketch, &curve_ids)
        .ok_or_else(|| EngineError::not_found("Failed to resolve profile from profile_curve_ids"))?;

    let mut trace = CandidateTrace::default();
    let (axis, axis_plan, target) = if let Some(token) = args.text("edge_id") {
        let edge = entity::find_edge(doc, &token)
            .ok_or_else(|| EngineError::not_found(format!("edge_id not found: {token}")))?;
        (RevolveAxis::Edge(edge), json!({ "edge_id": token }), doc.edge_body(edge))
    } else if let Some(text) = args.text("axis_selector") {
        let selector: EdgeSelector = selector::parse_selector("axis_selector", &text)?;
        let body = resolve_named_body(doc, &args)?;
        let point_mm = args.point("point_mm", "point_mm must be an object with x,y,z")?;
        let scale = UnitScale::from_document(doc);
        let edges = doc.body_edges(body).unwrap_or_default();
        let candidates = selector::edge_candidates(doc, &edges, selector, point_mm, &scale)?;
        let selection = selector::pick(candidates)
            .ok_or_else(|| EngineError::not_found("No edges matched axis_selector."))?;
        trace.edges = Some(selection.considered);
        (
            RevolveAxis::Edge(selection.winner.entity),
            json!({ "axis_selector": text }),
            Some(body),
        )
    } else if let Some(value) = args.get("axis_line_mm") {
        let (start, end) = axis_line(value)?;
        let target = match args.text("body_name") {
            Some(name) => Some(entity::resolve_body(doc, Some(name.as_str()))?),
            None => None,
        };
        (
            RevolveAxis::Line { start, end },
            json!({ "axis_line_mm": { "p1": PointMm::from(start), "p2": PointMm::from(end) } }),
            target,
        )
    } else {
        return Err(invalid("axis_selector, edge_id, or axis_line_mm is required"));
    };

    let summary = json!({
        "profile_sketch_id": sketch_token,
        "profile_curve_ids": curve_ids,
        "axis": axis_plan,
        "angle_deg": angle_deg,
        "operation": operation.as_str(),
    });
    let op = FeatureOp::Revolve {
        sketch,
        profile_index,
        axis,
        angle_deg,
        operation,
    };
    Ok(FeaturePlan::new(OperationKind::Revolve, op, summary)
        .with_target(target)
        .with_operation(operation)
        .with_trace(trace))
}
