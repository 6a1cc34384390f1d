//! Sketch and timeline edits
//!
//! Edits are not guarded: they add sketch geometry or remove a feature, and
//! report what they created. Planning resolves every id up front so a preview
//! and an apply see the same inputs.

use glam::DVec3;
use serde_json::{Value, json};

use super::Args;
use crate::document::{
    CurveId, EntityRef, FeatureId, HostDocument, HostError, SketchId, SketchPlacement,
};
use crate::entity;
use crate::error::{CommandFailure, CommandResult, EngineError, EngineResult};
use crate::geometry::ConstructionPlane;
use crate::measure::BboxMm;
use crate::units::{PointMm, UnitScale};

/// What an edit does, with lengths in millimetres
#[derive(Debug, Clone, PartialEq)]
pub enum EditAction {
    CreateSketch {
        placement: SketchPlacement,
        name: Option<String>,
        /// Echoed in the response
        plane: Option<ConstructionPlane>,
        face_id: Option<String>,
    },
    AddLine {
        sketch: SketchId,
        start: DVec3,
        end: DVec3,
    },
    AddRectangle {
        sketch: SketchId,
        corner1: DVec3,
        corner2: DVec3,
    },
    AddCircle {
        sketch: SketchId,
        center: DVec3,
        radius: f64,
    },
    DeleteFeature {
        feature: FeatureId,
    },
}

/// A validated edit
#[derive(Debug, Clone, PartialEq)]
pub struct EditPlan {
    /// Wire form echoed as `data.preview.plan`
    pub summary: Value,
    pub action: EditAction,
}

fn preview_block(is_preview: bool, plan: &Value) -> Value {
    json!({ "is_preview": is_preview, "plan": plan })
}

fn host_failure(prefix: &str, error: HostError) -> EngineError {
    EngineError::ApplyFailed(format!("{prefix}: {}", error.message))
}

fn curve_token(doc: &dyn HostDocument, curve: CurveId) -> Option<String> {
    doc.entity_token(EntityRef::Curve(curve))
}

impl EditPlan {
    /// Response data of a preview
    pub fn preview_data(&self) -> Value {
        let preview = preview_block(true, &self.summary);
        match &self.action {
            EditAction::CreateSketch { .. } => json!({ "sketch": null, "preview": preview }),
            EditAction::AddLine { .. } | EditAction::AddCircle { .. } => {
                json!({ "curve_id": null, "preview": preview })
            }
            EditAction::AddRectangle { .. } => {
                json!({ "curves": [], "bbox_mm": null, "preview": preview })
            }
            EditAction::DeleteFeature { .. } => json!({ "preview": preview }),
        }
    }

    /// Perform the edit
    pub fn apply(&self, doc: &mut dyn HostDocument) -> CommandResult<Value> {
        let scale = UnitScale::from_document(doc);
        let preview = preview_block(false, &self.summary);

        match &self.action {
            EditAction::CreateSketch {
                placement,
                name,
                plane,
                face_id,
            } => {
                let placement = match *placement {
                    SketchPlacement::Plane { plane, origin } => SketchPlacement::Plane {
                        plane,
                        origin: origin.map(|o| scale.point_from_mm(o)),
                    },
                    face => face,
                };
                let sketch = doc
                    .create_sketch(placement, name.as_deref())
                    .map_err(|e| host_failure("Failed to create sketch", e))?;
                tracing::info!("Created sketch {:?}", doc.sketch_name(sketch));
                Ok(json!({
                    "sketch": {
                        "id": doc.entity_token(EntityRef::Sketch(sketch)),
                        "name": doc.sketch_name(sketch),
                        "plane": plane.map(|p| p.to_string()),
                        "face_id": face_id,
                    },
                    "preview": preview,
                }))
            }
            EditAction::AddLine { sketch, start, end } => {
                let curve = doc
                    .sketch_add_line(*sketch, scale.point_from_mm(*start), scale.point_from_mm(*end))
                    .map_err(|e| host_failure("Failed to create line", e))?;
                Ok(json!({ "curve_id": curve_token(&*doc, curve), "preview": preview }))
            }
            EditAction::AddRectangle {
                sketch,
                corner1,
                corner2,
            } => {
                let curves = doc
                    .sketch_add_rectangle(
                        *sketch,
                        scale.point_from_mm(*corner1),
                        scale.point_from_mm(*corner2),
                    )
                    .map_err(|e| host_failure("Failed to create rectangle", e))?;
                let ids: Vec<Option<String>> =
                    curves.into_iter().map(|c| curve_token(&*doc, c)).collect();
                let bbox = BboxMm::from_corners_mm(*corner1, *corner2);
                Ok(json!({ "curves": ids, "bbox_mm": bbox, "preview": preview }))
            }
            EditAction::AddCircle {
                sketch,
                center,
                radius,
            } => {
                let curve = doc
                    .sketch_add_circle(*sketch, scale.point_from_mm(*center), scale.from_mm(*radius))
                    .map_err(|e| host_failure("Failed to create circle", e))?;
                Ok(json!({ "curve_id": curve_token(&*doc, curve), "preview": preview }))
            }
            EditAction::DeleteFeature { feature } => {
                if let Err(e) = doc.delete_feature(*feature) {
                    let error = EngineError::ApplyFailed(format!("Delete failed: {}", e.message));
                    return Err(CommandFailure::with_plan(error, &self.summary));
                }
                if let Err(e) = doc.recompute() {
                    tracing::warn!("Recompute after delete failed: {}", e);
                }
                tracing::info!("Deleted feature {}", feature.0);
                Ok(json!({ "preview": preview }))
            }
        }
    }
}

// ============== Planners ==============

fn require_sketch(doc: &dyn HostDocument, args: &Args<'_>) -> EngineResult<(String, SketchId)> {
    let token = args
        .text("sketch_id")
        .ok_or_else(|| EngineError::InvalidInput("sketch_id is required".into()))?;
    let sketch = entity::find_sketch(doc, &token)
        .ok_or_else(|| EngineError::not_found(format!("sketch_id not found: {token}")))?;
    Ok((token, sketch))
}

/// Sketch on an origin plane, optionally offset through `origin_mm`, or on a face
pub fn create_sketch(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<EditPlan> {
    let face_id = args.text("face_id");
    let origin_given = args.get("origin_mm").is_some();
    if face_id.is_some() && origin_given {
        return Err(EngineError::InvalidInput(
            "origin_mm is not supported when face_id is provided.".into(),
        ));
    }
    let name = args.text("name");

    if let Some(face_id) = face_id {
        let face = entity::find_face(doc, &face_id)
            .ok_or_else(|| EngineError::not_found(format!("face_id not found: {face_id}")))?;
        return Ok(EditPlan {
            summary: json!({
                "plane": null,
                "face_id": face_id,
                "origin_mm": null,
                "offset_mm": null,
            }),
            action: EditAction::CreateSketch {
                placement: SketchPlacement::Face(face),
                name,
                plane: None,
                face_id: Some(face_id),
            },
        });
    }

    let plane_text = args.text_or("plane", "XY");
    let plane: ConstructionPlane = plane_text
        .to_uppercase()
        .parse()
        .map_err(|_| EngineError::InvalidInput(format!("Unsupported plane: {plane_text}")))?;
    let origin = args.point("origin_mm", "origin_mm must include numeric x,y,z")?;
    let offset_mm = origin.map(|o| o.dot(plane.normal()));

    Ok(EditPlan {
        summary: json!({
            "plane": plane.to_string(),
            "face_id": null,
            "origin_mm": origin.map(PointMm::from),
            "offset_mm": offset_mm,
        }),
        action: EditAction::CreateSketch {
            placement: SketchPlacement::Plane { plane, origin },
            name,
            plane: Some(plane),
            face_id: None,
        },
    })
}

pub fn sketch_add_line(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<EditPlan> {
    const POINTS: &str = "p1_mm and p2_mm must be objects with x,y,z";
    let (sketch_token, (sketch, (start, end))) = require_sketch_after(doc, &args, |args| {
        Ok((
            args.required_point("p1_mm", POINTS)?,
            args.required_point("p2_mm", POINTS)?,
        ))
    })?;
    Ok(EditPlan {
        summary: json!({
            "sketch_id": sketch_token,
            "p1_mm": PointMm::from(start),
            "p2_mm": PointMm::from(end),
        }),
        action: EditAction::AddLine { sketch, start, end },
    })
}

/// Rectangle from two corners, or from a center and a corner when `centered`
pub fn sketch_add_rectangle(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<EditPlan> {
    const POINTS: &str = "p1_mm and p2_mm must be objects with x,y,z";
    let centered = args.flag("centered", false);
    let (sketch_token, (sketch, (p1, p2))) = require_sketch_after(doc, &args, |args| {
        Ok((
            args.required_point("p1_mm", POINTS)?,
            args.required_point("p2_mm", POINTS)?,
        ))
    })?;
    let (corner1, corner2) = if centered {
        let half = DVec3::new((p2.x - p1.x).abs(), (p2.y - p1.y).abs(), 0.0);
        (p1 - half, p1 + half)
    } else {
        (p1, p2)
    };
    Ok(EditPlan {
        summary: json!({
            "sketch_id": sketch_token,
            "p1_mm": PointMm::from(p1),
            "p2_mm": PointMm::from(p2),
            "centered": centered,
        }),
        action: EditAction::AddRectangle {
            sketch,
            corner1,
            corner2,
        },
    })
}

pub fn sketch_add_circle(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<EditPlan> {
    let (sketch_token, (sketch, (center, radius))) = require_sketch_after(doc, &args, |args| {
        let center = args.required_point("center_mm", "center_mm must be an object with x,y,z")?;
        let radius = args.number("radius_mm", "center_mm and radius_mm must be numeric")?;
        if radius <= 0.0 {
            return Err(EngineError::InvalidInput("radius_mm must be > 0".into()));
        }
        Ok((center, radius))
    })?;
    Ok(EditPlan {
        summary: json!({
            "sketch_id": sketch_token,
            "center_mm": PointMm::from(center),
            "radius_mm": radius,
        }),
        action: EditAction::AddCircle {
            sketch,
            center,
            radius,
        },
    })
}

/// Check `sketch_id` is given, validate the geometry, then look the sketch up
fn require_sketch_after<T>(
    doc: &dyn HostDocument,
    args: &Args<'_>,
    geometry: impl FnOnce(&Args<'_>) -> EngineResult<T>,
) -> EngineResult<(String, (SketchId, T))> {
    if args.get("sketch_id").is_none() {
        return Err(EngineError::InvalidInput("sketch_id is required".into()));
    }
    let value = geometry(args)?;
    let (token, sketch) = require_sketch(doc, args)?;
    Ok((token, (sketch, value)))
}

/// Remove a timeline feature
pub fn delete_feature(doc: &dyn HostDocument, args: Args<'_>) -> EngineResult<EditPlan> {
    let token = args
        .text("feature_id")
        .ok_or_else(|| EngineError::InvalidInput("feature_id is required".into()))?;
    let feature = entity::find_feature(doc, &token)
        .ok_or_else(|| EngineError::not_found(format!("feature_id not found: {token}")))?;
    Ok(EditPlan {
        summary: json!({
            "feature_id": token,
            "feature_type": doc.feature_kind(feature),
            "name": doc.feature_name(feature),
        }),
        action: EditAction::DeleteFeature { feature },
    })
}
