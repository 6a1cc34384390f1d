//! Feature operations and plans
//!
//! A [`FeaturePlan`] is the validated, side-effect-free description of one
//! mutation. Its [`FeatureOp`] is kept in millimetres and only converted to
//! internal units right before the host call.

use std::fmt;
use std::str::FromStr;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{BodyId, EdgeId, FaceId, FeatureId, SketchId};
use crate::error::EngineError;
use crate::geometry::{Axis, ConstructionPlane};
use crate::units::UnitScale;

/// Boolean operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BooleanOp {
    /// Create new body
    #[default]
    #[serde(rename = "new_body")]
    New,
    /// Add to existing body
    #[serde(rename = "join")]
    Join,
    /// Remove from existing body
    #[serde(rename = "cut")]
    Cut,
    /// Keep only intersection
    #[serde(rename = "intersect")]
    Intersect,
}

impl BooleanOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BooleanOp::New => "new_body",
            BooleanOp::Join => "join",
            BooleanOp::Cut => "cut",
            BooleanOp::Intersect => "intersect",
        }
    }

    /// Whether the operation combines with an existing body
    pub fn is_combine(self) -> bool {
        !matches!(self, BooleanOp::New)
    }
}

impl FromStr for BooleanOp {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new_body" => Ok(BooleanOp::New),
            "join" => Ok(BooleanOp::Join),
            "cut" => Ok(BooleanOp::Cut),
            "intersect" => Ok(BooleanOp::Intersect),
            _ => Err(EngineError::InvalidInput(format!(
                "Unsupported operation: {s}"
            ))),
        }
    }
}

impl fmt::Display for BooleanOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction for extrusion relative to the face or sketch normal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtrudeDirection {
    /// Along the normal
    #[default]
    Normal,
    /// Against the normal
    Opposite,
}

impl ExtrudeDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtrudeDirection::Normal => "normal",
            ExtrudeDirection::Opposite => "opposite",
        }
    }

    /// +1 or -1 multiplier applied to the normal
    pub fn sign(self) -> f64 {
        match self {
            ExtrudeDirection::Normal => 1.0,
            ExtrudeDirection::Opposite => -1.0,
        }
    }
}

impl FromStr for ExtrudeDirection {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(ExtrudeDirection::Normal),
            "opposite" => Ok(ExtrudeDirection::Opposite),
            _ => Err(EngineError::InvalidInput(format!(
                "Unsupported direction: {s}"
            ))),
        }
    }
}

/// How far an extrude or hole goes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Extent {
    Distance(f64),
    ThroughAll,
}

impl Extent {
    /// Distance in millimetres, `None` for through-all
    pub fn distance(&self) -> Option<f64> {
        match self {
            Extent::Distance(d) => Some(*d),
            Extent::ThroughAll => None,
        }
    }
}

/// What a pattern or mirror copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureBase {
    Feature(FeatureId),
    Body(BodyId),
}

/// Mirror plane reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorPlane {
    Construction(ConstructionPlane),
    Face(FaceId),
}

/// Revolve axis reference
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RevolveAxis {
    Edge(EdgeId),
    /// Axis through two points, created by the host as part of the revolve
    Line { start: DVec3, end: DVec3 },
}

/// A host feature operation
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOp {
    /// Extrude a planar body face
    FaceExtrude {
        face: FaceId,
        distance: f64,
        direction: ExtrudeDirection,
        operation: BooleanOp,
    },
    /// Extrude a closed sketch profile
    ProfileExtrude {
        sketch: SketchId,
        profile_index: usize,
        extent: Extent,
        direction: ExtrudeDirection,
        operation: BooleanOp,
        target: Option<BodyId>,
    },
    Fillet {
        edges: Vec<EdgeId>,
        radius: f64,
    },
    /// Simple hole drilled into a planar face, along the inward normal
    Hole {
        face: FaceId,
        center: DVec3,
        diameter: f64,
        extent: Extent,
    },
    Shell {
        body: BodyId,
        remove_faces: Vec<FaceId>,
        thickness: f64,
        inside: bool,
    },
    RectangularPattern {
        base: FeatureBase,
        axis1: Axis,
        count1: u32,
        spacing1: f64,
        axis2: Axis,
        count2: u32,
        spacing2: f64,
    },
    CircularPattern {
        base: FeatureBase,
        axis: Axis,
        count: u32,
        angle_deg: f64,
    },
    Mirror {
        base: FeatureBase,
        plane: MirrorPlane,
    },
    Revolve {
        sketch: SketchId,
        profile_index: usize,
        axis: RevolveAxis,
        angle_deg: f64,
        operation: BooleanOp,
    },
}

impl FeatureOp {
    /// Host type name of the feature this op creates
    pub fn type_name(&self) -> &'static str {
        match self {
            FeatureOp::FaceExtrude { .. } | FeatureOp::ProfileExtrude { .. } => "ExtrudeFeature",
            FeatureOp::Fillet { .. } => "FilletFeature",
            FeatureOp::Hole { .. } => "HoleFeature",
            FeatureOp::Shell { .. } => "ShellFeature",
            FeatureOp::RectangularPattern { .. } => "RectangularPatternFeature",
            FeatureOp::CircularPattern { .. } => "CircularPatternFeature",
            FeatureOp::Mirror { .. } => "MirrorFeature",
            FeatureOp::Revolve { .. } => "RevolveFeature",
        }
    }

    /// Convert every length from millimetres to internal units
    pub fn to_internal(&self, scale: &UnitScale) -> FeatureOp {
        let len = |v: f64| scale.from_mm(v);
        let extent = |e: &Extent| match e {
            Extent::Distance(d) => Extent::Distance(len(*d)),
            Extent::ThroughAll => Extent::ThroughAll,
        };
        match self {
            FeatureOp::FaceExtrude {
                face,
                distance,
                direction,
                operation,
            } => FeatureOp::FaceExtrude {
                face: *face,
                distance: len(*distance),
                direction: *direction,
                operation: *operation,
            },
            FeatureOp::ProfileExtrude {
                sketch,
                profile_index,
                extent: e,
                direction,
                operation,
                target,
            } => FeatureOp::ProfileExtrude {
                sketch: *sketch,
                profile_index: *profile_index,
                extent: extent(e),
                direction: *direction,
                operation: *operation,
                target: *target,
            },
            FeatureOp::Fillet { edges, radius } => FeatureOp::Fillet {
                edges: edges.clone(),
                radius: len(*radius),
            },
            FeatureOp::Hole {
                face,
                center,
                diameter,
                extent: e,
            } => FeatureOp::Hole {
                face: *face,
                center: scale.point_from_mm(*center),
                diameter: len(*diameter),
                extent: extent(e),
            },
            FeatureOp::Shell {
                body,
                remove_faces,
                thickness,
                inside,
            } => FeatureOp::Shell {
                body: *body,
                remove_faces: remove_faces.clone(),
                thickness: len(*thickness),
                inside: *inside,
            },
            FeatureOp::RectangularPattern {
                base,
                axis1,
                count1,
                spacing1,
                axis2,
                count2,
                spacing2,
            } => FeatureOp::RectangularPattern {
                base: *base,
                axis1: *axis1,
                count1: *count1,
                spacing1: len(*spacing1),
                axis2: *axis2,
                count2: *count2,
                spacing2: len(*spacing2),
            },
            FeatureOp::CircularPattern { .. } | FeatureOp::Mirror { .. } => self.clone(),
            FeatureOp::Revolve {
                sketch,
                profile_index,
                axis,
                angle_deg,
                operation,
            } => FeatureOp::Revolve {
                sketch: *sketch,
                profile_index: *profile_index,
                axis: match axis {
                    RevolveAxis::Edge(e) => RevolveAxis::Edge(*e),
                    RevolveAxis::Line { start, end } => RevolveAxis::Line {
                        start: scale.point_from_mm(*start),
                        end: scale.point_from_mm(*end),
                    },
                },
                angle_deg: *angle_deg,
                operation: *operation,
            },
        }
    }
}

/// Guardrail class of a mutating command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    FaceExtrude,
    ProfileExtrude,
    Hole,
    Fillet,
    Shell,
    Pattern,
    Mirror,
    Revolve,
}

impl OperationKind {
    /// Prefix used in apply-failure messages
    pub fn label(self) -> &'static str {
        match self {
            OperationKind::FaceExtrude => "Extrude",
            OperationKind::ProfileExtrude => "Extrude profile",
            OperationKind::Hole => "Hole feature",
            OperationKind::Fillet => "Fillet",
            OperationKind::Shell => "Shell",
            OperationKind::Pattern => "Pattern",
            OperationKind::Mirror => "Mirror",
            OperationKind::Revolve => "Revolve",
        }
    }
}

/// Candidate counts reported in `trace.candidates_considered`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CandidateTrace {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faces: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertices: Option<usize>,
}

/// A validated mutation, identical for preview and apply
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePlan {
    pub kind: OperationKind,
    /// Host operation in millimetres
    pub op: FeatureOp,
    /// Wire form echoed as `data.preview.plan`
    pub summary: Value,
    /// Body measured before and after the mutation
    pub target: Option<BodyId>,
    /// Boolean mode; `New` triggers new-body disambiguation
    pub operation: Option<BooleanOp>,
    pub trace: CandidateTrace,
    /// Advisory notes appended to `verify.warnings` after a commit
    pub warnings: Vec<String>,
}

impl FeaturePlan {
    /// Create a plan with no target body and no boolean mode
    pub fn new(kind: OperationKind, op: FeatureOp, summary: Value) -> Self {
        Self {
            kind,
            op,
            summary,
            target: None,
            operation: None,
            trace: CandidateTrace::default(),
            warnings: Vec::new(),
        }
    }

    pub fn with_target(mut self, body: Option<BodyId>) -> Self {
        self.target = body;
        self
    }

    pub fn with_operation(mut self, operation: BooleanOp) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_trace(mut self, trace: CandidateTrace) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Prefix of an apply-failure message, naming the pattern flavour
    pub fn failure_label(&self) -> &'static str {
        match self.op {
            FeatureOp::RectangularPattern { .. } => "Rectangular pattern",
            FeatureOp::CircularPattern { .. } => "Circular pattern",
            _ => self.kind.label(),
        }
    }

    /// Whether the mutation must produce exactly one new body
    pub fn creates_body(&self) -> bool {
        self.operation == Some(BooleanOp::New)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_operation_and_direction() {
        assert_eq!("new_body".parse::<BooleanOp>().unwrap(), BooleanOp::New);
        assert_eq!("cut".parse::<BooleanOp>().unwrap(), BooleanOp::Cut);
        let err = "merge".parse::<BooleanOp>().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported operation: merge");
        assert!("sideways".parse::<ExtrudeDirection>().is_err());
    }

    #[test]
    fn test_to_internal_scales_lengths_only() {
        let scale = UnitScale::new(10.0);
        let op = FeatureOp::RectangularPattern {
            base: FeatureBase::Body(BodyId(1)),
            axis1: Axis::X,
            count1: 3,
            spacing1: 20.0,
            axis2: Axis::Y,
            count2: 2,
            spacing2: 5.0,
        };
        match op.to_internal(&scale) {
            FeatureOp::RectangularPattern {
                count1,
                spacing1,
                spacing2,
                ..
            } => {
                assert_eq!(count1, 3);
                assert_relative_eq!(spacing1, 2.0);
                assert_relative_eq!(spacing2, 0.5);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_revolve_axis_line_converted() {
        let scale = UnitScale::new(10.0);
        let op = FeatureOp::Revolve {
            sketch: SketchId(1),
            profile_index: 0,
            axis: RevolveAxis::Line {
                start: DVec3::ZERO,
                end: DVec3::new(0.0, 0.0, 30.0),
            },
            angle_deg: 90.0,
            operation: BooleanOp::New,
        };
        let FeatureOp::Revolve {
            axis: RevolveAxis::Line { end, .. },
            angle_deg,
            ..
        } = op.to_internal(&scale)
        else {
            panic!("expected revolve with axis line");
        };
        assert_relative_eq!(end.z, 3.0);
        assert_relative_eq!(angle_deg, 90.0);
    }

    #[test]
    fn test_creates_body_only_for_new() {
        let op = FeatureOp::Fillet {
            edges: vec![],
            radius: 1.0,
        };
        let plan = FeaturePlan::new(OperationKind::Fillet, op, Value::Null);
        assert!(!plan.creates_body());
        assert!(plan.clone().with_operation(BooleanOp::New).creates_body());
        assert!(!plan.with_operation(BooleanOp::Join).creates_body());
    }
}
