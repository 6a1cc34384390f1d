//! Verification of the measurements taken around a mutation
//!
//! Verification never changes the outcome of a committed mutation; it tells
//! the client which metrics it can rely on.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_TOLERANCE_MM, DEFAULT_TOLERANCE_PCT, METRICS_ATTEMPTED};
use crate::feature::BooleanOp;
use crate::measure::BodyMeasurement;

/// Comparison tolerances echoed in the verification block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    pub mm: f64,
    pub pct: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            mm: DEFAULT_TOLERANCE_MM,
            pct: DEFAULT_TOLERANCE_PCT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub tolerances: Tolerances,
    pub required_pass: bool,
    pub warnings: Vec<String>,
    pub metrics_attempted: Vec<&'static str>,
}

impl Verification {
    fn new(tolerances: Tolerances) -> Self {
        Self {
            tolerances,
            required_pass: true,
            warnings: Vec::new(),
            metrics_attempted: METRICS_ATTEMPTED.to_vec(),
        }
    }

    fn fail(&mut self, warning: &str) {
        self.required_pass = false;
        self.warnings.push(warning.to_string());
    }
}

/// Measurements a verification is run over
#[derive(Debug, Clone, Copy, Default)]
pub struct Measured<'a> {
    pub before: Option<&'a BodyMeasurement>,
    pub after: Option<&'a BodyMeasurement>,
    pub operation: Option<BooleanOp>,
    /// A new body was made from an existing one
    pub expects_source: bool,
}

/// Check that the metrics the client relies on were captured
pub fn verify(measured: &Measured<'_>, tolerances: Tolerances) -> Verification {
    let mut result = Verification::new(tolerances);
    let bodies: Vec<&BodyMeasurement> = [measured.before, measured.after]
        .into_iter()
        .flatten()
        .collect();

    if bodies.iter().any(|m| !m.has_bbox()) {
        result.fail("bbox measurement missing");
    }

    let volume_missing = bodies.iter().any(|m| !m.has_volume());
    let requires_volume = measured.operation.is_some_and(BooleanOp::is_combine);
    if volume_missing {
        if requires_volume {
            result.fail("volume measurement missing");
        } else {
            result
                .warnings
                .push("volume measurement missing (advisory)".to_string());
        }
    }

    if measured.expects_source && measured.after.is_none_or(|m| m.source_body.is_none()) {
        result.fail("source_body measurement missing for new_body operation");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::TopologyCounts;
    use crate::measure::BboxMm;
    use crate::units::PointMm;

    fn measurement(bbox: bool, volume: bool) -> BodyMeasurement {
        BodyMeasurement {
            body_name: Some("Block".into()),
            body_id: None,
            bbox_mm: bbox.then(|| BboxMm {
                min: PointMm::default(),
                max: PointMm::new(1.0, 1.0, 1.0),
                size: PointMm::new(1.0, 1.0, 1.0),
            }),
            volume_mm3: volume.then_some(1.0),
            area_mm2: None,
            mass_kg: None,
            density_kg_m3: None,
            counts: TopologyCounts::default(),
            source_body: None,
        }
    }

    #[test]
    fn test_all_present_passes() {
        let m = measurement(true, true);
        let v = verify(
            &Measured {
                before: Some(&m),
                after: Some(&m),
                operation: Some(BooleanOp::Join),
                expects_source: false,
            },
            Tolerances::default(),
        );
        assert!(v.required_pass);
        assert!(v.warnings.is_empty());
        assert_eq!(v.metrics_attempted, vec!["bbox", "volume"]);
        assert_eq!(v.tolerances.mm, 0.1);
    }

    #[test]
    fn test_missing_volume_is_advisory_for_new_body() {
        let before = measurement(true, true);
        let after = measurement(true, false).with_source(before.clone());
        let v = verify(
            &Measured {
                before: Some(&before),
                after: Some(&after),
                operation: Some(BooleanOp::New),
                expects_source: true,
            },
            Tolerances::default(),
        );
        assert!(v.required_pass);
        assert_eq!(v.warnings, vec!["volume measurement missing (advisory)"]);
    }

    #[test]
    fn test_missing_volume_fails_for_cut() {
        let m = measurement(true, false);
        let v = verify(
            &Measured {
                before: Some(&m),
                after: Some(&m),
                operation: Some(BooleanOp::Cut),
                expects_source: false,
            },
            Tolerances::default(),
        );
        assert!(!v.required_pass);
        assert_eq!(v.warnings, vec!["volume measurement missing"]);
    }

    #[test]
    fn test_missing_bbox_and_source() {
        let m = measurement(false, true);
        let v = verify(
            &Measured {
                before: Some(&m),
                after: Some(&m),
                operation: Some(BooleanOp::New),
                expects_source: true,
            },
            Tolerances { mm: 0.5, pct: 2.0 },
        );
        assert!(!v.required_pass);
        assert_eq!(
            v.warnings,
            vec![
                "bbox measurement missing",
                "source_body measurement missing for new_body operation"
            ]
        );
        assert_eq!(v.tolerances.pct, 2.0);
    }

    #[test]
    fn test_nothing_measured() {
        let v = verify(&Measured::default(), Tolerances::default());
        assert!(v.required_pass);
        assert!(v.warnings.is_empty());
    }
}
