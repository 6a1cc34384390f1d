//! Guarded feature mutation
//!
//! Every mutating command runs the same protocol over a [`FeaturePlan`]:
//! snapshot, apply, recompute, measure, check guardrails, disambiguate a new
//! body when one is expected, then commit or roll back. A rolled back feature
//! is deleted from the document before the error is returned.

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::document::{BodyId, EntityRef, FeatureId, HostDocument};
use crate::entity::{self, TopologyCounts};
use crate::error::{CommandFailure, CommandResult, EngineError};
use crate::feature::{CandidateTrace, FeaturePlan};
use crate::guardrail::{self, ApplyStats, ModelTotals, Thresholds};
use crate::measure::BodyMeasurement;
use crate::units::UnitScale;
use crate::verify::{self, Measured, Tolerances, Verification};

/// Per-request switches of a mutation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MutationOptions {
    /// Recompute the model after applying
    pub compute: bool,
    pub tolerances: Tolerances,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            compute: true,
            tolerances: Tolerances::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewBlock {
    pub is_preview: bool,
    pub plan: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRef {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComputeStatus {
    pub ran: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyBlock {
    pub feature: FeatureRef,
    pub compute: ComputeStatus,
    pub timing_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceBlock {
    pub candidates_considered: CandidateTrace,
}

/// Response data of a mutating command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationReport {
    pub preview: PreviewBlock,
    pub apply: Option<ApplyBlock>,
    pub measure_before: Option<BodyMeasurement>,
    pub measure_after: Option<BodyMeasurement>,
    pub verify: Option<Verification>,
    pub trace: TraceBlock,
}

impl MutationReport {
    /// Serialize as response data
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Visible solid bodies and their totals
fn snapshot(doc: &dyn HostDocument) -> (Vec<BodyId>, ModelTotals) {
    let bodies = entity::visible_solid_bodies(doc);
    let totals = ModelTotals {
        bodies: bodies.len(),
        counts: TopologyCounts::total(doc, &bodies),
    };
    (bodies, totals)
}

/// Report of a plan without touching the document
pub fn preview(doc: &dyn HostDocument, plan: &FeaturePlan) -> MutationReport {
    let scale = UnitScale::from_document(doc);
    tracing::debug!("Preview {}: {}", plan.kind.label(), plan.summary);
    MutationReport {
        preview: PreviewBlock {
            is_preview: true,
            plan: plan.summary.clone(),
        },
        apply: None,
        measure_before: plan
            .target
            .map(|b| BodyMeasurement::of_body(doc, b, &scale)),
        measure_after: None,
        verify: None,
        trace: TraceBlock {
            candidates_considered: plan.trace,
        },
    }
}

/// Delete a feature that must not stay in the document, recomputing when the
/// request asked for it
fn roll_back(
    doc: &mut dyn HostDocument,
    feature: FeatureId,
    cause: EngineError,
    compute: bool,
) -> EngineError {
    if let Err(e) = doc.delete_feature(feature) {
        tracing::warn!("Rollback of feature {} failed: {}", feature.0, e);
        return EngineError::RollbackFailed {
            cause: cause.to_string(),
            reason: e.message,
        };
    }
    if compute {
        if let Err(e) = doc.recompute() {
            tracing::warn!("Recompute after rollback failed: {}", e);
        }
    }
    tracing::info!("Rolled back feature {}: {}", feature.0, cause);
    cause
}

/// Apply a plan under the guarded protocol
pub fn run(
    doc: &mut dyn HostDocument,
    plan: &FeaturePlan,
    options: MutationOptions,
) -> CommandResult<MutationReport> {
    let fail = |error: EngineError| CommandFailure::with_plan(error, &plan.summary);
    let scale = UnitScale::from_document(doc);
    let label = plan.kind.label();

    let (before_bodies, before_totals) = snapshot(doc);
    let before_keys = entity::body_keys(doc, &before_bodies);
    let measure_before = plan
        .target
        .map(|b| BodyMeasurement::of_body(&*doc, b, &scale));

    let op = plan.op.to_internal(&scale);
    let started = Instant::now();
    let feature = match doc.create_feature(&op) {
        Ok(feature) => feature,
        Err(e) => {
            let cause = EngineError::ApplyFailed(format!(
                "{} failed: {}",
                plan.failure_label(),
                e.message
            ));
            tracing::warn!("{}", cause);
            return Err(fail(match e.partial {
                Some(partial) => roll_back(doc, partial, cause, options.compute),
                None => cause,
            }));
        }
    };
    let compute_ran = options.compute
        && match doc.recompute() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Recompute after {} failed: {}", label, e);
                false
            }
        };
    let timing_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (after_bodies, after_totals) = snapshot(doc);
    let stats = ApplyStats::between(&before_totals, &after_totals, timing_ms);
    if let Some(message) = guardrail::evaluate(&Thresholds::for_kind(plan.kind), &stats) {
        tracing::warn!("{} guardrail: {} ({:?})", label, message, stats);
        let cause = EngineError::Guardrail(message);
        return Err(fail(roll_back(doc, feature, cause, options.compute)));
    }

    let new_body = if plan.creates_body() {
        let created: Vec<BodyId> = after_bodies
            .iter()
            .copied()
            .filter(|b| entity::body_key(&*doc, *b).is_some_and(|k| !before_keys.contains(&k)))
            .collect();
        match created.as_slice() {
            [only] => Some(*only),
            [] => {
                let cause = EngineError::ResultAmbiguous("No new body created.".into());
                return Err(fail(roll_back(doc, feature, cause, options.compute)));
            }
            _ => {
                let cause = EngineError::ResultAmbiguous(
                    "Multiple bodies created; guardrail failure.".into(),
                );
                return Err(fail(roll_back(doc, feature, cause, options.compute)));
            }
        }
    } else {
        None
    };

    let measure_target = |body: BodyId| BodyMeasurement::of_body(&*doc, body, &scale);
    let measure_after = match (new_body, plan.target) {
        (Some(created), Some(source)) => {
            Some(measure_target(created).with_source(measure_target(source)))
        }
        (Some(created), None) => Some(measure_target(created)),
        (None, target) => target.map(measure_target),
    };
    let mut verification = verify::verify(
        &Measured {
            before: measure_before.as_ref(),
            after: measure_after.as_ref(),
            operation: plan.operation,
            expects_source: new_body.is_some() && plan.target.is_some(),
        },
        options.tolerances,
    );
    verification.warnings.extend(plan.warnings.iter().cloned());

    let feature_ref = FeatureRef {
        id: doc.entity_token(EntityRef::Feature(feature)),
        name: doc.feature_name(feature),
    };
    tracing::info!(
        "Applied {} {} in {:.1} ms (faces {:+}, edges {:+}, bodies {:+})",
        label,
        feature_ref.name.as_deref().unwrap_or("?"),
        timing_ms,
        stats.face_delta,
        stats.edge_delta,
        stats.body_delta
    );

    Ok(MutationReport {
        preview: PreviewBlock {
            is_preview: false,
            plan: plan.summary.clone(),
        },
        apply: Some(ApplyBlock {
            feature: feature_ref,
            compute: ComputeStatus { ran: compute_ran },
            timing_ms,
        }),
        measure_before,
        measure_after,
        verify: Some(verification),
        trace: TraceBlock {
            candidates_considered: plan.trace,
        },
    })
}
