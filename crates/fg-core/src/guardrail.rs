//! Post-apply safety limits
//!
//! A mutation is measured after it has run; when it took too long or grew the
//! model too much it is rolled back. Limits are checked in a fixed order and
//! the first breach is reported.

use serde::Serialize;

use crate::entity::TopologyCounts;
use crate::feature::OperationKind;

/// Limits for one operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    pub max_apply_ms: u64,
    pub max_face_delta: i64,
    pub max_edge_delta: i64,
    pub max_body_delta: i64,
}

impl Thresholds {
    const fn new(max_apply_ms: u64, faces: i64, edges: i64, bodies: i64) -> Self {
        Self {
            max_apply_ms,
            max_face_delta: faces,
            max_edge_delta: edges,
            max_body_delta: bodies,
        }
    }

    /// Limits for an operation kind
    pub fn for_kind(kind: OperationKind) -> Self {
        match kind {
            OperationKind::FaceExtrude => Self::new(1500, 150, 300, 1),
            OperationKind::ProfileExtrude
            | OperationKind::Hole
            | OperationKind::Fillet => Self::new(5000, 300, 600, 1),
            OperationKind::Shell => Self::new(5000, 500, 1000, 1),
            OperationKind::Pattern => Self::new(5000, 500, 1000, 20),
            OperationKind::Mirror => Self::new(1500, 400, 800, 10),
            OperationKind::Revolve => Self::new(1500, 400, 800, 5),
        }
    }
}

/// Totals over the visible solid bodies at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ModelTotals {
    pub bodies: usize,
    pub counts: TopologyCounts,
}

/// What changed while a mutation ran
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ApplyStats {
    pub elapsed_ms: f64,
    pub face_delta: i64,
    pub edge_delta: i64,
    pub body_delta: i64,
}

fn delta(after: usize, before: usize) -> i64 {
    after as i64 - before as i64
}

impl ApplyStats {
    /// Differences between two totals
    pub fn between(before: &ModelTotals, after: &ModelTotals, elapsed_ms: f64) -> Self {
        Self {
            elapsed_ms,
            face_delta: delta(after.counts.faces, before.counts.faces),
            edge_delta: delta(after.counts.edges, before.counts.edges),
            body_delta: delta(after.bodies, before.bodies),
        }
    }
}

/// First exceeded limit, as the message reported to the client
pub fn evaluate(limits: &Thresholds, stats: &ApplyStats) -> Option<String> {
    if stats.elapsed_ms > limits.max_apply_ms as f64 {
        Some(format!(
            "Apply exceeded MAX_APPLY_MS ({} ms)",
            limits.max_apply_ms
        ))
    } else if stats.face_delta > limits.max_face_delta {
        Some(format!(
            "face_count_delta exceeded MAX_FACE_DELTA ({})",
            limits.max_face_delta
        ))
    } else if stats.edge_delta > limits.max_edge_delta {
        Some(format!(
            "edge_count_delta exceeded MAX_EDGE_DELTA ({})",
            limits.max_edge_delta
        ))
    } else if stats.body_delta > limits.max_body_delta {
        Some(format!(
            "body_count_delta exceeded MAX_BODY_DELTA ({})",
            limits.max_body_delta
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(ms: f64, faces: i64, edges: i64, bodies: i64) -> ApplyStats {
        ApplyStats {
            elapsed_ms: ms,
            face_delta: faces,
            edge_delta: edges,
            body_delta: bodies,
        }
    }

    #[test]
    fn test_table() {
        let t = Thresholds::for_kind(OperationKind::Pattern);
        assert_eq!((t.max_apply_ms, t.max_face_delta, t.max_body_delta), (5000, 500, 20));
        let t = Thresholds::for_kind(OperationKind::Revolve);
        assert_eq!((t.max_apply_ms, t.max_edge_delta, t.max_body_delta), (1500, 800, 5));
        assert_eq!(
            Thresholds::for_kind(OperationKind::Hole),
            Thresholds::for_kind(OperationKind::Fillet)
        );
    }

    #[test]
    fn test_within_limits() {
        let t = Thresholds::for_kind(OperationKind::FaceExtrude);
        assert_eq!(evaluate(&t, &stats(1500.0, 150, 300, 1)), None);
        // shrinking is always allowed
        assert_eq!(evaluate(&t, &stats(0.0, -40, -80, -1)), None);
    }

    #[test]
    fn test_first_breach_wins() {
        let t = Thresholds::for_kind(OperationKind::FaceExtrude);
        assert_eq!(
            evaluate(&t, &stats(2000.0, 999, 999, 9)).unwrap(),
            "Apply exceeded MAX_APPLY_MS (1500 ms)"
        );
        assert_eq!(
            evaluate(&t, &stats(1.0, 151, 999, 9)).unwrap(),
            "face_count_delta exceeded MAX_FACE_DELTA (150)"
        );
        assert_eq!(
            evaluate(&t, &stats(1.0, 0, 301, 9)).unwrap(),
            "edge_count_delta exceeded MAX_EDGE_DELTA (300)"
        );
        assert_eq!(
            evaluate(&t, &stats(1.0, 0, 0, 2)).unwrap(),
            "body_count_delta exceeded MAX_BODY_DELTA (1)"
        );
    }

    #[test]
    fn test_deltas_between_totals() {
        let before = ModelTotals {
            bodies: 2,
            counts: TopologyCounts {
                faces: 12,
                edges: 24,
                vertices: 16,
            },
        };
        let after = ModelTotals {
            bodies: 1,
            counts: TopologyCounts {
                faces: 13,
                edges: 20,
                vertices: 16,
            },
        };
        let s = ApplyStats::between(&before, &after, 3.5);
        assert_eq!((s.face_delta, s.edge_delta, s.body_delta), (1, -4, -1));
    }
}
