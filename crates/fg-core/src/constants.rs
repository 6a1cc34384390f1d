//! Global constants for fg-core

/// Millimetres per internal length unit assumed when the host cannot convert
pub const FALLBACK_LENGTH_FACTOR_MM: f64 = 10.0;

/// Default verification tolerance in millimetres
pub const DEFAULT_TOLERANCE_MM: f64 = 0.1;

/// Default verification tolerance in percent
pub const DEFAULT_TOLERANCE_PCT: f64 = 1.0;

/// Maximum face extrude distance (mm)
pub const MAX_EXTRUDE_MM: f64 = 50.0;

/// Maximum sketch profile extrude distance (mm)
pub const MAX_PROFILE_DISTANCE_MM: f64 = 100.0;

/// Maximum fillet radius (mm)
pub const MAX_RADIUS_MM: f64 = 50.0;

/// Maximum hole depth, shell thickness and pattern spacing (mm)
pub const MAX_DISTANCE_MM: f64 = 50.0;

/// Maximum instances of a pattern, seed included. Every copy adds at least
/// one face, so larger patterns always exceed the pattern face guardrail.
pub const MAX_PATTERN_INSTANCES: u32 = 500;

/// Default tolerance for the bottom-edge test of `measure_face_span` (mm)
pub const DEFAULT_SPAN_EPS_MM: f64 = 0.05;

/// Default sweep angle for revolves and circular patterns (degrees)
pub const FULL_TURN_DEG: f64 = 360.0;

/// Only supported request unit
pub const REQUEST_UNITS: &str = "mm";

/// Metrics every mutating command tries to verify
pub const METRICS_ATTEMPTED: [&str; 2] = ["bbox", "volume"];

/// HTTP status treated as retryable by the default retry policy
pub const RETRYABLE_STATUS: u16 = 429;
