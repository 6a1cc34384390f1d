//! Unit conversion between the host's internal length unit and millimetres
//!
//! Every external value is expressed in millimetres. A [`UnitScale`] is derived
//! once per request from the host document and used for every conversion in
//! that request, so lengths, areas and volumes stay consistent.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::constants::FALLBACK_LENGTH_FACTOR_MM;
use crate::document::HostDocument;

/// Length units a host document may use internally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    Millimeter,
    /// Centimetres (the usual CAD-kernel internal unit)
    #[default]
    Centimeter,
    Meter,
    Inch,
}

impl LengthUnit {
    /// Millimetres in one unit
    pub fn mm_per_unit(self) -> f64 {
        match self {
            LengthUnit::Millimeter => 1.0,
            LengthUnit::Centimeter => 10.0,
            LengthUnit::Meter => 1000.0,
            LengthUnit::Inch => 25.4,
        }
    }

    /// Short name as reported by `status`
    pub fn as_str(self) -> &'static str {
        match self {
            LengthUnit::Millimeter => "mm",
            LengthUnit::Centimeter => "cm",
            LengthUnit::Meter => "m",
            LengthUnit::Inch => "in",
        }
    }
}

/// Per-request conversion between internal units and millimetres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitScale {
    /// Millimetres per internal length unit
    length_mm: f64,
}

impl Default for UnitScale {
    fn default() -> Self {
        Self::new(FALLBACK_LENGTH_FACTOR_MM)
    }
}

impl UnitScale {
    /// Create a scale from millimetres per internal unit
    pub fn new(length_mm: f64) -> Self {
        Self { length_mm }
    }

    /// Derive the scale by converting one internal unit through the host.
    ///
    /// Falls back to centimetres when the host cannot convert or returns a
    /// non-positive factor.
    pub fn from_document(doc: &dyn HostDocument) -> Self {
        match doc.convert_length_to_mm(1.0) {
            Some(factor) if factor.is_finite() && factor > 0.0 => Self::new(factor),
            other => {
                tracing::debug!(
                    "Host length conversion unavailable ({:?}), assuming {} mm per unit",
                    other,
                    FALLBACK_LENGTH_FACTOR_MM
                );
                Self::default()
            }
        }
    }

    /// Millimetres per internal length unit
    pub fn length_factor(&self) -> f64 {
        self.length_mm
    }

    pub fn to_mm(&self, value: f64) -> f64 {
        value * self.length_mm
    }

    pub fn from_mm(&self, value_mm: f64) -> f64 {
        value_mm / self.length_mm
    }

    pub fn area_to_mm2(&self, value: f64) -> f64 {
        value * self.length_mm * self.length_mm
    }

    pub fn volume_to_mm3(&self, value: f64) -> f64 {
        value * self.length_mm.powi(3)
    }

    /// Convert a density in kg per cubic internal unit to kg/m³
    pub fn density_to_kg_m3(&self, value: f64) -> f64 {
        let metres_per_unit = self.length_mm / 1000.0;
        value / metres_per_unit.powi(3)
    }

    pub fn point_to_mm(&self, point: DVec3) -> DVec3 {
        point * self.length_mm
    }

    pub fn point_from_mm(&self, point_mm: DVec3) -> DVec3 {
        point_mm / self.length_mm
    }
}

/// A point in millimetres as it appears on the wire (`{x, y, z}`)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointMm {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl PointMm {
    /// Create a new point
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<DVec3> for PointMm {
    fn from(v: DVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<PointMm> for DVec3 {
    fn from(p: PointMm) -> Self {
        DVec3::new(p.x, p.y, p.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_round_trip_lengths() {
        let scale = UnitScale::new(LengthUnit::Centimeter.mm_per_unit());
        for value in [0.1, 1.0, 58.0, 1000.0] {
            let back = scale.to_mm(scale.from_mm(value));
            assert_relative_eq!(back, value, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_area_and_volume_use_powers() {
        let scale = UnitScale::new(10.0);
        assert_relative_eq!(scale.area_to_mm2(2.0), 200.0);
        assert_relative_eq!(scale.volume_to_mm3(2.0), 2000.0);
    }

    #[test]
    fn test_density_cm_to_m() {
        // 7.85e-3 kg/cm³ is steel
        let scale = UnitScale::new(LengthUnit::Centimeter.mm_per_unit());
        assert_relative_eq!(scale.density_to_kg_m3(7.85e-3), 7850.0, max_relative = 1e-9);
    }

    #[test]
    fn test_inch_factor() {
        let scale = UnitScale::new(LengthUnit::Inch.mm_per_unit());
        assert_relative_eq!(scale.to_mm(2.0), 50.8);
        assert_relative_eq!(scale.from_mm(25.4), 1.0);
    }

    #[test]
    fn test_point_mm_conversions() {
        let p = PointMm::from(DVec3::new(1.0, 2.0, 3.0));
        assert_eq!((p.x, p.y, p.z), (1.0, 2.0, 3.0));
        assert_eq!(DVec3::from(p), DVec3::new(1.0, 2.0, 3.0));
    }
}
