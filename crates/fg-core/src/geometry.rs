//! Small geometric value types shared by selectors, features and hosts

use std::fmt;
use std::str::FromStr;

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// A principal axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Unit vector along the positive axis
    pub fn unit(self) -> DVec3 {
        match self {
            Axis::X => DVec3::X,
            Axis::Y => DVec3::Y,
            Axis::Z => DVec3::Z,
        }
    }

    /// Component of a vector along this axis
    pub fn component(self, v: DVec3) -> f64 {
        match self {
            Axis::X => v.x,
            Axis::Y => v.y,
            Axis::Z => v.z,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn lower_name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(s)
    }
}

impl FromStr for Axis {
    type Err = ();

    /// Parses `x`/`X` style names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x" | "X" => Ok(Axis::X),
            "y" | "Y" => Ok(Axis::Y),
            "z" | "Z" => Ok(Axis::Z),
            _ => Err(()),
        }
    }
}

/// An axis with an explicit sign, written `+X`, `-Z`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignedAxis {
    pub axis: Axis,
    pub negative: bool,
}

impl SignedAxis {
    /// Create a new signed axis
    pub fn new(axis: Axis, negative: bool) -> Self {
        Self { axis, negative }
    }

    /// Unit vector pointing along the signed axis
    pub fn unit(self) -> DVec3 {
        if self.negative {
            -self.axis.unit()
        } else {
            self.axis.unit()
        }
    }
}

impl fmt::Display for SignedAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.negative { '-' } else { '+' };
        write!(f, "{}{}", sign, self.axis)
    }
}

impl FromStr for SignedAxis {
    type Err = ();

    /// The sign is mandatory and the axis letter must be upper case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, rest) = match s.as_bytes().first() {
            Some(b'+') => (false, &s[1..]),
            Some(b'-') => (true, &s[1..]),
            _ => return Err(()),
        };
        let axis = match rest {
            "X" => Axis::X,
            "Y" => Axis::Y,
            "Z" => Axis::Z,
            _ => return Err(()),
        };
        Ok(Self::new(axis, negative))
    }
}

/// One of the three origin construction planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstructionPlane {
    XY,
    YZ,
    XZ,
}

impl ConstructionPlane {
    /// Plane normal
    pub fn normal(self) -> DVec3 {
        match self {
            ConstructionPlane::XY => DVec3::Z,
            ConstructionPlane::YZ => DVec3::X,
            ConstructionPlane::XZ => DVec3::Y,
        }
    }

    /// In-plane (u, v) directions
    pub fn basis(self) -> (DVec3, DVec3) {
        match self {
            ConstructionPlane::XY => (DVec3::X, DVec3::Y),
            ConstructionPlane::YZ => (DVec3::Y, DVec3::Z),
            ConstructionPlane::XZ => (DVec3::X, DVec3::Z),
        }
    }
}

impl fmt::Display for ConstructionPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstructionPlane::XY => "XY",
            ConstructionPlane::YZ => "YZ",
            ConstructionPlane::XZ => "XZ",
        };
        f.write_str(s)
    }
}

impl FromStr for ConstructionPlane {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "XY" => Ok(ConstructionPlane::XY),
            "YZ" => Ok(ConstructionPlane::YZ),
            "XZ" => Ok(ConstructionPlane::XZ),
            _ => Err(()),
        }
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: DVec3,
    pub max: DVec3,
}

impl BoundingBox {
    /// Create a bounding box from two corners in any order
    pub fn new(a: DVec3, b: DVec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Bounding box of a set of points
    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::new(first, first), |bb, p| Self {
            min: bb.min.min(p),
            max: bb.max.max(p),
        }))
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn volume(&self) -> f64 {
        let s = self.size();
        s.x * s.y * s.z
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Overlap of both boxes, `None` when they do not overlap with positive volume
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        let size = max - min;
        (size.x > 0.0 && size.y > 0.0 && size.z > 0.0).then_some(Self { min, max })
    }

    pub fn translated(&self, offset: DVec3) -> BoundingBox {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_axis_parse() {
        let axis: SignedAxis = "-Z".parse().unwrap();
        assert_eq!(axis.unit(), DVec3::NEG_Z);
        assert_eq!(axis.to_string(), "-Z");
        assert!("Z".parse::<SignedAxis>().is_err());
        assert!("+z".parse::<SignedAxis>().is_err());
    }

    #[test]
    fn test_bounding_box_ops() {
        let a = BoundingBox::new(DVec3::ZERO, DVec3::splat(2.0));
        let b = BoundingBox::new(DVec3::ONE, DVec3::splat(3.0));
        assert_eq!(a.intersection(&b).unwrap().size(), DVec3::ONE);
        assert_eq!(a.union(&b).size(), DVec3::splat(3.0));

        let c = BoundingBox::new(DVec3::splat(5.0), DVec3::splat(6.0));
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_from_points() {
        let bb = BoundingBox::from_points([DVec3::new(1.0, -1.0, 0.0), DVec3::new(-1.0, 2.0, 3.0)])
            .unwrap();
        assert_eq!(bb.min, DVec3::new(-1.0, -1.0, 0.0));
        assert_eq!(bb.max, DVec3::new(1.0, 2.0, 3.0));
        assert!(BoundingBox::from_points([]).is_none());
    }
}
