//! Units and coordinates of the cutter.
//!
//! Everything that the motion engine deals with is measured in integer
//! micrometers, in absolute machine coordinates. The trajectory planner works
//! in floating-point millimeters instead, so every position crossing that
//! boundary goes through [`um_to_mm`] and [`mm_to_um`]. The conversion back to
//! micrometers rounds to the nearest micrometer (half away from zero) so that
//! positions don't drift after many round trips.
//!
//! This crate supports `no_std` and uses `libm` for the rounding.

#![cfg_attr(not(feature = "std"), no_std)]

use serde::{Deserialize, Serialize};

/// Micrometers.
pub struct Um;
/// Millimeters.
pub struct Mm;

/// An absolute machine position, in micrometers.
pub type Position = euclid::Point3D<i32, Um>;

/// A displacement in micrometers (for example, the origin offset).
pub type Offset = euclid::Vector3D<i32, Um>;

/// A position in the planner's native units.
pub type MmPoint = euclid::Point3D<f64, Mm>;

/// An X/Y point, in micrometers.
pub type PlanePoint = euclid::Point2D<i32, Um>;

pub fn um_to_mm(um: i32) -> f64 {
    um as f64 / 1000.0
}

pub fn mm_to_um(mm: f64) -> i32 {
    libm::round(mm * 1000.0) as i32
}

pub fn position_to_mm(p: &Position) -> MmPoint {
    MmPoint::new(um_to_mm(p.x), um_to_mm(p.y), um_to_mm(p.z))
}

pub fn position_from_mm(p: &MmPoint) -> Position {
    Position::new(mm_to_um(p.x), mm_to_um(p.y), mm_to_um(p.z))
}

/// The rectangle that the laser head is allowed to cut in.
///
/// Unlike `euclid::Box2D`, both ends are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkArea {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl WorkArea {
    pub fn new(min: PlanePoint, max: PlanePoint) -> Self {
        WorkArea {
            min_x: min.x,
            min_y: min.y,
            max_x: max.x,
            max_y: max.y,
        }
    }

    pub fn contains(&self, p: PlanePoint) -> bool {
        (self.min_x..=self.max_x).contains(&p.x) && (self.min_y..=self.max_y).contains(&p.y)
    }
}

/// How many motor steps it takes to travel one meter along an axis.
///
/// The sign encodes the wiring: a negative scale means that the direction
/// output has to be inverted to move towards positive coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisScale {
    pub steps_per_m: i32,
}

impl AxisScale {
    pub fn new(steps_per_m: i32) -> Self {
        Self { steps_per_m }
    }

    pub fn inverted(&self) -> bool {
        self.steps_per_m < 0
    }

    pub fn steps_per_mm(&self) -> u32 {
        self.steps_per_m.unsigned_abs() / 1000
    }

    /// The distance covered by `steps` motor steps.
    ///
    /// A zero scale is treated as "this axis doesn't move".
    pub fn steps_to_um(&self, steps: u32) -> i32 {
        if self.steps_per_m == 0 {
            return 0;
        }
        let um = steps as f64 * 1_000_000.0 / self.steps_per_m.unsigned_abs() as f64;
        libm::round(um) as i32
    }
}
