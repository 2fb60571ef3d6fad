//! Text region geometry and coordinate remapping
//!
//! Detections come back in processing resolution. The only transform applied
//! upstream is a uniform resize, so mapping back is a per-axis multiply.

use serde::{Deserialize, Serialize};

/// A point in image space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(point: Point) -> Self {
        [point.x, point.y]
    }
}

/// Ratios mapping processing-resolution coordinates to original resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactors {
    pub scale_x: f64,
    pub scale_y: f64,
}

impl ScaleFactors {
    /// No resize happened (or path mode handed the engine the original image)
    pub const IDENTITY: ScaleFactors = ScaleFactors {
        scale_x: 1.0,
        scale_y: 1.0,
    };

    /// Factors for an image resized from `original` to `processed` (width, height)
    pub fn between(original: (u32, u32), processed: (u32, u32)) -> Self {
        let ratio = |orig: u32, proc: u32| {
            if proc > 0 {
                orig as f64 / proc as f64
            } else {
                1.0
            }
        };
        Self {
            scale_x: ratio(original.0, processed.0),
            scale_y: ratio(original.1, processed.1),
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for ScaleFactors {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Four-point polygon around a detected text region
///
/// Empty when the detector's box could not be parsed; the text is kept anyway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quadrilateral(Vec<Point>);

impl Quadrilateral {
    pub fn new(points: [Point; 4]) -> Self {
        Self(points.to_vec())
    }

    /// The placeholder used when geometry is unavailable
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Map every point by `(x * scale_x, y * scale_y)`
    ///
    /// All-or-nothing: anything other than four finite points yields an
    /// empty quadrilateral rather than a partially transformed one.
    pub fn remap(&self, scale: ScaleFactors) -> Quadrilateral {
        if self.0.len() != 4 || !self.0.iter().all(Point::is_finite) {
            return Quadrilateral::empty();
        }

        Quadrilateral(
            self.0
                .iter()
                .map(|p| Point::new(p.x * scale.scale_x, p.y * scale.scale_y))
                .collect(),
        )
    }
}

impl From<[[f64; 2]; 4]> for Quadrilateral {
    fn from(points: [[f64; 2]; 4]) -> Self {
        Self::new(points.map(Point::from))
    }
}
