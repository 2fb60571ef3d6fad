//! Normalization of raw detections into text regions
//!
//! Text recall outranks geometry: a detection whose box cannot be parsed is
//! still reported, with an empty box.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::geometry::{Point, Quadrilateral, ScaleFactors};

/// A piece of text found on a floor plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    /// Location in original-image coordinates (empty if unknown)
    pub bbox: Quadrilateral,
    /// Trimmed, non-empty text
    pub text: String,
}

/// Turn raw detection items into text regions in original coordinates
pub fn normalize_detections(items: &[Value], scale: ScaleFactors) -> Vec<TextRegion> {
    let mut regions = Vec::with_capacity(items.len());

    for item in items {
        let Some(fields) = item.as_array().filter(|fields| fields.len() >= 2) else {
            debug!("Skipping malformed detection item: {}", item);
            continue;
        };

        let Some(text) = extract_text(&fields[1]) else {
            continue;
        };

        let bbox = match parse_quad(&fields[0]) {
            Some(quad) => quad.remap(scale),
            None => {
                warn!("Malformed text box for '{}': {}", text, fields[0]);
                Quadrilateral::empty()
            }
        };

        regions.push(TextRegion { bbox, text });
    }

    regions
}

/// Trimmed text of a detection, if it carries any
fn extract_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        // zero counts as no text, like null
        Value::Number(n) if n.as_f64() == Some(0.0) => return None,
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Parse `[[x, y], [x, y], [x, y], [x, y], ...]`, using the first four points
fn parse_quad(value: &Value) -> Option<Quadrilateral> {
    let points = value.as_array().filter(|points| points.len() >= 4)?;

    let mut parsed = [Point::new(0.0, 0.0); 4];
    for (slot, point) in parsed.iter_mut().zip(points) {
        let coords = point.as_array().filter(|coords| coords.len() >= 2)?;
        *slot = Point::new(coordinate(&coords[0])?, coordinate(&coords[1])?);
    }

    Some(Quadrilateral::new(parsed))
}

fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
