//! Dual-mode detection invocation
//!
//! Path mode hands the engine the original file; array mode hands it the
//! normalized pixels. Path mode is tried first when a path exists, and only
//! one mode's result is ever kept.

use std::path::Path;
use tracing::debug;

use super::engine::{DetectionEngine, EngineInput};
use super::error::DetectionError;
use super::loader::ImageBuffer;
use super::raw::{parse_output, RawDetections};

/// Which input the kept result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    Path,
    Array,
}

/// Result of one detection call
#[derive(Debug, Clone)]
pub struct Invocation {
    pub mode: InvocationMode,
    pub detections: RawDetections,
}

impl Invocation {
    /// Path mode ran on the original image, so its coordinates need no remap
    pub fn used_original_resolution(&self) -> bool {
        self.mode == InvocationMode::Path
    }
}

/// Run detection, preferring the original file when one is available
///
/// A failed (or empty-handed `null`) path-mode call falls back to array mode.
/// Array-mode failures are returned.
pub fn detect(
    engine: &dyn DetectionEngine,
    original_path: Option<&Path>,
    processed: &ImageBuffer,
) -> Result<Invocation, DetectionError> {
    if let Some(path) = original_path {
        match engine.detect(EngineInput::Path(path)) {
            Ok(output) if !output.is_null() => {
                return Ok(Invocation {
                    mode: InvocationMode::Path,
                    detections: parse_output(&output),
                });
            }
            Ok(_) => debug!(
                "Engine '{}' returned nothing for {:?}, retrying with pixel array",
                engine.name(),
                path
            ),
            Err(e) => debug!(
                "Path-mode detection failed on engine '{}', retrying with pixel array: {}",
                engine.name(),
                e
            ),
        }
    }

    let output = engine.detect(EngineInput::Array(processed))?;
    Ok(Invocation {
        mode: InvocationMode::Array,
        detections: parse_output(&output),
    })
}
