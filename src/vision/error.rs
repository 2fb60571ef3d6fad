//! Error types for the floor-plan text detection pipeline
//!
//! None of these reach callers of the public operations; they exist so each
//! stage can say why it gave up before the boundary collapses them into
//! "no text found".

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while detecting text on a floor plan
#[derive(Debug, Error)]
pub enum DetectionError {
    /// The detection engine could not be constructed
    #[error("Text detection engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The image path does not exist
    #[error("Image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    /// The image file exists but could not be decoded
    #[error("Failed to decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The image file could not be opened for reading
    #[error("Failed to read image {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A caller-supplied pixel array has an unusable shape
    #[error("Invalid image buffer: {0}")]
    InvalidBuffer(String),

    /// The engine does not accept this kind of input
    #[error("Engine '{engine}' does not accept {input} input")]
    UnsupportedInput {
        engine: &'static str,
        input: &'static str,
    },

    /// The engine failed while running detection
    #[error("Text detection failed: {0}")]
    Inference(String),

    /// The engine panicked while running detection
    #[error("Text detection panicked: {0}")]
    Panicked(String),
}

impl DetectionError {
    /// Build an inference error from an anyhow chain, keeping every cause
    pub fn inference(err: anyhow::Error) -> Self {
        Self::Inference(format!("{err:#}"))
    }
}
