//! Floor Plan OCR - advisory text detection for exhibition floor plans
//!
//! Detects whether an uploaded floor plan carries text and where each piece
//! of text sits, in original-image coordinates. Failures never propagate to
//! callers of [`FloorPlanOcr::has_text`] or [`FloorPlanOcr::text_regions`].

pub mod config;
pub mod storage;
pub mod vision;

pub use config::OcrConfig;
pub use vision::{
    DetectionEngine, DetectionError, EngineLifecycle, FloorPlanOcr, ImageBuffer, ImageSource,
    Quadrilateral, TextRegion,
};
