//! Floor-plan text detection
//!
//! Answers two advisory questions about an uploaded floor plan: does it carry
//! any text, and where is each piece of text. Neither question ever fails;
//! anything that goes wrong reads as "no text found".
//!
//! Pipeline: engine lifecycle -> image loading and normalization ->
//! dual-mode detection -> raw output parsing -> result normalization and
//! coordinate remapping.

pub mod detector;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod invoker;
pub mod loader;
pub mod models;
pub mod onnx_engine;
pub mod postprocess;
pub mod preprocess;
pub mod raw;
pub mod recognizer;
pub mod results;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::OcrConfig;

pub use engine::{DetectionEngine, EngineFactory, EngineInput, EngineLifecycle, SerializedEngine};
pub use error::DetectionError;
pub use geometry::{Point, Quadrilateral, ScaleFactors};
pub use loader::{ImageBuffer, ImageSource, DEFAULT_MAX_SIDE};
pub use models::{ModelManager, ModelType};
pub use onnx_engine::OnnxTextEngine;
pub use results::TextRegion;

/// Text detection over floor-plan images
#[derive(Debug)]
pub struct FloorPlanOcr {
    engines: EngineLifecycle,
    max_side: u32,
}

impl FloorPlanOcr {
    pub fn new(engines: EngineLifecycle, max_side: u32) -> Self {
        Self { engines, max_side }
    }

    /// Pipeline over the built-in ONNX engine, built on first use
    pub fn from_config(config: &OcrConfig) -> Self {
        let factory = onnx_engine::engine_factory(
            config.engine.clone(),
            config.pipeline.serialize_inference,
        );
        Self::new(EngineLifecycle::new(factory), config.pipeline.max_side)
    }

    /// Pipeline over an engine that is already built
    pub fn with_engine(engine: Arc<dyn DetectionEngine>, max_side: u32) -> Self {
        Self::new(EngineLifecycle::with_engine(engine), max_side)
    }

    /// Whether the detection engine has been built
    pub fn engine_ready(&self) -> bool {
        self.engines.is_ready()
    }

    /// Cheap pre-check: does the image carry any text at all?
    ///
    /// False when the engine is unavailable or anything else fails.
    pub fn has_text(&self, source: impl Into<ImageSource>) -> bool {
        self.try_has_text(source).unwrap_or_else(|e| {
            warn!("Text check failed, reporting no text: {}", e);
            false
        })
    }

    /// Every piece of text with its box in original-image coordinates
    ///
    /// Empty when the engine is unavailable or anything else fails.
    pub fn text_regions(&self, source: impl Into<ImageSource>) -> Vec<TextRegion> {
        self.try_text_regions(source).unwrap_or_else(|e| {
            warn!("Text detection failed, reporting no regions: {}", e);
            Vec::new()
        })
    }

    /// [`has_text`](Self::has_text) with the reason for a failure
    pub fn try_has_text(&self, source: impl Into<ImageSource>) -> Result<bool, DetectionError> {
        let source = source.into();
        guarded(|| {
            let engine = self.engines.acquire()?;
            let image = loader::load(source)?;
            let (processed, _) = loader::normalize(&image.buffer, self.max_side);

            let invocation = invoker::detect(engine.as_ref(), image.path.as_deref(), &processed)?;
            Ok(!invocation.detections.is_empty())
        })
    }

    /// [`text_regions`](Self::text_regions) with the reason for a failure
    pub fn try_text_regions(
        &self,
        source: impl Into<ImageSource>,
    ) -> Result<Vec<TextRegion>, DetectionError> {
        let source = source.into();
        guarded(|| {
            let started = Instant::now();
            let engine = self.engines.acquire()?;
            let image = loader::load(source)?;
            let (processed, scale) = loader::normalize(&image.buffer, self.max_side);

            let invocation = invoker::detect(engine.as_ref(), image.path.as_deref(), &processed)?;
            let scale = if invocation.used_original_resolution() {
                ScaleFactors::IDENTITY
            } else {
                scale
            };

            let regions = results::normalize_detections(invocation.detections.items(), scale);
            debug!(
                "{} text regions from {} raw detections ({:?} mode, {:?})",
                regions.len(),
                invocation.detections.len(),
                invocation.mode,
                started.elapsed()
            );
            Ok(regions)
        })
    }
}

/// Run `f`, turning a panic into [`DetectionError::Panicked`]
fn guarded<T>(f: impl FnOnce() -> Result<T, DetectionError>) -> Result<T, DetectionError> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(DetectionError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    /// Engine returning canned output, recording what it was handed
    struct Canned {
        path: Option<Value>,
        array: Value,
        seen: Mutex<Vec<(&'static str, Option<(u32, u32)>)>>,
    }

    impl Canned {
        fn both(output: Value) -> Arc<Self> {
            Arc::new(Self {
                path: Some(output.clone()),
                array: output,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn array_only(output: Value) -> Arc<Self> {
            Arc::new(Self {
                path: None,
                array: output,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl DetectionEngine for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn detect(&self, input: EngineInput<'_>) -> Result<Value, DetectionError> {
            let dims = match input {
                EngineInput::Array(buffer) => Some(buffer.dimensions()),
                EngineInput::Path(_) => None,
            };
            self.seen.lock().push((input.kind(), dims));
            match input {
                EngineInput::Path(_) => self.path.clone().ok_or(DetectionError::UnsupportedInput {
                    engine: "canned",
                    input: "path",
                }),
                EngineInput::Array(_) => Ok(self.array.clone()),
            }
        }
    }

    struct Panicking;

    impl DetectionEngine for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn detect(&self, _input: EngineInput<'_>) -> Result<Value, DetectionError> {
            panic!("engine blew up");
        }
    }

    fn booth_box() -> Value {
        json!([[[[[10, 10], [50, 10], [50, 30], [10, 30]], "Booth 12", 0.98]], 0.05])
    }

    fn write_plan(dir: &Path, width: u32, height: u32) -> PathBuf {
        let path = dir.join("plan.png");
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();
        path
    }

    fn unavailable() -> FloorPlanOcr {
        FloorPlanOcr::new(
            EngineLifecycle::new(Box::new(|| anyhow::bail!("no models here"))),
            DEFAULT_MAX_SIDE,
        )
    }

    #[test]
    fn test_scenario_large_buffer_is_remapped() {
        let engine = Canned::array_only(booth_box());
        let ocr = FloorPlanOcr::with_engine(engine.clone(), DEFAULT_MAX_SIDE);

        let regions = ocr.text_regions(RgbImage::new(4000, 3000));

        assert_eq!(engine.seen.lock().as_slice(), &[("array", Some((2000, 1500)))]);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "Booth 12");
        assert_eq!(
            regions[0].bbox,
            Quadrilateral::from([[20.0, 20.0], [100.0, 20.0], [100.0, 60.0], [20.0, 60.0]])
        );
    }

    #[test]
    fn test_path_mode_keeps_original_coordinates() {
        let dir = tempdir().unwrap();
        let path = write_plan(dir.path(), 300, 200);
        let engine = Canned::both(booth_box());
        let ocr = FloorPlanOcr::with_engine(engine.clone(), 100);

        let regions = ocr.text_regions(path.as_path());

        assert_eq!(engine.seen.lock().as_slice(), &[("path", None)]);
        assert_eq!(
            regions[0].bbox,
            Quadrilateral::from([[10.0, 10.0], [50.0, 10.0], [50.0, 30.0], [10.0, 30.0]])
        );
    }

    #[test]
    fn test_array_fallback_for_file_is_remapped() {
        let dir = tempdir().unwrap();
        let path = write_plan(dir.path(), 400, 200);
        let engine = Canned::array_only(booth_box());
        let ocr = FloorPlanOcr::with_engine(engine.clone(), 100);

        let regions = ocr.text_regions(path.as_path());

        assert_eq!(
            engine.seen.lock().as_slice(),
            &[("path", None), ("array", Some((100, 50)))]
        );
        assert_eq!(
            regions[0].bbox,
            Quadrilateral::from([[40.0, 40.0], [200.0, 40.0], [200.0, 120.0], [40.0, 120.0]])
        );
    }

    #[test]
    fn test_small_image_is_not_resized() {
        let engine = Canned::array_only(booth_box());
        let ocr = FloorPlanOcr::with_engine(engine.clone(), DEFAULT_MAX_SIDE);

        let regions = ocr.text_regions(RgbImage::new(640, 480));

        assert_eq!(engine.seen.lock().as_slice(), &[("array", Some((640, 480)))]);
        assert_eq!(
            regions[0].bbox,
            Quadrilateral::from([[10.0, 10.0], [50.0, 10.0], [50.0, 30.0], [10.0, 30.0]])
        );
    }

    #[test]
    fn test_zero_max_side_leaves_image_unresized() {
        let engine = Canned::array_only(booth_box());
        let ocr = FloorPlanOcr::with_engine(engine.clone(), 0);

        let regions = ocr.text_regions(RgbImage::new(400, 400));

        assert_eq!(engine.seen.lock().as_slice(), &[("array", Some((400, 400)))]);
        assert_eq!(
            regions[0].bbox,
            Quadrilateral::from([[10.0, 10.0], [50.0, 10.0], [50.0, 30.0], [10.0, 30.0]])
        );
    }

    #[test]
    fn test_has_text_on_file_tries_path_first() {
        let dir = tempdir().unwrap();
        let path = write_plan(dir.path(), 300, 200);
        let engine = Canned::both(booth_box());
        let ocr = FloorPlanOcr::with_engine(engine.clone(), 100);

        assert!(ocr.has_text(path.as_path()));
        assert_eq!(engine.seen.lock().as_slice(), &[("path", None)]);
    }

    #[test]
    fn test_nonexistent_path_yields_nothing() {
        let engine = Canned::both(booth_box());
        let ocr = FloorPlanOcr::with_engine(engine.clone(), DEFAULT_MAX_SIDE);

        assert!(ocr.text_regions("/nonexistent/plan.png").is_empty());
        assert!(!ocr.has_text("/nonexistent/plan.png"));
        assert!(matches!(
            ocr.try_text_regions("/nonexistent/plan.png"),
            Err(DetectionError::ImageNotFound(_))
        ));
        assert!(engine.seen.lock().is_empty());
    }

    #[test]
    fn test_corrupt_file_yields_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.png");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"definitely not a png").unwrap();

        let ocr = FloorPlanOcr::with_engine(Canned::both(booth_box()), DEFAULT_MAX_SIDE);
        assert!(ocr.text_regions(path.as_path()).is_empty());
        assert!(!ocr.has_text(path.as_path()));
    }

    #[test]
    fn test_unavailable_engine_yields_nothing() {
        let ocr = unavailable();

        assert!(!ocr.has_text(RgbImage::new(10, 10)));
        assert!(ocr.text_regions(RgbImage::new(10, 10)).is_empty());
        assert!(matches!(
            ocr.try_has_text(RgbImage::new(10, 10)),
            Err(DetectionError::EngineUnavailable(_))
        ));
        assert!(!ocr.engine_ready());
    }

    #[test]
    fn test_null_output_yields_nothing() {
        let ocr = FloorPlanOcr::with_engine(Canned::both(json!([null, 0.02])), DEFAULT_MAX_SIDE);
        assert!(ocr.text_regions(RgbImage::new(10, 10)).is_empty());
        assert!(!ocr.has_text(RgbImage::new(10, 10)));
    }

    #[test]
    fn test_malformed_output_yields_nothing() {
        for output in [
            json!("garbage"),
            json!({"result": []}),
            json!([[[[[[[]]]]]]]),
            json!([[null, 7, "x", {"a": 1}]]),
        ] {
            let ocr = FloorPlanOcr::with_engine(Canned::both(output), DEFAULT_MAX_SIDE);
            assert!(ocr.text_regions(RgbImage::new(10, 10)).is_empty());
        }
    }

    #[test]
    fn test_whitespace_text_is_never_returned() {
        let output = json!([[
            [[[0, 0], [1, 0], [1, 1], [0, 1]], "  ", 0.9],
            [[[0, 0], [1, 0], [1, 1], [0, 1]], " Hall B ", 0.9],
            [[[0, 0], [1, 0], [1, 1], [0, 1]], "\n", 0.9]
        ], 0.1]);
        let ocr = FloorPlanOcr::with_engine(Canned::both(output), DEFAULT_MAX_SIDE);

        let regions = ocr.text_regions(RgbImage::new(10, 10));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "Hall B");
    }

    #[test]
    fn test_has_text_counts_raw_detections() {
        // raw detections count even when their text is blank
        let output = json!([[[[[0, 0], [1, 0], [1, 1], [0, 1]], " ", 0.9]], 0.1]);
        let ocr = FloorPlanOcr::with_engine(Canned::both(output), DEFAULT_MAX_SIDE);
        assert!(ocr.has_text(RgbImage::new(10, 10)));

        let ocr = FloorPlanOcr::with_engine(Canned::both(booth_box()), DEFAULT_MAX_SIDE);
        assert!(ocr.has_text(RgbImage::new(10, 10)));
    }

    #[test]
    fn test_engine_panic_is_contained() {
        let ocr = FloorPlanOcr::with_engine(Arc::new(Panicking), DEFAULT_MAX_SIDE);

        assert!(!ocr.has_text(RgbImage::new(10, 10)));
        assert!(ocr.text_regions(RgbImage::new(10, 10)).is_empty());
        match ocr.try_text_regions(RgbImage::new(10, 10)) {
            Err(DetectionError::Panicked(message)) => assert_eq!(message, "engine blew up"),
            other => panic!("expected a contained panic, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_construction_is_retried() {
        let attempts = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&attempts);
        let lifecycle = EngineLifecycle::new(Box::new(move || {
            let mut n = counter.lock();
            *n += 1;
            if *n == 1 {
                anyhow::bail!("first attempt fails");
            }
            let engine: Arc<dyn DetectionEngine> = Canned::both(booth_box());
            Ok(engine)
        }));
        let ocr = FloorPlanOcr::new(lifecycle, DEFAULT_MAX_SIDE);

        assert!(!ocr.has_text(RgbImage::new(10, 10)));
        assert!(ocr.has_text(RgbImage::new(10, 10)));
        assert!(ocr.engine_ready());
        assert_eq!(*attempts.lock(), 2);
    }

    #[test]
    fn test_unavailable_from_config_offline() {
        let dir = tempdir().unwrap();
        let mut config = OcrConfig::default();
        config.engine.models_dir = Some(dir.path().to_path_buf());
        config.engine.offline = true;

        let ocr = FloorPlanOcr::from_config(&config);
        assert!(!ocr.has_text(RgbImage::new(10, 10)));
        assert!(!ocr.engine_ready());
    }
}
