//! Built-in detection engine on PaddleOCR ONNX models
//!
//! Emits the loosely structured shape the pipeline normalizes:
//! `[[[quad, text, score], ...], elapsed]`, or `[null, elapsed]` when the
//! image holds no text.

use anyhow::Result;
use image::RgbImage;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::detector::TextDetector;
use super::engine::{DetectionEngine, EngineFactory, EngineInput, SerializedEngine};
use super::error::DetectionError;
use super::loader::decode_file;
use super::models::{ModelManager, ModelType, SessionOptions};
use super::postprocess::{DbParams, DetectedBox};
use super::preprocess::{crop_quad, PreprocessConfig};
use super::recognizer::TextRecognizer;
use crate::config::EngineSettings;

/// One recognized line of text
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedLine {
    /// top-left, top-right, bottom-right, bottom-left
    pub points: [[f32; 2]; 4],
    pub text: String,
    pub score: f32,
}

/// Detector plus recognizer
pub struct OnnxTextEngine {
    detector: TextDetector,
    recognizer: TextRecognizer,
    text_score: f32,
}

impl OnnxTextEngine {
    /// Load (downloading if allowed) the models and build both sessions
    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        let manager = ModelManager::from_settings(settings)?;
        let det_path = manager.ensure_model(ModelType::Detection)?;
        let rec_path = manager.ensure_model(ModelType::Recognition)?;
        let dict_path = manager.ensure_model(ModelType::Dictionary)?;

        let options = SessionOptions::from(settings);
        let preprocess = PreprocessConfig {
            det_limit_side: settings.det_limit_side,
            ..Default::default()
        };
        let params = DbParams {
            threshold: settings.det_threshold,
            box_threshold: settings.box_threshold,
            unclip_ratio: settings.unclip_ratio,
            max_candidates: settings.max_candidates,
            ..Default::default()
        };

        let detector = TextDetector::new(&det_path, options, preprocess.clone(), params)?;
        let recognizer = TextRecognizer::new(&rec_path, &dict_path, options, preprocess)?;
        info!(
            "PaddleOCR engine loaded from {:?} ({} symbols)",
            manager.models_dir(),
            recognizer.dictionary_size()
        );

        Ok(Self {
            detector,
            recognizer,
            text_score: settings.text_score,
        })
    }

    /// Detect and recognize every line of text in `image`
    pub fn recognize_image(&self, image: &RgbImage) -> Result<Vec<RecognizedLine>> {
        let boxes = self.detector.detect(image)?;
        debug!("{} candidate text boxes", boxes.len());
        Ok(collect_lines(image, boxes, self.text_score, |crop| {
            self.recognizer.recognize(crop)
        }))
    }
}

/// Recognize each box's crop, skipping boxes whose recognition fails
fn collect_lines(
    image: &RgbImage,
    boxes: Vec<DetectedBox>,
    text_score: f32,
    mut recognize: impl FnMut(&RgbImage) -> Result<(String, f32)>,
) -> Vec<RecognizedLine> {
    let mut lines = Vec::with_capacity(boxes.len());
    for detected in boxes {
        let Some(crop) = crop_quad(image, &detected.points) else {
            continue;
        };
        let (text, score) = match recognize(&crop) {
            Ok(recognized) => recognized,
            Err(e) => {
                warn!("Skipping text box {:?}: {:#}", detected.points, e);
                continue;
            }
        };
        if score < text_score {
            debug!("Dropping '{}' (score {:.3})", text, score);
            continue;
        }
        lines.push(RecognizedLine {
            points: detected.points,
            text,
            score,
        });
    }
    lines
}

impl DetectionEngine for OnnxTextEngine {
    fn name(&self) -> &'static str {
        "paddleocr-onnx"
    }

    fn detect(&self, input: EngineInput<'_>) -> Result<Value, DetectionError> {
        let started = Instant::now();
        let image: Cow<'_, RgbImage> = match input {
            EngineInput::Path(path) => Cow::Owned(decode_file(path)?),
            EngineInput::Array(buffer) => Cow::Borrowed(buffer.as_rgb()),
        };

        let lines = self
            .recognize_image(&image)
            .map_err(DetectionError::inference)?;
        Ok(engine_output(&lines, started.elapsed()))
    }
}

/// Shape recognized lines the way the pipeline expects engine output
pub fn engine_output(lines: &[RecognizedLine], elapsed: Duration) -> Value {
    let elapsed = elapsed.as_secs_f64();
    if lines.is_empty() {
        return json!([null, elapsed]);
    }

    let detections: Vec<Value> = lines
        .iter()
        .map(|line| {
            let quad = line.points.map(|p| [f64::from(p[0]), f64::from(p[1])]);
            json!([quad, line.text, line.score])
        })
        .collect();
    json!([detections, elapsed])
}

/// Factory building the built-in engine, optionally behind a call gate
pub fn engine_factory(settings: EngineSettings, serialize: bool) -> EngineFactory {
    Box::new(move || {
        let engine: Arc<dyn DetectionEngine> = Arc::new(OnnxTextEngine::from_settings(&settings)?);
        Ok(if serialize {
            Arc::new(SerializedEngine::new(engine))
        } else {
            engine
        })
    })
}
