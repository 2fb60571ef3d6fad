//! Text detection with the PaddleOCR DB model

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{Array2, Array4, ArrayD, Axis, Ix2};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;
use tracing::debug;

use super::models::{OnnxSession, SessionOptions};
use super::postprocess::{boxes_from_probability_map, DbParams, DetectedBox};
use super::preprocess::{preprocess_for_detection, PreprocessConfig};

/// DB text detector
pub struct TextDetector {
    session: Mutex<OnnxSession>,
    preprocess: PreprocessConfig,
    params: DbParams,
}

impl TextDetector {
    pub fn new(
        model_path: &Path,
        options: SessionOptions,
        preprocess: PreprocessConfig,
        params: DbParams,
    ) -> Result<Self> {
        Ok(Self {
            session: Mutex::new(OnnxSession::new(model_path, options)?),
            preprocess,
            params,
        })
    }

    /// Detect text boxes, in `image` pixel coordinates
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedBox>> {
        let input = preprocess_for_detection(image, &self.preprocess);
        let prob = self.run(input.tensor)?;

        debug!(
            "Detection map {:?} for resized input {:?}",
            prob.dim(),
            input.resized
        );

        Ok(boxes_from_probability_map(
            prob.view(),
            &self.params,
            image.dimensions(),
        ))
    }

    fn run(&self, tensor: Array4<f32>) -> Result<Array2<f32>> {
        let input_value = Value::from_array(tensor).context("Failed to create input tensor")?;

        let mut session = self.session.lock();
        let input_name = session.input_name().to_string();
        let outputs = session
            .session_mut()
            .run(ort::inputs![input_name.as_str() => input_value])
            .context("Detection inference failed")?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract output tensor")?;
        probability_map(output.to_owned())
    }
}

/// Reduce a `[1, 1, H, W]` or `[1, H, W]` output to `(H, W)`
fn probability_map(output: ArrayD<f32>) -> Result<Array2<f32>> {
    let shape = output.shape().to_vec();
    let map = match shape.len() {
        4 if shape[0] == 1 && shape[1] == 1 => {
            output.index_axis_move(Axis(0), 0).index_axis_move(Axis(0), 0)
        }
        3 if shape[0] == 1 => output.index_axis_move(Axis(0), 0),
        2 => output,
        _ => anyhow::bail!("Unexpected detection output shape: {:?}", shape),
    };
    map.into_dimensionality::<Ix2>()
        .with_context(|| format!("Unexpected detection output shape: {:?}", shape))
}
