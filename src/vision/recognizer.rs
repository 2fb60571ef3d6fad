//! Text recognition with the PaddleOCR CRNN model and greedy CTC decoding

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{Array2, ArrayView2, Axis, Ix2};
use ort::value::Value;
use parking_lot::Mutex;
use std::path::Path;

use super::models::{OnnxSession, SessionOptions};
use super::preprocess::{preprocess_for_recognition, PreprocessConfig};

/// CRNN text recognizer
pub struct TextRecognizer {
    session: Mutex<OnnxSession>,
    dictionary: Vec<String>,
    preprocess: PreprocessConfig,
}

impl TextRecognizer {
    pub fn new(
        model_path: &Path,
        dictionary_path: &Path,
        options: SessionOptions,
        preprocess: PreprocessConfig,
    ) -> Result<Self> {
        let dictionary = load_dictionary(dictionary_path)?;
        Ok(Self {
            session: Mutex::new(OnnxSession::new(model_path, options)?),
            dictionary,
            preprocess,
        })
    }

    pub fn dictionary_size(&self) -> usize {
        self.dictionary.len()
    }

    /// Recognize the text of an upright crop, with its confidence
    pub fn recognize(&self, crop: &RgbImage) -> Result<(String, f32)> {
        let tensor = preprocess_for_recognition(crop, &self.preprocess);
        let input_value = Value::from_array(tensor).context("Failed to create input tensor")?;

        let mut session = self.session.lock();
        let input_name = session.input_name().to_string();
        let outputs = session
            .session_mut()
            .run(ort::inputs![input_name.as_str() => input_value])
            .context("Recognition inference failed")?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract output tensor")?;

        let steps: Array2<f32> = match output.ndim() {
            3 => output.index_axis(Axis(0), 0).to_owned(),
            _ => output.to_owned(),
        }
        .into_dimensionality::<Ix2>()
        .with_context(|| format!("Unexpected recognition output shape: {:?}", output.shape()))?;

        Ok(ctc_decode(steps.view(), &self.dictionary))
    }
}

/// Load a character dictionary: CTC blank at index 0, one entry per line,
/// then a trailing space
pub fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dictionary {:?}", path))?;

    let mut dictionary = vec![String::new()];
    dictionary.extend(
        content
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string()),
    );
    dictionary.push(" ".to_string());

    if dictionary.len() <= 2 {
        anyhow::bail!("Dictionary {:?} is empty", path);
    }
    Ok(dictionary)
}

/// Greedy CTC decoding of `(time steps, classes)` probabilities
///
/// Repeated classes collapse and blanks (class 0) are dropped. The score is
/// the mean probability of the emitted characters, 0 when none are emitted.
pub fn ctc_decode(steps: ArrayView2<f32>, dictionary: &[String]) -> (String, f32) {
    let mut text = String::new();
    let mut total = 0.0f32;
    let mut emitted = 0usize;
    let mut previous = 0usize;

    for row in steps.outer_iter() {
        let (index, prob) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });

        if index != 0 && index != previous {
            // classes the dictionary doesn't cover are skipped
            if let Some(symbol) = dictionary.get(index) {
                text.push_str(symbol);
                total += prob;
                emitted += 1;
            }
        }
        previous = index;
    }

    let score = if emitted == 0 {
        0.0
    } else {
        total / emitted as f32
    };
    (text, score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn dictionary() -> Vec<String> {
        ["", "A", "B", "1", " "].iter().map(|s| s.to_string()).collect()
    }

    /// One-hot style rows with the given winning class and probability
    fn steps(winners: &[(usize, f32)], classes: usize) -> Array2<f32> {
        let mut steps = Array2::<f32>::from_elem((winners.len(), classes), 0.01);
        for (t, &(class, prob)) in winners.iter().enumerate() {
            steps[[t, class]] = prob;
        }
        steps
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let logits = steps(
            &[(1, 0.9), (1, 0.8), (0, 0.9), (1, 0.7), (2, 0.6), (0, 0.9)],
            5,
        );
        let (text, score) = ctc_decode(logits.view(), &dictionary());
        assert_eq!(text, "AAB");
        assert!((score - (0.9 + 0.7 + 0.6) / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_ctc_all_blank() {
        let logits = steps(&[(0, 0.9), (0, 0.9)], 5);
        let (text, score) = ctc_decode(logits.view(), &dictionary());
        assert!(text.is_empty());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_ctc_space_and_digits() {
        let logits = steps(&[(1, 0.9), (4, 0.9), (3, 0.9)], 5);
        let (text, _) = ctc_decode(logits.view(), &dictionary());
        assert_eq!(text, "A 1");
    }

    #[test]
    fn test_ctc_ignores_classes_beyond_dictionary() {
        let logits = steps(&[(1, 0.9), (6, 0.9), (2, 0.9)], 7);
        let (text, _) = ctc_decode(logits.view(), &dictionary());
        assert_eq!(text, "AB");
    }

    #[test]
    fn test_load_dictionary() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "a\r\nb\nc\n").unwrap();

        let dictionary = load_dictionary(file.path()).unwrap();
        assert_eq!(dictionary, vec!["", "a", "b", "c", " "]);
    }

    #[test]
    fn test_load_dictionary_errors() {
        assert!(load_dictionary(Path::new("/nonexistent/dict.txt")).is_err());

        let file = NamedTempFile::new().unwrap();
        assert!(load_dictionary(file.path()).is_err());
    }
}
