//! Image preprocessing for the PaddleOCR models
//!
//! Handles resizing, normalization, perspective crops and tensor conversion.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use ndarray::{Array3, Array4};

/// Preprocessing configuration
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Longest side fed to the detection model
    pub det_limit_side: u32,
    /// Input height of the recognition model
    pub rec_target_height: u32,
    /// Widest crop fed to the recognition model
    pub rec_max_width: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_limit_side: 960,
            rec_target_height: 48,
            rec_max_width: 640,
            // (pixel / 255.0 - 0.5) / 0.5 maps [0, 255] -> [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Detection tensor plus the size it was resized to
pub struct DetectionInput {
    pub tensor: Array4<f32>,
    /// (width, height) of the resized image
    pub resized: (u32, u32),
}

/// Convert RGB pixels to an HWC f32 array in 0-1
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    Array3::from_shape_fn((h, w, 3), |(y, x, c)| (image[[y, x, c]] - mean[c]) / std[c])
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    Array4::from_shape_fn((1, c, h, w), |(_, ch, y, x)| image[[y, x, ch]])
}

/// Target size for detection: longest side capped at `limit`, both sides
/// rounded to a multiple of 32 (the DB backbone downsamples by 32)
pub fn detection_size(width: u32, height: u32, limit: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    let ratio = if longest > limit {
        limit as f32 / longest as f32
    } else {
        1.0
    };

    let round32 = |side: u32| {
        let scaled = (side as f32 * ratio).round() as u32;
        (((scaled + 16) / 32) * 32).max(32)
    };

    (round32(width), round32(height))
}

/// Full preprocessing pipeline for detection
pub fn preprocess_for_detection(image: &RgbImage, config: &PreprocessConfig) -> DetectionInput {
    let (width, height) = image.dimensions();
    let (new_w, new_h) = detection_size(width, height, config.det_limit_side);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let normalized = normalize(&rgb_to_f32(&resized), &config.mean, &config.std);

    DetectionInput {
        tensor: hwc_to_nchw(&normalized),
        resized: (new_w, new_h),
    }
}

/// Width a text crop is resized to at the recognition input height
pub fn recognition_width(width: u32, height: u32, config: &PreprocessConfig) -> u32 {
    let ratio = width as f32 / height.max(1) as f32;
    let target = (config.rec_target_height as f32 * ratio).ceil() as u32;
    target.clamp(8, config.rec_max_width)
}

/// Full preprocessing pipeline for recognition
pub fn preprocess_for_recognition(crop: &RgbImage, config: &PreprocessConfig) -> Array4<f32> {
    let (width, height) = crop.dimensions();
    let target_w = recognition_width(width, height, config);

    let resized = imageops::resize(crop, target_w, config.rec_target_height, FilterType::Triangle);
    let normalized = normalize(&rgb_to_f32(&resized), &config.mean, &config.std);

    hwc_to_nchw(&normalized)
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Rectify the region inside a quadrilateral (top-left, top-right,
/// bottom-right, bottom-left) into an upright crop
///
/// Tall crops are rotated so vertical labels read left to right.
pub fn crop_quad(image: &RgbImage, quad: &[[f32; 2]; 4]) -> Option<RgbImage> {
    let crop_w = distance(quad[0], quad[1]).max(distance(quad[3], quad[2])).round();
    let crop_h = distance(quad[0], quad[3]).max(distance(quad[1], quad[2])).round();
    if crop_w < 1.0 || crop_h < 1.0 {
        return None;
    }

    let from = quad.map(|p| (p[0], p[1]));
    let to = [(0.0, 0.0), (crop_w, 0.0), (crop_w, crop_h), (0.0, crop_h)];
    let projection = Projection::from_control_points(from, to)?;

    let mut crop = RgbImage::new(crop_w as u32, crop_h as u32);
    warp_into(image, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut crop);

    if crop_h / crop_w >= 1.5 {
        Some(imageops::rotate270(&crop))
    } else {
        Some(crop)
    }
}
