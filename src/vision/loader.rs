//! Image loading and size normalization
//!
//! Floor plans can be photographed or scanned at very high resolutions. The
//! detector only needs enough pixels to see the labels, so oversized images
//! are downsampled before array-mode detection and the applied ratio is kept
//! for mapping boxes back.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageReader, Rgb, RgbImage};
use ndarray::{Array2, Array3};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::DetectionError;
use super::geometry::ScaleFactors;

/// Longest side (in pixels) an image is allowed to have before downsampling
pub const DEFAULT_MAX_SIDE: u32 = 2000;

/// Immutable RGB pixel buffer
///
/// Cloning shares the pixels. Resizing always produces a new buffer.
#[derive(Clone)]
pub struct ImageBuffer {
    pixels: Arc<RgbImage>,
}

impl ImageBuffer {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self {
            pixels: Arc::new(image),
        }
    }

    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self::from_rgb(image.to_rgb8())
    }

    /// Build from an H×W×C array (C = 1, 3 or 4; channels in R, G, B(, A) order)
    pub fn from_array(array: &Array3<u8>) -> Result<Self, DetectionError> {
        let (height, width, channels) = array.dim();
        let (width, height) = checked_dimensions(width, height)?;

        let pixels = match channels {
            1 => RgbImage::from_fn(width, height, |x, y| {
                let v = array[[y as usize, x as usize, 0]];
                Rgb([v, v, v])
            }),
            3 | 4 => RgbImage::from_fn(width, height, |x, y| {
                let (x, y) = (x as usize, y as usize);
                Rgb([array[[y, x, 0]], array[[y, x, 1]], array[[y, x, 2]]])
            }),
            other => {
                return Err(DetectionError::InvalidBuffer(format!(
                    "expected 1, 3 or 4 channels, got {other}"
                )))
            }
        };

        Ok(Self::from_rgb(pixels))
    }

    /// Build from an H×W grayscale array
    pub fn from_gray_array(array: &Array2<u8>) -> Result<Self, DetectionError> {
        let (height, width) = array.dim();
        let (width, height) = checked_dimensions(width, height)?;
        let gray = GrayImage::from_fn(width, height, |x, y| {
            image::Luma([array[[y as usize, x as usize]]])
        });
        Ok(Self::from_dynamic(&DynamicImage::ImageLuma8(gray)))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    /// Copy the pixels out as an H×W×3 array
    pub fn to_array(&self) -> Array3<u8> {
        let (width, height) = self.dimensions();
        Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
            self.pixels.get_pixel(x as u32, y as u32)[c]
        })
    }

    /// Whether both buffers share the same pixel storage
    pub fn ptr_eq(&self, other: &ImageBuffer) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl std::fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

impl From<RgbImage> for ImageBuffer {
    fn from(image: RgbImage) -> Self {
        Self::from_rgb(image)
    }
}

impl From<DynamicImage> for ImageBuffer {
    fn from(image: DynamicImage) -> Self {
        Self::from_dynamic(&image)
    }
}

fn checked_dimensions(width: usize, height: usize) -> Result<(u32, u32), DetectionError> {
    let too_large = || DetectionError::InvalidBuffer(format!("{width}x{height} is too large"));
    Ok((
        u32::try_from(width).map_err(|_| too_large())?,
        u32::try_from(height).map_err(|_| too_large())?,
    ))
}

/// Where a floor plan comes from
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// A file on disk; enables path-mode detection
    Path(PathBuf),
    /// Pixels already decoded by the caller
    Buffer(ImageBuffer),
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<&PathBuf> for ImageSource {
    fn from(path: &PathBuf) -> Self {
        Self::Path(path.clone())
    }
}

impl From<&str> for ImageSource {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<String> for ImageSource {
    fn from(path: String) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<ImageBuffer> for ImageSource {
    fn from(buffer: ImageBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<RgbImage> for ImageSource {
    fn from(image: RgbImage) -> Self {
        Self::Buffer(ImageBuffer::from_rgb(image))
    }
}

impl From<DynamicImage> for ImageSource {
    fn from(image: DynamicImage) -> Self {
        Self::Buffer(ImageBuffer::from_dynamic(&image))
    }
}

/// A decoded floor plan ready for detection
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub buffer: ImageBuffer,
    /// Absolute path of the source file, if it came from disk
    pub path: Option<PathBuf>,
}

impl LoadedImage {
    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }
}

/// Decode a floor plan from its source
pub fn load(source: ImageSource) -> Result<LoadedImage, DetectionError> {
    match source {
        ImageSource::Buffer(buffer) => Ok(LoadedImage { buffer, path: None }),
        ImageSource::Path(path) => {
            let image = decode_file(&path)?;
            let resolved = path.canonicalize().map_err(|source| DetectionError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(
                "Loaded floor plan {:?} ({}x{})",
                resolved,
                image.width(),
                image.height()
            );
            Ok(LoadedImage {
                buffer: ImageBuffer::from_rgb(image),
                path: Some(resolved),
            })
        }
    }
}

/// Decode an image file, sniffing the format from its content
pub fn decode_file(path: &Path) -> Result<RgbImage, DetectionError> {
    if !path.exists() {
        return Err(DetectionError::ImageNotFound(path.to_path_buf()));
    }

    let io_err = |source| DetectionError::Io {
        path: path.to_path_buf(),
        source,
    };
    let image = ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?
        .decode()
        .map_err(|source| DetectionError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(image.to_rgb8())
}

/// Downsample so the longer side is at most `max_side`
///
/// Returns the input unchanged with identity factors when it already fits.
/// Fails soft: a degenerate target size also returns the input unchanged.
pub fn normalize(buffer: &ImageBuffer, max_side: u32) -> (ImageBuffer, ScaleFactors) {
    let (width, height) = buffer.dimensions();
    let longest = width.max(height);

    if longest <= max_side {
        return (buffer.clone(), ScaleFactors::IDENTITY);
    }

    let scale = max_side as f64 / longest as f64;
    let new_width = (width as f64 * scale) as u32;
    let new_height = (height as f64 * scale) as u32;

    if new_width == 0 || new_height == 0 {
        warn!(
            "Cannot downsample {}x{} to max side {}, using original size",
            width, height, max_side
        );
        return (buffer.clone(), ScaleFactors::IDENTITY);
    }

    debug!(
        "Downsampling floor plan {}x{} -> {}x{}",
        width, height, new_width, new_height
    );
    let resized = imageops::resize(buffer.as_rgb(), new_width, new_height, FilterType::Triangle);
    let factors = ScaleFactors::between((width, height), (new_width, new_height));

    (ImageBuffer::from_rgb(resized), factors)
}
