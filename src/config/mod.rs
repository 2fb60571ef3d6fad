//! Pipeline Configuration
//!
//! Settings stored in TOML format. Every field has a default so a partial
//! (or missing) file still yields a working configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::vision::loader::DEFAULT_MAX_SIDE;

/// Environment variable that forbids model downloads when set
pub const OFFLINE_ENV: &str = "FLOOR_PLAN_OCR_OFFLINE";

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Detection pipeline settings
    pub pipeline: PipelineSettings,
    /// ONNX engine and model settings
    pub engine: EngineSettings,
    /// Logging settings (binary only)
    pub logging: LoggingSettings,
}

/// Pipeline behaviour independent of the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Longest side before array-mode images are downsampled
    pub max_side: u32,
    /// Admit a single detection call at a time
    pub serialize_inference: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_side: DEFAULT_MAX_SIDE,
            serialize_inference: false,
        }
    }
}

/// ONNX engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directory holding det.onnx, rec.onnx and dict.txt (default: data dir)
    pub models_dir: Option<PathBuf>,
    /// Never download missing models
    pub offline: bool,
    /// Try GPU execution providers before falling back to CPU
    pub use_gpu: bool,
    /// Intra-op threads per ONNX session
    pub intra_threads: usize,
    /// Longest side fed to the detection model
    pub det_limit_side: u32,
    /// Pixel probability threshold for the text map
    pub det_threshold: f32,
    /// Minimum mean probability for a detected box
    pub box_threshold: f32,
    /// Box expansion ratio
    pub unclip_ratio: f32,
    /// Maximum contours examined per image
    pub max_candidates: usize,
    /// Minimum recognition confidence for a text line
    pub text_score: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            models_dir: None,
            offline: false,
            use_gpu: false,
            intra_threads: 4,
            det_limit_side: 960,
            det_threshold: 0.3,
            box_threshold: 0.5,
            unclip_ratio: 1.6,
            max_candidates: 1000,
            text_score: 0.5,
        }
    }
}

impl EngineSettings {
    /// Offline if configured so or if the environment says so
    pub fn is_offline(&self) -> bool {
        self.offline || std::env::var_os(OFFLINE_ENV).is_some()
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<OcrConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: OcrConfig =
        toml::from_str(&content).with_context(|| format!("Invalid config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &OcrConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Where a resolved configuration came from
#[derive(Debug)]
pub enum ConfigOrigin {
    /// No file found, defaults used
    Default,
    /// Loaded from this file
    File(PathBuf),
    /// File or directory unusable, defaults used
    Invalid(anyhow::Error),
}

impl ConfigOrigin {
    /// Log how the configuration was resolved
    pub fn log(&self) {
        match self {
            ConfigOrigin::Default => info!("Using default configuration"),
            ConfigOrigin::File(path) => info!("Loaded configuration from {:?}", path),
            ConfigOrigin::Invalid(e) => warn!("{:#}, using default configuration", e),
        }
    }
}

/// Resolve configuration without logging, falling back to defaults when the
/// file is missing or invalid
pub fn resolve_config(path: Option<&Path>) -> (OcrConfig, ConfigOrigin) {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match crate::storage::get_config_dir() {
            Ok(dir) => dir.join("config.toml"),
            Err(e) => {
                let e = e.context("No configuration directory");
                return (OcrConfig::default(), ConfigOrigin::Invalid(e));
            }
        },
    };

    if !path.exists() {
        return (OcrConfig::default(), ConfigOrigin::Default);
    }

    match load_config(&path) {
        Ok(config) => (config, ConfigOrigin::File(path)),
        Err(e) => (OcrConfig::default(), ConfigOrigin::Invalid(e)),
    }
}

/// Load configuration, falling back to defaults when the file is missing or invalid
pub fn load_or_default(path: Option<&Path>) -> OcrConfig {
    let (config, origin) = resolve_config(path);
    origin.log();
    config
}
