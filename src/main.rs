//! floor-plan-ocr - text detection on floor-plan images from the command line

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use floor_plan_ocr::config;
use floor_plan_ocr::vision::{DetectionError, FloorPlanOcr, ModelManager};

/// Detect text on floor-plan images
#[derive(Parser, Debug)]
#[command(name = "floor-plan-ocr")]
#[command(about = "Detect text regions on floor-plan images")]
struct Args {
    /// Floor-plan image to analyse
    image: Option<PathBuf>,

    /// Only report whether the image carries any text
    #[arg(long)]
    has_text: bool,

    /// Print regions as JSON
    #[arg(long)]
    json: bool,

    /// Longest side before downsampling
    #[arg(long)]
    max_side: Option<u32>,

    /// Configuration file (default: per-user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding det.onnx, rec.onnx and dict.txt
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Show model file availability and exit
    #[arg(long)]
    model_status: bool,

    /// Download missing model files and exit
    #[arg(long)]
    download_models: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let (mut config, origin) = config::resolve_config(args.config.as_deref());
    if let Some(max_side) = args.max_side {
        config.pipeline.max_side = max_side;
    }
    if let Some(dir) = &args.models_dir {
        config.engine.models_dir = Some(dir.clone());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    origin.log();

    if args.model_status || args.download_models {
        let manager = ModelManager::from_settings(&config.engine)?;
        if args.download_models {
            manager.ensure_all_models()?;
            info!("All models available in {:?}", manager.models_dir());
        }
        print_model_status(&manager);
        return Ok(if manager.are_models_ready() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let Some(image) = args.image else {
        error!("No image given (see --help)");
        return Ok(ExitCode::FAILURE);
    };
    if !image.exists() {
        error!("Image not found: {}", image.display());
        return Ok(ExitCode::FAILURE);
    }

    let ocr = FloorPlanOcr::from_config(&config);

    if args.has_text {
        return Ok(match ocr.try_has_text(image.as_path()) {
            Ok(found) => {
                println!("{}", found);
                ExitCode::SUCCESS
            }
            Err(e) => report(e, || println!("false")),
        });
    }

    let regions = match ocr.try_text_regions(image.as_path()) {
        Ok(regions) => regions,
        Err(e) => {
            return Ok(report(e, || {
                if args.json {
                    println!("[]");
                } else {
                    println!("No text found");
                }
            }))
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&regions)?);
        return Ok(ExitCode::SUCCESS);
    }

    for (i, region) in regions.iter().enumerate() {
        println!("{:>3}. {}", i + 1, region.text);
        let points: Vec<String> = region
            .bbox
            .points()
            .iter()
            .map(|p| format!("({:.0}, {:.0})", p.x, p.y))
            .collect();
        println!("     bbox: [{}]", points.join(", "));
    }
    println!("Total: {} text regions", regions.len());

    Ok(ExitCode::SUCCESS)
}

/// Engine failures are fatal here; anything else reads as "no text"
fn report(err: DetectionError, no_text: impl FnOnce()) -> ExitCode {
    match err {
        DetectionError::EngineUnavailable(_) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
        other => {
            info!("{}", other);
            no_text();
            ExitCode::SUCCESS
        }
    }
}

fn print_model_status(manager: &ModelManager) {
    println!("Models directory: {}", manager.models_dir().display());
    for status in manager.get_model_status() {
        let size = status
            .size_bytes
            .map(|bytes| format!("{:.2} MB", bytes as f64 / 1_000_000.0))
            .unwrap_or_else(|| "missing".to_string());
        println!(
            "  [{}] {:<22} {:<10} {}",
            if status.available { "ok" } else { "--" },
            status.model_type.display_name(),
            status.model_type.filename(),
            size
        );
    }
}
