//! Run TinyYOLO on a single image.
//!
//! ```text
//! tinyyolo --preset tiny-face-detector --weights face.weights photo.jpg --output boxes.png
//! ```

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::PathBuf;
use std::time::Instant;
use tinyyolo_detect::{DetectOptions, Detection, TinyYolo, DEFAULT_INPUT_SIZE, DEFAULT_SCORE_THRESHOLD};

use cli::{resolve_config, Preset};

#[derive(Parser)]
#[command(name = "tinyyolo", about = "Detect objects with a TinyYOLO network")]
struct CliArgs {
    /// Image to run detection on
    image: PathBuf,

    /// Flat little-endian f32 weight file
    #[arg(long)]
    weights: PathBuf,

    /// JSON configuration (overrides --preset)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "tiny-face-detector")]
    preset: Preset,

    /// Network input size, a multiple of 32
    #[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
    input_size: u32,

    /// Objectness threshold; 0 keeps every box
    #[arg(long, default_value_t = DEFAULT_SCORE_THRESHOLD)]
    score_threshold: f32,

    /// Overrides the configured IoU threshold
    #[arg(long)]
    iou_threshold: Option<f32>,

    /// Write a copy of the image with the boxes drawn in
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print detections as JSON
    #[arg(long)]
    json: bool,
}

fn draw_detections(image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
        let b = &detection.bbox;
        let width = b.width().max(1.0) as u32;
        let height = b.height().max(1.0) as u32;
        let rect = Rect::at(b.left as i32, b.top as i32).of_size(width, height);
        draw_hollow_rect_mut(image, rect, Rgb([255, 0, 0]));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = CliArgs::parse();

    let config = resolve_config(args.config.as_deref(), args.preset)?;
    let mut detector = TinyYolo::new(config)?;
    detector
        .load_weights_file(&args.weights)
        .await
        .with_context(|| format!("failed to load weights {}", args.weights.display()))?;

    let mut options = DetectOptions::default()
        .with_input_size(args.input_size)
        .with_score_threshold(Some(args.score_threshold));
    if let Some(iou) = args.iou_threshold {
        options = options.with_iou_threshold(iou);
    }

    let image = image::open(&args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?;

    let started = Instant::now();
    let detections = detector.detect_image(&image, &options)?;
    log::info!(
        "{} detections in {:.1} ms",
        detections.len(),
        started.elapsed().as_secs_f64() * 1000.0
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&detections)?);
    } else {
        for d in &detections {
            let b = &d.bbox;
            println!(
                "{:<12} score {:.3} class {:.3}  [{:.0}, {:.0}, {:.0}, {:.0}]",
                d.class_name, d.score, d.class_score, b.left, b.top, b.right, b.bottom
            );
        }
    }

    if let Some(output) = &args.output {
        let mut annotated = image.to_rgb8();
        draw_detections(&mut annotated, &detections);
        annotated
            .save(output)
            .with_context(|| format!("failed to write {}", output.display()))?;
        log::info!("annotated image written to {}", output.display());
    }

    Ok(())
}
