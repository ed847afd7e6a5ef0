//! Write a random weight file matching a configuration.
//!
//! Useful for exercising the pipeline end to end without trained weights.

mod cli;

use anyhow::Result;
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use tinyyolo_model::expected_param_count;

use cli::{resolve_config, Preset};

#[derive(Parser)]
#[command(name = "synth_weights", about = "Generate random TinyYOLO weights")]
struct CliArgs {
    /// Destination file
    output: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "tiny-face-detector")]
    preset: Preset,

    /// Weights are drawn uniformly from [-scale, scale]
    #[arg(long, default_value_t = 0.05)]
    scale: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = CliArgs::parse();
    anyhow::ensure!(args.scale > 0.0, "--scale must be positive");

    let config = resolve_config(args.config.as_deref(), args.preset)?;
    config.validate()?;
    let count = expected_param_count(&config);

    let mut rng = rand::thread_rng();
    let mut bytes = Vec::with_capacity(count * 4);
    for _ in 0..count {
        let w: f32 = rng.gen_range(-args.scale..=args.scale);
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    tokio::fs::write(&args.output, &bytes).await?;

    log::info!("{count} weights ({:?}) written to {}", config.topology(), args.output.display());
    Ok(())
}
