use anyhow::{Context, Result};
use clap::ValueEnum;
use std::path::Path;
use tinyyolo_model::Config;

/// Built-in configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    TinyYolov2,
    TinyYolov2Separable,
    TinyFaceDetector,
}

impl Preset {
    pub fn config(self) -> Config {
        match self {
            Preset::TinyYolov2 => Config::tiny_yolov2(false),
            Preset::TinyYolov2Separable => Config::tiny_yolov2(true),
            Preset::TinyFaceDetector => Config::tiny_face_detector(),
        }
    }
}

/// A JSON config file wins over the preset.
pub fn resolve_config(path: Option<&Path>, preset: Preset) -> Result<Config> {
    match path {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(preset.config()),
    }
}
