//! Detection orchestrator
//!
//! [`TinyYolo`] owns the configuration and, once loaded, the parameter set.
//! A `detect` call runs preprocess → forward → decode → suppress → assemble
//! with nothing shared between calls except those two read-only values.

use crate::{
    bbox::BoundingBox,
    decode::GridDecoder,
    nms::{GreedyNms, Suppressor},
    DetectError, Result,
};
use image::DynamicImage;
use ndarray::{Array4, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tinyyolo_model::{
    topology, validate_configuration, weights, Config, ModelError, ParameterSet,
};
use tinyyolo_preprocess::{normalize, BatchTensor, NetInput, Preprocessor, MAX_INPUT_SIZE};

pub const DEFAULT_INPUT_SIZE: u32 = 416;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

/// Network inputs are pooled down by 32.
const INPUT_SIZE_MULTIPLE: u32 = 32;

/// Divisor applied to pixel values after mean subtraction.
const PIXEL_SCALE: f32 = 256.0;

/// Per-call options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectOptions {
    pub input_size: u32,
    /// `None` or `0.0` keeps every box.
    pub score_threshold: Option<f32>,
    /// Overrides the configured IoU threshold.
    pub iou_threshold: Option<f32>,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            score_threshold: Some(DEFAULT_SCORE_THRESHOLD),
            iou_threshold: None,
        }
    }
}

impl DetectOptions {
    pub fn with_input_size(mut self, input_size: u32) -> Self {
        self.input_size = input_size;
        self
    }

    pub fn with_score_threshold(mut self, threshold: Option<f32>) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = Some(threshold);
        self
    }

    pub fn validate(&self) -> std::result::Result<(), ModelError> {
        if self.input_size == 0 || self.input_size % INPUT_SIZE_MULTIPLE != 0 {
            return Err(ModelError::config(
                "inputSize",
                format!("must be a positive multiple of {INPUT_SIZE_MULTIPLE}, got {}", self.input_size),
            ));
        }
        if self.input_size > MAX_INPUT_SIZE {
            return Err(ModelError::config(
                "inputSize",
                format!("must be at most {MAX_INPUT_SIZE}, got {}", self.input_size),
            ));
        }
        if let Some(t) = self.score_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(ModelError::config(
                    "scoreThreshold",
                    format!("must be in [0, 1], got {t}"),
                ));
            }
        }
        if let Some(t) = self.iou_threshold {
            if !(t > 0.0 && t <= 1.0) {
                return Err(ModelError::config(
                    "iouThreshold",
                    format!("must be in (0, 1], got {t}"),
                ));
            }
        }
        Ok(())
    }
}

/// One detected object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Objectness.
    pub score: f32,
    /// Objectness times class probability.
    pub class_score: f32,
    pub class_name: String,
    /// Box relative to the unpadded input, roughly in `[0, 1]`.
    pub relative_box: BoundingBox,
    /// `relative_box` in pixels of the original image.
    pub bbox: BoundingBox,
    pub image_width: u32,
    pub image_height: u32,
}

impl Detection {
    pub fn new(
        score: f32,
        class_score: f32,
        class_name: String,
        relative_box: BoundingBox,
        image_width: u32,
        image_height: u32,
    ) -> Self {
        Self {
            score,
            class_score,
            class_name,
            relative_box,
            bbox: relative_box.rescale(image_width as f32, image_height as f32),
            image_width,
            image_height,
        }
    }

    /// Same detection mapped onto an image of another size.
    pub fn for_image_size(&self, width: u32, height: u32) -> Self {
        Self::new(
            self.score,
            self.class_score,
            self.class_name.clone(),
            self.relative_box,
            width,
            height,
        )
    }
}

/// Trait for object detectors.
pub trait Detector {
    fn detect(&self, input: &NetInput, options: &DetectOptions) -> Result<Vec<Detection>>;
}

/// TinyYOLO detector over either feature extractor.
pub struct TinyYolo<S: Suppressor = GreedyNms> {
    config: Config,
    params: Option<ParameterSet>,
    preprocessor: Preprocessor,
    suppressor: S,
}

impl TinyYolo<GreedyNms> {
    /// Validate `config` and build an unloaded detector.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_suppressor(config, GreedyNms::default())
    }
}

impl<S: Suppressor> TinyYolo<S> {
    pub fn with_suppressor(config: Config, suppressor: S) -> Result<Self> {
        validate_configuration(&config)?;
        Ok(Self {
            config,
            params: None,
            preprocessor: Preprocessor::new(),
            suppressor,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn suppressor(&self) -> &S {
        &self.suppressor
    }

    pub fn is_loaded(&self) -> bool {
        self.params.is_some()
    }

    pub fn params(&self) -> Option<&ParameterSet> {
        self.params.as_ref()
    }

    /// Extract parameters from a flat weight buffer, replacing any loaded ones.
    pub fn load_parameters(&mut self, raw: &[f32]) -> Result<()> {
        let params = weights::extract_params(
            raw,
            &self.config,
            self.config.box_encoding_size(),
            self.config.filter_sizes(),
        )?;
        log::info!(
            "loaded {} layers ({} weights, {:?})",
            params.len(),
            raw.len(),
            self.config.topology()
        );
        self.params = Some(params);
        Ok(())
    }

    /// Read a little-endian `f32` weight file and load it.
    pub async fn load_weights_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let raw = weights::read_weights_file(path).await?;
        self.load_parameters(&raw)
    }

    fn loaded_params(&self) -> Result<&ParameterSet> {
        self.params.as_ref().ok_or(DetectError::NotLoaded)
    }

    fn run_network(&self, params: &ParameterSet, batch: BatchTensor) -> Result<Array4<f32>> {
        let mut tensor = batch.tensor;
        if let Some(mean) = self.config.mean_rgb {
            normalize(&mut tensor, mean);
        }
        tensor /= PIXEL_SCALE;
        Ok(topology::run(&tensor, params, &self.config)?)
    }

    /// Raw output grid `[1, g, g, numAnchors * boxEncodingSize]` for `input`
    /// resized to `input_size`.
    pub fn forward(&self, input: &NetInput, input_size: u32) -> Result<Array4<f32>> {
        let params = self.loaded_params()?;
        let batch = self.preprocessor.to_batch_tensor(input, input_size)?;
        self.run_network(params, batch)
    }

    pub fn detect(&self, input: &NetInput, options: &DetectOptions) -> Result<Vec<Detection>> {
        let params = self.loaded_params()?;
        options.validate()?;
        let input_size = options.input_size;
        let iou_threshold = options.iou_threshold.unwrap_or(self.config.iou_threshold);

        let batch = self.preprocessor.to_batch_tensor(input, input_size)?;
        let (image_width, image_height) = (batch.input_width, batch.input_height);
        let reshaped = (batch.reshaped_width, batch.reshaped_height);
        let raw = self.run_network(params, batch)?;

        let candidates = GridDecoder::new(&self.config).decode(
            raw.index_axis(Axis(0), 0),
            reshaped,
            options.score_threshold,
        )?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let size = input_size as f32;
        let boxes: Vec<BoundingBox> = candidates.iter().map(|c| c.bbox.rescale(size, size)).collect();
        let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
        let labels: Vec<usize> = candidates.iter().map(|c| c.label).collect();
        let keep = self
            .suppressor
            .suppress(&boxes, &scores, &labels, iou_threshold, true);
        log::debug!("{} of {} candidates survived suppression", keep.len(), candidates.len());

        keep.into_iter()
            .map(|i| {
                let c = &candidates[i];
                let class_name = self.config.classes.get(c.label).cloned().ok_or_else(|| {
                    DetectError::ShapeMismatch {
                        expected: format!("label < {}", self.config.num_classes()),
                        actual: vec![c.label],
                    }
                })?;
                Ok(Detection::new(c.score, c.class_score, class_name, c.bbox, image_width, image_height))
            })
            .collect()
    }

    pub fn detect_image(&self, image: &DynamicImage, options: &DetectOptions) -> Result<Vec<Detection>> {
        self.detect(&NetInput::from_dynamic(image)?, options)
    }

    /// Load an encoded image from disk and detect on it.
    pub async fn detect_file(&self, path: impl AsRef<Path>, options: &DetectOptions) -> Result<Vec<Detection>> {
        self.loaded_params()?;
        let input = NetInput::from_path(path).await?;
        self.detect(&input, options)
    }
}

impl<S: Suppressor> Detector for TinyYolo<S> {
    fn detect(&self, input: &NetInput, options: &DetectOptions) -> Result<Vec<Detection>> {
        TinyYolo::detect(self, input, options)
    }
}
