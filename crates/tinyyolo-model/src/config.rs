//! Detector configuration
//!
//! A [`Config`] fixes everything about the network that is not a learned
//! weight: the class list, the anchor priors, input normalization and which of
//! the two feature extractors is used. It is validated once and treated as
//! immutable afterwards.

use crate::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Channel widths of the full nine-layer stack, input channels first.
pub const DEFAULT_FILTER_SIZES: [usize; 9] = [3, 16, 32, 64, 128, 256, 512, 1024, 1024];

/// Number of fixed channels in a box encoding: tx, ty, tw, th, objectness.
pub const NUM_BOX_CHANNELS: usize = 5;

const TINY_YOLOV2_ANCHORS: [(f32, f32); 5] = [
    (0.738768, 0.874946),
    (2.42204, 2.65704),
    (4.30971, 7.04493),
    (10.246, 4.59428),
    (12.6868, 11.8741),
];

const SEPARABLE_ANCHORS: [(f32, f32); 5] = [
    (1.603231, 2.094468),
    (6.041143, 7.080126),
    (2.882459, 3.518061),
    (4.266906, 5.178857),
    (9.041765, 10.66308),
];

const SEPARABLE_MEAN_RGB: [f32; 3] = [117.001, 114.697, 97.404];

/// Anchor prior in grid-cell units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub x: f32,
    pub y: f32,
}

impl Anchor {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Feature extractor variant, fixed by the configuration at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Convolution + batch norm blocks, nine layers.
    PlainStack,
    /// Depthwise-separable blocks, seven to nine layers.
    MobileStack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub classes: Vec<String>,
    pub anchors: Vec<Anchor>,
    #[serde(default)]
    pub mean_rgb: Option<[f32; 3]>,
    #[serde(default)]
    pub is_first_layer_conv2d: bool,
    #[serde(default)]
    pub with_separable_convs: bool,
    #[serde(default)]
    pub with_class_scores: bool,
    pub iou_threshold: f32,
    #[serde(default)]
    pub filter_sizes: Option<Vec<usize>>,
}

impl Config {
    /// Single-class face model with the plain or separable stack.
    pub fn tiny_yolov2(with_separable_convs: bool) -> Self {
        let (anchors, mean_rgb) = if with_separable_convs {
            (&SEPARABLE_ANCHORS, Some(SEPARABLE_MEAN_RGB))
        } else {
            (&TINY_YOLOV2_ANCHORS, None)
        };
        Self {
            classes: vec!["face".to_string()],
            anchors: anchors.iter().map(|&(x, y)| Anchor::new(x, y)).collect(),
            mean_rgb,
            is_first_layer_conv2d: false,
            with_separable_convs,
            with_class_scores: false,
            iou_threshold: 0.4,
            filter_sizes: None,
        }
    }

    /// Compact separable face detector with seven filter sizes.
    pub fn tiny_face_detector() -> Self {
        Self {
            classes: vec!["face".to_string()],
            anchors: SEPARABLE_ANCHORS
                .iter()
                .map(|&(x, y)| Anchor::new(x, y))
                .collect(),
            mean_rgb: Some(SEPARABLE_MEAN_RGB),
            is_first_layer_conv2d: true,
            with_separable_convs: true,
            with_class_scores: false,
            iou_threshold: 0.4,
            filter_sizes: Some(vec![3, 16, 32, 64, 128, 256, 512]),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Filter sizes with the default applied.
    pub fn filter_sizes(&self) -> &[usize] {
        self.filter_sizes
            .as_deref()
            .unwrap_or(&DEFAULT_FILTER_SIZES[..])
    }

    pub fn num_anchors(&self) -> usize {
        self.anchors.len()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn box_encoding_size(&self) -> usize {
        NUM_BOX_CHANNELS
            + if self.with_class_scores {
                self.num_classes()
            } else {
                0
            }
    }

    /// Channel count of the raw output grid.
    pub fn output_channels(&self) -> usize {
        self.num_anchors() * self.box_encoding_size()
    }

    pub fn topology(&self) -> Topology {
        if self.with_separable_convs {
            Topology::MobileStack
        } else {
            Topology::PlainStack
        }
    }

    /// Index of the final (output) convolution.
    pub fn output_layer(&self) -> usize {
        self.filter_sizes().len() - 1
    }

    pub fn validate(&self) -> Result<()> {
        validate_configuration(self)
    }
}

/// Check every field of `config`, naming the first one that is invalid.
pub fn validate_configuration(config: &Config) -> Result<()> {
    if config.classes.is_empty() {
        return Err(ModelError::config("classes", "at least one class is required"));
    }
    if config.anchors.is_empty() {
        return Err(ModelError::config("anchors", "at least one anchor is required"));
    }
    if let Some(i) = config
        .anchors
        .iter()
        .position(|a| !(a.x.is_finite() && a.y.is_finite() && a.x > 0.0 && a.y > 0.0))
    {
        return Err(ModelError::config(
            "anchors",
            format!("anchor {i} must have finite, positive width and height"),
        ));
    }
    if let Some(mean) = config.mean_rgb {
        if mean.iter().any(|m| !m.is_finite()) {
            return Err(ModelError::config("meanRgb", "components must be finite"));
        }
    }
    if !(config.iou_threshold > 0.0 && config.iou_threshold <= 1.0) {
        return Err(ModelError::config(
            "iouThreshold",
            format!("must be in (0, 1], got {}", config.iou_threshold),
        ));
    }

    let sizes = config.filter_sizes();
    if !(7..=9).contains(&sizes.len()) {
        return Err(ModelError::config(
            "filterSizes",
            format!("expected 7, 8 or 9 entries, got {}", sizes.len()),
        ));
    }
    if config.topology() == Topology::PlainStack && sizes.len() != 9 {
        return Err(ModelError::config(
            "filterSizes",
            format!("the plain stack needs 9 entries, got {}", sizes.len()),
        ));
    }
    if sizes.contains(&0) {
        return Err(ModelError::config("filterSizes", "entries must be positive"));
    }
    if sizes[0] != 3 {
        return Err(ModelError::config(
            "filterSizes",
            format!("first entry is the RGB input and must be 3, got {}", sizes[0]),
        ));
    }
    Ok(())
}
