//! # tinyyolo-model
//!
//! Everything between a validated configuration and the raw output grid of a
//! TinyYOLO-style detector:
//!
//! - [`Config`] – class list, anchors, normalization and topology selection
//! - [`weights::extract_params`] – flat weight buffer → [`ParameterSet`]
//! - [`topology::run`] – plain conv+bn stack or depthwise-separable stack
//! - [`ops`] – the NHWC kernels both stacks are built from
//!
//! Tensors are `ndarray::Array4<f32>` in `[batch, height, width, channels]`
//! order.

pub mod config;
pub mod error;
pub mod ops;
pub mod params;
pub mod topology;
pub mod weights;

pub use config::{validate_configuration, Anchor, Config, Topology, DEFAULT_FILTER_SIZES};
pub use error::{ModelError, Result};
pub use params::{LayerParams, ParameterSet};
pub use weights::{expected_param_count, extract_params, read_weights_file};
