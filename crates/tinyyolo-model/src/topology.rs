//! Feature extractors
//!
//! Both stacks map a normalized `[1, H, W, 3]` batch to the raw output grid
//! `[1, g, g, numAnchors * boxEncodingSize]`. Which one runs is decided by
//! [`Topology`], i.e. by the configuration, never per call.

use crate::{
    config::{Config, Topology},
    ops::{conv_layer, conv_with_batch_norm, depthwise_separable_conv, leaky, max_pool_same},
    params::ParameterSet,
    ModelError, Result,
};
use ndarray::Array4;

/// Run the stack selected by `config` and check the output channel count.
pub fn run(input: &Array4<f32>, params: &ParameterSet, config: &Config) -> Result<Array4<f32>> {
    if input.dim().3 != 3 {
        return Err(ModelError::ShapeMismatch {
            context: "network input",
            expected: "[1, H, W, 3]".to_string(),
            actual: input.shape().to_vec(),
        });
    }
    let out = match config.topology() {
        Topology::PlainStack => run_plain_stack(input, params)?,
        Topology::MobileStack => run_mobile_stack(input, params, config)?,
    };
    if out.dim().3 != config.output_channels() {
        return Err(ModelError::ShapeMismatch {
            context: "raw output grid",
            expected: format!("{} channels", config.output_channels()),
            actual: out.shape().to_vec(),
        });
    }
    log::trace!("raw output grid {:?}", out.shape());
    Ok(out)
}

/// Nine layers: five conv+bn blocks pooled with stride 2, one pooled with
/// stride 1, two unpooled, then the 1×1 output conv.
pub fn run_plain_stack(input: &Array4<f32>, params: &ParameterSet) -> Result<Array4<f32>> {
    let mut out = conv_with_batch_norm(input, params.conv_with_batch_norm(0)?)?;
    out = max_pool_same(&out, 2, 2);
    for layer in 1..=4 {
        out = conv_with_batch_norm(&out, params.conv_with_batch_norm(layer)?)?;
        out = max_pool_same(&out, 2, 2);
    }
    out = conv_with_batch_norm(&out, params.conv_with_batch_norm(5)?)?;
    out = max_pool_same(&out, 2, 1);
    out = conv_with_batch_norm(&out, params.conv_with_batch_norm(6)?)?;
    out = conv_with_batch_norm(&out, params.conv_with_batch_norm(7)?)?;
    log::trace!("plain stack features {:?}", out.shape());
    conv_layer(&out, params.conv(8)?, false)
}

/// Depthwise-separable stack. Layers 6 and 7 exist only when the config
/// has 8 or 9 filter sizes; the last index is always the output conv.
pub fn run_mobile_stack(input: &Array4<f32>, params: &ParameterSet, config: &Config) -> Result<Array4<f32>> {
    let output_layer = config.output_layer();

    let mut out = mobile_first_layer(input, params, config)?;
    out = max_pool_same(&out, 2, 2);
    for layer in 1..=4 {
        out = depthwise_separable_conv(&out, params.separable(layer)?)?;
        out = max_pool_same(&out, 2, 2);
    }
    out = depthwise_separable_conv(&out, params.separable(5)?)?;
    out = max_pool_same(&out, 2, 1);
    for layer in 6..output_layer {
        out = depthwise_separable_conv(&out, params.separable(layer)?)?;
    }
    log::trace!("mobile stack features {:?}", out.shape());
    conv_layer(&out, params.conv(output_layer)?, false)
}

/// Layer 0 of the mobile stack. The plain conv variant is unpadded, so it
/// trims one pixel from every border.
fn mobile_first_layer(input: &Array4<f32>, params: &ParameterSet, config: &Config) -> Result<Array4<f32>> {
    if config.is_first_layer_conv2d {
        Ok(leaky(conv_layer(input, params.conv(0)?, false)?))
    } else {
        depthwise_separable_conv(input, params.separable(0)?)
    }
}
