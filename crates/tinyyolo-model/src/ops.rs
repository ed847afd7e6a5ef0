//! NHWC tensor kernels used by the feature extractors.
//!
//! Every function takes its input by reference and returns a fresh owned
//! array, so intermediates are dropped as soon as the caller rebinds.

use crate::{
    params::{ConvParams, ConvWithBatchNorm, SeparableConvParams},
    ModelError, Result,
};
use ndarray::{s, Array1, Array2, Array4, Zip};

const LEAKY_ALPHA: f32 = 0.1;

fn check_channels(context: &'static str, x: &Array4<f32>, expected: usize) -> Result<()> {
    let actual = x.dim().3;
    if actual != expected {
        return Err(ModelError::ShapeMismatch {
            context,
            expected: format!("{expected} input channels"),
            actual: x.shape().to_vec(),
        });
    }
    Ok(())
}

fn valid_output(context: &'static str, x: &Array4<f32>, kh: usize, kw: usize) -> Result<(usize, usize)> {
    let (_, h, w, _) = x.dim();
    if h < kh || w < kw {
        return Err(ModelError::ShapeMismatch {
            context,
            expected: format!("spatial size of at least {kh}x{kw}"),
            actual: x.shape().to_vec(),
        });
    }
    Ok((h - kh + 1, w - kw + 1))
}

/// Zero-pad height and width by `pad` on every side.
pub fn pad_spatial(x: &Array4<f32>, pad: usize) -> Array4<f32> {
    let (n, h, w, c) = x.dim();
    let mut out = Array4::<f32>::zeros((n, h + 2 * pad, w + 2 * pad, c));
    out.slice_mut(s![.., pad..pad + h, pad..pad + w, ..]).assign(x);
    out
}

/// Stride-1 "valid" convolution without bias.
pub fn conv2d_valid(x: &Array4<f32>, filters: &Array4<f32>) -> Result<Array4<f32>> {
    let (kh, kw, cin, cout) = filters.dim();
    check_channels("conv2d", x, cin)?;
    let (oh, ow) = valid_output("conv2d", x, kh, kw)?;
    let n = x.dim().0;

    // one matmul per kernel tap: [n*oh*ow, cin] x [cin, cout]
    let mut acc = Array2::<f32>::zeros((n * oh * ow, cout));
    for dy in 0..kh {
        for dx in 0..kw {
            let window = x.slice(s![.., dy..dy + oh, dx..dx + ow, ..]);
            let rows = window.to_shape((n * oh * ow, cin))?;
            acc += &rows.dot(&filters.slice(s![dy, dx, .., ..]));
        }
    }
    Ok(acc.into_shape_with_order((n, oh, ow, cout))?)
}

/// Stride-1 "valid" depthwise convolution, channel multiplier 1.
pub fn depthwise_conv2d_valid(x: &Array4<f32>, filters: &Array4<f32>) -> Result<Array4<f32>> {
    let (kh, kw, cin, _) = filters.dim();
    check_channels("depthwise_conv2d", x, cin)?;
    let (oh, ow) = valid_output("depthwise_conv2d", x, kh, kw)?;
    let n = x.dim().0;

    let mut out = Array4::<f32>::zeros((n, oh, ow, cin));
    for dy in 0..kh {
        for dx in 0..kw {
            let window = x.slice(s![.., dy..dy + oh, dx..dx + ow, ..]);
            out += &(&window * &filters.slice(s![dy, dx, .., 0]));
        }
    }
    Ok(out)
}

/// 1×1 convolution with a `[1, 1, cin, cout]` kernel.
pub fn pointwise_conv2d(x: &Array4<f32>, filters: &Array4<f32>) -> Result<Array4<f32>> {
    conv2d_valid(x, filters)
}

/// 2-D max pooling with TensorFlow "same" padding.
///
/// Output size is `ceil(in / stride)`; the padding deficit is placed after the
/// data and never wins the max.
pub fn max_pool_same(x: &Array4<f32>, kernel: usize, stride: usize) -> Array4<f32> {
    let (n, h, w, c) = x.dim();
    let (oh, ow) = (h.div_ceil(stride), w.div_ceil(stride));
    let pad_top = ((oh - 1) * stride + kernel).saturating_sub(h) / 2;
    let pad_left = ((ow - 1) * stride + kernel).saturating_sub(w) / 2;

    let mut out = Array4::<f32>::from_elem((n, oh, ow, c), f32::NEG_INFINITY);
    for b in 0..n {
        for y in 0..oh {
            for xx in 0..ow {
                let mut cell = out.slice_mut(s![b, y, xx, ..]);
                for dy in 0..kernel {
                    for dx in 0..kernel {
                        let iy = (y * stride + dy).checked_sub(pad_top).filter(|&v| v < h);
                        let ix = (xx * stride + dx).checked_sub(pad_left).filter(|&v| v < w);
                        let (Some(iy), Some(ix)) = (iy, ix) else {
                            continue;
                        };
                        Zip::from(&mut cell)
                            .and(x.slice(s![b, iy, ix, ..]))
                            .for_each(|o, &v| {
                                if v > *o {
                                    *o = v;
                                }
                            });
                    }
                }
            }
        }
    }
    out
}

pub fn leaky(mut x: Array4<f32>) -> Array4<f32> {
    x.mapv_inplace(|v| if v < 0.0 { LEAKY_ALPHA * v } else { v });
    x
}

fn add_bias(mut x: Array4<f32>, bias: &Array1<f32>) -> Result<Array4<f32>> {
    check_channels("bias", &x, bias.len())?;
    x += bias;
    Ok(x)
}

/// pad 1 → 3×3 conv → batch norm → bias → leaky.
pub fn conv_with_batch_norm(x: &Array4<f32>, p: &ConvWithBatchNorm) -> Result<Array4<f32>> {
    let mut out = conv2d_valid(&pad_spatial(x, 1), &p.conv.filters)?;
    out -= &p.bn.sub;
    out *= &p.bn.truediv;
    Ok(leaky(add_bias(out, &p.conv.bias)?))
}

/// pad 1 → depthwise 3×3 → pointwise 1×1 → bias → leaky.
pub fn depthwise_separable_conv(x: &Array4<f32>, p: &SeparableConvParams) -> Result<Array4<f32>> {
    let depthwise = depthwise_conv2d_valid(&pad_spatial(x, 1), &p.depthwise)?;
    let out = pointwise_conv2d(&depthwise, &p.pointwise)?;
    Ok(leaky(add_bias(out, &p.bias)?))
}

/// Plain "valid" convolution plus bias, optionally followed by leaky.
pub fn conv_layer(x: &Array4<f32>, p: &ConvParams, activate: bool) -> Result<Array4<f32>> {
    let out = add_bias(conv2d_valid(x, &p.filters)?, &p.bias)?;
    Ok(if activate { leaky(out) } else { out })
}
