//! Weight extraction
//!
//! Weights are stored as one flat run of little-endian `f32` values. Layers
//! are laid out in index order; within a layer the blocks are:
//!
//! - conv + batch norm: `filters [3,3,cin,cout]`, `bias [cout]`, `sub [cout]`, `truediv [cout]`
//! - plain conv:        `filters [k,k,cin,cout]`, `bias [cout]`
//! - separable conv:    `depthwise [3,3,cin,1]`, `pointwise [1,1,cin,cout]`, `bias [cout]`
//!
//! The output layer is always a 1×1 plain conv producing
//! `numAnchors * boxEncodingSize` channels.

use crate::{
    config::{Config, Topology},
    params::{BatchNormParams, ConvParams, ConvWithBatchNorm, LayerParams, ParameterSet, SeparableConvParams},
    ModelError, Result,
};
use ndarray::{Array1, Array4};
use std::path::Path;

/// Shape of every layer a configuration needs, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSpec {
    ConvWithBatchNorm { cin: usize, cout: usize },
    Conv { kernel: usize, cin: usize, cout: usize },
    Separable { cin: usize, cout: usize },
}

impl LayerSpec {
    pub fn param_count(&self) -> usize {
        match *self {
            LayerSpec::ConvWithBatchNorm { cin, cout } => 9 * cin * cout + 3 * cout,
            LayerSpec::Conv { kernel, cin, cout } => kernel * kernel * cin * cout + cout,
            LayerSpec::Separable { cin, cout } => 9 * cin + cin * cout + cout,
        }
    }
}

/// Layer shapes for `config`, indexed like the parameter set.
pub fn layer_specs(config: &Config, box_encoding_size: usize, filter_sizes: &[usize]) -> Vec<LayerSpec> {
    let hidden = filter_sizes.len().saturating_sub(1);
    let mut specs: Vec<LayerSpec> = (0..hidden)
        .map(|i| {
            let (cin, cout) = (filter_sizes[i], filter_sizes[i + 1]);
            match config.topology() {
                Topology::PlainStack => LayerSpec::ConvWithBatchNorm { cin, cout },
                Topology::MobileStack if i == 0 && config.is_first_layer_conv2d => {
                    LayerSpec::Conv { kernel: 3, cin, cout }
                }
                Topology::MobileStack => LayerSpec::Separable { cin, cout },
            }
        })
        .collect();
    if let Some(&cin) = filter_sizes.last() {
        specs.push(LayerSpec::Conv {
            kernel: 1,
            cin,
            cout: config.num_anchors() * box_encoding_size,
        });
    }
    specs
}

/// Total number of `f32` values a weight buffer must hold.
pub fn expected_param_count(config: &Config) -> usize {
    layer_specs(config, config.box_encoding_size(), config.filter_sizes())
        .iter()
        .map(LayerSpec::param_count)
        .sum()
}

struct WeightReader<'a> {
    data: &'a [f32],
    offset: usize,
}

impl<'a> WeightReader<'a> {
    fn new(data: &'a [f32]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [f32]> {
        let end = self.offset + len;
        let chunk = self.data.get(self.offset..end).ok_or(ModelError::Parameter {
            expected: end,
            actual: self.data.len(),
        })?;
        self.offset = end;
        Ok(chunk)
    }

    fn array1(&mut self, len: usize) -> Result<Array1<f32>> {
        Ok(Array1::from(self.take(len)?.to_vec()))
    }

    fn array4(&mut self, shape: (usize, usize, usize, usize)) -> Result<Array4<f32>> {
        let len = shape.0 * shape.1 * shape.2 * shape.3;
        Ok(Array4::from_shape_vec(shape, self.take(len)?.to_vec())?)
    }

    fn conv(&mut self, kernel: usize, cin: usize, cout: usize) -> Result<ConvParams> {
        let filters = self.array4((kernel, kernel, cin, cout))?;
        let bias = self.array1(cout)?;
        Ok(ConvParams { filters, bias })
    }

    fn layer(&mut self, spec: LayerSpec) -> Result<LayerParams> {
        Ok(match spec {
            LayerSpec::ConvWithBatchNorm { cin, cout } => {
                let conv = self.conv(3, cin, cout)?;
                let sub = self.array1(cout)?;
                let truediv = self.array1(cout)?;
                LayerParams::ConvWithBatchNorm(ConvWithBatchNorm {
                    conv,
                    bn: BatchNormParams { sub, truediv },
                })
            }
            LayerSpec::Conv { kernel, cin, cout } => LayerParams::Conv(self.conv(kernel, cin, cout)?),
            LayerSpec::Separable { cin, cout } => {
                let depthwise = self.array4((3, 3, cin, 1))?;
                let pointwise = self.array4((1, 1, cin, cout))?;
                let bias = self.array1(cout)?;
                LayerParams::Separable(SeparableConvParams {
                    depthwise,
                    pointwise,
                    bias,
                })
            }
        })
    }
}

/// Build a [`ParameterSet`] from a flat weight buffer.
///
/// Fails with [`ModelError::Parameter`] unless `raw` holds exactly the number
/// of values the configuration requires.
pub fn extract_params(
    raw: &[f32],
    config: &Config,
    box_encoding_size: usize,
    filter_sizes: &[usize],
) -> Result<ParameterSet> {
    if !(7..=9).contains(&filter_sizes.len()) {
        return Err(ModelError::config(
            "filterSizes",
            format!("expected 7, 8 or 9 entries, got {}", filter_sizes.len()),
        ));
    }
    let specs = layer_specs(config, box_encoding_size, filter_sizes);
    let expected: usize = specs.iter().map(LayerSpec::param_count).sum();
    if raw.len() != expected {
        return Err(ModelError::Parameter {
            expected,
            actual: raw.len(),
        });
    }

    let mut reader = WeightReader::new(raw);
    let mut params = ParameterSet::new();
    for (index, spec) in specs.into_iter().enumerate() {
        params.insert(index, reader.layer(spec)?);
    }
    log::debug!("extracted {} layers ({} weights)", params.len(), expected);
    Ok(params)
}

/// Decode a little-endian `f32` weight blob.
pub fn weights_from_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(ModelError::Parameter {
            expected: bytes.len() / 4 * 4 + 4,
            actual: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Read a weight file from disk.
pub async fn read_weights_file(path: impl AsRef<Path>) -> Result<Vec<f32>> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    weights_from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Anchor;

    fn mobile(filter_sizes: Vec<usize>, first_conv: bool) -> Config {
        Config {
            classes: vec!["a".into()],
            anchors: vec![Anchor::new(1.0, 1.0); 2],
            mean_rgb: None,
            is_first_layer_conv2d: first_conv,
            with_separable_convs: true,
            with_class_scores: false,
            iou_threshold: 0.5,
            filter_sizes: Some(filter_sizes),
        }
    }

    #[test]
    fn test_layer_specs_mobile() {
        let c = mobile(vec![3, 4, 4, 4, 4, 4, 8], true);
        let specs = layer_specs(&c, 5, c.filter_sizes());
        assert_eq!(specs.len(), 7);
        assert_eq!(specs[0], LayerSpec::Conv { kernel: 3, cin: 3, cout: 4 });
        assert_eq!(specs[1], LayerSpec::Separable { cin: 4, cout: 4 });
        assert_eq!(specs[6], LayerSpec::Conv { kernel: 1, cin: 8, cout: 10 });
    }

    #[test]
    fn test_param_count() {
        assert_eq!(LayerSpec::ConvWithBatchNorm { cin: 3, cout: 4 }.param_count(), 108 + 12);
        assert_eq!(LayerSpec::Separable { cin: 4, cout: 8 }.param_count(), 36 + 32 + 8);
        assert_eq!(LayerSpec::Conv { kernel: 1, cin: 8, cout: 10 }.param_count(), 90);
    }

    #[test]
    fn test_extract_round_trips_values_in_order() {
        let c = mobile(vec![3, 2, 2, 2, 2, 2, 2], false);
        let n = expected_param_count(&c);
        let raw: Vec<f32> = (0..n).map(|i| i as f32).collect();
        let params = extract_params(&raw, &c, 5, c.filter_sizes()).unwrap();
        assert_eq!(params.len(), 7);

        let first = params.separable(0).unwrap();
        assert_eq!(first.depthwise[[0, 0, 0, 0]], 0.0);
        assert_eq!(first.depthwise[[0, 0, 1, 0]], 1.0);
        // depthwise 3*3*3 = 27 values, then pointwise 3*2
        assert_eq!(first.pointwise[[0, 0, 0, 0]], 27.0);
        assert_eq!(first.bias[0], 33.0);

        let last = params.conv(6).unwrap();
        assert_eq!(last.out_channels(), 10);
        assert_eq!(*last.bias.last().unwrap(), (n - 1) as f32);
    }

    #[test]
    fn test_extract_rejects_wrong_length() {
        let c = mobile(vec![3, 2, 2, 2, 2, 2, 2, 2], false);
        let n = expected_param_count(&c);
        let err = extract_params(&vec![0.0; n - 1], &c, 5, c.filter_sizes()).unwrap_err();
        assert!(matches!(err, ModelError::Parameter { expected, actual } if expected == n && actual == n - 1));
        assert!(extract_params(&vec![0.0; n + 1], &c, 5, c.filter_sizes()).is_err());
    }

    #[test]
    fn test_extract_rejects_bad_filter_count() {
        let c = mobile(vec![3, 2, 2, 2, 2, 2], false);
        let err = extract_params(&[], &c, 5, c.filter_sizes()).unwrap_err();
        assert_eq!(err.field(), Some("filterSizes"));
    }

    #[test]
    fn test_weights_from_bytes() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-2.0f32).to_le_bytes());
        assert_eq!(weights_from_bytes(&bytes).unwrap(), vec![1.5, -2.0]);
        assert!(weights_from_bytes(&bytes[..5]).is_err());
    }
}
