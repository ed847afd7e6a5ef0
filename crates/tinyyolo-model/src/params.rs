//! Learned parameters, one block per layer index.

use crate::{ModelError, Result};
use ndarray::{Array1, Array4};
use std::collections::BTreeMap;

/// Convolution kernel in `[kh, kw, cin, cout]` order plus per-output bias.
#[derive(Debug, Clone)]
pub struct ConvParams {
    pub filters: Array4<f32>,
    pub bias: Array1<f32>,
}

impl ConvParams {
    pub fn in_channels(&self) -> usize {
        self.filters.dim().2
    }

    pub fn out_channels(&self) -> usize {
        self.filters.dim().3
    }
}

/// Folded batch norm: `(x - sub) * truediv`.
#[derive(Debug, Clone)]
pub struct BatchNormParams {
    pub sub: Array1<f32>,
    pub truediv: Array1<f32>,
}

#[derive(Debug, Clone)]
pub struct ConvWithBatchNorm {
    pub conv: ConvParams,
    pub bn: BatchNormParams,
}

/// Depthwise `[3, 3, cin, 1]` followed by pointwise `[1, 1, cin, cout]`.
#[derive(Debug, Clone)]
pub struct SeparableConvParams {
    pub depthwise: Array4<f32>,
    pub pointwise: Array4<f32>,
    pub bias: Array1<f32>,
}

impl SeparableConvParams {
    pub fn in_channels(&self) -> usize {
        self.depthwise.dim().2
    }

    pub fn out_channels(&self) -> usize {
        self.pointwise.dim().3
    }
}

#[derive(Debug, Clone)]
pub enum LayerParams {
    Conv(ConvParams),
    ConvWithBatchNorm(ConvWithBatchNorm),
    Separable(SeparableConvParams),
}

impl LayerParams {
    pub fn kind(&self) -> &'static str {
        match self {
            LayerParams::Conv(_) => "conv",
            LayerParams::ConvWithBatchNorm(_) => "conv+bn",
            LayerParams::Separable(_) => "separable",
        }
    }
}

/// Parameters keyed by layer index. Optional mobile layers are simply absent.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    layers: BTreeMap<usize, LayerParams>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, layer: LayerParams) {
        self.layers.insert(index, layer);
    }

    pub fn get(&self, index: usize) -> Option<&LayerParams> {
        self.layers.get(&index)
    }

    pub fn layer(&self, index: usize) -> Result<&LayerParams> {
        self.get(index)
            .ok_or(ModelError::MissingParameters { layer: index })
    }

    pub fn conv(&self, index: usize) -> Result<&ConvParams> {
        match self.layer(index)? {
            LayerParams::Conv(p) => Ok(p),
            other => Err(unexpected_kind(index, "conv", other)),
        }
    }

    pub fn conv_with_batch_norm(&self, index: usize) -> Result<&ConvWithBatchNorm> {
        match self.layer(index)? {
            LayerParams::ConvWithBatchNorm(p) => Ok(p),
            other => Err(unexpected_kind(index, "conv+bn", other)),
        }
    }

    pub fn separable(&self, index: usize) -> Result<&SeparableConvParams> {
        match self.layer(index)? {
            LayerParams::Separable(p) => Ok(p),
            other => Err(unexpected_kind(index, "separable", other)),
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.layers.keys().copied()
    }
}

fn unexpected_kind(index: usize, wanted: &str, found: &LayerParams) -> ModelError {
    log::warn!("layer {index}: wanted {wanted} parameters, found {}", found.kind());
    ModelError::MissingParameters { layer: index }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(cin: usize, cout: usize) -> ConvParams {
        ConvParams {
            filters: Array4::zeros((3, 3, cin, cout)),
            bias: Array1::zeros(cout),
        }
    }

    #[test]
    fn test_missing_layer() {
        let mut params = ParameterSet::new();
        params.insert(0, LayerParams::Conv(conv(3, 4)));
        assert!(params.conv(0).is_ok());
        assert!(matches!(
            params.layer(6),
            Err(ModelError::MissingParameters { layer: 6 })
        ));
    }

    #[test]
    fn test_wrong_kind_is_missing() {
        let mut params = ParameterSet::new();
        params.insert(2, LayerParams::Conv(conv(3, 4)));
        assert!(matches!(
            params.separable(2),
            Err(ModelError::MissingParameters { layer: 2 })
        ));
    }

    #[test]
    fn test_channel_accessors() {
        let p = conv(3, 16);
        assert_eq!(p.in_channels(), 3);
        assert_eq!(p.out_channels(), 16);
        let s = SeparableConvParams {
            depthwise: Array4::zeros((3, 3, 8, 1)),
            pointwise: Array4::zeros((1, 1, 8, 32)),
            bias: Array1::zeros(32),
        };
        assert_eq!(s.in_channels(), 8);
        assert_eq!(s.out_channels(), 32);
    }
}
