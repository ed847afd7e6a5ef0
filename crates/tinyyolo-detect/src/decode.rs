//! Grid decoding
//!
//! Turns the raw output grid of one image into candidate boxes. Each cell
//! carries `numAnchors` box encodings of `boxEncodingSize` channels:
//! `tx, ty, tw, th, objectness` followed by optional class logits.
//!
//! Boxes come out in grid-relative coordinates, scaled by the correction
//! factors so that `[0, 1]` spans the unpadded image. They are not clamped.

use crate::{
    bbox::BoundingBox,
    math::{argmax, sigmoid, softmax},
    DetectError, Result,
};
use ndarray::{s, ArrayView3};
use tinyyolo_model::{Anchor, Config};

/// A decoded box before suppression.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    /// Objectness after sigmoid.
    pub score: f32,
    /// `score * classProbability` (equal to `score` without class scores).
    pub class_score: f32,
    pub label: usize,
    pub row: usize,
    pub col: usize,
    pub anchor: usize,
}

pub struct GridDecoder<'a> {
    anchors: &'a [Anchor],
    box_encoding_size: usize,
    with_class_scores: bool,
}

impl<'a> GridDecoder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            anchors: &config.anchors,
            box_encoding_size: config.box_encoding_size(),
            with_class_scores: config.with_class_scores,
        }
    }

    /// Decode a `[g, g, numAnchors * boxEncodingSize]` grid.
    ///
    /// `reshaped` is the image size inside the square network input before
    /// padding. Cells are visited row-major, anchors ascending. A threshold of
    /// `None` or `Some(0.0)` keeps every box.
    pub fn decode(
        &self,
        grid: ArrayView3<f32>,
        reshaped: (u32, u32),
        score_threshold: Option<f32>,
    ) -> Result<Vec<Candidate>> {
        let (rows, cols, channels) = grid.dim();
        let num_anchors = self.anchors.len();
        if rows != cols || channels != num_anchors * self.box_encoding_size {
            return Err(DetectError::ShapeMismatch {
                expected: format!(
                    "[g, g, {}] ({num_anchors} anchors × {} channels)",
                    num_anchors * self.box_encoding_size,
                    self.box_encoding_size
                ),
                actual: grid.shape().to_vec(),
            });
        }
        let num_cells = rows as f32;
        let grid = grid.to_shape((rows, cols, num_anchors, self.box_encoding_size))
            .map_err(tinyyolo_model::ModelError::from)?;

        let (w, h) = (reshaped.0 as f32, reshaped.1 as f32);
        let correction_x = w.max(h) / w;
        let correction_y = w.max(h) / h;
        let threshold = score_threshold.filter(|&t| t > 0.0);

        let mut candidates = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                for (a, anchor) in self.anchors.iter().enumerate() {
                    let encoding = grid.slice(s![row, col, a, ..]);
                    let score = sigmoid(encoding[4]);
                    if threshold.is_some_and(|t| score <= t) {
                        continue;
                    }

                    let center_x = (col as f32 + sigmoid(encoding[0])) / num_cells * correction_x;
                    let center_y = (row as f32 + sigmoid(encoding[1])) / num_cells * correction_y;
                    let width = encoding[2].exp() * anchor.x / num_cells * correction_x;
                    let height = encoding[3].exp() * anchor.y / num_cells * correction_y;
                    let x = center_x - width / 2.0;
                    let y = center_y - height / 2.0;

                    let (class_prob, label) = if self.with_class_scores {
                        let logits: Vec<f32> = encoding.slice(s![5..]).to_vec();
                        match argmax(&softmax(&logits)) {
                            Some((label, p)) => (p, label),
                            None => (1.0, 0),
                        }
                    } else {
                        (1.0, 0)
                    };

                    candidates.push(Candidate {
                        bbox: BoundingBox::new(x, y, x + width, y + height),
                        score,
                        class_score: score * class_prob,
                        label,
                        row,
                        col,
                        anchor: a,
                    });
                }
            }
        }
        log::debug!(
            "decoded {} candidates from a {rows}×{cols} grid",
            candidates.len()
        );
        Ok(candidates)
    }
}
