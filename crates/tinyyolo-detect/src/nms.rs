//! Non-maximum suppression.

use crate::bbox::BoundingBox;

/// Picks which boxes survive overlap suppression.
///
/// Implementations return indices into `boxes`, highest score first.
pub trait Suppressor {
    fn suppress(
        &self,
        boxes: &[BoundingBox],
        scores: &[f32],
        labels: &[usize],
        iou_threshold: f32,
        class_agnostic: bool,
    ) -> Vec<usize>;
}

/// Greedy NMS: visit boxes by descending score (stable, so equal scores keep
/// encounter order) and drop any box whose IoU with a kept box exceeds the
/// threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyNms {
    /// Optional cap on the number of survivors.
    pub max_detections: Option<usize>,
}

impl Suppressor for GreedyNms {
    fn suppress(
        &self,
        boxes: &[BoundingBox],
        scores: &[f32],
        labels: &[usize],
        iou_threshold: f32,
        class_agnostic: bool,
    ) -> Vec<usize> {
        let mut order: Vec<usize> = (0..boxes.len().min(scores.len())).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let same_class = |a: usize, b: usize| {
            class_agnostic || labels.get(a) == labels.get(b)
        };

        let mut keep: Vec<usize> = Vec::new();
        'outer: for i in order {
            for &k in &keep {
                if same_class(i, k) && boxes[i].iou(&boxes[k]) > iou_threshold {
                    continue 'outer;
                }
            }
            keep.push(i);
            if self.max_detections.is_some_and(|max| keep.len() >= max) {
                break;
            }
        }
        keep
    }
}
