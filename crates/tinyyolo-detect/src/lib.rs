// tinyyolo-detect/src/lib.rs
// ============================================================
// tinyyolo-detect  –  Object-detection stage
// Runs a TinyYOLO-style grid/anchor network on the CPU and turns
// its output grid into scored, de-duplicated boxes.
// ------------------------------------------------------------
// Pipeline: NetInput → [1,S,S,3] → raw grid → Vec<Detection>
// ------------------------------------------------------------
// Public API
//   * TinyYolo::new(config)          – validate config (unloaded)
//   * TinyYolo::load_parameters(w)   – flat f32 weights (loaded)
//   * TinyYolo::forward(input, size) – raw output grid
//   * Detector::detect(input, opts)  – returns Vec<Detection>
// ============================================================

//! TinyYOLO – detection layer
//!
//! This crate provides a backend-agnostic [`Detector`] trait plus the
//! concrete [`TinyYolo`] orchestrator. The grid decoder ([`GridDecoder`])
//! and the suppressor ([`Suppressor`], default [`GreedyNms`]) are exposed
//! separately so they can be driven with synthetic grids.
//!
//! Input images come from `tinyyolo-preprocess` (square NHWC batch); the
//! network itself lives in `tinyyolo-model`.

pub mod bbox;
pub mod decode;
pub mod detector;
pub mod error;
pub mod math;
pub mod nms;

pub use bbox::BoundingBox;
pub use decode::{Candidate, GridDecoder};
pub use detector::{DetectOptions, Detection, Detector, TinyYolo, DEFAULT_INPUT_SIZE, DEFAULT_SCORE_THRESHOLD};
pub use error::{DetectError, Result};
pub use nms::{GreedyNms, Suppressor};

pub use tinyyolo_model::{Anchor, Config, ModelError, Topology};
pub use tinyyolo_preprocess::NetInput;
