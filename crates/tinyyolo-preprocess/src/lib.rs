//! tinyyolo‑preprocess – resize + pad RGB images into a square batch tensor.

use image::{DynamicImage, RgbImage};
use ndarray::{s, Array4, ArrayView3};
use resize::{new, Pixel, Type};
use rgb::FromSlice;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("input image is empty ({0}×{1})")]
    EmptyImage(u32, u32),
    #[error("input size must be positive")]
    ZeroInputSize,
    #[error("input size {0} exceeds the maximum of {max}", max = MAX_INPUT_SIZE)]
    InputSizeTooLarge(u32),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("resize failed: {0}")]
    Resize(#[from] resize::Error),
    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PreprocessError>;

/// Largest square canvas the preprocessor will allocate.
pub const MAX_INPUT_SIZE: u32 = 4096;

/// A single RGB image handed to the network.
#[derive(Debug, Clone)]
pub struct NetInput {
    image: RgbImage,
}

impl NetInput {
    pub fn from_image(image: RgbImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PreprocessError::EmptyImage(image.width(), image.height()));
        }
        Ok(Self { image })
    }

    pub fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        Self::from_image(image.to_rgb8())
    }

    /// Decode an encoded (PNG/JPEG) image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_dynamic(&image::load_from_memory(bytes)?)
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        Self::from_bytes(&bytes)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Network-ready tensor plus the geometry needed to map boxes back.
#[derive(Debug, Clone)]
pub struct BatchTensor {
    /// `[1, S, S, 3]`, raw 0‑255 values, zero padded at the bottom/right.
    pub tensor: Array4<f32>,
    pub input_width: u32,
    pub input_height: u32,
    /// Size of the image inside the square before padding.
    pub reshaped_width: u32,
    pub reshaped_height: u32,
}

impl BatchTensor {
    pub fn input_size(&self) -> usize {
        self.tensor.dim().1
    }
}

/// Image size after scaling the longer side to `input_size`.
pub fn reshaped_dimensions(width: u32, height: u32, input_size: u32) -> (u32, u32) {
    let scale = input_size as f64 / width.max(height) as f64;
    let w = ((width as f64 * scale).round() as u32).clamp(1, input_size);
    let h = ((height as f64 * scale).round() as u32).clamp(1, input_size);
    (w, h)
}

#[derive(Debug, Clone, Default)]
pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Scale `input` so its longer side equals `input_size`, then place it at
    /// the top-left of a zero `input_size × input_size` canvas.
    pub fn to_batch_tensor(&self, input: &NetInput, input_size: u32) -> Result<BatchTensor> {
        if input_size == 0 {
            return Err(PreprocessError::ZeroInputSize);
        }
        if input_size > MAX_INPUT_SIZE {
            return Err(PreprocessError::InputSizeTooLarge(input_size));
        }
        let (w, h) = (input.width(), input.height());
        let (rw, rh) = reshaped_dimensions(w, h, input_size);

        let resized = if (rw, rh) == (w, h) {
            input.image.as_raw().clone()
        } else {
            let mut dst = vec![0u8; rw as usize * rh as usize * 3];
            let mut resizer = new(
                w as usize,
                h as usize,
                rw as usize,
                rh as usize,
                Pixel::RGB8,
                Type::Triangle,
            )?;
            resizer.resize(input.image.as_raw().as_rgb(), dst.as_rgb_mut())?;
            dst
        };

        let size = input_size as usize;
        let pixels = ArrayView3::from_shape((rh as usize, rw as usize, 3), &resized)?;
        let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
        tensor
            .slice_mut(s![0, ..rh as usize, ..rw as usize, ..])
            .assign(&pixels.mapv(f32::from));

        log::trace!("preprocessed {w}×{h} → {rw}×{rh} in {size}×{size}");
        Ok(BatchTensor {
            tensor,
            input_width: w,
            input_height: h,
            reshaped_width: rw,
            reshaped_height: rh,
        })
    }
}

/// Subtract a per-channel mean from an NHWC tensor.
pub fn normalize(tensor: &mut Array4<f32>, mean_rgb: [f32; 3]) {
    for (c, mean) in mean_rgb.iter().enumerate() {
        tensor.slice_mut(s![.., .., .., c]).mapv_inplace(|v| v - mean);
    }
}
