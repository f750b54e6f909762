//! # Image preprocessing
//!
//! Normalizes an arbitrary input radiograph into a model-ready tensor:
//! decode, collapse to single-channel intensity, contrast-limited adaptive
//! histogram equalization, resize to the architecture's input resolution,
//! and per-architecture intensity normalization.
//!
//! Decoding and equalization run once per submitted image; resizing runs
//! once per distinct resolution; normalization is per architecture. The
//! whole pipeline is pure and keeps the source dimensions around so later
//! attribution maps can be resampled back to the original geometry.

pub mod clahe;
pub mod resize;

use ndarray::Array2;
use tracing::debug;

use crate::config::PreprocessConfig;
use crate::error::EngineError;

/// A decoded, equalized radiograph, not yet bound to any architecture.
#[derive(Debug)]
pub struct EqualizedImage {
    /// Equalized intensities in [0, 1], rows = height
    pub pixels: Array2<f32>,
    /// Width of the original image in pixels
    pub source_width: u32,
    /// Height of the original image in pixels
    pub source_height: u32,
}

/// A model-ready input tensor for one architecture.
///
/// Owned exclusively by the inference call that produced it and never
/// mutated afterwards.
pub struct PreprocessedImage {
    /// Normalized intensities, shape `resolution` x `resolution`
    pub tensor: Array2<f32>,
    /// Width of the original image in pixels
    pub source_width: u32,
    /// Height of the original image in pixels
    pub source_height: u32,
}

/// The preprocessing front of the engine.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    tile_grid: usize,
    clip_limit: f32,
}

impl Preprocessor {
    pub fn new(config: &PreprocessConfig) -> Self {
        Self {
            tile_grid: config.tile_grid,
            clip_limit: config.clip_limit,
        }
    }

    /// Decodes raw image bytes and applies CLAHE.
    ///
    /// # Errors
    ///
    /// `EngineError::InvalidImage` when the bytes cannot be decoded or the
    /// decoded image has a zero dimension.
    pub fn decode_and_equalize(&self, image_bytes: &[u8]) -> Result<EqualizedImage, EngineError> {
        let decoded = image::load_from_memory(image_bytes)
            .map_err(|e| EngineError::InvalidImage(e.to_string()))?;

        let gray = decoded.to_luma8();
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidImage(format!(
                "degenerate dimensions {}x{}",
                width, height
            )));
        }

        let gray_arr = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            gray.get_pixel(x as u32, y as u32)[0]
        });

        debug!(width, height, tile_grid = self.tile_grid, "equalizing input image");
        let pixels = clahe::equalize(&gray_arr, self.tile_grid, self.clip_limit);

        Ok(EqualizedImage {
            pixels,
            source_width: width,
            source_height: height,
        })
    }
}

impl EqualizedImage {
    /// Resamples the equalized image to a square model resolution.
    ///
    /// Resolutions are shared between architectures, so callers cache the
    /// result per resolution within one ensemble run.
    pub fn resized(&self, resolution: usize) -> Array2<f32> {
        resize::bilinear(&self.pixels, resolution, resolution)
    }

    /// Applies an architecture's intensity statistics to an already
    /// resized plane and packages the model input.
    pub fn normalized(
        &self,
        resized: &Array2<f32>,
        mean: f32,
        std: f32,
    ) -> PreprocessedImage {
        let tensor = resized.mapv(|v| (v - mean) / std);
        PreprocessedImage {
            tensor,
            source_width: self.source_width,
            source_height: self.source_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(&Settings::default().preprocess)
    }

    fn png_bytes(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Vec<u8> {
        let img = image::GrayImage::from_fn(width, height, |x, y| image::Luma([f(x, y)]));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        bytes
    }

    #[test]
    fn rejects_undecodable_bytes() {
        let err = preprocessor().decode_and_equalize(b"not an image").unwrap_err();
        assert!(matches!(err, EngineError::InvalidImage(_)));
    }

    #[test]
    fn keeps_source_dimensions() {
        let bytes = png_bytes(320, 200, |x, y| ((x + y) % 256) as u8);
        let equalized = preprocessor().decode_and_equalize(&bytes).unwrap();
        assert_eq!(equalized.source_width, 320);
        assert_eq!(equalized.source_height, 200);
        assert_eq!(equalized.pixels.dim(), (200, 320));
    }

    #[test]
    fn all_black_input_produces_usable_tensor() {
        let bytes = png_bytes(64, 64, |_, _| 0);
        let equalized = preprocessor().decode_and_equalize(&bytes).unwrap();
        let resized = equalized.resized(32);
        let input = equalized.normalized(&resized, 0.449, 0.226);
        assert_eq!(input.tensor.dim(), (32, 32));
        assert!(input.tensor.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn normalization_applies_architecture_statistics() {
        let bytes = png_bytes(16, 16, |_, _| 255);
        let equalized = preprocessor().decode_and_equalize(&bytes).unwrap();
        let resized = equalized.resized(8);
        let input = equalized.normalized(&resized, 0.5, 0.5);
        // All-white equalizes to 1.0; (1.0 - 0.5) / 0.5 = 1.0.
        assert!(input.tensor.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }
}
