// --- File: src/data/decode/raster.rs ---

//! PNG / JPEG / BMP images, decoded with the `image` crate.

use super::{DecodeError, Decoder};
use ndarray::{ArrayD, IxDyn};
use std::path::Path;

/// Decodes a raster image to a `[height, width]` 16-bit luma grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterDecoder;

impl RasterDecoder {
    pub fn decode_bytes(bytes: &[u8]) -> Result<ArrayD<f32>, DecodeError> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::to_array(img))
    }

    fn to_array(img: image::DynamicImage) -> ArrayD<f32> {
        let luma = img.to_luma16();
        let (width, height) = luma.dimensions();
        let pixels: Vec<f32> = luma.into_raw().into_iter().map(f32::from).collect();
        // Buffer length is width * height by construction.
        ArrayD::from_shape_vec(IxDyn(&[height as usize, width as usize]), pixels)
            .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[height as usize, width as usize])))
    }
}

impl Decoder for RasterDecoder {
    fn decode(&self, path: &Path) -> Result<ArrayD<f32>, DecodeError> {
        let img = image::open(path).map_err(|e| match e {
            image::ImageError::IoError(source) => DecodeError::Io {
                path: path.to_path_buf(),
                source,
            },
            other => DecodeError::Image(other),
        })?;
        Ok(Self::to_array(img))
    }

    fn name(&self) -> &'static str {
        "raster"
    }
}
