// --- File: src/data/decode/mod.rs ---

//! Readers turning medical image containers into grayscale intensity grids.
//!
//! Every decoder returns an `ArrayD<f32>` of shape `[H, W]` for 2D images or
//! `[D, H, W]` for volumes, in raw (rescaled but not normalised) intensity
//! units.
//!
//! | Extension            | Format                         |
//! |----------------------|--------------------------------|
//! | `.nii`, `.nii.gz`    | NIfTI-1 single file            |
//! | `.dcm`               | DICOM Part 10, uncompressed LE |
//! | `.png` `.jpg` `.bmp` | raster, converted to luma      |

pub mod dicom;
pub mod nifti;
pub mod raster;

pub use dicom::DicomDecoder;
pub use nifti::NiftiDecoder;
pub use raster::RasterDecoder;

use flate2::read::GzDecoder;
use ndarray::ArrayD;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Decoding errors.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {format} data: {reason}")]
    Malformed { format: &'static str, reason: String },

    #[error("unsupported {format} content: {reason}")]
    Unsupported { format: &'static str, reason: String },

    #[error("unrecognised image extension: {0}")]
    UnknownFormat(PathBuf),

    #[error("raster decode failed: {0}")]
    Image(#[from] image::ImageError),
}

impl DecodeError {
    pub(crate) fn malformed(format: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(format: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::Unsupported {
            format,
            reason: reason.into(),
        }
    }
}

/// Reads one image file into a grayscale grid.
pub trait Decoder: Send + Sync {
    /// Decodes the file at `path`.
    fn decode(&self, path: &Path) -> Result<ArrayD<f32>, DecodeError>;

    /// Short format name for log messages.
    fn name(&self) -> &'static str;
}

/// Container formats recognised by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Nifti,
    Dicom,
    Raster,
}

impl ImageFormat {
    /// Picks a format from the file name.
    pub fn detect(path: &Path) -> Result<Self, DecodeError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            Ok(ImageFormat::Nifti)
        } else if name.ends_with(".dcm") || name.ends_with(".dicom") {
            Ok(ImageFormat::Dicom)
        } else if [".png", ".jpg", ".jpeg", ".bmp"].iter().any(|ext| name.ends_with(ext)) {
            Ok(ImageFormat::Raster)
        } else {
            Err(DecodeError::UnknownFormat(path.to_path_buf()))
        }
    }
}

/// Dispatches on [`ImageFormat::detect`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDecoder;

impl Decoder for AutoDecoder {
    fn decode(&self, path: &Path) -> Result<ArrayD<f32>, DecodeError> {
        match ImageFormat::detect(path)? {
            ImageFormat::Nifti => NiftiDecoder.decode(path),
            ImageFormat::Dicom => DicomDecoder.decode(path),
            ImageFormat::Raster => RasterDecoder.decode(path),
        }
    }

    fn name(&self) -> &'static str {
        "auto"
    }
}

/// Reads a whole file, transparently inflating gzip content.
pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, DecodeError> {
    let io_err = |source| DecodeError::Io {
        path: path.to_path_buf(),
        source,
    };
    let raw = fs::read(path).map_err(io_err)?;
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut inflated = Vec::with_capacity(raw.len() * 4);
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut inflated)
            .map_err(io_err)?;
        Ok(inflated)
    } else {
        Ok(raw)
    }
}
