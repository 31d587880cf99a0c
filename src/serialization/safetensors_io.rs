// --- File: src/serialization/safetensors_io.rs ---

//! Reading and writing model parameters in the SafeTensors format.
//!
//! SafeTensors is the HuggingFace tensor container: a JSON header followed
//! by raw little-endian data. It cannot execute code on load and keeps
//! names, dtypes and shapes next to the data.

use crate::model::Parameters;
use ndarray::{ArrayD, IxDyn};
use safetensors::serialize_to_file;
use safetensors::tensor::{SafeTensors, TensorView};
use safetensors::Dtype;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// SafeTensors errors
#[derive(Error, Debug)]
pub enum SafeTensorsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SafeTensors error: {0}")]
    Format(#[from] safetensors::SafeTensorError),

    #[error("unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("tensor '{name}' has {len} values, which does not fit shape {shape:?}")]
    ShapeMismatch {
        name: String,
        shape: Vec<usize>,
        len: usize,
    },
}

type Result<T> = std::result::Result<T, SafeTensorsError>;

/// Saves parameters to a SafeTensors file as F32.
///
/// # Arguments
///
/// * `path` - Destination file
/// * `tensors` - Parameters keyed by name
///
/// # Example
///
/// ```rust,ignore
/// use rustyscan::model::Parameters;
/// use rustyscan::serialization::save_safetensors;
///
/// let mut weights = Parameters::new();
/// weights.insert("linear.weight".to_string(), ArrayD::zeros(IxDyn(&[4, 2])));
/// save_safetensors("weights.safetensors", &weights)?;
/// ```
pub fn save_safetensors<P: AsRef<Path>>(path: P, tensors: &Parameters) -> Result<()> {
    // Byte buffers must outlive the views that borrow them.
    let mut names: Vec<&String> = tensors.keys().collect();
    names.sort();
    let buffers: Vec<(&str, Vec<usize>, Vec<u8>)> = names
        .into_iter()
        .map(|name| {
            let arr = &tensors[name];
            let data: Vec<u8> = arr.iter().flat_map(|&x| x.to_le_bytes()).collect();
            (name.as_str(), arr.shape().to_vec(), data)
        })
        .collect();

    let mut views: Vec<(&str, TensorView<'_>)> = Vec::with_capacity(buffers.len());
    for (name, shape, data) in &buffers {
        views.push((*name, TensorView::new(Dtype::F32, shape.clone(), data)?));
    }

    serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}

/// Loads every tensor of a SafeTensors file.
///
/// F32 tensors are read as-is, F64 tensors are narrowed to F32. Other
/// dtypes are rejected.
pub fn load_safetensors<P: AsRef<Path>>(path: P) -> Result<Parameters> {
    let buffer = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut result = Parameters::new();
    for (name, tensor) in tensors.tensors() {
        let data = tensor.data();
        let values: Vec<f32> = match tensor.dtype() {
            Dtype::F32 => data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            Dtype::F64 => data
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
                .collect(),
            other => return Err(SafeTensorsError::UnsupportedDtype(format!("{other:?}"))),
        };

        let shape = tensor.shape().to_vec();
        let len = values.len();
        let arr = ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|_| SafeTensorsError::ShapeMismatch {
            name: name.clone(),
            shape: shape.clone(),
            len,
        })?;
        result.insert(name, arr);
    }

    Ok(result)
}

/// Returns `(name, shape, dtype)` for every tensor in the file, sorted by name.
pub fn tensor_info<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Vec<usize>, String)>> {
    let buffer = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut info: Vec<_> = tensors
        .tensors()
        .into_iter()
        .map(|(name, tensor)| (name, tensor.shape().to_vec(), format!("{:?}", tensor.dtype())))
        .collect();
    info.sort();
    Ok(info)
}
