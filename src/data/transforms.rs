// --- File: src/data/transforms.rs ---

//! Preprocessing transforms applied to decoded images.
//!
//! Transforms take ownership of the array and return a new one; the
//! standard chain is built by [`standard_chain`].

use crate::config::{DataConfig, IntensityMode};
use crate::phase::Phase;
use ndarray::{ArrayD, Axis, IxDyn, Zip};
use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

/// Transform errors.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("{transform}: expected {expected}, got shape {actual:?}")]
    ShapeMismatch {
        transform: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    #[error("{count} non-finite values after preprocessing")]
    NonFinite { count: usize },

    #[error("invalid transform parameter: {0}")]
    InvalidParameter(String),
}

type Result<T> = std::result::Result<T, TransformError>;

/// Trait for data transformations.
///
/// `rng` is only drawn from by random augmentations; deterministic steps
/// ignore it.
pub trait Transform: Send + Sync {
    /// Applies the transformation.
    fn apply(&self, data: ArrayD<f32>, rng: &mut StdRng) -> Result<ArrayD<f32>>;

    /// Name used in error messages and logs.
    fn name(&self) -> &'static str;
}

/// Ordered chain of transforms.
#[derive(Default)]
pub struct Compose {
    transforms: Vec<Box<dyn Transform>>,
}

impl Compose {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transform.
    pub fn add<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Transform names in order, e.g. for the startup log line.
    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }
}

impl Transform for Compose {
    fn apply(&self, mut data: ArrayD<f32>, rng: &mut StdRng) -> Result<ArrayD<f32>> {
        for transform in &self.transforms {
            data = transform.apply(data, rng)?;
        }
        Ok(data)
    }

    fn name(&self) -> &'static str {
        "Compose"
    }
}

/// Builds the chain used for `phase`:
/// intensity -> AddChannel -> Resize -> (Train only) RandRotate90 -> ToTensor.
pub fn standard_chain(config: &DataConfig, phase: Phase) -> Result<Compose> {
    let mut chain = Compose::new();
    chain = match config.intensity {
        IntensityMode::Scale => chain.add(ScaleIntensity::new()),
        IntensityMode::Standardize => chain.add(NormalizeIntensity::new()),
    };
    chain = chain.add(AddChannel).add(Resize::new(config.target_shape.clone())?);

    let aug = &config.augment;
    if phase.is_train() && aug.enabled && aug.prob > 0.0 && aug.max_k > 0 {
        chain = chain.add(RandRotate90::new(aug.prob, aug.max_k, aug.axes)?);
    }
    Ok(chain.add(ToTensor))
}

/// Min-max rescale into `[min, max]`.
///
/// A constant image maps to `min`.
pub struct ScaleIntensity {
    min_val: f32,
    max_val: f32,
}

impl ScaleIntensity {
    /// Rescales into [0, 1].
    pub fn new() -> Self {
        Self {
            min_val: 0.0,
            max_val: 1.0,
        }
    }

    pub fn with_range(min_val: f32, max_val: f32) -> Self {
        Self { min_val, max_val }
    }
}

impl Default for ScaleIntensity {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for ScaleIntensity {
    fn apply(&self, data: ArrayD<f32>, _rng: &mut StdRng) -> Result<ArrayD<f32>> {
        let data_min = data.iter().cloned().fold(f32::INFINITY, f32::min);
        let data_max = data.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

        let range = data_max - data_min;
        if !(range > 1e-12) {
            return Ok(data.mapv_into(|_| self.min_val));
        }

        let target_range = self.max_val - self.min_val;
        Ok(data.mapv_into(|x| (x - data_min) / range * target_range + self.min_val))
    }

    fn name(&self) -> &'static str {
        "ScaleIntensity"
    }
}

/// Z-score with the image's own statistics.
pub struct NormalizeIntensity;

impl NormalizeIntensity {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NormalizeIntensity {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for NormalizeIntensity {
    fn apply(&self, data: ArrayD<f32>, _rng: &mut StdRng) -> Result<ArrayD<f32>> {
        let mean = data.mean().unwrap_or(0.0);
        let std = data.std(0.0).max(1e-8);
        Ok(data.mapv_into(|x| (x - mean) / std))
    }

    fn name(&self) -> &'static str {
        "NormalizeIntensity"
    }
}

/// Normalisation with fixed statistics: (x - mean) / std.
pub struct Normalize {
    mean: f32,
    std: f32,
}

impl Normalize {
    pub fn from_scalars(mean: f32, std: f32) -> Result<Self> {
        if !(std > 0.0) {
            return Err(TransformError::InvalidParameter(format!("std must be positive, got {std}")));
        }
        Ok(Self { mean, std })
    }
}

impl Transform for Normalize {
    fn apply(&self, data: ArrayD<f32>, _rng: &mut StdRng) -> Result<ArrayD<f32>> {
        Ok(data.mapv_into(|x| (x - self.mean) / self.std))
    }

    fn name(&self) -> &'static str {
        "Normalize"
    }
}

/// Inserts a leading channel axis of length 1.
pub struct AddChannel;

impl Transform for AddChannel {
    fn apply(&self, data: ArrayD<f32>, _rng: &mut StdRng) -> Result<ArrayD<f32>> {
        Ok(data.insert_axis(Axis(0)))
    }

    fn name(&self) -> &'static str {
        "AddChannel"
    }
}

/// Linear resampling of the spatial axes of a channel-first array.
///
/// Bilinear for 2D, trilinear for 3D. Sample positions follow the
/// half-pixel convention (`align_corners = false`).
pub struct Resize {
    spatial: Vec<usize>,
}

impl Resize {
    pub fn new(spatial: Vec<usize>) -> Result<Self> {
        if spatial.is_empty() || spatial.contains(&0) {
            return Err(TransformError::InvalidParameter(format!("resize target {spatial:?}")));
        }
        Ok(Self { spatial })
    }

    fn resize_axis(data: ArrayD<f32>, axis: usize, out_len: usize) -> ArrayD<f32> {
        let in_len = data.shape()[axis];
        if in_len == out_len {
            return data;
        }

        let mut shape = data.shape().to_vec();
        shape[axis] = out_len;
        let mut out = ArrayD::zeros(IxDyn(&shape));

        let scale = in_len as f32 / out_len as f32;
        let last = (in_len - 1) as f32;
        for o in 0..out_len {
            let src = ((o as f32 + 0.5) * scale - 0.5).clamp(0.0, last);
            let lo = src.floor() as usize;
            let hi = (lo + 1).min(in_len - 1);
            let w = src - lo as f32;

            let a = data.index_axis(Axis(axis), lo);
            let b = data.index_axis(Axis(axis), hi);
            Zip::from(out.index_axis_mut(Axis(axis), o))
                .and(&a)
                .and(&b)
                .for_each(|d, &x, &y| *d = x + (y - x) * w);
        }
        out
    }
}

impl Transform for Resize {
    fn apply(&self, mut data: ArrayD<f32>, _rng: &mut StdRng) -> Result<ArrayD<f32>> {
        if data.ndim() != self.spatial.len() + 1 || data.shape().contains(&0) {
            return Err(TransformError::ShapeMismatch {
                transform: "Resize",
                expected: format!("[C, {} non-empty spatial dims]", self.spatial.len()),
                actual: data.shape().to_vec(),
            });
        }
        for (i, &len) in self.spatial.iter().enumerate() {
            data = Self::resize_axis(data, i + 1, len);
        }
        Ok(data)
    }

    fn name(&self) -> &'static str {
        "Resize"
    }
}

/// Random rotation by a multiple of 90° in the plane of two spatial axes.
///
/// With probability `prob` a quarter-turn count `k` is drawn from
/// `1..=max_k`. On a non-square plane an odd `k` is replaced by 2 so the
/// output shape always equals the input shape.
pub struct RandRotate90 {
    prob: f32,
    max_k: u32,
    axes: [usize; 2],
}

impl RandRotate90 {
    pub fn new(prob: f32, max_k: u32, axes: [usize; 2]) -> Result<Self> {
        if !(0.0..=1.0).contains(&prob) {
            return Err(TransformError::InvalidParameter(format!("rotation probability {prob}")));
        }
        if axes[0] == axes[1] {
            return Err(TransformError::InvalidParameter("rotation axes must differ".into()));
        }
        Ok(Self { prob, max_k, axes })
    }

    /// Rotates the plane `(a, b)` of a channel-first array by `k` quarter turns.
    pub fn rotate(data: ArrayD<f32>, k: u32, a: usize, b: usize) -> ArrayD<f32> {
        let k = k % 4;
        if k == 0 {
            return data;
        }
        let mut view = data.view();
        for _ in 0..k {
            view.invert_axis(Axis(b));
            view.swap_axes(a, b);
        }
        view.as_standard_layout().into_owned()
    }
}

impl Transform for RandRotate90 {
    fn apply(&self, data: ArrayD<f32>, rng: &mut StdRng) -> Result<ArrayD<f32>> {
        let (a, b) = (self.axes[0] + 1, self.axes[1] + 1);
        if a >= data.ndim() || b >= data.ndim() {
            return Err(TransformError::ShapeMismatch {
                transform: "RandRotate90",
                expected: format!("spatial axes {:?} present", self.axes),
                actual: data.shape().to_vec(),
            });
        }
        if self.max_k == 0 || rng.random::<f32>() >= self.prob {
            return Ok(data);
        }

        let mut k = rng.random_range(1..=self.max_k);
        if k % 2 == 1 && data.shape()[a] != data.shape()[b] {
            k = 2;
        }
        Ok(Self::rotate(data, k, a, b))
    }

    fn name(&self) -> &'static str {
        "RandRotate90"
    }
}

/// Final step: contiguous standard layout, finite values only.
pub struct ToTensor;

impl Transform for ToTensor {
    fn apply(&self, data: ArrayD<f32>, _rng: &mut StdRng) -> Result<ArrayD<f32>> {
        let count = data.iter().filter(|v| !v.is_finite()).count();
        if count > 0 {
            return Err(TransformError::NonFinite { count });
        }
        if data.is_standard_layout() {
            Ok(data)
        } else {
            Ok(data.as_standard_layout().into_owned())
        }
    }

    fn name(&self) -> &'static str {
        "ToTensor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0)
    }

    fn grid(shape: &[usize]) -> ArrayD<f32> {
        let n: usize = shape.iter().product();
        ArrayD::from_shape_vec(IxDyn(shape), (0..n).map(|x| x as f32).collect()).unwrap()
    }

    #[test]
    fn test_scale_intensity_range() {
        let data = ArrayD::from_shape_vec(IxDyn(&[4]), vec![-50.0, 0.0, 25.0, 150.0]).unwrap();
        let result = ScaleIntensity::new().apply(data, &mut rng()).unwrap();

        assert!((result[0] - 0.0).abs() < 1e-6);
        assert!((result[3] - 1.0).abs() < 1e-6);
        assert!(result.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_scale_intensity_constant_image() {
        let data = ArrayD::from_elem(IxDyn(&[3, 3]), 7.0);
        let result = ScaleIntensity::new().apply(data, &mut rng()).unwrap();
        assert!(result.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_normalize_intensity_statistics() {
        let data = grid(&[5, 5]);
        let result = NormalizeIntensity::new().apply(data, &mut rng()).unwrap();

        assert!(result.mean().unwrap().abs() < 1e-5);
        assert!((result.std(0.0) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_normalize_fixed_scalars() {
        let data = ArrayD::from_shape_vec(IxDyn(&[4]), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let result = Normalize::from_scalars(2.5, 1.0).unwrap().apply(data, &mut rng()).unwrap();

        assert!((result[0] - (-1.5)).abs() < 1e-6);
        assert!((result[3] - 1.5).abs() < 1e-6);
        assert!(Normalize::from_scalars(0.0, 0.0).is_err());
    }

    #[test]
    fn test_resize_2d_and_3d_shapes() {
        let image = AddChannel.apply(grid(&[10, 6]), &mut rng()).unwrap();
        let resized = Resize::new(vec![4, 4]).unwrap().apply(image, &mut rng()).unwrap();
        assert_eq!(resized.shape(), &[1, 4, 4]);

        let volume = AddChannel.apply(grid(&[3, 5, 7]), &mut rng()).unwrap();
        let resized = Resize::new(vec![6, 6, 6]).unwrap().apply(volume, &mut rng()).unwrap();
        assert_eq!(resized.shape(), &[1, 6, 6, 6]);
    }

    #[test]
    fn test_resize_linear_values() {
        // Upsampling [0, 1] to 4 samples at half-pixel centres.
        let data = ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![0.0, 1.0]).unwrap();
        let resized = Resize::new(vec![4]).unwrap().apply(data, &mut rng()).unwrap();
        let values: Vec<f32> = resized.iter().cloned().collect();

        let expected = [0.0, 0.25, 0.75, 1.0];
        for (v, e) in values.iter().zip(expected.iter()) {
            assert!((v - e).abs() < 1e-6, "{values:?}");
        }
    }

    #[test]
    fn test_resize_rank_mismatch() {
        let err = Resize::new(vec![4, 4, 4]).unwrap().apply(grid(&[1, 4, 4]), &mut rng());
        assert!(matches!(err, Err(TransformError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_rotate_quarter_turn() {
        // [[0, 1], [2, 3]] rotated counter-clockwise -> [[1, 3], [0, 2]]
        let data = grid(&[1, 2, 2]);
        let rotated = RandRotate90::rotate(data.clone(), 1, 1, 2);
        let values: Vec<f32> = rotated.iter().cloned().collect();
        assert_eq!(values, vec![1.0, 3.0, 0.0, 2.0]);

        let full = RandRotate90::rotate(data.clone(), 4, 1, 2);
        assert_eq!(full, data);
    }

    #[test]
    fn test_rand_rotate_keeps_shape_on_non_square_plane() {
        let transform = RandRotate90::new(1.0, 3, [0, 1]).unwrap();
        let mut rng = rng();
        for _ in 0..20 {
            let out = transform.apply(grid(&[1, 4, 6, 2]), &mut rng).unwrap();
            assert_eq!(out.shape(), &[1, 4, 6, 2]);
            let mut sorted: Vec<f32> = out.iter().cloned().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(sorted, grid(&[48]).into_raw_vec_and_offset().0);
        }
    }

    #[test]
    fn test_rand_rotate_probability_zero_is_identity() {
        let transform = RandRotate90::new(0.0, 3, [0, 1]).unwrap();
        let data = grid(&[1, 3, 3]);
        assert_eq!(transform.apply(data.clone(), &mut rng()).unwrap(), data);
    }

    #[test]
    fn test_to_tensor_rejects_non_finite() {
        let data = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, f32::NAN, 2.0]).unwrap();
        assert!(matches!(
            ToTensor.apply(data, &mut rng()),
            Err(TransformError::NonFinite { count: 1 })
        ));
    }

    #[test]
    fn test_standard_chain_output_shape() {
        let config = DataConfig {
            target_shape: vec![8, 8],
            ..DataConfig::default()
        };
        let train = standard_chain(&config, Phase::Train).unwrap();
        let eval = standard_chain(&config, Phase::Eval).unwrap();
        assert!(train.names().contains(&"RandRotate90"));
        assert!(!eval.names().contains(&"RandRotate90"));

        let out = train.apply(grid(&[20, 30]), &mut rng()).unwrap();
        assert_eq!(out.shape(), &[1, 8, 8]);
        assert!(out.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }
}
