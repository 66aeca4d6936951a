// Tensor primitives for 1-D convolutional inference
// Every primitive works on (batch, length, channels) arrays, checks its shape
// preconditions once up front, and never mutates its input

use ndarray::{s, Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rank-3 activation tensor laid out as (batch, length, channels)
pub type Tensor3D = Array3<f64>;

/// Default epsilon added to the moving variance in batch normalization
pub const BATCH_NORM_EPSILON: f64 = 1e-5;

#[derive(Debug, Error, PartialEq)]
pub enum TensorError {
    #[error("Shape mismatch in {op}: expected {expected}, got {actual}")]
    ShapeMismatch {
        op: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Invalid parameter for {op}: {message}")]
    InvalidParameter { op: &'static str, message: String },
}

pub type TensorResult<T> = Result<T, TensorError>;

impl TensorError {
    pub(crate) fn shape(op: &'static str, expected: impl ToString, actual: impl ToString) -> Self {
        TensorError::ShapeMismatch {
            op,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Length-axis padding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    /// Zero-pad so a stride-1 window keeps the length (odd kernels)
    Same,
    /// No padding
    Valid,
}

/// Inference-time batch normalization parameters, one entry per channel
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormParams {
    pub gamma: Array1<f64>,
    pub beta: Array1<f64>,
    pub moving_mean: Array1<f64>,
    pub moving_variance: Array1<f64>,
}

impl BatchNormParams {
    /// Build from a stacked (4, channels) array ordered gamma, beta, mean, variance
    pub fn from_stacked(stacked: &Array2<f64>) -> TensorResult<Self> {
        if stacked.nrows() != 4 {
            return Err(TensorError::shape(
                "batch_norm",
                "(4, channels)",
                format!("{:?}", stacked.shape()),
            ));
        }

        Ok(BatchNormParams {
            gamma: stacked.row(0).to_owned(),
            beta: stacked.row(1).to_owned(),
            moving_mean: stacked.row(2).to_owned(),
            moving_variance: stacked.row(3).to_owned(),
        })
    }

    /// Inverse of `from_stacked`
    pub fn to_stacked(&self) -> Array2<f64> {
        let channels = self.channels();
        let mut stacked = Array2::zeros((4, channels));
        stacked.row_mut(0).assign(&self.gamma);
        stacked.row_mut(1).assign(&self.beta);
        stacked.row_mut(2).assign(&self.moving_mean);
        stacked.row_mut(3).assign(&self.moving_variance);
        stacked
    }

    /// Parameters that leave a channel unchanged for the given epsilon
    pub fn identity(channels: usize, epsilon: f64) -> Self {
        BatchNormParams {
            gamma: Array1::ones(channels),
            beta: Array1::zeros(channels),
            moving_mean: Array1::zeros(channels),
            moving_variance: Array1::from_elem(channels, 1.0 - epsilon),
        }
    }

    pub fn channels(&self) -> usize {
        self.gamma.len()
    }

    fn check(&self, channels: usize) -> TensorResult<()> {
        let lengths = [
            self.gamma.len(),
            self.beta.len(),
            self.moving_mean.len(),
            self.moving_variance.len(),
        ];
        if lengths.iter().any(|&len| len != channels) {
            return Err(TensorError::shape(
                "batch_norm",
                format!("{} values per parameter", channels),
                format!("{:?}", lengths),
            ));
        }
        Ok(())
    }
}

/// Length of a conv1d output for a given input length
pub fn conv1d_output_len(
    length: usize,
    kernel_len: usize,
    stride: usize,
    padding: Padding,
) -> Option<usize> {
    let pad = match padding {
        Padding::Same => kernel_len / 2,
        Padding::Valid => 0,
    };
    let padded = length + 2 * pad;
    if stride == 0 || kernel_len == 0 || padded < kernel_len {
        return None;
    }
    Some((padded - kernel_len) / stride + 1)
}

/// Length of a max_pool1d output for a given input length
pub fn max_pool1d_output_len(length: usize, pool_size: usize, padding: Padding) -> Option<usize> {
    if pool_size == 0 {
        return None;
    }
    let padded = match padding {
        Padding::Same if length % pool_size != 0 => length + 1,
        _ => length,
    };
    Some(padded / pool_size)
}

/// 1-D convolution with a (kernel_len, in_channels, out_channels) kernel
///
/// `Padding::Same` pads kernel_len / 2 zeros on both sides of the length axis.
/// Even kernel lengths therefore produce one extra output position.
pub fn conv1d(
    x: &Tensor3D,
    kernel: &Array3<f64>,
    bias: &Array1<f64>,
    stride: usize,
    padding: Padding,
) -> TensorResult<Tensor3D> {
    let (batch, length, in_channels) = x.dim();
    let (kernel_len, kernel_in, out_channels) = kernel.dim();

    if stride == 0 {
        return Err(TensorError::InvalidParameter {
            op: "conv1d",
            message: "stride must be positive".to_string(),
        });
    }
    if kernel_in != in_channels {
        return Err(TensorError::shape(
            "conv1d",
            format!("kernel with {} input channels", in_channels),
            format!("kernel {:?}", kernel.shape()),
        ));
    }
    if bias.len() != out_channels {
        return Err(TensorError::shape(
            "conv1d",
            format!("bias of length {}", out_channels),
            format!("bias of length {}", bias.len()),
        ));
    }
    let output_len = conv1d_output_len(length, kernel_len, stride, padding).ok_or_else(|| {
        TensorError::shape(
            "conv1d",
            format!("padded length >= kernel length {}", kernel_len),
            format!("length {}", length),
        )
    })?;

    let pad = match padding {
        Padding::Same => kernel_len / 2,
        Padding::Valid => 0,
    };
    let mut padded = Array3::<f64>::zeros((batch, length + 2 * pad, in_channels));
    padded.slice_mut(s![.., pad..pad + length, ..]).assign(x);

    let mut output = Array3::<f64>::zeros((batch, output_len, out_channels));
    for b in 0..batch {
        for i in 0..output_len {
            let start = i * stride;
            let window = padded.slice(s![b, start..start + kernel_len, ..]);
            for j in 0..out_channels {
                let taps = kernel.slice(s![.., .., j]);
                output[[b, i, j]] = (&window * &taps).sum() + bias[j];
            }
        }
    }

    Ok(output)
}

/// Elementwise max(0, x)
pub fn relu(x: &Tensor3D) -> Tensor3D {
    x.mapv(|v| if v > 0.0 { v } else { 0.0 })
}

/// Inference-mode batch normalization with fixed moving statistics
pub fn batch_norm(x: &Tensor3D, params: &BatchNormParams, epsilon: f64) -> TensorResult<Tensor3D> {
    params.check(x.dim().2)?;

    let std_dev = params.moving_variance.mapv(|v| (v + epsilon).sqrt());
    if std_dev.iter().any(|&s| !(s > 0.0 && s.is_finite())) {
        return Err(TensorError::InvalidParameter {
            op: "batch_norm",
            message: format!("moving variance + epsilon must be positive (epsilon {})", epsilon),
        });
    }
    let normalized = (x - &params.moving_mean) / &std_dev;
    Ok(normalized * &params.gamma + &params.beta)
}

/// Max pooling along the length axis
///
/// `Padding::Same` appends a single zero when the length is not a multiple
/// of the pool size, so an all-negative tail window pools to 0.
pub fn max_pool1d(x: &Tensor3D, pool_size: usize, padding: Padding) -> TensorResult<Tensor3D> {
    let (batch, length, channels) = x.dim();
    let output_len = max_pool1d_output_len(length, pool_size, padding).ok_or_else(|| {
        TensorError::InvalidParameter {
            op: "max_pool1d",
            message: "pool size must be positive".to_string(),
        }
    })?;
    if output_len == 0 {
        return Err(TensorError::shape(
            "max_pool1d",
            format!("length >= {}", pool_size),
            format!("length {}", length),
        ));
    }

    let padded_len = output_len * pool_size;
    let mut padded = Array3::<f64>::zeros((batch, padded_len.max(length), channels));
    padded.slice_mut(s![.., ..length, ..]).assign(x);

    let mut output = Array3::<f64>::zeros((batch, output_len, channels));
    for i in 0..output_len {
        let start = i * pool_size;
        let window = padded.slice(s![.., start..start + pool_size, ..]);
        let pooled = window.fold_axis(Axis(1), f64::NEG_INFINITY, |&acc, &v| acc.max(v));
        output.slice_mut(s![.., i, ..]).assign(&pooled);
    }

    Ok(output)
}

/// Nearest-neighbour upsampling: every position repeated `size` times
pub fn upsample1d(x: &Tensor3D, size: usize) -> TensorResult<Tensor3D> {
    if size == 0 {
        return Err(TensorError::InvalidParameter {
            op: "upsample1d",
            message: "size must be positive".to_string(),
        });
    }

    let (batch, length, channels) = x.dim();
    Ok(Array3::from_shape_fn(
        (batch, length * size, channels),
        |(b, i, c)| x[[b, i / size, c]],
    ))
}

/// Row-major flatten to (batch, length * channels)
pub fn flatten(x: &Tensor3D) -> Array2<f64> {
    let (batch, length, channels) = x.dim();
    Array2::from_shape_fn((batch, length * channels), |(b, f)| {
        x[[b, f / channels, f % channels]]
    })
}

/// Fully connected projection x . W + b
pub fn dense(x: &Array2<f64>, weights: &Array2<f64>, bias: &Array1<f64>) -> TensorResult<Array2<f64>> {
    if x.ncols() != weights.nrows() {
        return Err(TensorError::shape(
            "dense",
            format!("{} input features", weights.nrows()),
            format!("{} input features", x.ncols()),
        ));
    }
    if bias.len() != weights.ncols() {
        return Err(TensorError::shape(
            "dense",
            format!("bias of length {}", weights.ncols()),
            format!("bias of length {}", bias.len()),
        ));
    }

    Ok(x.dot(weights) + bias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sequence(batch: usize, length: usize, channels: usize) -> Tensor3D {
        Array3::from_shape_fn((batch, length, channels), |(b, i, c)| {
            (b * 100 + i * 10 + c) as f64
        })
    }

    #[test]
    fn test_conv1d_same_preserves_length() {
        let x = sequence(2, 11, 3);
        let kernel = Array3::from_elem((5, 3, 4), 0.1);
        let bias = Array1::zeros(4);
        let y = conv1d(&x, &kernel, &bias, 1, Padding::Same).unwrap();
        assert_eq!(y.dim(), (2, 11, 4));
    }

    #[test]
    fn test_conv1d_even_kernel_grows_by_one() {
        let x = sequence(1, 10, 1);
        let kernel = Array3::from_elem((4, 1, 1), 1.0);
        let y = conv1d(&x, &kernel, &Array1::zeros(1), 1, Padding::Same).unwrap();
        assert_eq!(y.dim(), (1, 11, 1));
    }

    #[test]
    fn test_conv1d_known_values() {
        // x = [1, 2, 3], kernel = [1, 1, 1], same padding -> [3, 6, 5] + bias
        let x = Array3::from_shape_vec((1, 3, 1), vec![1.0, 2.0, 3.0]).unwrap();
        let kernel = Array3::from_elem((3, 1, 1), 1.0);
        let bias = array![0.5];
        let y = conv1d(&x, &kernel, &bias, 1, Padding::Same).unwrap();
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![3.5, 6.5, 5.5]);
    }

    #[test]
    fn test_conv1d_mixes_input_channels() {
        // Single tap summing two input channels into one output channel
        let x = Array3::from_shape_vec((1, 2, 2), vec![1.0, 10.0, 2.0, 20.0]).unwrap();
        let kernel = Array3::from_shape_vec((1, 2, 1), vec![1.0, 1.0]).unwrap();
        let y = conv1d(&x, &kernel, &Array1::zeros(1), 1, Padding::Valid).unwrap();
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![11.0, 22.0]);
    }

    #[test]
    fn test_conv1d_stride_two() {
        let x = sequence(1, 9, 1);
        let kernel = Array3::from_elem((3, 1, 2), 1.0);
        let y = conv1d(&x, &kernel, &Array1::zeros(2), 2, Padding::Valid).unwrap();
        // (9 - 3) / 2 + 1
        assert_eq!(y.dim(), (1, 4, 2));
        assert_eq!(y[[0, 1, 0]], 20.0 + 30.0 + 40.0);
    }

    #[test]
    fn test_conv1d_rejects_channel_mismatch() {
        let x = sequence(1, 8, 2);
        let kernel = Array3::zeros((3, 1, 4));
        let err = conv1d(&x, &kernel, &Array1::zeros(4), 1, Padding::Same).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { op: "conv1d", .. }));
    }

    #[test]
    fn test_conv1d_rejects_bias_mismatch() {
        let x = sequence(1, 8, 1);
        let kernel = Array3::zeros((3, 1, 4));
        let err = conv1d(&x, &kernel, &Array1::zeros(3), 1, Padding::Same).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_conv1d_rejects_zero_stride() {
        let x = sequence(1, 8, 1);
        let kernel = Array3::zeros((3, 1, 1));
        let err = conv1d(&x, &kernel, &Array1::zeros(1), 0, Padding::Same).unwrap_err();
        assert!(matches!(err, TensorError::InvalidParameter { .. }));
    }

    #[test]
    fn test_conv1d_rejects_short_valid_input() {
        let x = sequence(1, 2, 1);
        let kernel = Array3::zeros((3, 1, 1));
        assert!(conv1d(&x, &kernel, &Array1::zeros(1), 1, Padding::Valid).is_err());
    }

    #[test]
    fn test_relu() {
        let x = Array3::from_shape_vec((1, 4, 1), vec![-2.0, -0.0, 0.5, 3.0]).unwrap();
        let y = relu(&x);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 0.5, 3.0]);
    }

    #[test]
    fn test_batch_norm_identity() {
        let x = sequence(2, 6, 3);
        let params = BatchNormParams::identity(3, BATCH_NORM_EPSILON);
        let y = batch_norm(&x, &params, BATCH_NORM_EPSILON).unwrap();
        for (a, b) in x.iter().zip(y.iter()) {
            assert!((a - b).abs() < 1e-9 * (1.0 + a.abs()));
        }
    }

    #[test]
    fn test_batch_norm_per_channel_affine() {
        let x = Array3::from_elem((1, 2, 2), 4.0);
        let params = BatchNormParams {
            gamma: array![2.0, 1.0],
            beta: array![1.0, -1.0],
            moving_mean: array![2.0, 0.0],
            moving_variance: array![4.0, 16.0],
        };
        let y = batch_norm(&x, &params, 0.0).unwrap();
        // channel 0: 2 * (4 - 2) / 2 + 1 = 3; channel 1: (4 - 0) / 4 - 1 = 0
        assert_eq!(y[[0, 0, 0]], 3.0);
        assert_eq!(y[[0, 1, 0]], 3.0);
        assert_eq!(y[[0, 0, 1]], 0.0);
    }

    #[test]
    fn test_batch_norm_rejects_zero_denominator() {
        let x = sequence(1, 4, 2);
        let params = BatchNormParams {
            gamma: array![1.0, 1.0],
            beta: array![0.0, 0.0],
            moving_mean: array![0.0, 0.0],
            moving_variance: array![1.0, 0.0],
        };
        assert!(matches!(
            batch_norm(&x, &params, 0.0).unwrap_err(),
            TensorError::InvalidParameter { op: "batch_norm", .. }
        ));
        // Any positive epsilon keeps a zero variance usable
        assert!(batch_norm(&x, &params, BATCH_NORM_EPSILON).is_ok());
    }

    #[test]
    fn test_batch_norm_rejects_wrong_channels() {
        let x = sequence(1, 4, 3);
        let params = BatchNormParams::identity(2, BATCH_NORM_EPSILON);
        assert!(batch_norm(&x, &params, BATCH_NORM_EPSILON).is_err());
    }

    #[test]
    fn test_stacked_round_trip() {
        let params = BatchNormParams {
            gamma: array![1.0, 2.0],
            beta: array![3.0, 4.0],
            moving_mean: array![5.0, 6.0],
            moving_variance: array![7.0, 8.0],
        };
        let stacked = params.to_stacked();
        assert_eq!(stacked.shape(), &[4, 2]);
        assert_eq!(BatchNormParams::from_stacked(&stacked).unwrap(), params);
    }

    #[test]
    fn test_max_pool_even_length() {
        let x = Array3::from_shape_vec((1, 4, 1), vec![1.0, 5.0, 3.0, 2.0]).unwrap();
        let y = max_pool1d(&x, 2, Padding::Same).unwrap();
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![5.0, 3.0]);
    }

    #[test]
    fn test_max_pool_odd_length_pads_zero() {
        let x = Array3::from_shape_vec((1, 5, 1), vec![1.0, 5.0, 3.0, 2.0, -4.0]).unwrap();
        let y = max_pool1d(&x, 2, Padding::Same).unwrap();
        // Tail window is [-4, 0]
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![5.0, 3.0, 0.0]);

        let valid = max_pool1d(&x, 2, Padding::Valid).unwrap();
        assert_eq!(valid.dim(), (1, 2, 1));
    }

    #[test]
    fn test_max_pool_per_channel_and_batch() {
        let x = sequence(2, 4, 2);
        let y = max_pool1d(&x, 2, Padding::Same).unwrap();
        assert_eq!(y.dim(), (2, 2, 2));
        assert_eq!(y[[1, 1, 1]], x[[1, 3, 1]]);
    }

    #[test]
    fn test_max_pool_rejects_zero_pool() {
        let x = sequence(1, 4, 1);
        assert!(max_pool1d(&x, 0, Padding::Same).is_err());
    }

    #[test]
    fn test_upsample_repeats() {
        let x = Array3::from_shape_vec((1, 3, 1), vec![1.0, 2.0, 3.0]).unwrap();
        let y = upsample1d(&x, 2).unwrap();
        assert_eq!(
            y.iter().copied().collect::<Vec<_>>(),
            vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]
        );
    }

    #[test]
    fn test_pool_then_upsample_lengths() {
        for length in [188usize, 94, 47, 9, 2, 1] {
            let x = sequence(1, length, 2);
            let pooled = max_pool1d(&x, 2, Padding::Same).unwrap();
            let restored = upsample1d(&pooled, 2).unwrap();
            let expected = if length % 2 == 0 { length } else { length + 1 };
            assert_eq!(restored.dim(), (1, expected, 2));
        }
    }

    #[test]
    fn test_flatten_row_major() {
        let x = Array3::from_shape_vec((1, 2, 3), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let flat = flatten(&x);
        assert_eq!(flat.shape(), &[1, 6]);
        assert_eq!(flat.row(0).to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_dense() {
        let x = array![[1.0, 2.0]];
        let w = array![[1.0, 0.0, 2.0], [0.0, 1.0, 1.0]];
        let b = array![0.5, 0.5, 0.5];
        let y = dense(&x, &w, &b).unwrap();
        assert_eq!(y, array![[1.5, 2.5, 4.5]]);
    }

    #[test]
    fn test_dense_rejects_feature_mismatch() {
        let x = array![[1.0, 2.0, 3.0]];
        let w = Array2::zeros((2, 4));
        assert!(dense(&x, &w, &Array1::zeros(4)).is_err());
        let x = array![[1.0, 2.0]];
        assert!(dense(&x, &w, &Array1::zeros(3)).is_err());
    }
}
