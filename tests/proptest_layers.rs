//! Property-based tests for the tensor primitives.

use ecg_sentinel_lib::model::layers::{
    conv1d, conv1d_output_len, max_pool1d, relu, upsample1d, Padding, Tensor3D,
};
use ndarray::{Array1, Array3};
use proptest::prelude::*;

/// (batch, length, channels) tensors with values in [-5, 5]
fn tensor() -> impl Strategy<Value = Tensor3D> {
    (1..3usize, 1..40usize, 1..4usize).prop_flat_map(|(batch, length, channels)| {
        prop::collection::vec(-5.0..5.0f64, batch * length * channels).prop_map(move |data| {
            Array3::from_shape_vec((batch, length, channels), data).unwrap()
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: odd kernels keep the length under same padding
    #[test]
    fn same_conv_keeps_length(x in tensor(), half in 0..4usize, out_channels in 1..4usize) {
        let (batch, length, channels) = x.dim();
        let kernel_len = 2 * half + 1;
        let kernel = Array3::from_elem((kernel_len, channels, out_channels), 0.1);
        let bias = Array1::zeros(out_channels);

        let y = conv1d(&x, &kernel, &bias, 1, Padding::Same).unwrap();
        prop_assert_eq!(y.dim(), (batch, length, out_channels));
        prop_assert_eq!(conv1d_output_len(length, kernel_len, 1, Padding::Same), Some(length));
    }

    /// Property: a centred unit tap is the identity
    #[test]
    fn centred_tap_is_identity(x in tensor(), half in 0..4usize) {
        let channels = x.dim().2;
        let kernel_len = 2 * half + 1;
        let mut kernel = Array3::zeros((kernel_len, channels, channels));
        for c in 0..channels {
            kernel[[half, c, c]] = 1.0;
        }

        let y = conv1d(&x, &kernel, &Array1::zeros(channels), 1, Padding::Same).unwrap();
        prop_assert_eq!(y, x);
    }

    /// Property: relu output is non-negative and keeps positive values
    #[test]
    fn relu_clamps(x in tensor()) {
        let y = relu(&x);
        for (a, b) in x.iter().zip(y.iter()) {
            prop_assert!(*b >= 0.0);
            prop_assert_eq!(*b, a.max(0.0));
        }
    }

    /// Property: same pooling halves the length rounding up
    #[test]
    fn same_pool_length(x in tensor()) {
        let (batch, length, channels) = x.dim();
        let y = max_pool1d(&x, 2, Padding::Same).unwrap();
        prop_assert_eq!(y.dim(), (batch, (length + 1) / 2, channels));

        // Each pooled value is attained by one of its inputs (or the pad zero)
        for b in 0..batch {
            for i in 0..y.dim().1 {
                for c in 0..channels {
                    let left = x[[b, 2 * i, c]];
                    let right = if 2 * i + 1 < length { x[[b, 2 * i + 1, c]] } else { 0.0 };
                    prop_assert_eq!(y[[b, i, c]], left.max(right));
                }
            }
        }
    }

    /// Property: pooling an upsampled tensor gives the tensor back
    #[test]
    fn pool_undoes_upsample(x in tensor()) {
        let up = upsample1d(&x, 2).unwrap();
        prop_assert_eq!(up.dim().1, x.dim().1 * 2);
        prop_assert_eq!(max_pool1d(&up, 2, Padding::Same).unwrap(), x);
    }
}
