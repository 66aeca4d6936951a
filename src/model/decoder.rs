// Decoder half of the autoencoder
// Two conv -> relu -> upsample -> batch norm stages, then flatten and dense.
// Batch norm follows the upsample here, unlike the encoder where it precedes the pool.

use ndarray::Array2;

use crate::model::layers::{batch_norm, dense, flatten, relu, upsample1d, BatchNormParams, Tensor3D, TensorResult};
use crate::model::weights::{ConvLayer, DecoderWeights, RESIZE_FACTOR};

/// Expands a latent tensor back to a (batch, input_dim) reconstruction
pub struct Decoder<'w> {
    weights: &'w DecoderWeights,
    epsilon: f64,
}

impl<'w> Decoder<'w> {
    pub fn new(weights: &'w DecoderWeights, epsilon: f64) -> Self {
        Decoder { weights, epsilon }
    }

    pub fn decode(&self, latent: &Tensor3D) -> TensorResult<Array2<f64>> {
        let x = self.stage(latent, &self.weights.conv1, &self.weights.norm1)?;
        let x = self.stage(&x, &self.weights.conv2, &self.weights.norm2)?;
        let features = flatten(&x);
        log::debug!("Decoded {:?} -> {} features", latent.dim(), features.ncols());
        dense(&features, &self.weights.dense.weights, &self.weights.dense.bias)
    }

    fn stage(&self, x: &Tensor3D, conv: &ConvLayer, norm: &BatchNormParams) -> TensorResult<Tensor3D> {
        let x = relu(&conv.forward(x)?);
        let x = upsample1d(&x, RESIZE_FACTOR)?;
        batch_norm(&x, norm, self.epsilon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::layers::{BatchNormParams, BATCH_NORM_EPSILON};
    use crate::model::weights::WeightSet;
    use ndarray::{Array1, Array3};

    #[test]
    fn test_reconstruction_shape() {
        let weights = WeightSet::identity(188, 3, [8, 4, 4, 8], BATCH_NORM_EPSILON);
        let decoder = Decoder::new(&weights.decoder, BATCH_NORM_EPSILON);
        let latent = Array3::from_elem((3, 47, 4), 0.25);
        let out = decoder.decode(&latent).unwrap();
        assert_eq!(out.dim(), (3, 188));
        for v in out.iter() {
            assert!((v - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn test_final_norm_shift_reaches_every_position() {
        let mut weights = WeightSet::identity(8, 1, [1, 1, 1, 1], 0.0);
        weights.decoder.norm2 = BatchNormParams {
            gamma: Array1::ones(1),
            beta: Array1::from_elem(1, -1.0),
            moving_mean: Array1::zeros(1),
            moving_variance: Array1::ones(1),
        };
        let decoder = Decoder::new(&weights.decoder, 0.0);
        let latent = Array3::from_shape_vec((1, 2, 1), vec![2.0, 3.0]).unwrap();
        let out = decoder.decode(&latent).unwrap();
        assert_eq!(
            out.row(0).to_vec(),
            vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0]
        );
    }

    #[test]
    fn test_rejects_wrong_latent_channels() {
        let weights = WeightSet::identity(188, 3, [8, 4, 4, 8], BATCH_NORM_EPSILON);
        let decoder = Decoder::new(&weights.decoder, BATCH_NORM_EPSILON);
        let latent = Array3::zeros((1, 47, 3));
        assert!(decoder.decode(&latent).is_err());
    }
}
