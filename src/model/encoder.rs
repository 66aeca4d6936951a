// Encoder half of the autoencoder
// Two conv -> relu -> batch norm -> max pool stages

use crate::model::layers::{batch_norm, max_pool1d, relu, BatchNormParams, Padding, Tensor3D, TensorResult};
use crate::model::weights::{ConvLayer, EncoderWeights, RESIZE_FACTOR};

/// Compresses a (batch, input_dim, 1) signal into the latent tensor
pub struct Encoder<'w> {
    weights: &'w EncoderWeights,
    epsilon: f64,
}

impl<'w> Encoder<'w> {
    pub fn new(weights: &'w EncoderWeights, epsilon: f64) -> Self {
        Encoder { weights, epsilon }
    }

    pub fn encode(&self, x: &Tensor3D) -> TensorResult<Tensor3D> {
        let x = self.stage(x, &self.weights.conv1, &self.weights.norm1)?;
        let latent = self.stage(&x, &self.weights.conv2, &self.weights.norm2)?;
        log::debug!("Encoded {:?} -> latent {:?}", x.dim(), latent.dim());
        Ok(latent)
    }

    fn stage(&self, x: &Tensor3D, conv: &ConvLayer, norm: &BatchNormParams) -> TensorResult<Tensor3D> {
        let x = relu(&conv.forward(x)?);
        let x = batch_norm(&x, norm, self.epsilon)?;
        max_pool1d(&x, RESIZE_FACTOR, Padding::Same)
    }
}
