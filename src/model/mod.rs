// Convolutional autoencoder
// Layer primitives, weight set, encoder/decoder stacks and the scoring pipeline

pub mod autoencoder;
pub mod decoder;
pub mod encoder;
pub mod layers;
pub mod weights;

pub use autoencoder::{Autoencoder, ErrorMetric, ReconstructionResult, Score};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use layers::{BatchNormParams, Padding, Tensor3D, TensorError, TensorResult, BATCH_NORM_EPSILON};
pub use weights::{WeightError, WeightResult, WeightSet, MEMBER_NAMES};
