// Autoencoder weight set
// Loads the fourteen trained parameter arrays, checks them against the layer
// topology for a given input length, and keeps them immutable afterwards

use ndarray::{Array1, Array2, Array3, Ix1, Ix2, Ix3};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::layers::{
    conv1d, conv1d_output_len, max_pool1d_output_len, BatchNormParams, Padding, Tensor3D,
    TensorResult,
};
use crate::storage::{read_tensor_file, write_tensor_file, TensorFile, TensorFileError};

/// File stem of every weight set member, in the order `members` yields them
pub const MEMBER_NAMES: [&str; 14] = [
    "en_conv_1_wts",
    "en_conv_1_b",
    "en_conv_2_wts",
    "en_conv_2_b",
    "de_conv_1_wts",
    "de_conv_1_b",
    "de_conv_2_wts",
    "de_conv_2_b",
    "en_bn1",
    "en_bn2",
    "de_bn1",
    "de_bn2",
    "de_dense_wts",
    "de_dense_b",
];

/// Pool and upsample factor shared by encoder and decoder stages
pub const RESIZE_FACTOR: usize = 2;

#[derive(Debug, Error)]
pub enum WeightError {
    #[error("Weight member {member} not found in {dir} (looked for .ecgt and .npy)")]
    Missing { member: String, dir: PathBuf },

    #[error("Weight member {member} is unreadable: {source}")]
    Malformed {
        member: String,
        #[source]
        source: TensorFileError,
    },

    #[error("Weight member {member} has an inconsistent shape: {message}")]
    Shape { member: String, message: String },

    #[error("Weight member {0} contains non-finite values")]
    NonFinite(String),

    #[error("Weight member {0} has a negative moving variance")]
    NegativeVariance(String),
}

pub type WeightResult<T> = Result<T, WeightError>;

fn shape_error(member: &str, message: impl Into<String>) -> WeightError {
    WeightError::Shape {
        member: member.to_string(),
        message: message.into(),
    }
}

/// Convolution kernel (kernel_len, in_channels, out_channels) with its bias
#[derive(Debug, Clone, PartialEq)]
pub struct ConvLayer {
    pub kernel: Array3<f64>,
    pub bias: Array1<f64>,
}

impl ConvLayer {
    pub fn kernel_len(&self) -> usize {
        self.kernel.dim().0
    }

    pub fn in_channels(&self) -> usize {
        self.kernel.dim().1
    }

    pub fn out_channels(&self) -> usize {
        self.kernel.dim().2
    }

    /// Stride 1, same padding: the only configuration the topology uses
    pub fn forward(&self, x: &Tensor3D) -> TensorResult<Tensor3D> {
        conv1d(x, &self.kernel, &self.bias, 1, Padding::Same)
    }

    /// Pass-through kernel: the centre tap copies input channel c to output c
    pub fn identity(kernel_len: usize, channels: usize) -> Self {
        let kernel_len = kernel_len.max(1);
        let mut kernel = Array3::zeros((kernel_len, channels, channels));
        for c in 0..channels {
            kernel[[kernel_len / 2, c, c]] = 1.0;
        }
        ConvLayer {
            kernel,
            bias: Array1::zeros(channels),
        }
    }
}

/// Fully connected projection (features, outputs) with its bias
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer {
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderWeights {
    pub conv1: ConvLayer,
    pub norm1: BatchNormParams,
    pub conv2: ConvLayer,
    pub norm2: BatchNormParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecoderWeights {
    pub conv1: ConvLayer,
    pub norm1: BatchNormParams,
    pub conv2: ConvLayer,
    pub norm2: BatchNormParams,
    pub dense: DenseLayer,
}

/// Every trained parameter of the autoencoder
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSet {
    pub encoder: EncoderWeights,
    pub decoder: DecoderWeights,
}

impl WeightSet {
    /// Check every member against the topology for `input_dim`
    pub fn validate(&self, input_dim: usize) -> WeightResult<()> {
        let enc = &self.encoder;
        let dec = &self.decoder;

        check_conv("en_conv_1", &enc.conv1, 1)?;
        check_conv("en_conv_2", &enc.conv2, enc.conv1.out_channels())?;
        check_conv("de_conv_1", &dec.conv1, enc.conv2.out_channels())?;
        check_conv("de_conv_2", &dec.conv2, dec.conv1.out_channels())?;

        check_norm("en_bn1", &enc.norm1, enc.conv1.out_channels())?;
        check_norm("en_bn2", &enc.norm2, enc.conv2.out_channels())?;
        check_norm("de_bn1", &dec.norm1, dec.conv1.out_channels())?;
        check_norm("de_bn2", &dec.norm2, dec.conv2.out_channels())?;

        let flattened = self.flattened_features(input_dim)?;
        let dense = &dec.dense;
        if dense.weights.dim() != (flattened, input_dim) {
            return Err(shape_error(
                "de_dense_wts",
                format!(
                    "expected ({}, {}), found {:?}",
                    flattened,
                    input_dim,
                    dense.weights.shape()
                ),
            ));
        }
        if dense.bias.len() != input_dim {
            return Err(shape_error(
                "de_dense_b",
                format!("expected {} values, found {}", input_dim, dense.bias.len()),
            ));
        }
        check_finite("de_dense_wts", dense.weights.iter())?;
        check_finite("de_dense_b", dense.bias.iter())?;

        Ok(())
    }

    /// Length and channel count of the encoder output for `input_dim`
    pub fn latent_shape(&self, input_dim: usize) -> WeightResult<(usize, usize)> {
        let enc = &self.encoder;
        let len = conv_then_pool("en_conv_1_wts", input_dim, &enc.conv1)?;
        let len = conv_then_pool("en_conv_2_wts", len, &enc.conv2)?;
        Ok((len, enc.conv2.out_channels()))
    }

    /// Number of features the decoder flattens into the dense layer
    pub fn flattened_features(&self, input_dim: usize) -> WeightResult<usize> {
        let dec = &self.decoder;
        let (latent_len, _) = self.latent_shape(input_dim)?;
        let len = conv_then_upsample("de_conv_1_wts", latent_len, &dec.conv1)?;
        let len = conv_then_upsample("de_conv_2_wts", len, &dec.conv2)?;
        Ok(len * dec.conv2.out_channels())
    }

    /// Identity-equivalent weights: pass-through kernels, zero biases, identity
    /// batch norms and a dense layer that averages each position's channels
    ///
    /// A zero kernel length or channel count is raised to 1.
    pub fn identity(input_dim: usize, kernel_len: usize, channels: [usize; 4], epsilon: f64) -> Self {
        let kernel_len = kernel_len.max(1);
        let channels = channels.map(|c| c.max(1));
        let widen = |from: usize, to: usize| {
            let mut kernel = Array3::zeros((kernel_len, from, to));
            for c in 0..to {
                kernel[[kernel_len / 2, c % from, c]] = 1.0;
            }
            ConvLayer {
                kernel,
                bias: Array1::zeros(to),
            }
        };

        let [c1, c2, c3, c4] = channels;
        let latent_len = {
            let pooled = |len: usize| (len + len % RESIZE_FACTOR) / RESIZE_FACTOR;
            pooled(pooled(input_dim))
        };
        let decoded_len = latent_len * RESIZE_FACTOR * RESIZE_FACTOR;

        // Output i reads position i (clamped) of the decoded sequence
        let mut dense = Array2::zeros((decoded_len * c4, input_dim));
        for i in 0..input_dim {
            let pos = i.min(decoded_len - 1);
            for c in 0..c4 {
                dense[[pos * c4 + c, i]] = 1.0 / c4 as f64;
            }
        }

        WeightSet {
            encoder: EncoderWeights {
                conv1: widen(1, c1),
                norm1: BatchNormParams::identity(c1, epsilon),
                conv2: widen(c1, c2),
                norm2: BatchNormParams::identity(c2, epsilon),
            },
            decoder: DecoderWeights {
                conv1: widen(c2, c3),
                norm1: BatchNormParams::identity(c3, epsilon),
                conv2: widen(c3, c4),
                norm2: BatchNormParams::identity(c4, epsilon),
                dense: DenseLayer {
                    weights: dense,
                    bias: Array1::zeros(input_dim),
                },
            },
        }
    }

    /// Load every member from `dir`, preferring .ecgt over .npy
    pub fn load_dir(dir: &Path) -> WeightResult<Self> {
        let weights = WeightSet {
            encoder: EncoderWeights {
                conv1: load_conv(dir, "en_conv_1")?,
                norm1: load_norm(dir, "en_bn1")?,
                conv2: load_conv(dir, "en_conv_2")?,
                norm2: load_norm(dir, "en_bn2")?,
            },
            decoder: DecoderWeights {
                conv1: load_conv(dir, "de_conv_1")?,
                norm1: load_norm(dir, "de_bn1")?,
                conv2: load_conv(dir, "de_conv_2")?,
                norm2: load_norm(dir, "de_bn2")?,
                dense: DenseLayer {
                    weights: load_member::<Ix2>(dir, "de_dense_wts")?,
                    bias: load_member::<Ix1>(dir, "de_dense_b")?,
                },
            },
        };

        log::info!(
            "Loaded weight set from {} (fingerprint {})",
            dir.display(),
            weights.fingerprint()
        );
        Ok(weights)
    }

    /// Write every member as .ecgt into `dir`
    pub fn save_dir(&self, dir: &Path) -> WeightResult<()> {
        for (member, tensor) in self.members() {
            let path = dir.join(format!("{}.ecgt", member));
            write_tensor_file(&path, &tensor).map_err(|source| WeightError::Malformed {
                member: member.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Members paired with their file stems, in `MEMBER_NAMES` order
    pub fn members(&self) -> Vec<(&'static str, TensorFile)> {
        let enc = &self.encoder;
        let dec = &self.decoder;
        vec![
            ("en_conv_1_wts", TensorFile::from_array(&enc.conv1.kernel)),
            ("en_conv_1_b", TensorFile::from_array(&enc.conv1.bias)),
            ("en_conv_2_wts", TensorFile::from_array(&enc.conv2.kernel)),
            ("en_conv_2_b", TensorFile::from_array(&enc.conv2.bias)),
            ("de_conv_1_wts", TensorFile::from_array(&dec.conv1.kernel)),
            ("de_conv_1_b", TensorFile::from_array(&dec.conv1.bias)),
            ("de_conv_2_wts", TensorFile::from_array(&dec.conv2.kernel)),
            ("de_conv_2_b", TensorFile::from_array(&dec.conv2.bias)),
            ("en_bn1", TensorFile::from_array(&enc.norm1.to_stacked())),
            ("en_bn2", TensorFile::from_array(&enc.norm2.to_stacked())),
            ("de_bn1", TensorFile::from_array(&dec.norm1.to_stacked())),
            ("de_bn2", TensorFile::from_array(&dec.norm2.to_stacked())),
            ("de_dense_wts", TensorFile::from_array(&dec.dense.weights)),
            ("de_dense_b", TensorFile::from_array(&dec.dense.bias)),
        ]
    }

    /// SHA256 over member names, shapes and values
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (member, tensor) in self.members() {
            hasher.update(member.as_bytes());
            for dim in &tensor.shape {
                hasher.update((*dim as u64).to_le_bytes());
            }
            for value in &tensor.data {
                hasher.update(value.to_le_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Total number of scalar parameters
    pub fn parameter_count(&self) -> usize {
        self.members().iter().map(|(_, t)| t.numel()).sum()
    }
}

fn conv_then_pool(member: &str, len: usize, conv: &ConvLayer) -> WeightResult<usize> {
    conv1d_output_len(len, conv.kernel_len(), 1, Padding::Same)
        .and_then(|len| max_pool1d_output_len(len, RESIZE_FACTOR, Padding::Same))
        .filter(|&len| len > 0)
        .ok_or_else(|| shape_error(member, format!("kernel does not fit length {}", len)))
}

fn conv_then_upsample(member: &str, len: usize, conv: &ConvLayer) -> WeightResult<usize> {
    conv1d_output_len(len, conv.kernel_len(), 1, Padding::Same)
        .map(|len| len * RESIZE_FACTOR)
        .ok_or_else(|| shape_error(member, format!("kernel does not fit length {}", len)))
}

fn check_conv(prefix: &str, conv: &ConvLayer, in_channels: usize) -> WeightResult<()> {
    let member = format!("{}_wts", prefix);
    if conv.kernel_len() == 0 || conv.out_channels() == 0 {
        return Err(shape_error(&member, "kernel has an empty axis"));
    }
    if conv.in_channels() != in_channels {
        return Err(shape_error(
            &member,
            format!(
                "expected {} input channels, found {}",
                in_channels,
                conv.in_channels()
            ),
        ));
    }
    if conv.bias.len() != conv.out_channels() {
        return Err(shape_error(
            &format!("{}_b", prefix),
            format!(
                "expected {} values, found {}",
                conv.out_channels(),
                conv.bias.len()
            ),
        ));
    }
    check_finite(&member, conv.kernel.iter())?;
    check_finite(&format!("{}_b", prefix), conv.bias.iter())
}

fn check_norm(member: &str, norm: &BatchNormParams, channels: usize) -> WeightResult<()> {
    let parameters = [
        &norm.gamma,
        &norm.beta,
        &norm.moving_mean,
        &norm.moving_variance,
    ];
    if parameters.iter().any(|p| p.len() != channels) {
        return Err(shape_error(
            member,
            format!("expected (4, {}) parameters", channels),
        ));
    }
    for p in parameters {
        check_finite(member, p.iter())?;
    }
    if norm.moving_variance.iter().any(|&v| v < 0.0) {
        return Err(WeightError::NegativeVariance(member.to_string()));
    }
    Ok(())
}

fn check_finite<'a>(member: &str, mut values: impl Iterator<Item = &'a f64>) -> WeightResult<()> {
    if values.any(|v| !v.is_finite()) {
        return Err(WeightError::NonFinite(member.to_string()));
    }
    Ok(())
}

fn member_path(dir: &Path, member: &str) -> WeightResult<PathBuf> {
    ["ecgt", "npy"]
        .iter()
        .map(|ext| dir.join(format!("{}.{}", member, ext)))
        .find(|path| path.is_file())
        .ok_or_else(|| WeightError::Missing {
            member: member.to_string(),
            dir: dir.to_path_buf(),
        })
}

fn load_member<D: ndarray::Dimension>(dir: &Path, member: &str) -> WeightResult<ndarray::Array<f64, D>> {
    let path = member_path(dir, member)?;
    let malformed = |source| WeightError::Malformed {
        member: member.to_string(),
        source,
    };
    let tensor = read_tensor_file(&path).map_err(malformed)?;
    log::debug!("Loaded {} {:?} from {}", member, tensor.shape, path.display());
    tensor.into_array::<D>().map_err(malformed)
}

fn load_conv(dir: &Path, prefix: &str) -> WeightResult<ConvLayer> {
    Ok(ConvLayer {
        kernel: load_member::<Ix3>(dir, &format!("{}_wts", prefix))?,
        bias: load_member::<Ix1>(dir, &format!("{}_b", prefix))?,
    })
}

fn load_norm(dir: &Path, member: &str) -> WeightResult<BatchNormParams> {
    let stacked = load_member::<Ix2>(dir, member)?;
    BatchNormParams::from_stacked(&stacked).map_err(|e| shape_error(member, e.to_string()))
}
