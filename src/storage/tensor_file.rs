// Native tensor file format (.ecgt)
//
// Layout, all integers little-endian:
//   magic   "ECGT"        4 bytes
//   version u8            currently 1
//   dtype   u8            1 = f32, 2 = f64
//   rank    u8
//   flags   u8            reserved, 0
//   dims    u64 x rank
//   data    numel x dtype size, row-major

use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::storage::npy;

const ECGT_MAGIC: &[u8; 4] = b"ECGT";
const ECGT_VERSION: u8 = 1;
const HEADER_LEN: usize = 8;

const DTYPE_F32: u8 = 1;
const DTYPE_F64: u8 = 2;

#[derive(Debug, Error)]
pub enum TensorFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File too short for a tensor header ({0} bytes)")]
    TooShort(usize),

    #[error("Invalid magic bytes: {0:?}")]
    BadMagic(Vec<u8>),

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("Unsupported element type {0}")]
    UnsupportedDtype(String),

    #[error("Payload size mismatch: expected {expected} bytes, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid NumPy file: {0}")]
    Npy(String),

    #[error("Invalid tensor shape: {0}")]
    Shape(String),
}

pub type TensorFileResult<T> = Result<T, TensorFileError>;

/// A dense row-major array of any rank, as stored on disk
#[derive(Debug, Clone, PartialEq)]
pub struct TensorFile {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl TensorFile {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> TensorFileResult<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(TensorFileError::Shape(format!(
                "shape {:?} holds {} values, got {}",
                shape,
                numel,
                data.len()
            )));
        }
        Ok(TensorFile { shape, data })
    }

    pub fn from_array<S, D>(array: &ArrayBase<S, D>) -> Self
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        TensorFile {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }

    /// Convert into an array of a fixed dimensionality
    pub fn into_array<D: Dimension>(self) -> TensorFileResult<ndarray::Array<f64, D>> {
        let shape = self.shape.clone();
        let dynamic = ArrayD::from_shape_vec(IxDyn(&self.shape), self.data)
            .map_err(|e| TensorFileError::Shape(e.to_string()))?;
        dynamic.into_dimensionality::<D>().map_err(|_| {
            TensorFileError::Shape(format!(
                "expected rank {}, found shape {:?}",
                D::NDIM.map(|n| n.to_string()).unwrap_or_else(|| "any".to_string()),
                shape
            ))
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

/// Serialize a tensor as .ecgt (always f64, so nothing is lost)
pub fn encode_ecgt(tensor: &TensorFile) -> TensorFileResult<Vec<u8>> {
    let rank = u8::try_from(tensor.rank())
        .map_err(|_| TensorFileError::Shape(format!("rank {} exceeds 255", tensor.rank())))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + tensor.rank() * 8 + tensor.numel() * 8);
    bytes.extend_from_slice(ECGT_MAGIC);
    bytes.push(ECGT_VERSION);
    bytes.push(DTYPE_F64);
    bytes.push(rank);
    bytes.push(0);

    for &dim in &tensor.shape {
        bytes.extend_from_slice(&(dim as u64).to_le_bytes());
    }
    for &value in &tensor.data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    Ok(bytes)
}

/// Parse an .ecgt byte buffer
pub fn decode_ecgt(bytes: &[u8]) -> TensorFileResult<TensorFile> {
    if bytes.len() < HEADER_LEN {
        return Err(TensorFileError::TooShort(bytes.len()));
    }
    if &bytes[0..4] != ECGT_MAGIC {
        return Err(TensorFileError::BadMagic(bytes[0..4].to_vec()));
    }
    if bytes[4] != ECGT_VERSION {
        return Err(TensorFileError::UnsupportedVersion(bytes[4]));
    }

    let dtype = bytes[5];
    let rank = bytes[6] as usize;
    let dims_end = HEADER_LEN + rank * 8;
    if bytes.len() < dims_end {
        return Err(TensorFileError::TooShort(bytes.len()));
    }

    let shape: Vec<usize> = bytes[HEADER_LEN..dims_end]
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            u64::from_le_bytes(raw) as usize
        })
        .collect();

    let data = match dtype {
        DTYPE_F64 => decode_f64_le(&bytes[dims_end..], &shape)?,
        DTYPE_F32 => decode_f32_le(&bytes[dims_end..], &shape)?,
        other => return Err(TensorFileError::UnsupportedDtype(format!("code {}", other))),
    };

    TensorFile::new(shape, data)
}

fn expected_payload(shape: &[usize], elem_size: usize) -> TensorFileResult<usize> {
    shape
        .iter()
        .try_fold(elem_size, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| TensorFileError::Shape(format!("shape {:?} overflows", shape)))
}

fn decode_f64_le(payload: &[u8], shape: &[usize]) -> TensorFileResult<Vec<f64>> {
    let expected = expected_payload(shape, 8)?;
    if payload.len() != expected {
        return Err(TensorFileError::LengthMismatch {
            expected,
            actual: payload.len(),
        });
    }

    Ok(payload
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}

fn decode_f32_le(payload: &[u8], shape: &[usize]) -> TensorFileResult<Vec<f64>> {
    let expected = expected_payload(shape, 4)?;
    if payload.len() != expected {
        return Err(TensorFileError::LengthMismatch {
            expected,
            actual: payload.len(),
        });
    }

    Ok(payload
        .chunks_exact(4)
        .map(|chunk| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(chunk);
            f32::from_le_bytes(raw) as f64
        })
        .collect())
}

/// Decode either format, sniffing the magic bytes
pub fn decode_tensor(bytes: &[u8]) -> TensorFileResult<TensorFile> {
    if npy::is_npy(bytes) {
        npy::decode_npy(bytes)
    } else {
        decode_ecgt(bytes)
    }
}

/// Read a tensor from an .ecgt or .npy file
pub fn read_tensor_file(path: &Path) -> TensorFileResult<TensorFile> {
    let bytes = fs::read(path)?;
    decode_tensor(&bytes)
}

/// Write a tensor as .ecgt and return the SHA256 of the written bytes
pub fn write_tensor_file(path: &Path, tensor: &TensorFile) -> TensorFileResult<String> {
    let bytes = encode_ecgt(tensor)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &bytes)?;
    Ok(calculate_sha256(&bytes))
}

/// Calculate SHA256 hash of data
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
