// NumPy .npy input
// Lets a directory of trained weights exported with numpy.save be loaded as-is.
// f64 arrays are read directly, f32 arrays are widened.

use ndarray::ArrayD;
use ndarray_npy::ReadNpyExt;

use crate::storage::tensor_file::{TensorFile, TensorFileError, TensorFileResult};

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Check for the NumPy magic prefix
pub fn is_npy(bytes: &[u8]) -> bool {
    bytes.len() >= NPY_MAGIC.len() && &bytes[..NPY_MAGIC.len()] == NPY_MAGIC
}

/// Decode an .npy byte buffer holding a float array of any rank
pub fn decode_npy(bytes: &[u8]) -> TensorFileResult<TensorFile> {
    if !is_npy(bytes) {
        let prefix = bytes.iter().take(NPY_MAGIC.len()).copied().collect();
        return Err(TensorFileError::BadMagic(prefix));
    }

    let array = match ArrayD::<f64>::read_npy(bytes) {
        Ok(array) => array,
        Err(f64_err) => ArrayD::<f32>::read_npy(bytes)
            .map(|array| array.mapv(f64::from))
            .map_err(|_| TensorFileError::Npy(f64_err.to_string()))?,
    };

    Ok(TensorFile::from_array(&array))
}
