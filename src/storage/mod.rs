// Weight storage module
// Binary tensor files on disk: the native .ecgt format and NumPy .npy input

pub mod npy;
pub mod tensor_file;

pub use tensor_file::{
    calculate_sha256, decode_tensor, encode_ecgt, read_tensor_file, write_tensor_file,
    TensorFile, TensorFileError, TensorFileResult,
};
