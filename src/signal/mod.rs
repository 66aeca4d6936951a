// Signal conditioning module
// Parses raw sensor payloads and resamples them onto the network input grid

pub mod payload;
pub mod resample;

pub use payload::{parse_payload, PayloadError, WaveformBuffer};
pub use resample::{linspace, resample, AdcScale, FixedSignal, ResampleError, Resampler};
