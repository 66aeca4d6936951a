// Waveform resampling
// Linear interpolation from the native sensor grid onto the fixed network grid,
// followed by ADC voltage scaling and per-instance min-max normalization

use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signal::payload::WaveformBuffer;

#[derive(Debug, Error, PartialEq)]
pub enum ResampleError {
    #[error("Need at least 2 samples to interpolate, got {0}")]
    TooFewSamples(usize),

    #[error("Native length {actual} is not accepted (expected one of {accepted:?})")]
    UnsupportedLength { actual: usize, accepted: Vec<usize> },

    #[error("Target length must be at least 2, got {0}")]
    InvalidTargetLength(usize),

    #[error("Cannot normalize: signal is constant at {0} (max equals min)")]
    DegenerateRange(f64),

    #[error("Cannot normalize: signal range overflows ({min} to {max})")]
    NonFiniteRange { min: f64, max: f64 },
}

pub type ResampleResult<T> = Result<T, ResampleError>;

/// ADC count to voltage conversion applied after interpolation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdcScale {
    /// Reference voltage of the sensor ADC
    pub reference_volts: f64,

    /// Largest raw count the ADC can produce (4095 for 12-bit)
    pub full_scale: f64,
}

impl AdcScale {
    pub fn to_volts(&self, raw: f64) -> f64 {
        raw * self.reference_volts / self.full_scale
    }
}

impl Default for AdcScale {
    fn default() -> Self {
        AdcScale {
            reference_volts: 3.3,
            full_scale: 4095.0,
        }
    }
}

/// Network-ready signal: fixed length, every value in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct FixedSignal {
    values: Vec<f64>,
}

impl FixedSignal {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// View as a single-item, single-channel tensor (1, len, 1)
    pub fn to_tensor(&self) -> Array3<f64> {
        Array3::from_shape_fn((1, self.values.len(), 1), |(_, i, _)| self.values[i])
    }

    pub fn to_array(&self) -> Array1<f64> {
        Array1::from(self.values.clone())
    }
}

/// Evenly spaced points over [start, stop], both ends included
/// The last point is pinned to `stop` so the grid never overshoots
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut grid: Vec<f64> = (0..num).map(|i| start + i as f64 * step).collect();
            grid[num - 1] = stop;
            grid
        }
    }
}

/// Bracketing pair of origin indices for a target grid point
/// Clamped to (0, 1) on the left and (n - 2, n - 1) on the right
fn bracket(origin: &[f64], point: f64) -> (usize, usize) {
    let n = origin.len();
    let insertion = origin.partition_point(|&o| o < point);

    if insertion == 0 {
        return (0, 1);
    }

    let left = insertion - 1;
    if left + 1 >= n {
        (n - 2, n - 1)
    } else {
        (left, left + 1)
    }
}

/// Resample raw ADC counts onto `target_len` points and normalize to [0, 1]
///
/// The origin grid is built from the actual number of samples, so any
/// native length >= 2 maps onto the same target grid.
pub fn resample(samples: &[f64], target_len: usize, adc: AdcScale) -> ResampleResult<FixedSignal> {
    let n = samples.len();
    if n < 2 {
        return Err(ResampleError::TooFewSamples(n));
    }
    if target_len < 2 {
        return Err(ResampleError::InvalidTargetLength(target_len));
    }

    // Interpolation rounding would otherwise turn a flat line into noise
    if samples.iter().all(|&v| v == samples[0]) {
        return Err(ResampleError::DegenerateRange(adc.to_volts(samples[0])));
    }

    let origin = linspace(0.0, 1.0, n);
    let target = linspace(0.0, 1.0, target_len);

    let scaled: Vec<f64> = target
        .iter()
        .map(|&point| {
            let (left, right) = bracket(&origin, point);
            let t = (point - origin[left]) / (origin[right] - origin[left]);
            let interpolated = (1.0 - t) * samples[left] + t * samples[right];
            adc.to_volts(interpolated)
        })
        .collect();

    normalize(scaled).map(|values| FixedSignal { values })
}

/// Min-max normalization over the whole vector
fn normalize(mut values: Vec<f64>) -> ResampleResult<Vec<f64>> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let range = max - min;
    if !range.is_finite() {
        return Err(ResampleError::NonFiniteRange { min, max });
    }
    if range == 0.0 {
        return Err(ResampleError::DegenerateRange(min));
    }

    for v in values.iter_mut() {
        *v = (*v - min) / range;
    }

    Ok(values)
}

/// Resampler bound to a target grid and a set of accepted native lengths
#[derive(Debug, Clone)]
pub struct Resampler {
    target_len: usize,
    accepted_lengths: Vec<usize>,
    adc: AdcScale,
}

impl Resampler {
    /// An empty `accepted_lengths` accepts any native length >= 2
    pub fn new(target_len: usize, accepted_lengths: Vec<usize>, adc: AdcScale) -> Self {
        Resampler {
            target_len,
            accepted_lengths,
            adc,
        }
    }

    pub fn target_len(&self) -> usize {
        self.target_len
    }

    pub fn accepted_lengths(&self) -> &[usize] {
        &self.accepted_lengths
    }

    pub fn accepts(&self, native_len: usize) -> bool {
        self.accepted_lengths.is_empty() || self.accepted_lengths.contains(&native_len)
    }

    pub fn resample(&self, waveform: &WaveformBuffer) -> ResampleResult<FixedSignal> {
        if !self.accepts(waveform.len()) {
            return Err(ResampleError::UnsupportedLength {
                actual: waveform.len(),
                accepted: self.accepted_lengths.clone(),
            });
        }

        resample(waveform.samples(), self.target_len, self.adc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, max: f64) -> Vec<f64> {
        linspace(0.0, max, n)
    }

    #[test]
    fn test_linspace_endpoints() {
        let grid = linspace(0.0, 1.0, 188);
        assert_eq!(grid.len(), 188);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[187], 1.0);
        assert!(grid.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_bracket_clamps_both_ends() {
        let origin = linspace(0.0, 1.0, 5);
        assert_eq!(bracket(&origin, 0.0), (0, 1));
        assert_eq!(bracket(&origin, 1.0), (3, 4));
        assert_eq!(bracket(&origin, 0.3), (1, 2));
        // Exact grid hit resolves to the interval ending at that point
        assert_eq!(bracket(&origin, 0.5), (1, 2));
    }

    #[test]
    fn test_output_length_and_range() {
        let signal = resample(&ramp(100, 4095.0), 188, AdcScale::default()).unwrap();
        assert_eq!(signal.len(), 188);
        assert!(signal.values().iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(signal.values()[0], 0.0);
        assert_eq!(signal.values()[187], 1.0);
    }

    #[test]
    fn test_ramp_stays_linear() {
        let signal = resample(&ramp(100, 4095.0), 188, AdcScale::default()).unwrap();
        let expected = linspace(0.0, 1.0, 188);
        for (got, want) in signal.values().iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn test_constant_input_is_degenerate() {
        let err = resample(&[2048.0; 100], 188, AdcScale::default()).unwrap_err();
        assert!(matches!(err, ResampleError::DegenerateRange(_)));
    }

    #[test]
    fn test_any_constant_is_degenerate() {
        for value in [0.0, 3.0, 7.0, 1234.5, 3431.28, 4095.0] {
            for n in [2, 37, 50, 100] {
                let err = resample(&vec![value; n], 188, AdcScale::default()).unwrap_err();
                assert!(
                    matches!(err, ResampleError::DegenerateRange(_)),
                    "value {} with {} samples",
                    value,
                    n
                );
            }
        }
    }

    #[test]
    fn test_overflowing_range_is_rejected() {
        let mut samples = vec![0.0; 100];
        samples[50] = 1e308;
        let err = resample(&samples, 188, AdcScale::default()).unwrap_err();
        assert!(matches!(err, ResampleError::NonFiniteRange { .. }));
    }

    #[test]
    fn test_too_few_samples() {
        assert_eq!(
            resample(&[1.0], 188, AdcScale::default()).unwrap_err(),
            ResampleError::TooFewSamples(1)
        );
    }

    #[test]
    fn test_invalid_target_length() {
        assert_eq!(
            resample(&[1.0, 2.0], 1, AdcScale::default()).unwrap_err(),
            ResampleError::InvalidTargetLength(1)
        );
    }

    #[test]
    fn test_resampling_is_deterministic() {
        let input: Vec<f64> = (0..100).map(|i| ((i * 37) % 101) as f64 * 40.0).collect();
        let a = resample(&input, 188, AdcScale::default()).unwrap();
        let b = resample(&input, 188, AdcScale::default()).unwrap();
        let bits_a: Vec<u64> = a.values().iter().map(|v| v.to_bits()).collect();
        let bits_b: Vec<u64> = b.values().iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits_a, bits_b);
    }

    #[test]
    fn test_resampler_rejects_unaccepted_length() {
        let resampler = Resampler::new(188, vec![50, 100], AdcScale::default());
        let err = resampler
            .resample(&WaveformBuffer::new(ramp(75, 100.0)))
            .unwrap_err();
        assert_eq!(
            err,
            ResampleError::UnsupportedLength {
                actual: 75,
                accepted: vec![50, 100]
            }
        );
    }

    #[test]
    fn test_resampler_without_accepted_list_takes_any_length() {
        let resampler = Resampler::new(188, Vec::new(), AdcScale::default());
        let signal = resampler.resample(&WaveformBuffer::new(ramp(75, 100.0))).unwrap();
        assert_eq!(signal.len(), 188);
    }

    #[test]
    fn test_fifty_sample_path_uses_its_own_grid() {
        // A 50-sample ramp must map its last sample onto the last target point.
        // Interpolating it on a 100-point origin grid would run off the buffer.
        let resampler = Resampler::new(188, vec![50, 100], AdcScale::default());
        let short = resampler.resample(&WaveformBuffer::new(ramp(50, 4095.0))).unwrap();
        let long = resampler.resample(&WaveformBuffer::new(ramp(100, 4095.0))).unwrap();

        assert_eq!(short.len(), 188);
        assert_eq!(long.len(), 188);
        for (a, b) in short.values().iter().zip(long.values().iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_adc_scaling_cancels_under_normalization() {
        let input = vec![0.0, 4095.0, 1000.0, 3000.0];
        let volts = resample(&input, 10, AdcScale::default()).unwrap();
        let raw = resample(
            &input,
            10,
            AdcScale {
                reference_volts: 1.0,
                full_scale: 1.0,
            },
        )
        .unwrap();
        for (a, b) in volts.values().iter().zip(raw.values().iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_to_tensor_shape() {
        let signal = resample(&ramp(100, 4095.0), 188, AdcScale::default()).unwrap();
        let tensor = signal.to_tensor();
        assert_eq!(tensor.shape(), &[1, 188, 1]);
        assert_eq!(tensor[[0, 187, 0]], 1.0);
    }
}
