// Inbound payload parsing
// Turns a textual sensor message into a raw waveform buffer

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("Payload is empty")]
    Empty,

    #[error("Invalid sample {token:?} at index {index}")]
    InvalidSample { index: usize, token: String },

    #[error("Non-finite sample at index {0}")]
    NonFinite(usize),

    #[error("Malformed JSON payload: {0}")]
    Json(String),
}

pub type PayloadResult<T> = Result<T, PayloadError>;

/// Raw sensor samples at their native length
/// Immutable once received
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformBuffer {
    samples: Vec<f64>,
}

impl WaveformBuffer {
    /// Wrap already-decoded samples
    pub fn new(samples: Vec<f64>) -> Self {
        WaveformBuffer { samples }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Native sample count
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<f64>> for WaveformBuffer {
    fn from(samples: Vec<f64>) -> Self {
        WaveformBuffer::new(samples)
    }
}

/// Parse a sensor payload into a waveform buffer
/// Accepts comma-separated values ("512,530,601") or a JSON array ("[512, 530]")
pub fn parse_payload(payload: &str) -> PayloadResult<WaveformBuffer> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(PayloadError::Empty);
    }

    let samples: Vec<f64> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| PayloadError::Json(e.to_string()))?
    } else {
        trimmed
            .split(',')
            .enumerate()
            .map(|(index, token)| {
                let token = token.trim();
                token.parse::<f64>().map_err(|_| PayloadError::InvalidSample {
                    index,
                    token: token.to_string(),
                })
            })
            .collect::<Result<_, _>>()?
    };

    if samples.is_empty() {
        return Err(PayloadError::Empty);
    }

    // "NaN" and "inf" parse as f64, but the resampler cannot use them
    if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
        return Err(PayloadError::NonFinite(index));
    }

    Ok(WaveformBuffer::new(samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_payload() {
        let buffer = parse_payload("1.5, 2,3.25\n").unwrap();
        assert_eq!(buffer.samples(), &[1.5, 2.0, 3.25]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_parse_json_payload() {
        let buffer = parse_payload("[100, 200.5, 4095]").unwrap();
        assert_eq!(buffer.samples(), &[100.0, 200.5, 4095.0]);
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert_eq!(parse_payload("   ").unwrap_err(), PayloadError::Empty);
        assert_eq!(parse_payload("[]").unwrap_err(), PayloadError::Empty);
    }

    #[test]
    fn test_invalid_token_reports_index() {
        let err = parse_payload("1,2,abc,4").unwrap_err();
        assert_eq!(
            err,
            PayloadError::InvalidSample {
                index: 2,
                token: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_trailing_comma_rejected() {
        let err = parse_payload("1,2,").unwrap_err();
        assert!(matches!(err, PayloadError::InvalidSample { index: 2, .. }));
    }

    #[test]
    fn test_non_finite_rejected() {
        assert_eq!(parse_payload("1,NaN,3").unwrap_err(), PayloadError::NonFinite(1));
        assert_eq!(parse_payload("inf").unwrap_err(), PayloadError::NonFinite(0));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            parse_payload("[1, 2,").unwrap_err(),
            PayloadError::Json(_)
        ));
    }
}
