//! Streaming Sample Decoder
//!
//! Turns the packed frames pushed on the measurement data stream into
//! scaled axis samples.

use crate::domain::models::{Sample, SampleKind};
use crate::error::DecodeError;

/// Header bytes preceding the samples.
pub const HEADER_LEN: usize = 2;
/// Bytes per sample (three i16 axes).
pub const SAMPLE_LEN: usize = 6;

/// Default accelerometer sensitivity in mg/LSB (±2 g).
pub const DEFAULT_ACC_SCALE: f64 = 0.061;
/// Default gyroscope sensitivity in mdps/LSB (±250 dps).
pub const DEFAULT_GYRO_SCALE: f64 = 8.75;

/// Accelerometer full-scale setting as reported by the FSCALE register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelerometerRange {
    pub range_g: u8,
    pub mg_per_lsb: f64,
}

impl AccelerometerRange {
    /// Map a full-scale register code. Unknown codes fall back to ±2 g.
    pub fn from_code(code: u8) -> Self {
        let (range_g, mg_per_lsb) = match code {
            1 => (4, 0.122),
            2 => (6, 0.183),
            3 => (8, 0.244),
            4 => (16, 0.732),
            _ => (2, DEFAULT_ACC_SCALE),
        };
        Self {
            range_g,
            mg_per_lsb,
        }
    }
}

/// Gyroscope sensitivity in mdps/LSB for a full-scale register code.
pub fn gyroscope_scale(code: u8) -> f64 {
    match code {
        1 => 17.5,
        2 => 70.0,
        _ => DEFAULT_GYRO_SCALE,
    }
}

/// Per-device multipliers, one per frame kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactors {
    pub accelerometer: f64,
    pub gyroscope: f64,
}

impl Default for ScaleFactors {
    fn default() -> Self {
        Self {
            accelerometer: DEFAULT_ACC_SCALE,
            gyroscope: DEFAULT_GYRO_SCALE,
        }
    }
}

impl ScaleFactors {
    pub fn for_kind(&self, kind: SampleKind) -> f64 {
        match kind {
            SampleKind::Accelerometer => self.accelerometer,
            SampleKind::Gyroscope => self.gyroscope,
        }
    }
}

/// Decoded control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sample_count: usize,
    pub valid_axes: u8,
    pub kind: SampleKind,
    pub sequence_number: u8,
}

impl FrameHeader {
    pub fn parse(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                expected: HEADER_LEN,
                actual: frame.len(),
            });
        }

        let control = frame[0];
        let kind = if control & 0x80 != 0 {
            SampleKind::Gyroscope
        } else {
            SampleKind::Accelerometer
        };

        Ok(Self {
            sample_count: (control & 0x0F) as usize,
            valid_axes: (control >> 4) & 0x07,
            kind,
            sequence_number: frame[1],
        })
    }

    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.sample_count * SAMPLE_LEN
    }
}

/// Decode a frame with a single multiplier applied to every axis.
///
/// # Frame Structure
///
/// ```text
/// [0]     : Control byte
///           bits 0-3: sample count N
///           bits 4-6: valid-axis mask
///           bit 7   : kind (0 = accelerometer, 1 = gyroscope)
/// [1]     : Sequence number
/// [2+i*6] : Sample i, X/Y/Z as i16 little-endian
/// ```
///
/// Bytes past the last announced sample are ignored.
pub fn decode(frame: &[u8], scale: f64) -> Result<Vec<Sample>, DecodeError> {
    let header = FrameHeader::parse(frame)?;
    let expected = header.frame_len();
    if frame.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: frame.len(),
        });
    }

    let samples = frame[HEADER_LEN..expected]
        .chunks_exact(SAMPLE_LEN)
        .map(|chunk| {
            let axis = |i: usize| i16::from_le_bytes([chunk[i * 2], chunk[i * 2 + 1]]) as f64 * scale;
            Sample {
                sequence_number: header.sequence_number,
                axis_values: [axis(0), axis(1), axis(2)],
                kind: header.kind,
                valid_axes: header.valid_axes,
            }
        })
        .collect();

    Ok(samples)
}

/// Decode a frame, picking the multiplier from the frame kind.
pub fn decode_with(frame: &[u8], scales: &ScaleFactors) -> Result<Vec<Sample>, DecodeError> {
    let header = FrameHeader::parse(frame)?;
    decode(frame, scales.for_kind(header.kind))
}
