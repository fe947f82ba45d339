//! # Sample Codec Module
//!
//! Wire format of the ECG notification characteristic. Each 20-byte frame
//! carries 4 groups of 5 bytes, and every group packs four 10-bit ADC samples
//! big-endian across its 40 bits:
//!
//! ```text
//! b0       b1       b2       b3       b4
//! 76543210 76543210 76543210 76543210 76543210
//! v0------ --v1---- ----v2-- ------v3 --------
//! ```
//!
//! Also holds the 2-byte little-endian polling-rate payload and the ADC
//! calibration used to turn raw samples into millivolts.

use crate::error::CodecError;
use serde::{Deserialize, Serialize};

/// Bytes in one notification frame
pub const FRAME_SIZE: usize = 20;

/// Bytes per packed group of four samples
pub const GROUP_SIZE: usize = 5;

/// Groups per frame
pub const GROUPS_PER_FRAME: usize = FRAME_SIZE / GROUP_SIZE;

/// Samples per frame
pub const SAMPLES_PER_FRAME: usize = GROUPS_PER_FRAME * 4;

/// Largest value a 10-bit sample can take
pub const MAX_SAMPLE: u16 = 0x03FF;

/// One decoded frame
pub type Message = [u16; SAMPLES_PER_FRAME];

/// Unpacks the 16 samples of a frame.
///
/// Fails with `InvalidFrameSize` unless `frame` is exactly [`FRAME_SIZE`] bytes;
/// nothing is decoded from a frame of the wrong size.
pub fn decode(frame: &[u8]) -> Result<Message, CodecError> {
    if frame.len() != FRAME_SIZE {
        return Err(CodecError::InvalidFrameSize {
            expected: FRAME_SIZE,
            actual: frame.len(),
        });
    }

    let mut samples = [0u16; SAMPLES_PER_FRAME];
    for (group, out) in frame
        .chunks_exact(GROUP_SIZE)
        .zip(samples.chunks_exact_mut(4))
    {
        let [b0, b1, b2, b3, b4] = [group[0], group[1], group[2], group[3], group[4]].map(u16::from);

        out[0] = (b0 << 2) | (b1 >> 6);
        out[1] = ((b1 & 0x3F) << 4) | (b2 >> 4);
        out[2] = ((b2 & 0x0F) << 6) | (b3 >> 2);
        out[3] = ((b3 & 0x03) << 8) | b4;
    }

    Ok(samples)
}

/// Packs 16 samples into a frame. Bits above the 10-bit range are discarded.
pub fn encode(samples: &Message) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    for (values, out) in samples.chunks_exact(4).zip(frame.chunks_exact_mut(GROUP_SIZE)) {
        let [v0, v1, v2, v3] = [values[0], values[1], values[2], values[3]].map(|v| v & MAX_SAMPLE);

        out[0] = (v0 >> 2) as u8;
        out[1] = (((v0 & 0x03) << 6) | (v1 >> 4)) as u8;
        out[2] = (((v1 & 0x0F) << 4) | (v2 >> 6)) as u8;
        out[3] = (((v2 & 0x3F) << 2) | (v3 >> 8)) as u8;
        out[4] = (v3 & 0xFF) as u8;
    }
    frame
}

/// Reads the polling-rate characteristic value (little-endian `u16`).
pub fn decode_polling_rate(payload: &[u8]) -> Result<u16, CodecError> {
    match payload {
        [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(CodecError::InvalidPollingRate {
            actual: payload.len(),
        }),
    }
}

/// Encodes a polling rate for writing to the characteristic.
pub fn encode_polling_rate(rate: u16) -> [u8; 2] {
    rate.to_le_bytes()
}

/// Linear transform from raw ADC counts to millivolts at the electrodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// ADC count corresponding to 0 V differential input
    pub midpoint: f64,
    /// ADC reference voltage in volts
    pub reference_voltage: f64,
    /// Number of ADC steps
    pub resolution: f64,
    /// Instrumentation amplifier gain
    pub amplifier_gain: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            midpoint: 512.0,
            reference_voltage: 3.3,
            resolution: 1024.0,
            amplifier_gain: 1300.0,
        }
    }
}

impl Calibration {
    pub fn to_millivolts(&self, sample: u16) -> f64 {
        (f64::from(sample) - self.midpoint) * self.reference_voltage
            / (self.resolution * self.amplifier_gain)
            * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_group() {
        // v0 = 0x3FF, v1 = 0x000, v2 = 0x155, v3 = 0x2AA
        let mut frame = [0u8; FRAME_SIZE];
        frame[..5].copy_from_slice(&[0xFF, 0xC0, 0x05, 0x56, 0xAA]);

        let samples = decode(&frame).unwrap();
        assert_eq!(&samples[..4], &[0x3FF, 0x000, 0x155, 0x2AA]);
        assert!(samples[4..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_decode_rejects_wrong_size() {
        let err = decode(&[0u8; 19]).unwrap_err();
        assert_eq!(err, CodecError::InvalidFrameSize { expected: 20, actual: 19 });
        assert!(decode(&[0u8; 21]).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_every_value_survives_every_slot() {
        for value in 0..=MAX_SAMPLE {
            let samples = [value; SAMPLES_PER_FRAME];
            assert_eq!(decode(&encode(&samples)).unwrap(), samples);
        }
    }

    #[test]
    fn test_mixed_values_keep_order() {
        let mut samples = [0u16; SAMPLES_PER_FRAME];
        for (i, s) in samples.iter_mut().enumerate() {
            *s = (i as u16 * 67 + 3) % 1024;
        }
        assert_eq!(decode(&encode(&samples)).unwrap(), samples);
    }

    #[test]
    fn test_arbitrary_frames_decode_in_range_and_reencode() {
        // Any 40-bit group is a valid packing, so every frame round-trips.
        let mut seed: u32 = 0x1234_5678;
        for _ in 0..500 {
            let mut frame = [0u8; FRAME_SIZE];
            for byte in frame.iter_mut() {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                *byte = (seed >> 16) as u8;
            }
            let samples = decode(&frame).unwrap();
            assert!(samples.iter().all(|&s| s <= MAX_SAMPLE));
            assert_eq!(encode(&samples), frame);
        }
    }

    #[test]
    fn test_polling_rate_payload() {
        assert_eq!(decode_polling_rate(&[0xF4, 0x01]).unwrap(), 500);
        assert_eq!(encode_polling_rate(500), [0xF4, 0x01]);
        assert!(decode_polling_rate(&[0x01]).is_err());
    }

    #[test]
    fn test_millivolt_conversion() {
        let calibration = Calibration::default();
        assert_eq!(calibration.to_millivolts(512), 0.0);
        let expected = 100.0 * 3.3 / (1024.0 * 1300.0) * 1000.0;
        assert!((calibration.to_millivolts(612) - expected).abs() < 1e-12);
        assert!(calibration.to_millivolts(0) < 0.0);
    }
}
