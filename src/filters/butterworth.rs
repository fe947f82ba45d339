//! Butterworth filters realized as cascades of second-order sections.
//!
//! A filter of order `n = 2·sections` is split into one section per conjugate
//! pole pair. Section `k` (1-based) is designed with the bilinear transform:
//!
//! ```text
//! ωc = 2·Fs·tan(π·fc / Fs)                 pre-warped analog cutoff
//! ζ  = -cos(π·(2k + n - 1) / (2n))         damping of pole pair k
//! d  = 4·Fs² + 4·Fs·ζ·ωc + ωc²
//!
//! low-pass  numerator  [ωc², 2ωc², ωc²] / d
//! high-pass numerator  [4Fs², -8Fs², 4Fs²] / d
//! denominator          a1 = (2ωc² - 8Fs²) / d
//!                      a2 = (4Fs² - 4·Fs·ζ·ωc + ωc²) / d
//! ```

use super::primitives::Biquad;
use crate::error::FilterError;
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Response {
    LowPass,
    HighPass,
}

fn validate(cutoff_hz: f64, sample_rate: f64, num_sections: usize) -> Result<(), FilterError> {
    if num_sections == 0 {
        return Err(FilterError::NoSections);
    }
    let realizable = sample_rate.is_finite()
        && cutoff_hz.is_finite()
        && cutoff_hz > 0.0
        && cutoff_hz < sample_rate / 2.0;
    if !realizable {
        return Err(FilterError::InvalidCutoff {
            cutoff_hz,
            sample_rate,
        });
    }
    Ok(())
}

fn design_section(response: Response, cutoff_hz: f64, k: usize, order: usize, fs: f64) -> Biquad {
    let omega_c = 2.0 * fs * (PI * cutoff_hz / fs).tan();
    let zeta = -(PI * (2.0 * k as f64 + order as f64 - 1.0) / (2.0 * order as f64)).cos();

    let fs2 = fs * fs;
    let wc2 = omega_c * omega_c;
    let d = 4.0 * fs2 + 4.0 * fs * zeta * omega_c + wc2;

    let feedforward = match response {
        Response::LowPass => [wc2 / d, 2.0 * wc2 / d, wc2 / d],
        Response::HighPass => [4.0 * fs2 / d, -8.0 * fs2 / d, 4.0 * fs2 / d],
    };
    let feedback = [
        (2.0 * wc2 - 8.0 * fs2) / d,
        (4.0 * fs2 - 4.0 * fs * zeta * omega_c + wc2) / d,
    ];

    Biquad::new(feedforward, feedback)
}

fn design(
    response: Response,
    cutoff_hz: f64,
    num_sections: usize,
    sample_rate: f64,
) -> Result<Vec<Biquad>, FilterError> {
    validate(cutoff_hz, sample_rate, num_sections)?;
    let order = num_sections * 2;
    Ok((1..=num_sections)
        .map(|k| design_section(response, cutoff_hz, k, order, sample_rate))
        .collect())
}

fn run(sections: &mut [Biquad], input: f64) -> f64 {
    sections
        .iter_mut()
        .fold(input, |value, section| section.process(value))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ButterworthLowpass {
    sections: Vec<Biquad>,
}

impl ButterworthLowpass {
    pub fn new(cutoff_hz: f64, num_sections: usize, sample_rate: f64) -> Result<Self, FilterError> {
        Ok(Self {
            sections: design(Response::LowPass, cutoff_hz, num_sections, sample_rate)?,
        })
    }

    pub fn process(&mut self, input: f64) -> f64 {
        run(&mut self.sections, input)
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ButterworthHighpass {
    sections: Vec<Biquad>,
}

impl ButterworthHighpass {
    pub fn new(cutoff_hz: f64, num_sections: usize, sample_rate: f64) -> Result<Self, FilterError> {
        Ok(Self {
            sections: design(Response::HighPass, cutoff_hz, num_sections, sample_rate)?,
        })
    }

    pub fn process(&mut self, input: f64) -> f64 {
        run(&mut self.sections, input)
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }
}

/// Low-pass at the top edge followed by high-pass at the bottom edge.
#[derive(Debug, Clone, PartialEq)]
pub struct ButterworthBandpass {
    lowpass: ButterworthLowpass,
    highpass: ButterworthHighpass,
}

impl ButterworthBandpass {
    pub fn new(
        low_hz: f64,
        high_hz: f64,
        num_sections: usize,
        sample_rate: f64,
    ) -> Result<Self, FilterError> {
        if !(low_hz < high_hz) {
            return Err(FilterError::InvalidBand { low_hz, high_hz });
        }
        Ok(Self {
            lowpass: ButterworthLowpass::new(high_hz, num_sections, sample_rate)?,
            highpass: ButterworthHighpass::new(low_hz, num_sections, sample_rate)?,
        })
    }

    pub fn process(&mut self, input: f64) -> f64 {
        self.highpass.process(self.lowpass.process(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Steady-state peak amplitude of a unit sine after `settle` samples.
    fn gain_at(mut filter: impl FnMut(f64) -> f64, freq: f64, fs: f64) -> f64 {
        let total = (fs * 10.0) as usize;
        let settle = total - (fs * 2.0) as usize;
        (0..total)
            .map(|n| filter((2.0 * PI * freq * n as f64 / fs).sin()))
            .skip(settle)
            .fold(0.0, |peak: f64, y| peak.max(y.abs()))
    }

    #[test]
    fn test_lowpass_unity_dc_gain() {
        let mut lp = ButterworthLowpass::new(50.0, 2, 500.0).unwrap();
        let mut last = 0.0;
        for _ in 0..2000 {
            last = lp.process(3.0);
        }
        assert!((last - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_lowpass_frequency_response() {
        let pass = gain_at(
            {
                let mut lp = ButterworthLowpass::new(50.0, 1, 500.0).unwrap();
                move |x| lp.process(x)
            },
            10.0,
            500.0,
        );
        let stop = gain_at(
            {
                let mut lp = ButterworthLowpass::new(50.0, 1, 500.0).unwrap();
                move |x| lp.process(x)
            },
            200.0,
            500.0,
        );
        assert!(pass > 0.99, "pass band gain {}", pass);
        assert!(stop < 0.05, "stop band gain {}", stop);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let mut hp = ButterworthHighpass::new(0.5, 2, 500.0).unwrap();
        let mut last = 1.0;
        for _ in 0..20_000 {
            last = hp.process(1.0);
        }
        assert!(last.abs() < 1e-6);
    }

    #[test]
    fn test_bandpass_shape() {
        let make = || ButterworthBandpass::new(5.0, 15.0, 1, 200.0).unwrap();
        let mut center = make();
        let mut high = make();
        assert!(gain_at(|x| center.process(x), 10.0, 200.0) > 0.8);
        assert!(gain_at(|x| high.process(x), 60.0, 200.0) < 0.1);
    }

    #[test]
    fn test_section_count_and_order() {
        let lp = ButterworthLowpass::new(40.0, 3, 500.0).unwrap();
        assert_eq!(lp.sections().len(), 3);
        // Each section realizes a different pole pair.
        assert_ne!(lp.sections()[0].feedback(), lp.sections()[1].feedback());
        for section in lp.sections() {
            let b: f64 = section.feedforward().iter().sum();
            let [a1, a2] = section.feedback();
            assert!((b / (1.0 + a1 + a2) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_same_input_same_output() {
        let input: Vec<f64> = (0..500).map(|n| ((n * 37) % 101) as f64 - 50.0).collect();
        let mut a = ButterworthBandpass::new(0.05, 40.0, 3, 500.0).unwrap();
        let mut b = ButterworthBandpass::new(0.05, 40.0, 3, 500.0).unwrap();
        let out_a: Vec<f64> = input.iter().map(|&x| a.process(x)).collect();
        let out_b: Vec<f64> = input.iter().map(|&x| b.process(x)).collect();
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn test_rejects_unrealizable_designs() {
        assert!(matches!(
            ButterworthLowpass::new(50.0, 1, 100.0),
            Err(FilterError::InvalidCutoff { .. })
        ));
        assert!(ButterworthHighpass::new(0.0, 1, 100.0).is_err());
        assert_eq!(
            ButterworthLowpass::new(10.0, 0, 100.0),
            Err(FilterError::NoSections)
        );
        assert!(matches!(
            ButterworthBandpass::new(15.0, 5.0, 1, 200.0),
            Err(FilterError::InvalidBand { .. })
        ));
    }
}
