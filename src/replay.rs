//! Playback of recorded `.ecg` files.
//!
//! `Replay` yields the same filtered millivolt stream the live view showed,
//! and `heart_rates` runs the detector path over the whole recording.

use crate::codec::Calibration;
use crate::config::PipelineConfig;
use crate::downsample::Downsampler;
use crate::ecg_file::{EcgFile, Samples};
use crate::error::EcgFileError;
use crate::filters::FilterChain;
use crate::heart_rate::bpm;
use crate::pipeline::detector_rate;
use crate::qrs::QrsDetector;
use std::path::Path;

pub struct Replay {
    samples: Samples,
    calibration: Calibration,
    chain: FilterChain,
    sampling_rate: u16,
    samples_count: i64,
}

impl Replay {
    pub fn open(path: impl AsRef<Path>, config: &PipelineConfig) -> Result<Self, EcgFileError> {
        let file = EcgFile::open(path)?;
        let sampling_rate = file.sampling_rate();
        let samples_count = file.samples_count();
        let chain = FilterChain::for_rate(&config.display_filters, f64::from(sampling_rate));
        Ok(Self {
            samples: file.into_samples()?,
            calibration: config.calibration,
            chain,
            sampling_rate,
            samples_count,
        })
    }

    pub fn sampling_rate(&self) -> u16 {
        self.sampling_rate
    }

    /// Count from the file header
    pub fn samples_count(&self) -> i64 {
        self.samples_count
    }
}

impl Iterator for Replay {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let sample = self.samples.next()?;
        Some(self.chain.process(self.calibration.to_millivolts(sample)))
    }
}

/// Heart rates detected over a whole recording, in order.
pub fn heart_rates(path: impl AsRef<Path>, config: &PipelineConfig) -> Result<Vec<u32>, EcgFileError> {
    let file = EcgFile::open(path)?;
    let input_rate = u32::from(file.sampling_rate());
    let rate = detector_rate(input_rate, config.qrs_rate_hz);

    let mut detector = match QrsDetector::new(rate) {
        Ok(detector) => detector,
        Err(e) => {
            log::warn!("Cannot detect heart rate at {} Hz: {}", input_rate, e);
            return Ok(Vec::new());
        }
    };
    let mut downsampler = Downsampler::new(input_rate, config.qrs_rate_hz);
    let calibration = config.calibration;

    Ok(file
        .into_samples()?
        .filter_map(|sample| downsampler.push(calibration.to_millivolts(sample)))
        .filter_map(|value| detector.update(value))
        .filter_map(|rr| bpm(rr, rate))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{Simulator, Waveform};
    use tempfile::tempdir;

    fn record(path: &Path, waveform: Waveform, rate: u16, seconds: usize) {
        let mut simulator = Simulator::new(waveform, rate);
        let samples: Vec<u16> = (0..seconds * rate as usize)
            .map(|_| simulator.next_sample())
            .collect();
        let mut file = EcgFile::create(path, rate, true).unwrap();
        file.write_samples(&samples).unwrap();
    }

    #[test]
    fn test_replay_matches_live_conversion() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sine.ecg");
        record(&path, Waveform::Sine, 500, 2);

        let config = PipelineConfig {
            display_filters: Vec::new(),
            ..PipelineConfig::default()
        };
        let replay = Replay::open(&path, &config).unwrap();
        assert_eq!(replay.sampling_rate(), 500);
        assert_eq!(replay.samples_count(), 1000);

        let mut simulator = Simulator::new(Waveform::Sine, 500);
        let expected: Vec<f64> = (0..1000)
            .map(|_| config.calibration.to_millivolts(simulator.next_sample()))
            .collect();
        assert_eq!(replay.collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_replay_applies_display_filters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beats.ecg");
        record(&path, Waveform::Heartbeat { bpm: 60 }, 500, 10);

        let values: Vec<f64> = Replay::open(&path, &PipelineConfig::default())
            .unwrap()
            .collect();
        assert_eq!(values.len(), 5000);
        // DC-block removes the baseline over the last seconds.
        let tail = &values[3000..];
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        assert!(mean.abs() < 0.05, "mean {}", mean);
    }

    #[test]
    fn test_heart_rates_of_recording() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hr.ecg");
        record(&path, Waveform::Heartbeat { bpm: 75 }, 250, 20);

        let rates = heart_rates(&path, &PipelineConfig::default()).unwrap();
        assert!(rates.len() > 10);
        assert!(rates.iter().all(|&r| r == 75), "{:?}", rates);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Replay::open(dir.path().join("nope.ecg"), &PipelineConfig::default()),
            Err(EcgFileError::Io(_))
        ));
    }
}
