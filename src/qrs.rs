//! # QRS Detection Module
//!
//! Streaming Pan–Tompkins detector for the downsampled ECG signal.
//!
//! ## Stages (per sample)
//! 1. Band-pass 5–15 Hz (Butterworth) to keep QRS energy
//! 2. Five-point causal derivative for slope information
//! 3. Squaring, which also makes every value positive
//! 4. Moving-window integration over 150 ms
//! 5. Peak search on the integrated signal with adaptive thresholds
//!
//! ## Thresholds
//! Every local maximum updates either the signal peak estimate (`SPKI`) or
//! the noise peak estimate (`NPKI`). The decision threshold is
//! `NPKI + 0.25·(SPKI - NPKI)`; half of it is used when searching back for a
//! missed beat once 166% of the average RR interval has passed without one.
//!
//! ## Phases
//! After construction or `reset` the detector lets its filters settle for one
//! second, then learns initial thresholds over two seconds. If no beat is
//! confirmed for five seconds it goes back to learning, so a long flat or
//! clipped stretch never leaves it stuck with stale thresholds.

use crate::error::FilterError;
use crate::filters::ButterworthBandpass;
use std::collections::VecDeque;

/// Rate the detector is tuned for; the pipeline downsamples to it.
pub const REFERENCE_RATE: u32 = 200;

const BANDPASS_LOW_HZ: f64 = 5.0;
const BANDPASS_HIGH_HZ: f64 = 15.0;
const INTEGRATION_WINDOW_S: f64 = 0.150;
const REFRACTORY_S: f64 = 0.200;
const SETTLE_S: f64 = 1.0;
const LEARNING_S: f64 = 2.0;
const RELEARN_AFTER_S: f64 = 5.0;
const RR_HISTORY: usize = 8;
const SEARCH_BACK_FACTOR: f64 = 1.66;

fn seconds_to_samples(seconds: f64, sample_rate: u32) -> u64 {
    (seconds * f64::from(sample_rate)).round().max(1.0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Settling { remaining: u64 },
    Learning { remaining: u64, max: f64, sum: f64, count: u64 },
    Detecting,
}

/// Local-maximum tracker on the integrated signal. A maximum is reported once
/// the signal has fallen below half of it.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Slope {
    Rising { peak: f64, index: u64 },
    Falling { valley: f64 },
}

#[derive(Debug, Clone)]
pub struct QrsDetector {
    sample_rate: u32,
    bandpass: ButterworthBandpass,
    derivative_history: [f64; 4],
    window: VecDeque<f64>,
    window_len: usize,
    window_sum: f64,

    refractory: u64,
    settle: u64,
    learning: u64,
    relearn_after: u64,

    index: u64,
    phase: Phase,
    slope: Slope,
    detecting_since: u64,

    spki: f64,
    npki: f64,
    threshold1: f64,
    threshold2: f64,

    last_beat: Option<u64>,
    rr_history: VecDeque<u32>,
    search_back_candidate: Option<(f64, u64)>,
}

impl QrsDetector {
    /// Creates a detector for a signal sampled at `sample_rate` Hz.
    ///
    /// Fails when the rate is too low to realize the 5–15 Hz band-pass.
    pub fn new(sample_rate: u32) -> Result<Self, FilterError> {
        let fs = f64::from(sample_rate);
        let bandpass = ButterworthBandpass::new(BANDPASS_LOW_HZ, BANDPASS_HIGH_HZ, 1, fs)?;
        let window_len = seconds_to_samples(INTEGRATION_WINDOW_S, sample_rate) as usize;
        let settle = seconds_to_samples(SETTLE_S, sample_rate);

        Ok(Self {
            sample_rate,
            bandpass,
            derivative_history: [0.0; 4],
            window: VecDeque::with_capacity(window_len),
            window_len,
            window_sum: 0.0,

            refractory: seconds_to_samples(REFRACTORY_S, sample_rate),
            settle,
            learning: seconds_to_samples(LEARNING_S, sample_rate),
            relearn_after: seconds_to_samples(RELEARN_AFTER_S, sample_rate),

            index: 0,
            phase: Phase::Settling { remaining: settle },
            slope: Slope::Falling { valley: f64::INFINITY },
            detecting_since: 0,

            spki: 0.0,
            npki: 0.0,
            threshold1: 0.0,
            threshold2: 0.0,

            last_beat: None,
            rr_history: VecDeque::with_capacity(RR_HISTORY),
            search_back_candidate: None,
        })
    }

    /// Drops all filter, threshold and RR state.
    pub fn reset(&mut self) {
        let sample_rate = self.sample_rate;
        let bandpass = ButterworthBandpass::new(
            BANDPASS_LOW_HZ,
            BANDPASS_HIGH_HZ,
            1,
            f64::from(sample_rate),
        );
        // The band-pass was realizable when this detector was built.
        if let Ok(bandpass) = bandpass {
            self.bandpass = bandpass;
        }
        self.derivative_history = [0.0; 4];
        self.window.clear();
        self.window_sum = 0.0;
        self.index = 0;
        self.phase = Phase::Settling {
            remaining: self.settle,
        };
        self.slope = Slope::Falling {
            valley: f64::INFINITY,
        };
        self.detecting_since = 0;
        self.spki = 0.0;
        self.npki = 0.0;
        self.threshold1 = 0.0;
        self.threshold2 = 0.0;
        self.forget_beats();
    }

    /// Current `(threshold1, threshold2)`
    pub fn thresholds(&self) -> (f64, f64) {
        (self.threshold1, self.threshold2)
    }

    pub fn is_detecting(&self) -> bool {
        self.phase == Phase::Detecting
    }

    /// Mean of the recent RR intervals, in samples
    pub fn rr_average(&self) -> Option<f64> {
        if self.rr_history.is_empty() {
            return None;
        }
        let sum: u64 = self.rr_history.iter().map(|&rr| u64::from(rr)).sum();
        Some(sum as f64 / self.rr_history.len() as f64)
    }

    /// Processes one sample. Returns the RR interval in samples when this
    /// sample confirms an R-peak that follows an earlier one.
    pub fn update(&mut self, sample: f64) -> Option<u32> {
        let integrated = self.integrate(sample);
        let n = self.index;
        self.index += 1;

        match self.phase {
            Phase::Settling { remaining } => {
                self.phase = if remaining <= 1 {
                    self.start_learning()
                } else {
                    Phase::Settling {
                        remaining: remaining - 1,
                    }
                };
                None
            }
            Phase::Learning {
                remaining,
                max,
                sum,
                count,
            } => {
                let max = max.max(integrated);
                let sum = sum + integrated;
                let count = count + 1;
                if remaining <= 1 {
                    self.finish_learning(max, sum / count as f64, n);
                } else {
                    self.phase = Phase::Learning {
                        remaining: remaining - 1,
                        max,
                        sum,
                        count,
                    };
                }
                None
            }
            Phase::Detecting => self.detect(integrated, n),
        }
    }

    /// Band-pass, derivative, squaring and moving-window integration.
    fn integrate(&mut self, sample: f64) -> f64 {
        let filtered = self.bandpass.process(sample);

        let [x1, x2, x3, x4] = self.derivative_history;
        let slope = (2.0 * filtered + x1 - x3 - 2.0 * x4) * f64::from(self.sample_rate) / 8.0;
        self.derivative_history = [filtered, x1, x2, x3];

        let squared = slope * slope;
        self.window.push_back(squared);
        self.window_sum += squared;
        if self.window.len() > self.window_len {
            if let Some(oldest) = self.window.pop_front() {
                self.window_sum -= oldest;
            }
        }
        (self.window_sum / self.window_len as f64).max(0.0)
    }

    fn start_learning(&self) -> Phase {
        Phase::Learning {
            remaining: self.learning,
            max: 0.0,
            sum: 0.0,
            count: 0,
        }
    }

    fn finish_learning(&mut self, max: f64, mean: f64, n: u64) {
        self.spki = 0.25 * max;
        self.npki = 0.5 * mean;
        self.update_thresholds();
        self.phase = Phase::Detecting;
        self.slope = Slope::Falling {
            valley: f64::INFINITY,
        };
        self.detecting_since = n;
        log::debug!(
            "QRS thresholds learned: spki={:.3e} npki={:.3e}",
            self.spki,
            self.npki
        );
    }

    fn detect(&mut self, integrated: f64, n: u64) -> Option<u32> {
        if let Some((peak, peak_index)) = self.track_peak(integrated, n) {
            if let Some(beat) = self.classify(peak, peak_index) {
                return beat;
            }
        }

        if let Some(rr) = self.search_back(n) {
            return rr;
        }

        let quiet_since = self.last_beat.unwrap_or(self.detecting_since);
        if n.saturating_sub(quiet_since) > self.relearn_after {
            log::debug!("No QRS for {} samples, relearning thresholds", n - quiet_since);
            self.forget_beats();
            self.phase = self.start_learning();
        }
        None
    }

    fn track_peak(&mut self, value: f64, n: u64) -> Option<(f64, u64)> {
        match self.slope {
            Slope::Falling { valley } => {
                if value < valley {
                    self.slope = Slope::Falling { valley: value };
                } else if value > valley {
                    self.slope = Slope::Rising { peak: value, index: n };
                }
                None
            }
            Slope::Rising { peak, index } => {
                if value >= peak {
                    self.slope = Slope::Rising { peak: value, index: n };
                    None
                } else if value < peak * 0.5 {
                    self.slope = Slope::Falling { valley: value };
                    Some((peak, index))
                } else {
                    None
                }
            }
        }
    }

    /// Outer `None`: the peak fell inside the refractory window and was
    /// ignored. Inner value: the RR interval if the peak was a beat.
    fn classify(&mut self, peak: f64, peak_index: u64) -> Option<Option<u32>> {
        if let Some(last) = self.last_beat {
            if peak_index.saturating_sub(last) < self.refractory {
                return None;
            }
        }

        if peak > self.threshold1 {
            return Some(self.confirm_beat(peak, peak_index, false));
        }

        self.npki = 0.125 * peak + 0.875 * self.npki;
        self.update_thresholds();
        let replace = match self.search_back_candidate {
            Some((best, _)) => peak > best,
            None => true,
        };
        if replace {
            self.search_back_candidate = Some((peak, peak_index));
        }
        None
    }

    fn search_back(&mut self, n: u64) -> Option<Option<u32>> {
        let last = self.last_beat?;
        let average = self.rr_average()?;
        if (n - last) as f64 <= SEARCH_BACK_FACTOR * average {
            return None;
        }
        match self.search_back_candidate {
            Some((peak, peak_index)) if peak > self.threshold2 => {
                Some(self.confirm_beat(peak, peak_index, true))
            }
            _ => None,
        }
    }

    fn confirm_beat(&mut self, peak: f64, peak_index: u64, searched_back: bool) -> Option<u32> {
        self.spki = if searched_back {
            0.25 * peak + 0.75 * self.spki
        } else {
            0.125 * peak + 0.875 * self.spki
        };
        self.update_thresholds();
        self.search_back_candidate = None;

        let rr = self
            .last_beat
            .map(|last| u32::try_from(peak_index - last).unwrap_or(u32::MAX));
        self.last_beat = Some(peak_index);

        if let Some(rr) = rr {
            if self.rr_history.len() == RR_HISTORY {
                self.rr_history.pop_front();
            }
            self.rr_history.push_back(rr);
        }
        rr
    }

    fn update_thresholds(&mut self) {
        self.threshold1 = self.npki + 0.25 * (self.spki - self.npki);
        self.threshold2 = 0.5 * self.threshold1;
    }

    fn forget_beats(&mut self) {
        self.last_beat = None;
        self.rr_history.clear();
        self.search_back_candidate = None;
    }
}
