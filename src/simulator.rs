//! Synthetic signal source producing encoded 20-byte frames.
//!
//! Pull-based: every call to `next` yields the frame for the following 16
//! samples. Pacing in wall-clock time is left to the caller (see
//! `SimulatedTransport`).

use crate::codec::{encode, Message, FRAME_SIZE, MAX_SAMPLE, SAMPLES_PER_FRAME};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::time::Duration;

const BASELINE: f64 = 512.0;

/// Shape of the simulated signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Waveform {
    /// 2 Hz sine whose amplitude swings between 150 and 350 counts at 0.2 Hz
    Sine,
    /// PQRST-like beat repeated at a fixed heart rate
    Heartbeat { bpm: u32 },
}

/// (amplitude in counts, centre in seconds, width in seconds)
const BEAT_WAVES: [(f64, f64, f64); 5] = [
    (25.0, 0.10, 0.025),  // P
    (-30.0, 0.23, 0.008), // Q
    (300.0, 0.25, 0.010), // R
    (-60.0, 0.27, 0.008), // S
    (60.0, 0.50, 0.040),  // T
];

#[derive(Debug, Clone)]
pub struct Simulator {
    waveform: Waveform,
    polling_rate: u16,
    index: u64,
}

impl Simulator {
    pub fn new(waveform: Waveform, polling_rate: u16) -> Self {
        Self {
            waveform,
            polling_rate: polling_rate.max(1),
            index: 0,
        }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn polling_rate(&self) -> u16 {
        self.polling_rate
    }

    /// Changes the rate of subsequent samples; a zero rate is ignored.
    pub fn set_polling_rate(&mut self, polling_rate: u16) {
        if polling_rate == 0 {
            log::warn!("Ignoring simulator polling rate of 0 Hz");
            return;
        }
        self.polling_rate = polling_rate;
    }

    /// Time covered by one frame at the current rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(SAMPLES_PER_FRAME as u64 * 1_000_000_000 / u64::from(self.polling_rate))
    }

    /// Next raw 10-bit sample
    pub fn next_sample(&mut self) -> u16 {
        let t = self.index as f64 / f64::from(self.polling_rate);
        self.index += 1;

        let value = match self.waveform {
            Waveform::Sine => {
                let envelope = 250.0 + 100.0 * (2.0 * PI * 0.2 * t).sin();
                BASELINE + envelope * (2.0 * PI * 2.0 * t).sin()
            }
            Waveform::Heartbeat { bpm } => {
                let period = 60.0 / f64::from(bpm.max(1));
                let phase = t % period;
                BASELINE
                    + BEAT_WAVES
                        .iter()
                        .map(|&(amplitude, centre, width)| {
                            let z = (phase - centre) / width;
                            amplitude * (-0.5 * z * z).exp()
                        })
                        .sum::<f64>()
            }
        };
        value.round().clamp(0.0, f64::from(MAX_SAMPLE)) as u16
    }

    pub fn next_message(&mut self) -> Message {
        let mut message = [0u16; SAMPLES_PER_FRAME];
        for sample in message.iter_mut() {
            *sample = self.next_sample();
        }
        message
    }
}

impl Iterator for Simulator {
    type Item = [u8; FRAME_SIZE];

    fn next(&mut self) -> Option<Self::Item> {
        Some(encode(&self.next_message()))
    }
}
