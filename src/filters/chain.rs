//! Display filter chain assembled from configuration.
//!
//! The stage list is fixed at configuration time but the sampling rate is only
//! known once a device reports it, so the chain is rebuilt for every rate.

use super::butterworth::{ButterworthBandpass, ButterworthHighpass, ButterworthLowpass};
use super::primitives::DcBlock;
use crate::error::FilterError;
use serde::{Deserialize, Serialize};

/// One configured stage of the display chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterStage {
    DcBlock,
    Lowpass { cutoff_hz: f64, sections: usize },
    Highpass { cutoff_hz: f64, sections: usize },
    Bandpass { low_hz: f64, high_hz: f64, sections: usize },
}

impl FilterStage {
    fn build(&self, sample_rate: f64) -> Result<Filter, FilterError> {
        Ok(match *self {
            FilterStage::DcBlock => Filter::DcBlock(DcBlock::new()),
            FilterStage::Lowpass { cutoff_hz, sections } => {
                Filter::Lowpass(ButterworthLowpass::new(cutoff_hz, sections, sample_rate)?)
            }
            FilterStage::Highpass { cutoff_hz, sections } => {
                Filter::Highpass(ButterworthHighpass::new(cutoff_hz, sections, sample_rate)?)
            }
            FilterStage::Bandpass {
                low_hz,
                high_hz,
                sections,
            } => Filter::Bandpass(ButterworthBandpass::new(low_hz, high_hz, sections, sample_rate)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    DcBlock(DcBlock),
    Lowpass(ButterworthLowpass),
    Highpass(ButterworthHighpass),
    Bandpass(ButterworthBandpass),
}

impl Filter {
    fn process(&mut self, input: f64) -> f64 {
        match self {
            Filter::DcBlock(f) => f.process(input),
            Filter::Lowpass(f) => f.process(input),
            Filter::Highpass(f) => f.process(input),
            Filter::Bandpass(f) => f.process(input),
        }
    }
}

/// Ordered cascade of filters owned by a single pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    /// Builds every stage at `sample_rate`, failing on the first stage that
    /// cannot be realized.
    pub fn new(stages: &[FilterStage], sample_rate: f64) -> Result<Self, FilterError> {
        let filters = stages
            .iter()
            .map(|stage| stage.build(sample_rate))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { filters })
    }

    /// Builds the stages realizable at `sample_rate` and leaves out the rest,
    /// e.g. a 50 Hz low-pass when the device polls at 80 Hz.
    pub fn for_rate(stages: &[FilterStage], sample_rate: f64) -> Self {
        let filters = stages
            .iter()
            .filter_map(|stage| match stage.build(sample_rate) {
                Ok(filter) => Some(filter),
                Err(e) => {
                    log::warn!("Skipping filter stage {:?}: {}", stage, e);
                    None
                }
            })
            .collect();
        Self { filters }
    }

    pub fn process(&mut self, input: f64) -> f64 {
        self.filters
            .iter_mut()
            .fold(input, |value, filter| filter.process(value))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Stages used by the live view: baseline removal then a 50 Hz low-pass.
pub fn default_display_stages() -> Vec<FilterStage> {
    vec![
        FilterStage::DcBlock,
        FilterStage::Lowpass {
            cutoff_hz: 50.0,
            sections: 1,
        },
    ]
}
