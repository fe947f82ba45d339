//! Batch-averaging decimator.
//!
//! Groups the input into non-overlapping batches of `floor(input/output)`
//! samples and emits the mean of each full batch. Non-integer rate ratios are
//! not corrected, and a trailing partial batch is never emitted.

#[derive(Debug, Clone, PartialEq)]
pub struct Downsampler {
    ratio: usize,
    sum: f64,
    count: usize,
}

impl Downsampler {
    /// Creates a downsampler from `input_rate` to `output_rate`.
    ///
    /// When the input is already at or below the output rate the ratio is 1
    /// and samples pass through unchanged.
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        let ratio = if output_rate == 0 {
            1
        } else {
            (input_rate / output_rate).max(1) as usize
        };
        Self::with_ratio(ratio)
    }

    pub fn with_ratio(ratio: usize) -> Self {
        Self {
            ratio: ratio.max(1),
            sum: 0.0,
            count: 0,
        }
    }

    pub fn ratio(&self) -> usize {
        self.ratio
    }

    /// Samples buffered towards the next output value
    pub fn pending(&self) -> usize {
        self.count
    }

    pub fn push(&mut self, sample: f64) -> Option<f64> {
        self.sum += sample;
        self.count += 1;
        if self.count < self.ratio {
            return None;
        }
        let mean = self.sum / self.ratio as f64;
        self.sum = 0.0;
        self.count = 0;
        Some(mean)
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}
