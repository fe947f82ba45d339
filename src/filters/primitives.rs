//! Second-order direct-form building blocks.
//!
//! Every stage keeps exactly two samples of history and advances it once per
//! call to `process`. Stages are plain values: a chain owns its stages and
//! nothing else can observe or mutate their state.

/// Feed-forward stage: `y[n] = b0·x[n] + b1·x[n-1] + b2·x[n-2]`
#[derive(Debug, Clone, PartialEq)]
pub struct FirStage {
    coefficients: [f64; 3],
    history: [f64; 2],
}

impl FirStage {
    pub fn new(coefficients: [f64; 3]) -> Self {
        Self {
            coefficients,
            history: [0.0; 2],
        }
    }

    pub fn process(&mut self, input: f64) -> f64 {
        let [b0, b1, b2] = self.coefficients;
        let output = b0 * input + b1 * self.history[0] + b2 * self.history[1];
        self.history = [input, self.history[0]];
        output
    }

    pub fn coefficients(&self) -> [f64; 3] {
        self.coefficients
    }

    pub fn reset(&mut self) {
        self.history = [0.0; 2];
    }
}

/// Feedback stage: `y[n] = x[n] - a1·y[n-1] - a2·y[n-2]`
#[derive(Debug, Clone, PartialEq)]
pub struct IirStage {
    coefficients: [f64; 2],
    history: [f64; 2],
}

impl IirStage {
    pub fn new(coefficients: [f64; 2]) -> Self {
        Self {
            coefficients,
            history: [0.0; 2],
        }
    }

    pub fn process(&mut self, input: f64) -> f64 {
        let [a1, a2] = self.coefficients;
        let output = input - a1 * self.history[0] - a2 * self.history[1];
        self.history = [output, self.history[0]];
        output
    }

    pub fn coefficients(&self) -> [f64; 2] {
        self.coefficients
    }

    pub fn reset(&mut self) {
        self.history = [0.0; 2];
    }
}

/// One second-order section: feed-forward numerator followed by the feedback
/// denominator (direct form I).
#[derive(Debug, Clone, PartialEq)]
pub struct Biquad {
    numerator: FirStage,
    denominator: IirStage,
}

impl Biquad {
    /// `feedforward` holds `b0..b2` (already gain-scaled), `feedback` holds `a1, a2`
    /// of a denominator normalized to `a0 = 1`.
    pub fn new(feedforward: [f64; 3], feedback: [f64; 2]) -> Self {
        Self {
            numerator: FirStage::new(feedforward),
            denominator: IirStage::new(feedback),
        }
    }

    pub fn process(&mut self, input: f64) -> f64 {
        self.denominator.process(self.numerator.process(input))
    }

    pub fn feedforward(&self) -> [f64; 3] {
        self.numerator.coefficients()
    }

    pub fn feedback(&self) -> [f64; 2] {
        self.denominator.coefficients()
    }

    pub fn reset(&mut self) {
        self.numerator.reset();
        self.denominator.reset();
    }
}

/// Removes baseline wander: a first difference (`[1, -1]`) followed by a
/// single pole at 0.995, i.e. `y[n] = x[n] - x[n-1] + 0.995·y[n-1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DcBlock {
    difference: FirStage,
    pole: IirStage,
}

impl DcBlock {
    pub const POLE: f64 = 0.995;

    pub fn new() -> Self {
        Self {
            difference: FirStage::new([1.0, -1.0, 0.0]),
            pole: IirStage::new([-Self::POLE, 0.0]),
        }
    }

    pub fn process(&mut self, input: f64) -> f64 {
        self.pole.process(self.difference.process(input))
    }

    pub fn reset(&mut self) {
        self.difference.reset();
        self.pole.reset();
    }
}

impl Default for DcBlock {
    fn default() -> Self {
        Self::new()
    }
}
