//! # Digital Filters Module
//!
//! Causal, sample-at-a-time filters used by the pipeline:
//! - `primitives`: FIR/IIR second-order stages, biquad sections and the DC-block
//! - `butterworth`: low-pass, high-pass and band-pass cascades
//! - `chain`: configurable display chain rebuilt for each sampling rate
//!
//! Filter state is never shared. A chain belongs to exactly one stage and is
//! discarded (not reset) when the sampling rate changes, since its
//! coefficients are only valid for the rate it was designed at.

pub mod butterworth;
pub mod chain;
pub mod primitives;

pub use butterworth::{ButterworthBandpass, ButterworthHighpass, ButterworthLowpass};
pub use chain::{default_display_stages, FilterChain, FilterStage};
pub use primitives::{Biquad, DcBlock, FirStage, IirStage};
