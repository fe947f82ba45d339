//! RR interval to beats-per-minute conversion.

/// Heart rate for an RR interval of `rr_samples` at `sample_rate` Hz, rounded
/// to the nearest whole beat. `None` for a zero interval or rate.
pub fn bpm(rr_samples: u32, sample_rate: u32) -> Option<u32> {
    if rr_samples == 0 || sample_rate == 0 {
        return None;
    }
    let seconds = f64::from(rr_samples) / f64::from(sample_rate);
    Some((60.0 / seconds).round() as u32)
}
