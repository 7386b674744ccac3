//! Audio level metering.

/// RMS level of interleaved `f32` samples, scaled to 0-100.
pub fn calculate_rms_level(samples: &[f32]) -> u32 {
    if samples.is_empty() {
        return 0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s.clamp(-1.0, 1.0) as f64;
            v * v
        })
        .sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    (rms * 100.0).min(100.0) as u32
}
