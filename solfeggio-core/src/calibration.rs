//! # Noise Floor Calibration
//!
//! Runs once at startup: a burst of frames is pushed through the bandpass filter and
//! the windowed FFT, and each bin's floor becomes the smaller of a low percentile
//! and a scaled median across the burst. The percentile ignores transient spikes;
//! the scaled median keeps a few loud outliers from dragging the floor up.

use anyhow::{Context, Result};

use crate::audio::FrameSource;
use crate::config::NoiseFloorConfig;
use crate::fft::SpectralAnalyzer;
use crate::filter::BandpassFilter;

/// Per-bin magnitude floor on the normalized (divided by frame length) scale.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseFloor {
    values: Vec<f32>,
}

impl NoiseFloor {
    pub fn zeros(len: usize) -> Self {
        Self { values: vec![0.0; len] }
    }

    pub fn from_values(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Lets each bin drift toward quieter observed magnitudes. Never raises a bin.
    pub fn adapt(&mut self, magnitudes: &[f32], alpha: f32) {
        for (floor, &m) in self.values.iter_mut().zip(magnitudes) {
            *floor = floor.min(alpha * *floor + (1.0 - alpha) * m);
        }
    }
}

/// Reads `config.calibration_frames` frames and derives the noise floor.
///
/// The filter state advances through the calibration burst, so the first live
/// frame continues seamlessly from the last calibration frame.
///
/// # Errors
/// * If the source fails to deliver any of the frames
pub fn calibrate<S: FrameSource + ?Sized>(
    source: &mut S,
    filter: &mut BandpassFilter,
    analyzer: &SpectralAnalyzer,
    config: &NoiseFloorConfig,
) -> Result<NoiseFloor> {
    tracing::info!(frames = config.calibration_frames, "Calibrating adaptive noise floor...");

    let buffer_size = analyzer.buffer_size();
    let mut per_frame = Vec::with_capacity(config.calibration_frames);
    for index in 0..config.calibration_frames {
        let frame = source
            .next_frame()
            .with_context(|| format!("calibration frame {} of {}", index + 1, config.calibration_frames))?;
        let frame = crate::pipeline::fit_frame(frame, buffer_size);
        let filtered = filter.filter(&frame);
        per_frame.push(analyzer.magnitudes(&filtered));
    }

    let floor = floor_from_magnitudes(&per_frame, config, buffer_size);
    tracing::info!(
        bins = floor.len(),
        mean = floor.values().iter().sum::<f32>() / floor.len().max(1) as f32,
        "Noise floor calibrated"
    );
    Ok(floor)
}

/// Combines per-frame raw magnitude vectors into a floor, bin by bin.
pub fn floor_from_magnitudes(
    per_frame: &[Vec<f32>],
    config: &NoiseFloorConfig,
    buffer_size: usize,
) -> NoiseFloor {
    let bins = per_frame.first().map_or(0, Vec::len);
    let mut column = Vec::with_capacity(per_frame.len());
    let values = (0..bins)
        .map(|bin| {
            column.clear();
            column.extend(per_frame.iter().map(|frame| frame[bin]));
            column.sort_by(|a, b| a.total_cmp(b));
            let low = percentile_sorted(&column, config.percentile);
            let median = percentile_sorted(&column, 50.0);
            low.min(median * config.median_scale) / buffer_size as f32
        })
        .collect();
    NoiseFloor { values }
}

/// Linear-interpolated percentile of already sorted data.
fn percentile_sorted(sorted: &[f32], q: f32) -> f32 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = q / 100.0 * (n - 1) as f32;
            let lo = rank.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = rank - lo as f32;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates() {
        let data: Vec<f32> = (0..20).map(|i| i as f32).collect();
        assert!((percentile_sorted(&data, 20.0) - 3.8).abs() < 1e-5);
        assert!((percentile_sorted(&data, 50.0) - 9.5).abs() < 1e-5);
        assert_eq!(percentile_sorted(&data, 0.0), 0.0);
        assert_eq!(percentile_sorted(&data, 100.0), 19.0);
    }

    #[test]
    fn floor_takes_smaller_of_percentile_and_scaled_median() {
        let config = NoiseFloorConfig::default();
        // bin 0: uniform values -> scaled median (0.8) beats the 20th percentile (1.0)
        // bin 1: wide spread -> 20th percentile wins
        let frames: Vec<Vec<f32>> = (0..20).map(|i| vec![1.0, i as f32]).collect();
        let floor = floor_from_magnitudes(&frames, &config, 4);
        assert!((floor.values()[0] - 0.8 / 4.0).abs() < 1e-6);
        assert!((floor.values()[1] - 3.8 / 4.0).abs() < 1e-6);
    }

    #[test]
    fn transient_spikes_do_not_raise_floor() {
        let config = NoiseFloorConfig::default();
        let mut frames: Vec<Vec<f32>> = (0..20).map(|_| vec![0.5]).collect();
        frames[3][0] = 100.0;
        frames[11][0] = 80.0;
        let floor = floor_from_magnitudes(&frames, &config, 1);
        assert!((floor.values()[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn adapt_only_lowers() {
        let mut floor = NoiseFloor::from_values(vec![1.0, 1.0]);
        floor.adapt(&[0.0, 5.0], 0.9);
        assert!((floor.values()[0] - 0.9).abs() < 1e-6);
        assert_eq!(floor.values()[1], 1.0);
    }
}
