//! # Fast Fourier Transform (FFT) Module
//!
//! This module turns a filtered frame into the decibel spectrum the detectors work
//! on. The FFT plan and the window are built once per analyzer and reused for
//! every frame.
//!
//! ## Features
//! - High-performance FFT using RustFFT
//! - Blackman (default) or Hann windowing for reduced spectral leakage
//! - One-sided magnitude spectrum normalized by the frame length
//! - Noise floor subtraction with a guarded logarithm

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

use crate::calibration::NoiseFloor;
use crate::config::WindowKind;

/// Additive guard that keeps `log10` finite for exact silence.
pub const LOG_EPSILON: f32 = 1e-10;

/// Level reported for a bin with zero magnitude, `20 * log10(LOG_EPSILON)`.
pub const SILENCE_DB: f32 = -200.0;

/// Builds a window of the given length.
///
/// Both windows are symmetric, matching the usual `M - 1` denominator.
pub fn build_window(kind: WindowKind, len: usize) -> Vec<f32> {
    if len == 1 {
        return vec![1.0];
    }
    let denom = (len - 1) as f64;
    (0..len)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / denom;
            let w = match kind {
                WindowKind::Blackman => 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos(),
                WindowKind::Hann => 0.5 - 0.5 * phase.cos(),
            };
            w as f32
        })
        .collect()
}

/// Center frequency of every bin of the one-sided spectrum.
pub fn bin_frequencies(sample_rate: u32, buffer_size: usize) -> Vec<f32> {
    let step = sample_rate as f32 / buffer_size as f32;
    (0..buffer_size / 2 + 1).map(|i| i as f32 * step).collect()
}

/// A spectrum where every bin sits at the silence level.
pub fn silence_spectrum(len: usize) -> Vec<f32> {
    vec![SILENCE_DB; len]
}

/// Windowed FFT front end shared by calibration and the per-frame analysis.
pub struct SpectralAnalyzer {
    buffer_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

impl SpectralAnalyzer {
    pub fn new(window: WindowKind, buffer_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            buffer_size,
            window: build_window(window, buffer_size),
            fft: planner.plan_fft_forward(buffer_size),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Length of every spectrum this analyzer produces.
    pub fn spectrum_len(&self) -> usize {
        self.buffer_size / 2 + 1
    }

    /// Raw magnitudes `|FFT(frame * window)|` of the one-sided spectrum.
    ///
    /// # Panics
    /// * If `frame` is not exactly `buffer_size` samples long
    pub fn magnitudes(&self, frame: &[f32]) -> Vec<f32> {
        assert_eq!(frame.len(), self.buffer_size, "frame length must equal buffer size");

        let mut buffer: Vec<Complex<f32>> = frame
            .iter()
            .zip(&self.window)
            .map(|(&sample, &w)| Complex { re: sample * w, im: 0.0 })
            .collect();

        self.fft.process(&mut buffer);

        buffer
            .iter()
            .take(self.spectrum_len())
            .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
            .collect()
    }

    /// Magnitudes divided by the frame length, the scale the noise floor uses.
    pub fn normalized_magnitudes(&self, frame: &[f32]) -> Vec<f32> {
        let scale = self.buffer_size as f32;
        self.magnitudes(frame).into_iter().map(|m| m / scale).collect()
    }

    /// Full analysis of one filtered frame into a decibel spectrum.
    pub fn analyze(&self, frame: &[f32], noise_floor: &NoiseFloor) -> Vec<f32> {
        to_decibels(&self.normalized_magnitudes(frame), noise_floor)
    }
}

/// Subtracts the floor (clamped at zero) and converts to decibels.
pub fn to_decibels(linear: &[f32], noise_floor: &NoiseFloor) -> Vec<f32> {
    linear
        .iter()
        .zip(noise_floor.values())
        .map(|(&m, &floor)| 20.0 * ((m - floor).max(0.0) + LOG_EPSILON).log10())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 8192;
    const SR: f32 = 44_100.0;

    fn sine(freq: f32, amplitude: f32) -> Vec<f32> {
        (0..N)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR).sin())
            .collect()
    }

    #[test]
    fn blackman_window_shape() {
        let w = build_window(WindowKind::Blackman, 9);
        assert!(w[0].abs() < 1e-6);
        assert!(w[8].abs() < 1e-6);
        assert!((w[4] - 1.0).abs() < 1e-6);
        assert!((w[2] - w[6]).abs() < 1e-6);
    }

    #[test]
    fn hann_window_shape() {
        let w = build_window(WindowKind::Hann, 5);
        assert_eq!(w.len(), 5);
        assert!((w[2] - 1.0).abs() < 1e-6);
        assert!((w[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn bin_table_is_one_sided() {
        let bins = bin_frequencies(44_100, N);
        assert_eq!(bins.len(), N / 2 + 1);
        assert_eq!(bins[0], 0.0);
        assert!((bins[N / 2] - 22_050.0).abs() < 1e-2);
    }

    #[test]
    fn silence_maps_to_guarded_floor() {
        let analyzer = SpectralAnalyzer::new(WindowKind::Blackman, N);
        let floor = NoiseFloor::zeros(analyzer.spectrum_len());
        let spectrum = analyzer.analyze(&vec![0.0; N], &floor);
        assert_eq!(spectrum.len(), N / 2 + 1);
        assert!(spectrum.iter().all(|db| db.is_finite() && *db <= -70.0));
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let analyzer = SpectralAnalyzer::new(WindowKind::Blackman, N);
        let floor = NoiseFloor::zeros(analyzer.spectrum_len());
        let spectrum = analyzer.analyze(&sine(432.0, 0.5), &floor);
        let (peak_bin, peak_db) = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert_eq!(peak_bin, 80);
        // 0.5 amplitude * 0.42 coherent gain / 2 ≈ -19.6 dB
        assert!(*peak_db > -22.0 && *peak_db < -18.0, "peak = {peak_db}");
    }

    #[test]
    fn floor_above_signal_clamps_to_silence() {
        let analyzer = SpectralAnalyzer::new(WindowKind::Blackman, N);
        let floor = NoiseFloor::from_values(vec![1.0; analyzer.spectrum_len()]);
        let spectrum = analyzer.analyze(&sine(432.0, 0.5), &floor);
        assert!(spectrum.iter().all(|&db| (db - SILENCE_DB).abs() < 1e-3));
    }
}
