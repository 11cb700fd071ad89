//! # Bandpass Filter Module
//!
//! Stateful Butterworth bandpass applied to every frame before analysis. The filter
//! is designed once from the configured corner frequencies and then run as a
//! cascade of second-order sections whose memory carries across frames, so a
//! frame boundary never introduces a discontinuity.
//!
//! ## Design
//! 1. Analog Butterworth prototype poles on the unit circle
//! 2. Lowpass-to-bandpass transform around the pre-warped corners
//! 3. Bilinear transform to the z-plane
//! 4. Conjugate pole pairs grouped into biquads (zeros at z = 1 and z = -1)

use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

use crate::config::BandpassConfig;

/// One second-order section in transposed direct form II.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b: [f64; 3],
    a1: f64,
    a2: f64,
}

/// Butterworth bandpass with persistent state.
///
/// The state vector holds two values per section, i.e. one per pole of the
/// bandpass (twice the prototype order). It starts at zero.
#[derive(Debug, Clone)]
pub struct BandpassFilter {
    sections: Vec<Biquad>,
    state: Vec<[f64; 2]>,
}

impl BandpassFilter {
    /// Designs the filter for the given sample rate.
    ///
    /// # Arguments
    /// * `config` - Corner frequencies in Hz and prototype order
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// The corners must already be validated to lie strictly between 0 and Nyquist.
    pub fn new(config: &BandpassConfig, sample_rate: u32) -> Self {
        let nyquist = sample_rate as f64 / 2.0;
        let order = config.order;

        // Pre-warp the normalized corners (fs = 2 convention).
        let warp = |hz: f32| 4.0 * (PI * (hz as f64 / nyquist) / 2.0).tan();
        let w1 = warp(config.low_hz);
        let w2 = warp(config.high_hz);
        let bw = w2 - w1;
        let wo2 = w1 * w2;

        let prototype = (0..order).map(|k| {
            let m = -(order as f64) + 1.0 + 2.0 * k as f64;
            -Complex64::from_polar(1.0, PI * m / (2.0 * order as f64))
        });

        let mut analog_poles = Vec::with_capacity(2 * order);
        for p in prototype {
            let p_lp = p * (bw / 2.0);
            let root = (p_lp * p_lp - wo2).sqrt();
            analog_poles.push(p_lp + root);
            analog_poles.push(p_lp - root);
        }

        // Bilinear transform; the `order` analog zeros at s = 0 map to z = 1 and
        // the `order` zeros at infinity map to z = -1.
        let fs2 = 4.0;
        let mut denom = Complex64::new(1.0, 0.0);
        let poles: Vec<Complex64> = analog_poles
            .iter()
            .map(|&p| {
                denom *= fs2 - p;
                (fs2 + p) / (fs2 - p)
            })
            .collect();
        let gain = bw.powi(order as i32) * (Complex64::new(fs2.powi(order as i32), 0.0) / denom).re;

        let sections: Vec<Biquad> = pair_poles(&poles)
            .into_iter()
            .enumerate()
            .map(|(i, (a1, a2))| {
                let g = if i == 0 { gain } else { 1.0 };
                Biquad {
                    b: [g, 0.0, -g],
                    a1,
                    a2,
                }
            })
            .collect();

        tracing::debug!(
            low_hz = config.low_hz,
            high_hz = config.high_hz,
            sections = sections.len(),
            "Designed Butterworth bandpass"
        );

        let state = vec![[0.0; 2]; sections.len()];
        Self { sections, state }
    }

    /// Filters one frame, carrying state over from the previous call.
    pub fn filter(&mut self, frame: &[f32]) -> Vec<f32> {
        frame
            .iter()
            .map(|&sample| {
                let mut x = sample as f64;
                for (section, s) in self.sections.iter().zip(self.state.iter_mut()) {
                    let y = section.b[0] * x + s[0];
                    s[0] = section.b[1] * x - section.a1 * y + s[1];
                    s[1] = section.b[2] * x - section.a2 * y;
                    x = y;
                }
                x as f32
            })
            .collect()
    }

    /// Clears the filter memory.
    pub fn reset(&mut self) {
        self.state.iter_mut().for_each(|s| *s = [0.0; 2]);
    }

    /// Number of state values carried between frames.
    pub fn state_len(&self) -> usize {
        self.state.len() * 2
    }
}

/// Turns z-plane poles into `(a1, a2)` denominators, one per conjugate pair.
/// Real poles, if any, are paired with each other.
fn pair_poles(poles: &[Complex64]) -> Vec<(f64, f64)> {
    const EPS: f64 = 1e-12;
    let mut pairs: Vec<(f64, f64)> = poles
        .iter()
        .filter(|p| p.im > EPS)
        .map(|p| (-2.0 * p.re, p.norm_sqr()))
        .collect();

    let mut reals: Vec<f64> = poles.iter().filter(|p| p.im.abs() <= EPS).map(|p| p.re).collect();
    reals.sort_by(|a, b| a.total_cmp(b));
    for chunk in reals.chunks(2) {
        match chunk {
            [r1, r2] => pairs.push((-(r1 + r2), r1 * r2)),
            [r] => pairs.push((-r, 0.0)),
            _ => {}
        }
    }
    pairs
}
