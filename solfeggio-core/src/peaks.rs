//! # Peak Detection Module
//!
//! Finds local maxima in a decibel spectrum and filters them by height, spacing,
//! prominence and width, in that order.
//!
//! ## Definitions
//! - A local maximum is a sample (or the middle of a flat plateau) strictly higher
//!   than its neighbours on both sides. The two edge samples are never peaks.
//! - Prominence is the peak height minus the higher of the two lowest points found
//!   on each side before reaching a higher sample or the spectrum edge.
//! - Width is measured at half the prominence below the peak, with linear
//!   interpolation between bins, and never extends past the prominence bases.

use crate::config::DetectorConfig;

/// A detected peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub bin: usize,
    pub height: f32,
    /// Filled in whenever the pass computes prominences (prominence or width
    /// constraints are set), otherwise `0.0`.
    pub prominence: f32,
}

/// One configured detection pass.
#[derive(Debug, Clone)]
pub struct PeakDetector {
    config: DetectorConfig,
}

impl PeakDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Runs the pass over `spectrum`. Returns peaks in ascending bin order.
    pub fn find_peaks(&self, spectrum: &[f32]) -> Vec<Peak> {
        let mut candidates: Vec<usize> = local_maxima(spectrum)
            .into_iter()
            .filter(|&i| spectrum[i] >= self.config.height_db)
            .collect();

        if let Some(distance) = self.config.min_distance.filter(|&d| d > 1) {
            candidates = select_by_distance(spectrum, &candidates, distance);
        }

        let needs_prominence = self.config.min_prominence.is_some() || self.config.width.is_some();
        if !needs_prominence {
            return candidates
                .into_iter()
                .map(|bin| Peak { bin, height: spectrum[bin], prominence: 0.0 })
                .collect();
        }

        candidates
            .into_iter()
            .filter_map(|bin| {
                let (prominence, left_base, right_base) = prominence(spectrum, bin);
                if self.config.min_prominence.is_some_and(|min| prominence < min) {
                    return None;
                }
                if let Some((min_w, max_w)) = self.config.width {
                    let w = width_at_half_prominence(spectrum, bin, prominence, left_base, right_base);
                    if w < min_w || w > max_w {
                        return None;
                    }
                }
                Some(Peak { bin, height: spectrum[bin], prominence })
            })
            .collect()
    }
}

/// Indices of local maxima; a flat top reports its middle sample (rounded down).
fn local_maxima(x: &[f32]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Drops peaks closer than `distance` bins to a higher kept peak.
///
/// Peaks are visited from highest to lowest; among equal heights the later bin
/// is visited first.
fn select_by_distance(x: &[f32], peaks: &[usize], distance: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));

    let mut keep = vec![true; peaks.len()];
    for &i in order.iter().rev() {
        if !keep[i] {
            continue;
        }
        let mut j = i;
        while j > 0 && peaks[i] - peaks[j - 1] < distance {
            keep[j - 1] = false;
            j -= 1;
        }
        let mut j = i + 1;
        while j < peaks.len() && peaks[j] - peaks[i] < distance {
            keep[j] = false;
            j += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, k)| k.then_some(p))
        .collect()
}

/// Returns `(prominence, left_base, right_base)` for the peak at `peak`.
fn prominence(x: &[f32], peak: usize) -> (f32, usize, usize) {
    let height = x[peak];

    let mut left_min = height;
    let mut left_base = peak;
    let mut i = peak as isize;
    while i >= 0 && x[i as usize] <= height {
        if x[i as usize] < left_min {
            left_min = x[i as usize];
            left_base = i as usize;
        }
        i -= 1;
    }

    let mut right_min = height;
    let mut right_base = peak;
    let mut i = peak;
    while i < x.len() && x[i] <= height {
        if x[i] < right_min {
            right_min = x[i];
            right_base = i;
        }
        i += 1;
    }

    (height - left_min.max(right_min), left_base, right_base)
}

/// Width in (fractional) bins at `height - prominence / 2`.
fn width_at_half_prominence(
    x: &[f32],
    peak: usize,
    prominence: f32,
    left_base: usize,
    right_base: usize,
) -> f32 {
    let level = x[peak] - prominence * 0.5;

    let mut i = peak;
    while left_base < i && x[i] > level {
        i -= 1;
    }
    let mut left = i as f32;
    if x[i] < level {
        left += (level - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < right_base && x[i] > level {
        i += 1;
    }
    let mut right = i as f32;
    if x[i] < level {
        right -= (level - x[i]) / (x[i - 1] - x[i]);
    }

    right - left
}

#[cfg(test)]
mod tests {
    use super::*;

    fn height_only(height_db: f32) -> PeakDetector {
        PeakDetector::new(DetectorConfig {
            height_db,
            min_prominence: None,
            width: None,
            min_distance: None,
        })
    }

    #[test]
    fn finds_simple_maxima_and_skips_edges() {
        let x = [5.0, 1.0, 3.0, 1.0, 4.0, 2.0, 6.0];
        let bins: Vec<usize> = height_only(-100.0).find_peaks(&x).iter().map(|p| p.bin).collect();
        assert_eq!(bins, vec![2, 4]);
    }

    #[test]
    fn plateau_reports_middle() {
        let x = [0.0, 1.0, 2.0, 2.0, 2.0, 2.0, 1.0, 0.0];
        assert_eq!(local_maxima(&x), vec![3]);
        // Plateau running into the edge is not a peak.
        assert!(local_maxima(&[0.0, 1.0, 1.0]).is_empty());
    }

    #[test]
    fn height_threshold_is_inclusive() {
        let x = [-80.0, -68.0, -80.0, -69.0, -80.0];
        let bins: Vec<usize> = height_only(-68.0).find_peaks(&x).iter().map(|p| p.bin).collect();
        assert_eq!(bins, vec![1]);
    }

    #[test]
    fn prominence_uses_higher_of_two_bases() {
        //        0    1    2    3    4    5    6
        let x = [0.0, 5.0, 1.0, 3.0, 2.0, 9.0, 0.0];
        // Bases are 0.0 on the left and 1.0 on the right; the higher one counts.
        assert_eq!(prominence(&x, 1), (4.0, 0, 2));
        // Left search stops at the higher peak at 1; lowest point is 1.0 at bin 2.
        // Right search stops at the higher peak at 5; lowest point is 2.0.
        assert_eq!(prominence(&x, 3), (1.0, 2, 4));
        assert_eq!(prominence(&x, 5), (9.0, 0, 6));
    }

    #[test]
    fn width_interpolates_between_bins() {
        let x = [0.0, 0.0, 4.0, 8.0, 4.0, 0.0, 0.0];
        let (p, lb, rb) = prominence(&x, 3);
        assert_eq!(p, 8.0);
        // Half prominence = 4.0, crossed exactly at bins 2 and 4.
        assert!((width_at_half_prominence(&x, 3, p, lb, rb) - 2.0).abs() < 1e-6);

        let x = [0.0, 2.0, 6.0, 10.0, 6.0, 2.0, 0.0];
        let (p, lb, rb) = prominence(&x, 3);
        // Level 5.0 lies a quarter of the way from bin 2 (6.0) down to bin 1 (2.0).
        assert!((width_at_half_prominence(&x, 3, p, lb, rb) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn distance_keeps_stronger_neighbour() {
        let x = [0.0, 3.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0, 0.0];
        let detector = PeakDetector::new(DetectorConfig {
            height_db: -1.0,
            min_prominence: None,
            width: None,
            min_distance: Some(4),
        });
        let bins: Vec<usize> = detector.find_peaks(&x).iter().map(|p| p.bin).collect();
        assert_eq!(bins, vec![3, 9]);
    }

    #[test]
    fn prominence_and_width_filters() {
        let mut x = vec![-100.0_f32; 64];
        // Broad peak at 20 (width ~ 8), narrow spike at 45 (width ~ 1).
        for (offset, v) in [(-4, -60.0), (-3, -50.0), (-2, -40.0), (-1, -30.0), (0, -20.0)] {
            x[(20 + offset) as usize] = v;
            x[(20 - offset) as usize] = v;
        }
        x[45] = -20.0;
        // A tiny ripple with low prominence.
        x[30] = -99.8;

        let detector = PeakDetector::new(DetectorConfig {
            height_db: -100.0,
            min_prominence: Some(0.5),
            width: Some((3.0, 60.0)),
            min_distance: Some(10),
        });
        let peaks = detector.find_peaks(&x);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].bin, 20);
        assert!((peaks[0].prominence - 80.0).abs() < 1e-4);
    }

    #[test]
    fn flat_or_short_spectra_have_no_peaks() {
        let detector = PeakDetector::new(DetectorConfig::classification());
        assert!(detector.find_peaks(&[0.0; 100]).is_empty());
        assert!(detector.find_peaks(&[]).is_empty());
        assert!(detector.find_peaks(&[1.0, 2.0]).is_empty());
    }
}
