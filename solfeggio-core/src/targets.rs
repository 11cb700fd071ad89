//! # Target Frequency Module
//!
//! This module resolves the configured reference tones into the immutable table the
//! classifier, the persistence tracker and the capture session all share.
//!
//! ## Features
//! - Default table of eleven reference tones (174 Hz to 963 Hz)
//! - Per-target tolerance and prominence boost, with an "amplified" override
//! - Nearest-bin lookup for per-target level readouts
//! - Visibility boost used when a session is captured

use once_cell::sync::Lazy;

use crate::config::{AnalyzerConfig, TargetSpec};

/// Tolerance multiplier applied to amplified targets.
pub const AMPLIFIED_TOLERANCE_SCALE: f32 = 1.5;
/// Prominence boost for amplified targets.
pub const AMPLIFIED_PROMINENCE_BOOST: f32 = 1.6;
/// Prominence boost for every other target.
pub const STANDARD_PROMINENCE_BOOST: f32 = 1.3;

/// The default reference tones, in display order.
///
/// 174 Hz is amplified: low-frequency detection is noisier, so it gets a wider
/// tolerance and heavier weighting.
pub static DEFAULT_TARGETS: Lazy<Vec<TargetSpec>> = Lazy::new(|| {
    const HZ: [f32; 11] = [
        174.0, 285.0, 396.0, 417.0, 432.0, 440.0, 528.0, 639.0, 741.0, 852.0, 963.0,
    ];
    HZ.iter()
        .map(|&hz| {
            let spec = TargetSpec::new(&format!("{}Hz", hz as u32), hz);
            if hz == 174.0 { spec.amplified() } else { spec }
        })
        .collect()
});

/// A resolved reference tone.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFrequency {
    pub name: String,
    pub hz: f32,
    /// Tolerance used by classification, in percent of `hz`.
    pub tolerance_percent: f32,
    pub prominence_boost: f32,
    pub amplified: bool,
    /// Index of the spectrum bin closest to `hz`.
    pub nearest_bin: usize,
}

impl TargetFrequency {
    /// Absolute classification tolerance in Hz.
    pub fn tolerance_hz(&self) -> f32 {
        self.hz * self.tolerance_percent / 100.0
    }

    /// Whether `freq` lies within this target's classification band.
    pub fn matches(&self, freq: f32) -> bool {
        (freq - self.hz).abs() <= self.tolerance_hz()
    }

    /// Whether `freq` lies within the base (unscaled) band.
    pub fn matches_base(&self, freq: f32, base_tolerance_percent: f32) -> bool {
        (freq - self.hz).abs() <= self.hz * base_tolerance_percent / 100.0
    }

    /// Nonlinear presentation transform for a captured percentage.
    ///
    /// Amplified: `p*1.4 + p^1.4`. Standard: `p*1.25 + p^1.3`.
    pub fn visibility_boost(&self, percentage: f32) -> f32 {
        if self.amplified {
            percentage * 1.4 + percentage.powf(1.4)
        } else {
            percentage * 1.25 + percentage.powf(1.3)
        }
    }
}

/// The immutable target table, in configuration order.
#[derive(Debug, Clone)]
pub struct TargetTable {
    targets: Vec<TargetFrequency>,
    base_tolerance_percent: f32,
}

impl TargetTable {
    /// Resolves the configured specs against the base tolerance and bin layout.
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        let bin_width = config.bin_width_hz();
        let last_bin = config.spectrum_len() - 1;
        let base = config.base_tolerance_percent;

        let targets = config
            .targets
            .iter()
            .map(|spec| {
                let (scale, boost) = if spec.amplified {
                    (AMPLIFIED_TOLERANCE_SCALE, AMPLIFIED_PROMINENCE_BOOST)
                } else {
                    (1.0, STANDARD_PROMINENCE_BOOST)
                };
                TargetFrequency {
                    name: spec.name.clone(),
                    hz: spec.hz,
                    tolerance_percent: spec.tolerance_percent.unwrap_or(base * scale),
                    prominence_boost: spec.prominence_boost.unwrap_or(boost),
                    amplified: spec.amplified,
                    nearest_bin: ((spec.hz / bin_width).round() as usize).min(last_bin),
                }
            })
            .collect();

        Self {
            targets,
            base_tolerance_percent: base,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TargetFrequency> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn base_tolerance_percent(&self) -> f32 {
        self.base_tolerance_percent
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.targets.iter().position(|t| t.name == name)
    }

    /// First target in table order whose classification band covers `freq`.
    pub fn first_match(&self, freq: f32) -> Option<(usize, &TargetFrequency)> {
        self.targets.iter().enumerate().find(|(_, t)| t.matches(freq))
    }
}

impl std::ops::Index<usize> for TargetTable {
    type Output = TargetFrequency;

    fn index(&self, index: usize) -> &Self::Output {
        &self.targets[index]
    }
}

impl<'a> IntoIterator for &'a TargetTable {
    type Item = &'a TargetFrequency;
    type IntoIter = std::slice::Iter<'a, TargetFrequency>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_resolves_amplified_override() {
        let table = TargetTable::from_config(&AnalyzerConfig::default());
        let low = &table[table.index_of("174Hz").unwrap()];
        assert!(low.amplified);
        assert!((low.tolerance_percent - 3.0).abs() < 1e-6);
        assert_eq!(low.prominence_boost, 1.6);

        let a = &table[table.index_of("432Hz").unwrap()];
        assert!(!a.amplified);
        assert_eq!(a.tolerance_percent, 2.0);
        assert_eq!(a.prominence_boost, 1.3);
    }

    #[test]
    fn overlapping_default_bands_go_to_table_order() {
        let table = TargetTable::from_config(&AnalyzerConfig::default());
        // 437 Hz is inside both the 432 and 440 bands and closer to 440.
        let (_, hit) = table.first_match(437.0).unwrap();
        assert_eq!(hit.name, "432Hz");
        let (_, hit) = table.first_match(441.4).unwrap();
        assert_eq!(hit.name, "440Hz");
        assert!(table.first_match(600.0).is_none());
    }

    #[test]
    fn nearest_bin_tracks_resolution() {
        let table = TargetTable::from_config(&AnalyzerConfig::default());
        // 432 / (44100 / 8192) = 80.25
        assert_eq!(table[table.index_of("432Hz").unwrap()].nearest_bin, 80);
    }

    #[test]
    fn explicit_overrides_win() {
        let mut config = AnalyzerConfig::default();
        config.targets = vec![TargetSpec {
            tolerance_percent: Some(5.0),
            prominence_boost: Some(2.0),
            ..TargetSpec::new("x", 300.0).amplified()
        }];
        let table = TargetTable::from_config(&config);
        assert_eq!(table[0].tolerance_percent, 5.0);
        assert_eq!(table[0].prominence_boost, 2.0);
        assert!(table[0].matches(314.0));
        assert!(!table[0].matches(316.0));
    }

    #[test]
    fn visibility_boost_formulas() {
        let table = TargetTable::from_config(&AnalyzerConfig::default());
        let low = &table[0];
        let other = &table[1];
        let p = 25.0_f32;
        assert!((low.visibility_boost(p) - (p * 1.4 + p.powf(1.4))).abs() < 1e-3);
        assert!((other.visibility_boost(p) - (p * 1.25 + p.powf(1.3))).abs() < 1e-3);
        assert_eq!(low.visibility_boost(0.0), 0.0);
    }
}
