//! # Persistence Tracking
//!
//! Keeps the target names seen in the last few frames and reports their union as
//! the "active" set, so a tone has to be missing for the whole window before it
//! drops out of the readout.

use std::collections::{BTreeSet, VecDeque};

use crate::config::DetectorConfig;
use crate::peaks::PeakDetector;
use crate::targets::TargetTable;

/// Names of currently persistent targets, sorted.
pub type ActiveSet = BTreeSet<String>;

/// Coarse detector pass plus a bounded window of per-frame detections.
#[derive(Debug, Clone)]
pub struct PersistenceTracker {
    detector: PeakDetector,
    recent: VecDeque<BTreeSet<String>>,
    capacity: usize,
}

impl PersistenceTracker {
    pub fn new(config: DetectorConfig, capacity: usize) -> Self {
        Self {
            detector: PeakDetector::new(config),
            recent: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Detects this frame's targets and returns the active set.
    ///
    /// Every target is tested with the base tolerance, and a peak may mark more
    /// than one target here (unlike classification).
    pub fn update(&mut self, spectrum: &[f32], frequencies: &[f32], targets: &TargetTable) -> ActiveSet {
        let base = targets.base_tolerance_percent();
        let mut current = BTreeSet::new();
        for peak in self.detector.find_peaks(spectrum) {
            let Some(&freq) = frequencies.get(peak.bin) else {
                continue;
            };
            for target in targets {
                if target.matches_base(freq, base) {
                    current.insert(target.name.clone());
                }
            }
        }
        self.push(current)
    }

    /// Pushes one frame's detections, evicting the oldest beyond capacity.
    pub fn push(&mut self, detected: BTreeSet<String>) -> ActiveSet {
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(detected);
        self.active()
    }

    /// Union of every set still in the window.
    pub fn active(&self) -> ActiveSet {
        self.recent.iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use crate::fft::{SILENCE_DB, bin_frequencies};

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn window_is_bounded() {
        let mut tracker = PersistenceTracker::new(DetectorConfig::presence(), 3);
        for _ in 0..10 {
            tracker.push(BTreeSet::new());
        }
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn union_of_recent_frames() {
        let mut tracker = PersistenceTracker::new(DetectorConfig::presence(), 8);
        tracker.push(names(&["432Hz"]));
        let active = tracker.push(names(&["528Hz"]));
        assert_eq!(active, names(&["432Hz", "528Hz"]));
    }

    #[test]
    fn single_detection_survives_full_window_then_drops() {
        let config = AnalyzerConfig::default();
        let targets = TargetTable::from_config(&config);
        let frequencies = bin_frequencies(config.sample_rate, config.buffer_size);
        let mut tracker = PersistenceTracker::new(config.presence.clone(), 8);

        let mut with_tone = vec![SILENCE_DB; config.spectrum_len()];
        with_tone[80] = -20.0; // 430.66 Hz
        let quiet = vec![SILENCE_DB; config.spectrum_len()];

        assert_eq!(tracker.update(&with_tone, &frequencies, &targets), names(&["432Hz"]));
        for tick in 1..8 {
            let active = tracker.update(&quiet, &frequencies, &targets);
            assert!(active.contains("432Hz"), "dropped early at tick {tick}");
        }
        assert!(tracker.update(&quiet, &frequencies, &targets).is_empty());
    }

    #[test]
    fn peak_below_threshold_is_not_active() {
        let config = AnalyzerConfig::default();
        let targets = TargetTable::from_config(&config);
        let frequencies = bin_frequencies(config.sample_rate, config.buffer_size);
        let mut tracker = PersistenceTracker::new(config.presence.clone(), 8);

        let mut spectrum = vec![SILENCE_DB; config.spectrum_len()];
        spectrum[80] = -69.0;
        assert!(tracker.update(&spectrum, &frequencies, &targets).is_empty());
    }

    #[test]
    fn every_target_uses_base_tolerance() {
        let config = AnalyzerConfig::default();
        let targets = TargetTable::from_config(&config);
        let frequencies = bin_frequencies(config.sample_rate, config.buffer_size);
        let mut tracker = PersistenceTracker::new(config.presence.clone(), 8);

        let mut spectrum = vec![SILENCE_DB; config.spectrum_len()];
        spectrum[33] = -20.0; // 177.65 Hz: inside 174Hz's widened band only
        spectrum[81] = -20.0; // 436.05 Hz: inside both 432Hz and 440Hz at 2 %
        let hz_174 = targets.index_of("174Hz").unwrap();
        assert!(targets[hz_174].matches(frequencies[33]));

        let active = tracker.update(&spectrum, &frequencies, &targets);
        assert_eq!(active, names(&["432Hz", "440Hz"]));
    }
}
