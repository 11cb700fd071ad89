//! # Frequency Classification
//!
//! Credits fine-pass peaks to reference tones. Each peak is checked against the
//! target table in table order and the FIRST target whose band covers it wins, even
//! when a later target is closer. At most one target is credited per peak, with
//! `prominence * prominence_boost`.

use crate::capture::SessionCounters;
use crate::config::DetectorConfig;
use crate::peaks::{Peak, PeakDetector};
use crate::targets::TargetTable;

/// Fine detector pass plus first-match crediting.
#[derive(Debug, Clone)]
pub struct FrequencyClassifier {
    detector: PeakDetector,
}

impl FrequencyClassifier {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            detector: PeakDetector::new(config),
        }
    }

    /// Detects peaks in `spectrum` and credits them into `counters`.
    pub fn run(
        &self,
        spectrum: &[f32],
        frequencies: &[f32],
        targets: &TargetTable,
        counters: &mut SessionCounters,
    ) {
        let peaks = self.detector.find_peaks(spectrum);
        classify(&peaks, frequencies, targets, counters);
    }
}

/// Credits each peak to the first matching target in table order.
///
/// # Arguments
/// * `peaks` - Peaks from the fine pass (with prominences)
/// * `frequencies` - Bin-to-frequency table of the spectrum the peaks came from
/// * `targets` - Reference tones
/// * `counters` - Session accumulator, indexed like `targets`
pub fn classify(
    peaks: &[Peak],
    frequencies: &[f32],
    targets: &TargetTable,
    counters: &mut SessionCounters,
) {
    for peak in peaks {
        let Some(&freq) = frequencies.get(peak.bin) else {
            continue;
        };
        if let Some((index, target)) = targets.first_match(freq) {
            let credit = peak.prominence * target.prominence_boost;
            counters.add(index, credit);
            tracing::debug!(
                target = %target.name,
                freq,
                prominence = peak.prominence,
                credit,
                "Classified peak"
            );
        }
    }
}
