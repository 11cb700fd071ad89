//! # Analysis Pipeline
//!
//! Ties the stages together behind two calls a host needs: `process_frame` once per
//! tick and `capture` whenever the user asks for a summary. The pipeline is a plain
//! value with no interior locking; hosts that trigger captures from another thread
//! forward the request to the thread that owns the pipeline.

use anyhow::{Context, Result};

use crate::audio::FrameSource;
use crate::calibration::{self, NoiseFloor};
use crate::capture::{CaptureReport, CaptureSession, SessionCounters};
use crate::classify::FrequencyClassifier;
use crate::config::AnalyzerConfig;
use crate::fft::{self, SpectralAnalyzer};
use crate::filter::BandpassFilter;
use crate::persistence::{ActiveSet, PersistenceTracker};
use crate::targets::TargetTable;

/// Per-tick output for renderers and status readouts.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    /// Decibel spectrum, one value per bin of [`Pipeline::frequencies`].
    pub spectrum: Vec<f32>,
    /// Spectrum level at each target's nearest bin, floored at the display minimum.
    pub target_levels: Vec<f32>,
    /// Targets detected at least once in the persistence window.
    pub active: ActiveSet,
}

/// The full per-frame analysis chain with its persistent state.
#[derive(Debug)]
pub struct Pipeline {
    config: AnalyzerConfig,
    targets: TargetTable,
    frequencies: Vec<f32>,
    filter: BandpassFilter,
    analyzer: SpectralAnalyzer,
    noise_floor: NoiseFloor,
    classifier: FrequencyClassifier,
    tracker: PersistenceTracker,
    session: CaptureSession,
    failed_reads: usize,
}

impl Pipeline {
    /// Validates `config`, calibrates the noise floor from `source` and returns a
    /// pipeline ready for live frames.
    ///
    /// # Errors
    /// * Invalid configuration
    /// * The source cannot supply the calibration frames
    pub fn calibrate<S: FrameSource + ?Sized>(config: AnalyzerConfig, source: &mut S) -> Result<Self> {
        config.validate().context("invalid analyzer configuration")?;

        let mut filter = BandpassFilter::new(&config.bandpass, config.sample_rate);
        let analyzer = SpectralAnalyzer::new(config.window, config.buffer_size);
        let noise_floor = calibration::calibrate(source, &mut filter, &analyzer, &config.noise_floor)
            .context("noise floor calibration failed")?;

        Ok(Self::assemble(config, filter, analyzer, noise_floor))
    }

    /// Builds a pipeline around an existing floor, skipping calibration.
    pub fn with_noise_floor(config: AnalyzerConfig, noise_floor: NoiseFloor) -> Result<Self> {
        config.validate().context("invalid analyzer configuration")?;
        anyhow::ensure!(
            noise_floor.len() == config.spectrum_len(),
            "noise floor has {} bins, spectrum has {}",
            noise_floor.len(),
            config.spectrum_len()
        );
        let filter = BandpassFilter::new(&config.bandpass, config.sample_rate);
        let analyzer = SpectralAnalyzer::new(config.window, config.buffer_size);
        Ok(Self::assemble(config, filter, analyzer, noise_floor))
    }

    fn assemble(
        config: AnalyzerConfig,
        filter: BandpassFilter,
        analyzer: SpectralAnalyzer,
        noise_floor: NoiseFloor,
    ) -> Self {
        let targets = TargetTable::from_config(&config);
        let frequencies = fft::bin_frequencies(config.sample_rate, config.buffer_size);
        let classifier = FrequencyClassifier::new(config.classification.clone());
        let tracker = PersistenceTracker::new(config.presence.clone(), config.persistence_window);
        let session = CaptureSession::new(&targets);

        tracing::info!(
            sample_rate = config.sample_rate,
            buffer_size = config.buffer_size,
            targets = targets.len(),
            "Pipeline ready"
        );

        Self {
            config,
            targets,
            frequencies,
            filter,
            analyzer,
            noise_floor,
            classifier,
            tracker,
            session,
            failed_reads: 0,
        }
    }

    /// Runs one frame through filter, analysis, classification and persistence.
    pub fn process_frame(&mut self, frame: &[f32]) -> FrameAnalysis {
        let frame = if frame.len() == self.config.buffer_size {
            std::borrow::Cow::Borrowed(frame)
        } else {
            std::borrow::Cow::Owned(fit_frame(frame.to_vec(), self.config.buffer_size))
        };

        let filtered = self.filter.filter(&frame);
        let linear = self.analyzer.normalized_magnitudes(&filtered);
        let spectrum = fft::to_decibels(&linear, &self.noise_floor);

        if self.config.noise_floor.adaptive {
            self.noise_floor.adapt(&linear, self.config.noise_floor.alpha);
        }

        self.classifier.run(
            &spectrum,
            &self.frequencies,
            &self.targets,
            self.session.counters_mut(),
        );
        self.finish(spectrum)
    }

    /// Pulls at most one frame from `source` and processes it.
    ///
    /// Returns `None` when the source has no fresh frame yet. A read error is
    /// replaced by a silent spectrum and never propagates; only the first error
    /// of a run of failures is logged as a warning.
    pub fn tick<S: FrameSource + ?Sized>(&mut self, source: &mut S) -> Option<FrameAnalysis> {
        match source.try_next_frame() {
            Ok(Some(frame)) => {
                if self.failed_reads > 0 {
                    tracing::info!(failed = self.failed_reads, "Audio input recovered");
                    self.failed_reads = 0;
                }
                Some(self.process_frame(&frame))
            }
            Ok(None) => None,
            Err(e) => {
                if self.failed_reads == 0 {
                    tracing::warn!("Audio error: {e:#}");
                } else {
                    tracing::debug!(failed = self.failed_reads + 1, "Audio error: {e:#}");
                }
                self.failed_reads += 1;
                Some(self.silent_frame())
            }
        }
    }

    /// Consecutive ticks that ended in a read error.
    pub fn failed_reads(&self) -> usize {
        self.failed_reads
    }

    /// Analysis result for a tick without usable audio. Filter state is untouched.
    pub fn silent_frame(&mut self) -> FrameAnalysis {
        let spectrum = fft::silence_spectrum(self.frequencies.len());
        self.finish(spectrum)
    }

    fn finish(&mut self, spectrum: Vec<f32>) -> FrameAnalysis {
        let active = self.tracker.update(&spectrum, &self.frequencies, &self.targets);
        let min_db = self.config.min_db;
        let target_levels = self
            .targets
            .iter()
            .map(|t| spectrum[t.nearest_bin].max(min_db))
            .collect();
        FrameAnalysis {
            spectrum,
            target_levels,
            active,
        }
    }

    /// Summarizes and resets the current session.
    pub fn capture(&mut self) -> CaptureReport {
        self.session.capture(&self.targets)
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn targets(&self) -> &TargetTable {
        &self.targets
    }

    /// Bin-to-frequency table shared by every spectrum.
    pub fn frequencies(&self) -> &[f32] {
        &self.frequencies
    }

    pub fn noise_floor(&self) -> &NoiseFloor {
        &self.noise_floor
    }

    pub fn counters(&self) -> &SessionCounters {
        self.session.counters()
    }

    pub fn session_elapsed(&self) -> std::time::Duration {
        self.session.elapsed()
    }
}

/// Zero-pads or truncates a frame to `len` samples.
pub(crate) fn fit_frame(mut frame: Vec<f32>, len: usize) -> Vec<f32> {
    if frame.len() != len {
        tracing::warn!(expected = len, got = frame.len(), "Frame length mismatch, resizing");
        frame.resize(len, 0.0);
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_frame_pads_and_truncates() {
        assert_eq!(fit_frame(vec![1.0], 3), vec![1.0, 0.0, 0.0]);
        assert_eq!(fit_frame(vec![1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
    }

    #[test]
    fn rejects_mismatched_floor() {
        let config = AnalyzerConfig::default();
        assert!(Pipeline::with_noise_floor(config, NoiseFloor::zeros(10)).is_err());
    }

    #[test]
    fn silent_frame_keeps_levels_at_display_floor() {
        let config = AnalyzerConfig::default();
        let floor = NoiseFloor::zeros(config.spectrum_len());
        let mut pipeline = Pipeline::with_noise_floor(config, floor).unwrap();
        let analysis = pipeline.silent_frame();
        assert!(analysis.active.is_empty());
        assert!(analysis.target_levels.iter().all(|&l| l == -70.0));
        assert_eq!(pipeline.counters().total(), 0.0);
    }

    fn pipeline_with_floor(adaptive: bool, level: f32) -> Pipeline {
        let mut config = AnalyzerConfig::default();
        config.noise_floor.adaptive = adaptive;
        let floor = NoiseFloor::from_values(vec![level; config.spectrum_len()]);
        Pipeline::with_noise_floor(config, floor).unwrap()
    }

    fn tone(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 44_100.0).sin())
            .collect()
    }

    #[test]
    fn adaptive_floor_only_moves_down() {
        let mut pipeline = pipeline_with_floor(true, 1.0);
        let quiet = vec![0.0; pipeline.config().buffer_size];

        pipeline.process_frame(&quiet);
        let after_quiet = pipeline.noise_floor().values().to_vec();
        assert!(after_quiet.iter().all(|&v| v < 1.0));

        pipeline.process_frame(&tone(432.0, pipeline.config().buffer_size));
        let after_tone = pipeline.noise_floor().values();
        assert!(after_tone.iter().zip(&after_quiet).all(|(now, before)| now <= before));
    }

    #[test]
    fn fixed_floor_is_untouched_by_frames() {
        let mut pipeline = pipeline_with_floor(false, 1.0);
        let quiet = vec![0.0; pipeline.config().buffer_size];
        for _ in 0..3 {
            pipeline.process_frame(&quiet);
        }
        assert!(pipeline.noise_floor().values().iter().all(|&v| v == 1.0));
    }

    struct Unplugged;

    impl FrameSource for Unplugged {
        fn next_frame(&mut self) -> Result<Vec<f32>> {
            Err(anyhow::anyhow!("audio stream closed"))
        }
    }

    struct Quiet(usize);

    impl FrameSource for Quiet {
        fn next_frame(&mut self) -> Result<Vec<f32>> {
            Ok(vec![0.0; self.0])
        }
    }

    #[test]
    fn failed_reads_count_until_recovery() {
        let mut pipeline = pipeline_with_floor(false, 0.0);
        for _ in 0..5 {
            assert!(pipeline.tick(&mut Unplugged).is_some());
        }
        assert_eq!(pipeline.failed_reads(), 5);

        let buffer_size = pipeline.config().buffer_size;
        pipeline.tick(&mut Quiet(buffer_size));
        assert_eq!(pipeline.failed_reads(), 0);
    }
}
