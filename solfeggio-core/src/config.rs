//! # Configuration Module
//!
//! This module holds every tunable of the analyzer as one immutable value that is
//! handed to the pipeline at construction time. Nothing in the crate reads global
//! settings, so several pipelines with different parameters can coexist (which is
//! exactly what the tests do).
//!
//! ## Features
//! - Defaults matching the reference tuning (44.1 kHz, 8192-sample frames)
//! - Optional TOML file with per-field fallbacks
//! - Validation of corner frequencies, target table and detector ranges

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::targets;

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
/// Default number of samples per frame.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;
/// Lowest decibel value reported for display levels.
pub const DEFAULT_MIN_DB: f32 = -70.0;
/// Base peak height threshold in dB, shared by both detector passes.
pub const DEFAULT_PEAK_THRESHOLD_DB: f32 = -68.0;
/// Base matching tolerance as a percentage of the target frequency.
pub const DEFAULT_TOLERANCE_PERCENT: f32 = 2.0;
/// Interval between two pipeline ticks in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 30;
/// Smoothing factor for the adaptive noise floor.
pub const DEFAULT_NOISE_FLOOR_ALPHA: f32 = 0.90;
/// Number of frames the persistence tracker remembers.
pub const DEFAULT_PERSISTENCE_WINDOW: usize = 8;

/// Window function applied before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    Blackman,
    Hann,
}

/// Corner frequencies and order of the Butterworth bandpass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BandpassConfig {
    pub low_hz: f32,
    pub high_hz: f32,
    /// Prototype order; the resulting bandpass has twice as many poles.
    pub order: usize,
}

impl Default for BandpassConfig {
    fn default() -> Self {
        Self {
            low_hz: 70.0,
            high_hz: 4000.0,
            order: 4,
        }
    }
}

/// Parameters of the one-shot noise floor calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseFloorConfig {
    /// Frames read during calibration.
    pub calibration_frames: usize,
    /// Percentile (0-100) taken across the calibration frames for each bin.
    pub percentile: f32,
    /// The median is scaled by this before being compared against the percentile.
    pub median_scale: f32,
    /// Smoothing factor used when `adaptive` is on.
    pub alpha: f32,
    /// Let the floor drift down toward quieter ambient levels after calibration.
    pub adaptive: bool,
}

impl Default for NoiseFloorConfig {
    fn default() -> Self {
        Self {
            calibration_frames: 20,
            percentile: 20.0,
            median_scale: 0.8,
            alpha: DEFAULT_NOISE_FLOOR_ALPHA,
            adaptive: false,
        }
    }
}

/// Constraints for one peak detection pass. `None` disables a constraint.
/// One peak detector pass.
///
/// In TOML each section only overrides the fields it names; the rest come from
/// that section's own defaults ([`DetectorConfig::classification`] or
/// [`DetectorConfig::presence`]).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorConfig {
    pub height_db: f32,
    pub min_prominence: Option<f32>,
    /// Inclusive `(min, max)` width in bins measured at half prominence.
    pub width: Option<(f32, f32)>,
    /// Minimum spacing in bins between two kept peaks.
    pub min_distance: Option<usize>,
}

impl DetectorConfig {
    /// The fine pass used for scoring: prominence floor and a width window
    /// wide enough for low-frequency tones.
    pub fn classification() -> Self {
        Self {
            height_db: DEFAULT_PEAK_THRESHOLD_DB,
            min_prominence: Some(0.5),
            width: Some((3.0, 60.0)),
            min_distance: Some(10),
        }
    }

    /// The coarse pass used for the active set: height only.
    pub fn presence() -> Self {
        Self {
            height_db: DEFAULT_PEAK_THRESHOLD_DB,
            min_prominence: None,
            width: None,
            min_distance: None,
        }
    }
}

/// Fields present in a detector section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DetectorOverrides {
    height_db: Option<f32>,
    min_prominence: Option<f32>,
    width: Option<(f32, f32)>,
    min_distance: Option<usize>,
}

impl DetectorOverrides {
    fn apply(self, base: DetectorConfig) -> DetectorConfig {
        DetectorConfig {
            height_db: self.height_db.unwrap_or(base.height_db),
            min_prominence: self.min_prominence.or(base.min_prominence),
            width: self.width.or(base.width),
            min_distance: self.min_distance.or(base.min_distance),
        }
    }
}

fn classification_section<'de, D>(deserializer: D) -> std::result::Result<DetectorConfig, D::Error>
where
    D: Deserializer<'de>,
{
    DetectorOverrides::deserialize(deserializer).map(|o| o.apply(DetectorConfig::classification()))
}

fn presence_section<'de, D>(deserializer: D) -> std::result::Result<DetectorConfig, D::Error>
where
    D: Deserializer<'de>,
{
    DetectorOverrides::deserialize(deserializer).map(|o| o.apply(DetectorConfig::presence()))
}

/// One entry of the target table as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub hz: f32,
    /// Marks a tone that gets the wider tolerance, the larger prominence boost
    /// and the stronger visibility transform.
    #[serde(default)]
    pub amplified: bool,
    #[serde(default)]
    pub tolerance_percent: Option<f32>,
    #[serde(default)]
    pub prominence_boost: Option<f32>,
}

impl TargetSpec {
    pub fn new(name: &str, hz: f32) -> Self {
        Self {
            name: name.to_string(),
            hz,
            amplified: false,
            tolerance_percent: None,
            prominence_boost: None,
        }
    }

    pub fn amplified(mut self) -> Self {
        self.amplified = true;
        self
    }
}

/// Complete analyzer configuration. Fixed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub window: WindowKind,
    pub min_db: f32,
    pub base_tolerance_percent: f32,
    pub tick_interval_ms: u64,
    pub bandpass: BandpassConfig,
    pub noise_floor: NoiseFloorConfig,
    #[serde(deserialize_with = "classification_section")]
    pub classification: DetectorConfig,
    #[serde(deserialize_with = "presence_section")]
    pub presence: DetectorConfig,
    pub persistence_window: usize,
    pub targets: Vec<TargetSpec>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            window: WindowKind::Blackman,
            min_db: DEFAULT_MIN_DB,
            base_tolerance_percent: DEFAULT_TOLERANCE_PERCENT,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            bandpass: BandpassConfig::default(),
            noise_floor: NoiseFloorConfig::default(),
            classification: DetectorConfig::classification(),
            presence: DetectorConfig::presence(),
            persistence_window: DEFAULT_PERSISTENCE_WINDOW,
            targets: targets::DEFAULT_TARGETS.clone(),
        }
    }
}

impl AnalyzerConfig {
    /// Loads a configuration from a TOML file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded analyzer configuration");
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Number of bins in the one-sided spectrum.
    pub fn spectrum_len(&self) -> usize {
        self.buffer_size / 2 + 1
    }

    /// Frequency spacing between two adjacent bins in Hz.
    pub fn bin_width_hz(&self) -> f32 {
        self.sample_rate as f32 / self.buffer_size as f32
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    /// Checks the invariants the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            bail!("sample_rate must be positive");
        }
        if self.buffer_size < 2 {
            bail!("buffer_size must be at least 2, got {}", self.buffer_size);
        }
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be positive");
        }

        let bp = &self.bandpass;
        if bp.order == 0 {
            bail!("bandpass order must be positive");
        }
        if !(bp.low_hz > 0.0 && bp.low_hz < bp.high_hz && bp.high_hz < self.nyquist()) {
            bail!(
                "bandpass corners must satisfy 0 < low < high < {} Hz, got {}..{}",
                self.nyquist(),
                bp.low_hz,
                bp.high_hz
            );
        }

        let nf = &self.noise_floor;
        if nf.calibration_frames == 0 {
            bail!("noise_floor.calibration_frames must be positive");
        }
        if !(0.0..=100.0).contains(&nf.percentile) {
            bail!("noise_floor.percentile must be within 0..=100, got {}", nf.percentile);
        }
        if !(0.0..=1.0).contains(&nf.alpha) {
            bail!("noise_floor.alpha must be within 0..=1, got {}", nf.alpha);
        }

        validate_detector("classification", &self.classification)?;
        validate_detector("presence", &self.presence)?;

        if self.persistence_window == 0 {
            bail!("persistence_window must be positive");
        }
        if !(self.base_tolerance_percent > 0.0) {
            bail!("base_tolerance_percent must be positive");
        }

        if self.targets.is_empty() {
            bail!("target table is empty");
        }
        let mut seen = HashSet::new();
        for target in &self.targets {
            if !(target.hz > 0.0) {
                bail!("target {} has non-positive frequency {}", target.name, target.hz);
            }
            if target.tolerance_percent.is_some_and(|t| !(t > 0.0)) {
                bail!("target {} has non-positive tolerance", target.name);
            }
            if target.prominence_boost.is_some_and(|b| !(b > 0.0)) {
                bail!("target {} has non-positive prominence boost", target.name);
            }
            if !seen.insert(target.name.as_str()) {
                return Err(anyhow!("duplicate target name {}", target.name));
            }
        }
        Ok(())
    }
}

fn validate_detector(label: &str, detector: &DetectorConfig) -> Result<()> {
    if !detector.height_db.is_finite() {
        bail!("{label}.height_db must be finite");
    }
    if let Some((min, max)) = detector.width {
        if min > max {
            bail!("{label}.width range is inverted: {min} > {max}");
        }
    }
    if detector.min_prominence.is_some_and(|p| p < 0.0) {
        bail!("{label}.min_prominence must not be negative");
    }
    Ok(())
}
