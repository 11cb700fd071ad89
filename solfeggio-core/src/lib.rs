// solfeggio-core/src/lib.rs

//! The core logic for the reference-tone analyzer.
//! This crate is responsible for filtering, spectral analysis, peak
//! classification and session accumulation. It is completely headless
//! and contains no terminal or rendering code.

pub mod audio;
pub mod calibration;
pub mod capture;
pub mod classify;
pub mod config;
pub mod fft;
pub mod filter;
pub mod peaks;
pub mod persistence;
pub mod pipeline;
pub mod targets;

pub use audio::{CpalFrameSource, FrameSource};
pub use capture::{CaptureReport, DistributionEntry};
pub use config::AnalyzerConfig;
pub use persistence::ActiveSet;
pub use pipeline::{FrameAnalysis, Pipeline};
