//! # Capture Session Module
//!
//! Owns the weighted hit counters of the current session. A capture turns them into
//! a percentage distribution, applies each target's visibility boost, and starts a
//! fresh session.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::targets::TargetTable;

/// Accumulated weight per target, indexed like the target table.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCounters {
    names: Vec<String>,
    weights: Vec<f32>,
}

impl SessionCounters {
    pub fn new(targets: &TargetTable) -> Self {
        Self {
            names: targets.iter().map(|t| t.name.clone()).collect(),
            weights: vec![0.0; targets.len()],
        }
    }

    pub fn add(&mut self, index: usize, weight: f32) {
        self.weights[index] += weight;
    }

    /// Sets a counter by name. Returns `false` for unknown names.
    pub fn set(&mut self, name: &str, weight: f32) -> bool {
        match self.names.iter().position(|n| n == name) {
            Some(index) => {
                self.weights[index] = weight;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|index| self.weights[index])
    }

    pub fn total(&self) -> f32 {
        self.weights.iter().sum()
    }

    /// `(name, weight)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.names.iter().map(String::as_str).zip(self.weights.iter().copied())
    }

    pub fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
    }
}

/// One target's share of a captured session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionEntry {
    pub name: String,
    /// Plain share of the session total, 0-100.
    pub percentage: f32,
    /// Share after the per-target visibility boost.
    pub scaled: f32,
}

/// Result of one capture.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub captured_at: DateTime<Local>,
    /// Seconds since the previous capture (or since the session clock started).
    pub elapsed_secs: f64,
    pub total_weight: f32,
    pub distribution: Vec<DistributionEntry>,
}

impl CaptureReport {
    pub fn entry(&self, name: &str) -> Option<&DistributionEntry> {
        self.distribution.iter().find(|e| e.name == name)
    }
}

/// Session accumulator plus the clock of the current session.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    counters: SessionCounters,
    started: Instant,
}

impl CaptureSession {
    pub fn new(targets: &TargetTable) -> Self {
        Self {
            counters: SessionCounters::new(targets),
            started: Instant::now(),
        }
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub fn counters_mut(&mut self) -> &mut SessionCounters {
        &mut self.counters
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Summarizes the session and resets the counters and the clock.
    pub fn capture(&mut self, targets: &TargetTable) -> CaptureReport {
        let elapsed = self.started.elapsed();
        let total = self.counters.total();

        let distribution = targets
            .iter()
            .zip(self.counters.iter())
            .map(|(target, (name, weight))| {
                let percentage = if total > 0.0 { 100.0 * weight / total } else { 0.0 };
                DistributionEntry {
                    name: name.to_string(),
                    percentage,
                    scaled: target.visibility_boost(percentage),
                }
            })
            .collect();

        self.counters.reset();
        self.started = Instant::now();

        tracing::info!(
            elapsed_secs = elapsed.as_secs_f64(),
            total_weight = total,
            "Captured session"
        );

        CaptureReport {
            captured_at: Local::now(),
            elapsed_secs: elapsed.as_secs_f64(),
            total_weight: total,
            distribution,
        }
    }
}
