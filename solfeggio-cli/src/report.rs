//! Text rendering of the per-tick status line and of capture reports.

use solfeggio_core::targets::TargetTable;
use solfeggio_core::{ActiveSet, CaptureReport};
use std::fmt::Write;

/// Width of the bar drawn for a 100 % share.
const BAR_WIDTH: usize = 40;

/// "Active: a, b" or "No strong signals".
pub fn format_active(active: &ActiveSet) -> String {
    if active.is_empty() {
        "No strong signals".to_string()
    } else {
        let names: Vec<&str> = active.iter().map(String::as_str).collect();
        format!("Active: {}", names.join(", "))
    }
}

/// Per-target levels in table order, e.g. `174Hz -70.0 | 285Hz -52.3`.
pub fn format_levels(targets: &TargetTable, levels: &[f32]) -> String {
    targets
        .iter()
        .zip(levels)
        .map(|(t, level)| format!("{} {:.1}", t.name, level))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Multi-line table of a captured session.
pub fn format_report(report: &CaptureReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Capture at {} ({:.1}s)",
        report.captured_at.format("%H:%M:%S"),
        report.elapsed_secs
    );
    if report.total_weight <= 0.0 {
        let _ = writeln!(out, "  no detections in this session");
    }
    for entry in &report.distribution {
        let filled = ((entry.percentage / 100.0) * BAR_WIDTH as f32).round() as usize;
        let _ = writeln!(
            out,
            "  {:>6} {:>6.1}% {:>8.1}  {}",
            entry.name,
            entry.percentage,
            entry.scaled,
            "#".repeat(filled.min(BAR_WIDTH))
        );
    }
    out
}
