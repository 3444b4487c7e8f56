//! Progress reporting for both pipelines
//!
//! Orchestrators report through [`ProgressReporter`]. The default
//! implementation writes structured log events; the CLI swaps in a terminal
//! progress bar with `--progress`.

use crate::summary::EntityReport;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use tracing::info;

pub trait ProgressReporter: Send + Sync {
    fn entity_started(&self, entity_type: &str, description: &str, total: u64);

    /// Called after every committed batch or inserted page
    fn advanced(&self, entity_type: &str, processed: u64, total: u64);

    fn entity_finished(&self, report: &EntityReport);
}

/// Reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn entity_started(&self, entity_type: &str, description: &str, total: u64) {
        info!(entity_type, total, "Processing {}", description);
    }

    fn advanced(&self, entity_type: &str, processed: u64, total: u64) {
        info!(
            entity_type,
            processed,
            total,
            "Progress: {}",
            percent(processed, total)
        );
    }

    fn entity_finished(&self, report: &EntityReport) {
        info!(
            entity_type = %report.entity_type,
            status = report.status.label(),
            rows = report.rows_written,
            errors = report.errors,
            batches = report.batches,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Entity type finished"
        );
    }
}

/// Terminal progress bar, one bar per entity type
#[derive(Default)]
pub struct BarProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
    }
}

impl ProgressReporter for BarProgress {
    fn entity_started(&self, entity_type: &str, description: &str, total: u64) {
        let pb = ProgressBar::new(total);
        pb.set_style(Self::style());
        pb.set_message(format!("{} ({})", entity_type, description));
        if let Ok(mut bar) = self.bar.lock() {
            *bar = Some(pb);
        }
    }

    fn advanced(&self, _entity_type: &str, processed: u64, _total: u64) {
        if let Ok(bar) = self.bar.lock() {
            if let Some(pb) = bar.as_ref() {
                pb.set_position(processed);
            }
        }
    }

    fn entity_finished(&self, report: &EntityReport) {
        if let Ok(mut bar) = self.bar.lock() {
            if let Some(pb) = bar.take() {
                pb.finish_and_clear();
            }
        }
        LogProgress.entity_finished(report);
    }
}

/// `processed/total` as a percentage string
pub fn percent(processed: u64, total: u64) -> String {
    if total == 0 {
        return "100.0%".to_string();
    }
    format!("{:.1}%", processed as f64 * 100.0 / total as f64)
}
