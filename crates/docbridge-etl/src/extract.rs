//! Extraction orchestrator: document store to relational tables
//!
//! For every entity type found in the source the extractor looks up the
//! catalog mapping, then streams the documents in fixed-size pages through
//! projection, coercion, materialization and the relational sink. Entity
//! types run one after another; a failure in one does not stop the others.

use crate::batch::{materialize, BatchSchema};
use crate::catalog::{Catalog, EntityMapping};
use crate::error::{EtlError, Result};
use crate::progress::{LogProgress, ProgressReporter};
use crate::projector::project;
use crate::sink::{write_batch, RelationalSink};
use crate::source::DocumentSource;
use crate::summary::{EntityReport, EntityStatus, RunSummary};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Knobs for one extraction run
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub batch_size: usize,
    pub truncate_on_first_batch: bool,
    /// When set, only these entity types are processed
    pub entity_filter: Option<Vec<String>>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            truncate_on_first_batch: false,
            entity_filter: None,
        }
    }
}

impl ExtractOptions {
    pub fn builder() -> ExtractOptionsBuilder {
        ExtractOptionsBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct ExtractOptionsBuilder {
    options: ExtractOptions,
}

impl ExtractOptionsBuilder {
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.options.batch_size = batch_size.max(1);
        self
    }

    pub fn truncate_on_first_batch(mut self, truncate: bool) -> Self {
        self.options.truncate_on_first_batch = truncate;
        self
    }

    pub fn entity_filter(mut self, entities: Option<Vec<String>>) -> Self {
        self.options.entity_filter = entities.filter(|e| !e.is_empty());
        self
    }

    pub fn build(self) -> ExtractOptions {
        self.options
    }
}

pub struct Extractor {
    catalog: Arc<Catalog>,
    source: Arc<dyn DocumentSource>,
    sink: Arc<dyn RelationalSink>,
    options: ExtractOptions,
    progress: Arc<dyn ProgressReporter>,
    cancel: Arc<AtomicBool>,
}

impl Extractor {
    pub fn new(
        catalog: Arc<Catalog>,
        source: Arc<dyn DocumentSource>,
        sink: Arc<dyn RelationalSink>,
        options: ExtractOptions,
    ) -> Self {
        Self {
            catalog,
            source,
            sink,
            options,
            progress: Arc::new(LogProgress),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Flag checked at every page boundary; once set the run winds down
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn selected(&self, entity_type: &str) -> bool {
        match &self.options.entity_filter {
            Some(filter) => filter.iter().any(|e| e == entity_type),
            None => true,
        }
    }

    /// Run the whole extraction. Only a failure to list entity types is
    /// returned as an error; per-entity failures land in the summary.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        let entity_types = self.source.entity_types().await?;
        info!(count = entity_types.len(), "Discovered entity types");

        if let Some(filter) = &self.options.entity_filter {
            for wanted in filter.iter().filter(|w| !entity_types.contains(*w)) {
                warn!(entity_type = %wanted, "Requested entity type not present in source");
            }
        }

        for entity_type in entity_types.iter().filter(|e| self.selected(e)) {
            if self.cancelled() {
                summary.push(EntityReport::cancelled(entity_type.as_str()));
                continue;
            }

            let report = self.run_entity(entity_type).await;
            self.progress.entity_finished(&report);
            summary.push(report);
        }

        summary.elapsed = started.elapsed();
        info!(
            entities = summary.entities.len(),
            rows = summary.total_rows_written(),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Extraction finished"
        );
        Ok(summary)
    }

    async fn run_entity(&self, entity_type: &str) -> EntityReport {
        let started = Instant::now();

        let Some(mapping) = self.catalog.get(entity_type) else {
            info!(entity_type, "No mapping found, skipping");
            return EntityReport::skipped(entity_type, "no mapping in catalog");
        };

        let mut report = EntityReport::new(entity_type);
        match self.extract_entity(mapping, &mut report).await {
            Ok(()) => {}
            Err(EtlError::Cancelled) => report.status = EntityStatus::Cancelled,
            Err(e) => {
                error!(entity_type, error = %e, "Extraction failed");
                report.status = EntityStatus::Failed(e.to_string());
            }
        }
        report.elapsed = started.elapsed();
        report
    }

    async fn extract_entity(&self, mapping: &EntityMapping, report: &mut EntityReport) -> Result<()> {
        let entity_type = mapping.name.as_str();

        let total = self.source.count(entity_type).await?;
        if total == 0 {
            info!(entity_type, "No documents, skipping");
            report.status = EntityStatus::Skipped("no documents".to_string());
            return Ok(());
        }

        self.progress.entity_started(entity_type, &mapping.description, total);

        let schema = BatchSchema::from_mapping(mapping);
        let mut cursor = self.source.open(entity_type, mapping).await?;

        loop {
            if self.cancelled() {
                warn!(entity_type, rows = report.rows_written, "Cancelled at page boundary");
                return Err(EtlError::Cancelled);
            }

            let page = cursor.next_page(self.options.batch_size).await?;
            if page.is_empty() {
                break;
            }
            report.rows_read += page.len() as u64;

            let records: Vec<_> = page.iter().map(|doc| project(mapping, doc)).collect();
            let batch = materialize(&schema, &records);
            if batch.rejected > 0 {
                debug!(entity_type, rejected = batch.rejected, "Unconvertible values stored as NULL");
            }
            report.errors += batch.rejected as u64;

            let outcome = write_batch(
                self.sink.as_ref(),
                &batch,
                entity_type,
                report.batches == 0,
                self.options.truncate_on_first_batch,
            )
            .await?;

            report.batches += 1;
            report.rows_written += outcome.rows_written;
            debug!(entity_type, batch = report.batches, rows = outcome.rows_written, "Batch committed");
            self.progress.advanced(entity_type, report.rows_read, total);
        }

        Ok(())
    }
}
