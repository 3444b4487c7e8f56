//! Import orchestrator: staged relational rows back into document collections
//!
//! The source is a relational table holding one JSON payload per row and a
//! discriminator column naming the row's entity type. Each entity type is
//! paged by offset in identity order; every payload becomes one document
//! carrying the row's metadata under [`METADATA_KEY`] and lands in the
//! collection named after the entity type.
//!
//! A failed entity attempt hands back an [`ImportCursor`] so the retry picks
//! up at the page that failed instead of starting over.

use crate::error::{EtlError, Result};
use crate::progress::{LogProgress, ProgressReporter};
use crate::retry::{any_error, retry, RetryPolicy};
use crate::summary::{EntityReport, EntityStatus, RunSummary};
use async_trait::async_trait;
use bson::{Bson, Document};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Reserved key holding row metadata in every imported document
pub const METADATA_KEY: &str = "_metadata";

/// Secondary indexes created on every collection after import
pub const INDEXED_FIELDS: [&str; 2] = ["_metadata.RAWID", "_metadata.EffectiveFrom"];

pub const DEFAULT_PAGE_SIZE: usize = 5000;

/// One staged row
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub from_id: i64,
    pub raw_id: String,
    pub raw_date: NaiveDateTime,
    pub json_raw_data: Option<String>,
    pub effective_from: DateTime<FixedOffset>,
}

/// Relational table of staged rows, partitioned by discriminator
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Distinct discriminator values, ascending
    async fn entity_types(&self) -> Result<Vec<String>>;

    async fn count(&self, entity_type: &str) -> Result<u64>;

    /// Rows `offset..offset + limit` in identity order
    async fn fetch_page(&self, entity_type: &str, offset: u64, limit: usize) -> Result<Vec<RawRow>>;
}

/// Collection store receiving imported documents
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Unordered bulk insert, returning documents inserted
    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<u64>;

    /// Ascending single-field index
    async fn create_index(&self, collection: &str, field_path: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportCounters {
    pub rows_read: u64,
    pub inserted: u64,
    pub errors: u64,
    pub pages: u64,
}

/// Position reached within one entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportCursor {
    pub entity_type: String,
    pub next_offset: u64,
    pub counters: ImportCounters,
}

impl ImportCursor {
    pub fn start(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            next_offset: 0,
            counters: ImportCounters::default(),
        }
    }
}

/// A failed attempt and how far it got
#[derive(Debug)]
pub struct EntityFailure {
    pub cursor: ImportCursor,
    pub error: EtlError,
}

/// Cursor for the next attempt, or `None` when the failure is final.
/// Transient source errors resume from the failed page; anything else,
/// including insert failures that outlived their own retries, ends the
/// entity type.
pub fn next_attempt(failure: &EntityFailure, attempt: u32, policy: RetryPolicy) -> Option<ImportCursor> {
    policy
        .should_retry(attempt, &failure.error, EtlError::is_transient)
        .then(|| failure.cursor.clone())
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub page_size: usize,
    pub entity_filter: Option<Vec<String>>,
    pub enumeration_retry: RetryPolicy,
    pub entity_retry: RetryPolicy,
    pub insert_retry: RetryPolicy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            entity_filter: None,
            enumeration_retry: RetryPolicy::ENUMERATION,
            entity_retry: RetryPolicy::ENTITY,
            insert_retry: RetryPolicy::INSERT,
        }
    }
}

/// Why a payload could not become a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    Missing,
    NotAnObject,
    Malformed(String),
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::Missing => f.write_str("payload is missing"),
            PayloadError::NotAnObject => f.write_str("payload is not a JSON object"),
            PayloadError::Malformed(e) => write!(f, "payload is not valid JSON: {}", e),
        }
    }
}

/// Convert parsed JSON to BSON. Integers that fit in 32 bits stay 32-bit.
/// Keys are taken literally; no extended-JSON interpretation.
pub fn json_to_bson(value: JsonValue) -> Bson {
    match value {
        JsonValue::Null => Bson::Null,
        JsonValue::Bool(b) => Bson::Boolean(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => match i32::try_from(i) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(i),
            },
            None => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Bson::String(s),
        JsonValue::Array(items) => Bson::Array(items.into_iter().map(json_to_bson).collect()),
        JsonValue::Object(map) => Bson::Document(
            map.into_iter()
                .map(|(k, v)| (k, json_to_bson(v)))
                .collect(),
        ),
    }
}

/// Build the document for one row. An existing `_metadata` key in the
/// payload is replaced.
pub fn build_document(
    row: &RawRow,
    imported_at: DateTime<Utc>,
) -> std::result::Result<Document, PayloadError> {
    let text = row.json_raw_data.as_deref().ok_or(PayloadError::Missing)?;
    let parsed: JsonValue =
        serde_json::from_str(text).map_err(|e| PayloadError::Malformed(e.to_string()))?;

    let mut doc = match json_to_bson(parsed) {
        Bson::Document(doc) => doc,
        _ => return Err(PayloadError::NotAnObject),
    };

    let mut metadata = Document::new();
    metadata.insert("FromID", row.from_id);
    metadata.insert("RAWID", row.raw_id.as_str());
    metadata.insert("RAWDATE", bson::DateTime::from_chrono(row.raw_date.and_utc()));
    metadata.insert(
        "EffectiveFrom",
        bson::DateTime::from_chrono(row.effective_from),
    );
    metadata.insert("ImportedAt", bson::DateTime::from_chrono(imported_at));
    doc.insert(METADATA_KEY, metadata);

    Ok(doc)
}

pub struct Importer {
    source: Arc<dyn RowSource>,
    sink: Arc<dyn DocumentSink>,
    options: ImportOptions,
    progress: Arc<dyn ProgressReporter>,
    cancel: Arc<AtomicBool>,
}

impl Importer {
    pub fn new(source: Arc<dyn RowSource>, sink: Arc<dyn DocumentSink>, options: ImportOptions) -> Self {
        Self {
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

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Import every entity type. Fails only when the entity types cannot be
    /// listed after retries; per-entity failures land in the summary.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        let source = self.source.as_ref();
        let entity_types = retry(
            self.options.enumeration_retry,
            "Listing entity types",
            EtlError::is_transient,
            move || source.entity_types(),
        )
        .await?;
        info!(count = entity_types.len(), "Found entity types to import");

        if let Some(filter) = &self.options.entity_filter {
            for wanted in filter.iter().filter(|w| !entity_types.contains(*w)) {
                warn!(entity_type = %wanted, "Requested entity type not present in source");
            }
        }

        let selected = entity_types.iter().filter(|e| match &self.options.entity_filter {
            Some(filter) => filter.contains(*e),
            None => true,
        });

        for entity_type in selected {
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
            documents = summary.total_rows_written(),
            errors = summary.total_errors(),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Import finished"
        );
        Ok(summary)
    }

    async fn run_entity(&self, entity_type: &str) -> EntityReport {
        let started = Instant::now();
        let mut report = EntityReport::new(entity_type);

        let result = self.import_with_retry(entity_type).await;
        let cursor = match result {
            Ok(cursor) => {
                if let Err(e) = self.create_indexes(entity_type).await {
                    error!(entity_type, error = %e, "Index creation failed");
                    report.status = EntityStatus::Failed(e.to_string());
                }
                cursor
            }
            Err(failure) => {
                report.status = match failure.error {
                    EtlError::Cancelled => EntityStatus::Cancelled,
                    ref e => {
                        error!(
                            entity_type,
                            offset = failure.cursor.next_offset,
                            error = %e,
                            "Import failed"
                        );
                        EntityStatus::Failed(e.to_string())
                    }
                };
                failure.cursor
            }
        };

        report.rows_read = cursor.counters.rows_read;
        report.rows_written = cursor.counters.inserted;
        report.errors = cursor.counters.errors;
        report.batches = cursor.counters.pages;
        report.elapsed = started.elapsed();
        report
    }

    async fn import_with_retry(
        &self,
        entity_type: &str,
    ) -> std::result::Result<ImportCursor, EntityFailure> {
        let policy = self.options.entity_retry;
        let mut cursor = ImportCursor::start(entity_type);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.import_from(cursor).await {
                Ok(done) => return Ok(done),
                Err(failure) => match next_attempt(&failure, attempt, policy) {
                    Some(resume) => {
                        warn!(
                            entity_type,
                            attempt,
                            offset = resume.next_offset,
                            error = %failure.error,
                            "Import attempt failed, retrying in {}s from offset {}",
                            policy.delay.as_secs(),
                            resume.next_offset
                        );
                        tokio::time::sleep(policy.delay).await;
                        cursor = resume;
                    }
                    None => return Err(failure),
                },
            }
        }
    }

    /// One attempt from `cursor` to the end of the entity type. An entity
    /// type without rows completes straight away so it still gets indexes.
    async fn import_from(
        &self,
        mut cursor: ImportCursor,
    ) -> std::result::Result<ImportCursor, EntityFailure> {
        let entity_type = cursor.entity_type.clone();

        let total = match self.source.count(&entity_type).await {
            Ok(total) => total,
            Err(error) => return Err(EntityFailure { cursor, error }),
        };
        if total == 0 {
            info!(entity_type = %entity_type, "No rows to import");
        }
        if cursor.next_offset == 0 {
            self.progress.entity_started(&entity_type, &entity_type, total);
        }

        while cursor.next_offset < total {
            if self.cancelled() {
                return Err(EntityFailure {
                    cursor,
                    error: EtlError::Cancelled,
                });
            }

            let rows = match self
                .source
                .fetch_page(&entity_type, cursor.next_offset, self.options.page_size)
                .await
            {
                Ok(rows) => rows,
                Err(error) => return Err(EntityFailure { cursor, error }),
            };
            if rows.is_empty() {
                break;
            }

            let imported_at = Utc::now();
            let mut docs = Vec::with_capacity(rows.len());
            let mut bad = 0u64;
            for row in &rows {
                match build_document(row, imported_at) {
                    Ok(doc) => docs.push(doc),
                    Err(e) => {
                        debug!(entity_type = %entity_type, from_id = row.from_id, "Skipping row: {}", e);
                        bad += 1;
                    }
                }
            }

            let inserted = if docs.is_empty() {
                0
            } else {
                let sink = self.sink.as_ref();
                let collection = entity_type.as_str();
                let insert = retry(self.options.insert_retry, "Bulk insert", any_error, move || {
                    sink.insert_many(collection, docs.clone())
                })
                .await;
                match insert {
                    Ok(n) => n,
                    // Already retried; the entity retry must not repeat it
                    Err(e) => {
                        return Err(EntityFailure {
                            error: EtlError::write(collection, e.to_string()),
                            cursor,
                        })
                    }
                }
            };

            cursor.counters.rows_read += rows.len() as u64;
            cursor.counters.inserted += inserted;
            cursor.counters.errors += bad;
            cursor.counters.pages += 1;
            cursor.next_offset += rows.len() as u64;

            if bad > 0 {
                warn!(entity_type = %entity_type, offset = cursor.next_offset, bad, "Skipped rows with unusable payloads");
            }
            self.progress
                .advanced(&entity_type, cursor.next_offset.min(total), total);
        }

        Ok(cursor)
    }

    async fn create_indexes(&self, collection: &str) -> Result<()> {
        for field in INDEXED_FIELDS {
            self.sink.create_index(collection, field).await?;
        }
        debug!(collection, "Created indexes");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn row(payload: Option<&str>) -> RawRow {
        RawRow {
            from_id: 100,
            raw_id: "abc".to_string(),
            raw_date: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
            json_raw_data: payload.map(str::to_string),
            effective_from: FixedOffset::east_opt(3600)
                .unwrap()
                .with_ymd_and_hms(2024, 5, 1, 9, 30, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_build_document_merges_metadata() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let doc = build_document(&row(Some(r#"{"Amount": 5}"#)), now).unwrap();

        assert_eq!(doc.get("Amount"), Some(&Bson::Int32(5)));
        let metadata = doc.get_document(METADATA_KEY).unwrap();
        assert_eq!(metadata.get_i64("FromID").unwrap(), 100);
        assert_eq!(metadata.get_str("RAWID").unwrap(), "abc");
        assert_eq!(
            metadata.get_datetime("EffectiveFrom").unwrap().to_chrono(),
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
        );
        assert_eq!(metadata.get_datetime("ImportedAt").unwrap().to_chrono(), now);
    }

    #[test]
    fn test_existing_metadata_replaced() {
        let doc = build_document(&row(Some(r#"{"_metadata": "spoofed", "a": [1, 2.5]}"#)), Utc::now()).unwrap();
        assert!(doc.get_document(METADATA_KEY).is_ok());
        assert_eq!(
            doc.get_array("a").unwrap(),
            &vec![Bson::Int32(1), Bson::Double(2.5)]
        );
    }

    #[test]
    fn test_bad_payloads() {
        assert_eq!(build_document(&row(None), Utc::now()), Err(PayloadError::Missing));
        assert_eq!(build_document(&row(Some("[1]")), Utc::now()), Err(PayloadError::NotAnObject));
        assert!(matches!(
            build_document(&row(Some("{not json")), Utc::now()),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn test_json_keys_taken_literally() {
        let bson = json_to_bson(serde_json::json!({"$oid": "x", "big": 5_000_000_000_i64}));
        let doc = bson.as_document().unwrap();
        assert_eq!(doc.get_str("$oid").unwrap(), "x");
        assert_eq!(doc.get_i64("big").unwrap(), 5_000_000_000);
    }

    #[test]
    fn test_next_attempt_resumes_from_cursor() {
        let cursor = ImportCursor {
            entity_type: "LoyaltyCardPointsEarn".into(),
            next_offset: 10_000,
            counters: ImportCounters {
                rows_read: 10_000,
                inserted: 9_990,
                errors: 10,
                pages: 2,
            },
        };
        let transient = EntityFailure {
            cursor: cursor.clone(),
            error: EtlError::Unavailable("connection reset".into()),
        };
        assert_eq!(next_attempt(&transient, 1, RetryPolicy::ENTITY), Some(cursor.clone()));
        assert_eq!(next_attempt(&transient, 3, RetryPolicy::ENTITY), None);

        let fatal = EntityFailure {
            cursor,
            error: EtlError::write("LoyaltyCardPointsEarn", "duplicate key"),
        };
        assert_eq!(next_attempt(&fatal, 1, RetryPolicy::ENTITY), None);
    }
}
