//! Import pipeline tests against the in-memory stores
//!
//! Retry delays run on tokio's paused clock.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bson::Bson;
use chrono::{FixedOffset, NaiveDate, TimeZone};
use docbridge_etl::import::{RawRow, INDEXED_FIELDS, METADATA_KEY};
use docbridge_etl::stores::memory::{MemoryDocumentSink, MemoryRowSource};
use docbridge_etl::{EntityStatus, ImportOptions, Importer};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const ENTITY: &str = "LoyaltyCardPointsEarn";

fn raw_row(from_id: i64, payload: Option<&str>) -> RawRow {
    RawRow {
        from_id,
        raw_id: format!("raw-{}", from_id),
        raw_date: NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap(),
        json_raw_data: payload.map(str::to_string),
        effective_from: FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 8, 30, 0)
            .unwrap(),
    }
}

fn rows(n: i64) -> Vec<RawRow> {
    (1..=n)
        .map(|i| raw_row(i, Some(r#"{"Points": 10, "Member": {"Tier": "Gold"}}"#)))
        .collect()
}

fn importer(source: Arc<MemoryRowSource>, sink: Arc<MemoryDocumentSink>, page_size: usize) -> Importer {
    let options = ImportOptions {
        page_size,
        ..ImportOptions::default()
    };
    Importer::new(source, sink, options)
}

#[tokio::test(start_paused = true)]
async fn test_payload_becomes_document_with_metadata() {
    let source = Arc::new(MemoryRowSource::new().with_rows(
        ENTITY,
        vec![RawRow {
            raw_id: "abc".to_string(),
            ..raw_row(100, Some(r#"{"Amount": 5}"#))
        }],
    ));
    let sink = Arc::new(MemoryDocumentSink::new());

    let summary = importer(source, sink.clone(), 5000).run().await.unwrap();

    let report = summary.get(ENTITY).unwrap();
    assert_eq!(report.status, EntityStatus::Completed);
    assert_eq!(report.rows_written, 1);

    let docs = sink.documents(ENTITY);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].get("Amount"), Some(&Bson::Int32(5)));

    let metadata = docs[0].get_document(METADATA_KEY).unwrap();
    assert_eq!(metadata.get_i64("FromID").unwrap(), 100);
    assert_eq!(metadata.get_str("RAWID").unwrap(), "abc");
    assert!(metadata.get_datetime("ImportedAt").is_ok());
    assert!(metadata.get_datetime("RAWDATE").is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_retry_resumes_at_failed_page() {
    let source = Arc::new(
        MemoryRowSource::new()
            .with_rows(ENTITY, rows(12))
            .fail_fetch(ENTITY, 5, 1),
    );
    let sink = Arc::new(MemoryDocumentSink::new());

    let summary = importer(source.clone(), sink.clone(), 5).run().await.unwrap();

    let report = summary.get(ENTITY).unwrap();
    assert_eq!(report.status, EntityStatus::Completed);
    assert_eq!(report.rows_read, 12);
    assert_eq!(report.rows_written, 12);
    assert_eq!(report.batches, 3);

    let offsets: Vec<u64> = source.fetches().into_iter().map(|(_, offset)| offset).collect();
    assert_eq!(offsets, vec![0, 5, 5, 10]);

    let from_ids: Vec<i64> = sink
        .documents(ENTITY)
        .iter()
        .map(|d| d.get_document(METADATA_KEY).unwrap().get_i64("FromID").unwrap())
        .collect();
    assert_eq!(from_ids, (1..=12).collect::<Vec<i64>>());
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_fails_entity() {
    let source = Arc::new(
        MemoryRowSource::new()
            .with_rows(ENTITY, rows(8))
            .with_rows("LoyaltyVoucherRedeem", rows(2))
            .fail_fetch(ENTITY, 5, 10),
    );
    let sink = Arc::new(MemoryDocumentSink::new());

    let summary = importer(source.clone(), sink.clone(), 5).run().await.unwrap();

    let report = summary.get(ENTITY).unwrap();
    assert!(matches!(report.status, EntityStatus::Failed(_)));
    assert_eq!(report.rows_written, 5);
    assert_eq!(sink.documents(ENTITY).len(), 5);
    assert!(sink.indexes(ENTITY).is_empty());

    let attempts_at_five = source
        .fetches()
        .iter()
        .filter(|(entity, offset)| entity == ENTITY && *offset == 5)
        .count();
    assert_eq!(attempts_at_five, 3);

    assert_eq!(
        summary.get("LoyaltyVoucherRedeem").unwrap().status,
        EntityStatus::Completed
    );
    assert!(summary.has_failures());
}

#[tokio::test(start_paused = true)]
async fn test_bad_payloads_counted_and_skipped() {
    let source = Arc::new(MemoryRowSource::new().with_rows(
        ENTITY,
        vec![
            raw_row(1, Some(r#"{"Points": 1}"#)),
            raw_row(2, None),
            raw_row(3, Some("[1, 2]")),
            raw_row(4, Some("{broken")),
            raw_row(5, Some(r#"{"Points": 5}"#)),
        ],
    ));
    let sink = Arc::new(MemoryDocumentSink::new());

    let summary = importer(source, sink.clone(), 5000).run().await.unwrap();

    let report = summary.get(ENTITY).unwrap();
    assert_eq!(report.status, EntityStatus::Completed);
    assert_eq!(report.rows_read, 5);
    assert_eq!(report.rows_written, 2);
    assert_eq!(report.errors, 3);
    assert_eq!(sink.documents(ENTITY).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_indexes_created_after_import() {
    let source = Arc::new(MemoryRowSource::new().with_rows(ENTITY, rows(3)));
    let sink = Arc::new(MemoryDocumentSink::new());

    importer(source, sink.clone(), 5000).run().await.unwrap();

    assert_eq!(sink.indexes(ENTITY), INDEXED_FIELDS.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_entity_without_rows_still_indexed() {
    let source = Arc::new(
        MemoryRowSource::new()
            .with_rows(ENTITY, vec![])
            .with_rows("LoyaltyVoucherRedeem", rows(1)),
    );
    let sink = Arc::new(MemoryDocumentSink::new());

    let summary = importer(source.clone(), sink.clone(), 5000).run().await.unwrap();

    let report = summary.get(ENTITY).unwrap();
    assert_eq!(report.status, EntityStatus::Completed);
    assert_eq!(report.rows_read, 0);
    assert_eq!(report.batches, 0);
    assert_eq!(sink.indexes(ENTITY), INDEXED_FIELDS.to_vec());
    assert!(sink.documents(ENTITY).is_empty());
    assert!(!source.fetches().iter().any(|(entity, _)| entity == ENTITY));
    assert_eq!(sink.documents("LoyaltyVoucherRedeem").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_listing_retried_then_fatal() {
    let source = Arc::new(MemoryRowSource::new().with_rows(ENTITY, rows(1)).fail_listing(2));
    let sink = Arc::new(MemoryDocumentSink::new());
    let summary = importer(source, sink.clone(), 5000).run().await.unwrap();
    assert_eq!(summary.get(ENTITY).unwrap().status, EntityStatus::Completed);

    let source = Arc::new(MemoryRowSource::new().with_rows(ENTITY, rows(1)).fail_listing(3));
    let sink = Arc::new(MemoryDocumentSink::new());
    assert!(importer(source, sink.clone(), 5000).run().await.is_err());
    assert!(sink.documents(ENTITY).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_insert_retries() {
    let source = Arc::new(MemoryRowSource::new().with_rows(ENTITY, rows(4)));
    let sink = Arc::new(MemoryDocumentSink::new().fail_inserts(ENTITY, 2));
    let summary = importer(source, sink.clone(), 5000).run().await.unwrap();
    assert_eq!(summary.get(ENTITY).unwrap().status, EntityStatus::Completed);
    assert_eq!(sink.documents(ENTITY).len(), 4);

    let source = Arc::new(MemoryRowSource::new().with_rows(ENTITY, rows(4)));
    let sink = Arc::new(MemoryDocumentSink::new().fail_inserts(ENTITY, 3));
    let summary = importer(source.clone(), sink.clone(), 5000).run().await.unwrap();
    let report = summary.get(ENTITY).unwrap();
    assert!(matches!(report.status, EntityStatus::Failed(_)));
    assert!(sink.documents(ENTITY).is_empty());
    // Exhausted insert retries are not repeated by the entity retry
    assert_eq!(source.fetches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_entity_filter() {
    let source = Arc::new(
        MemoryRowSource::new()
            .with_rows(ENTITY, rows(2))
            .with_rows("LoyaltyVoucherRedeem", rows(2)),
    );
    let sink = Arc::new(MemoryDocumentSink::new());
    let options = ImportOptions {
        entity_filter: Some(vec![
            "LoyaltyVoucherRedeem".to_string(),
            "NotStaged".to_string(),
        ]),
        ..ImportOptions::default()
    };

    let summary = Importer::new(source, sink.clone(), options).run().await.unwrap();

    // Unknown names are only warned about
    assert_eq!(summary.entities.len(), 1);
    assert!(summary.get("NotStaged").is_none());
    assert!(!summary.has_failures());
    assert!(sink.documents(ENTITY).is_empty());
    assert_eq!(sink.documents("LoyaltyVoucherRedeem").len(), 2);
}
