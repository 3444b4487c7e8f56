//! In-memory stores for tests and `--dry-run`
//!
//! Every store keeps its state behind a `std::sync::Mutex` and offers
//! failure injection so retry and resume paths can be driven without a
//! server.

use crate::batch::{Batch, BatchSchema, TypedRow};
use crate::catalog::EntityMapping;
use crate::error::{EtlError, Result};
use crate::import::{DocumentSink, RawRow, RowSource};
use crate::sink::RelationalSink;
use crate::source::{DocumentCursor, DocumentSource};
use crate::value::SourceValue;
use async_trait::async_trait;
use bson::Document;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Document source
// ============================================================================

/// Collections of documents keyed by entity type, listed in insertion order
#[derive(Default)]
pub struct MemorySource {
    collections: IndexMap<String, Vec<SourceValue>>,
    /// Pages served before the cursor of an entity type starts failing
    fail_after_pages: HashMap<String, usize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(mut self, entity_type: impl Into<String>, docs: Vec<SourceValue>) -> Self {
        self.collections.insert(entity_type.into(), docs);
        self
    }

    /// Make the cursor for `entity_type` fail once it has served `pages` pages
    pub fn fail_after_pages(mut self, entity_type: impl Into<String>, pages: usize) -> Self {
        self.fail_after_pages.insert(entity_type.into(), pages);
        self
    }
}

struct MemoryCursor {
    entity_type: String,
    docs: VecDeque<SourceValue>,
    pages_served: usize,
    fail_after: Option<usize>,
}

#[async_trait]
impl DocumentCursor for MemoryCursor {
    async fn next_page(&mut self, max: usize) -> Result<Vec<SourceValue>> {
        if self.fail_after == Some(self.pages_served) {
            return Err(EtlError::Unavailable(format!(
                "cursor for '{}' lost its connection",
                self.entity_type
            )));
        }
        let take = max.min(self.docs.len());
        let page: Vec<_> = self.docs.drain(..take).collect();
        if !page.is_empty() {
            self.pages_served += 1;
        }
        Ok(page)
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn entity_types(&self) -> Result<Vec<String>> {
        Ok(self.collections.keys().cloned().collect())
    }

    async fn count(&self, entity_type: &str) -> Result<u64> {
        Ok(self
            .collections
            .get(entity_type)
            .map(|docs| docs.len() as u64)
            .unwrap_or(0))
    }

    async fn open(&self, entity_type: &str, _mapping: &EntityMapping) -> Result<Box<dyn DocumentCursor>> {
        Ok(Box::new(MemoryCursor {
            entity_type: entity_type.to_string(),
            docs: self
                .collections
                .get(entity_type)
                .cloned()
                .unwrap_or_default()
                .into(),
            pages_served: 0,
            fail_after: self.fail_after_pages.get(entity_type).copied(),
        }))
    }
}

// ============================================================================
// Relational sink
// ============================================================================

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: BatchSchema,
    rows: Vec<TypedRow>,
    creates: usize,
    truncates: usize,
    loads: Vec<usize>,
}

/// Tables held in memory; records DDL and load sizes for assertions
#[derive(Default)]
pub struct MemorySink {
    tables: Mutex<HashMap<String, MemoryTable>>,
    /// Successful loads allowed before `bulk_load` on a table fails
    fail_after_loads: Mutex<HashMap<String, usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_after_loads(self, table: impl Into<String>, loads: usize) -> Self {
        lock(&self.fail_after_loads).insert(table.into(), loads);
        self
    }

    pub fn has_table(&self, table: &str) -> bool {
        lock(&self.tables).contains_key(table)
    }

    pub fn rows(&self, table: &str) -> Vec<TypedRow> {
        lock(&self.tables)
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn schema(&self, table: &str) -> Option<BatchSchema> {
        lock(&self.tables).get(table).map(|t| t.schema.clone())
    }

    pub fn create_count(&self, table: &str) -> usize {
        lock(&self.tables).get(table).map(|t| t.creates).unwrap_or(0)
    }

    pub fn truncate_count(&self, table: &str) -> usize {
        lock(&self.tables).get(table).map(|t| t.truncates).unwrap_or(0)
    }

    /// Row count of every `bulk_load` call, in order
    pub fn load_sizes(&self, table: &str) -> Vec<usize> {
        lock(&self.tables)
            .get(table)
            .map(|t| t.loads.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RelationalSink for MemorySink {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.has_table(table))
    }

    async fn create_table(&self, table: &str, schema: &BatchSchema) -> Result<()> {
        let mut tables = lock(&self.tables);
        if tables.contains_key(table) {
            return Err(EtlError::write(table, "relation already exists"));
        }
        tables.insert(
            table.to_string(),
            MemoryTable {
                schema: schema.clone(),
                rows: Vec::new(),
                creates: 1,
                truncates: 0,
                loads: Vec::new(),
            },
        );
        Ok(())
    }

    async fn truncate_table(&self, table: &str) -> Result<()> {
        let mut tables = lock(&self.tables);
        let stored = tables
            .get_mut(table)
            .ok_or_else(|| EtlError::write(table, "relation does not exist"))?;
        stored.rows.clear();
        stored.truncates += 1;
        Ok(())
    }

    async fn bulk_load(&self, table: &str, batch: &Batch) -> Result<u64> {
        {
            let mut failures = lock(&self.fail_after_loads);
            if let Some(remaining) = failures.get_mut(table) {
                if *remaining == 0 {
                    return Err(EtlError::write(table, "injected bulk load failure"));
                }
                *remaining -= 1;
            }
        }

        let mut tables = lock(&self.tables);
        let stored = tables
            .get_mut(table)
            .ok_or_else(|| EtlError::write(table, "relation does not exist"))?;
        if stored.schema != batch.schema {
            return Err(EtlError::write(table, "batch schema does not match table"));
        }
        stored.rows.extend(batch.rows.iter().cloned());
        stored.loads.push(batch.len());
        Ok(batch.len() as u64)
    }
}

// ============================================================================
// Row source
// ============================================================================

/// Staged rows keyed by discriminator value
#[derive(Default)]
pub struct MemoryRowSource {
    rows: IndexMap<String, Vec<RawRow>>,
    listing_failures: Mutex<u32>,
    /// (entity type, offset) -> remaining failures
    fetch_failures: Mutex<HashMap<(String, u64), u32>>,
    fetches: Mutex<Vec<(String, u64)>>,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, entity_type: impl Into<String>, rows: Vec<RawRow>) -> Self {
        self.rows.insert(entity_type.into(), rows);
        self
    }

    /// Fail the next `times` entity type listings with a transient error
    pub fn fail_listing(self, times: u32) -> Self {
        *lock(&self.listing_failures) = times;
        self
    }

    /// Fail the next `times` fetches of the page at `offset`
    pub fn fail_fetch(self, entity_type: impl Into<String>, offset: u64, times: u32) -> Self {
        lock(&self.fetch_failures).insert((entity_type.into(), offset), times);
        self
    }

    /// Every attempted fetch as (entity type, offset), in order
    pub fn fetches(&self) -> Vec<(String, u64)> {
        lock(&self.fetches).clone()
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    async fn entity_types(&self) -> Result<Vec<String>> {
        {
            let mut failures = lock(&self.listing_failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(EtlError::Unavailable("source unreachable".into()));
            }
        }
        let mut names: Vec<String> = self.rows.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn count(&self, entity_type: &str) -> Result<u64> {
        Ok(self.rows.get(entity_type).map(|r| r.len() as u64).unwrap_or(0))
    }

    async fn fetch_page(&self, entity_type: &str, offset: u64, limit: usize) -> Result<Vec<RawRow>> {
        lock(&self.fetches).push((entity_type.to_string(), offset));
        {
            let mut failures = lock(&self.fetch_failures);
            if let Some(remaining) = failures.get_mut(&(entity_type.to_string(), offset)) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EtlError::Unavailable(format!(
                        "connection reset while reading '{}' at offset {}",
                        entity_type, offset
                    )));
                }
            }
        }

        let rows = self.rows.get(entity_type).map(Vec::as_slice).unwrap_or(&[]);
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(rows.len());
        let end = start.saturating_add(limit).min(rows.len());
        Ok(rows[start..end].to_vec())
    }
}

// ============================================================================
// Document sink
// ============================================================================

/// Collections of BSON documents plus the indexes requested on them
#[derive(Default)]
pub struct MemoryDocumentSink {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    indexes: Mutex<HashMap<String, Vec<String>>>,
    insert_failures: Mutex<HashMap<String, u32>>,
}

impl MemoryDocumentSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` inserts into `collection`
    pub fn fail_inserts(self, collection: impl Into<String>, times: u32) -> Self {
        lock(&self.insert_failures).insert(collection.into(), times);
        self
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        lock(&self.collections)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn indexes(&self, collection: &str) -> Vec<String> {
        lock(&self.indexes)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentSink for MemoryDocumentSink {
    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<u64> {
        {
            let mut failures = lock(&self.insert_failures);
            if let Some(remaining) = failures.get_mut(collection) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EtlError::write(collection, "injected insert failure"));
                }
            }
        }

        let inserted = docs.len() as u64;
        lock(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
        Ok(inserted)
    }

    async fn create_index(&self, collection: &str, field_path: &str) -> Result<()> {
        let mut indexes = lock(&self.indexes);
        let entry = indexes.entry(collection.to_string()).or_default();
        if !entry.iter().any(|f| f == field_path) {
            entry.push(field_path.to_string());
        }
        Ok(())
    }
}
