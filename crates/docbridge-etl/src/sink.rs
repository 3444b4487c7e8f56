//! Relational sink: destination table management and bulk loading

use crate::batch::{Batch, BatchSchema};
use crate::catalog::{TargetType, SURROGATE_KEY};
use crate::error::{EtlError, Result};
use async_trait::async_trait;
use tracing::info;

/// PostgreSQL limits identifiers to 63 bytes and silently truncates longer ones
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Destination of extracted rows
#[async_trait]
pub trait RelationalSink: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool>;

    async fn create_table(&self, table: &str, schema: &BatchSchema) -> Result<()>;

    async fn truncate_table(&self, table: &str) -> Result<()>;

    /// Load every row of the batch in one transaction, returning rows written
    async fn bulk_load(&self, table: &str, batch: &Batch) -> Result<u64>;
}

/// What one [`write_batch`] call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub rows_written: u64,
    pub created: bool,
    pub truncated: bool,
}

/// Write one batch for `entity_type`, creating or truncating the
/// destination table first when needed. Empty batches are a no-op.
pub async fn write_batch(
    sink: &dyn RelationalSink,
    batch: &Batch,
    entity_type: &str,
    is_first_batch: bool,
    truncate_on_first_batch: bool,
) -> Result<WriteOutcome> {
    let mut outcome = WriteOutcome::default();
    if batch.is_empty() {
        return Ok(outcome);
    }

    if !sink.table_exists(entity_type).await? {
        info!(entity_type, columns = batch.schema.len(), "Creating destination table");
        sink.create_table(entity_type, &batch.schema).await?;
        outcome.created = true;
    } else if is_first_batch && truncate_on_first_batch {
        info!(entity_type, "Truncating destination table");
        sink.truncate_table(entity_type).await?;
        outcome.truncated = true;
    }

    outcome.rows_written = sink.bulk_load(entity_type, batch).await?;
    info!(entity_type, rows = outcome.rows_written, "Batch written");
    Ok(outcome)
}

/// Relational column type for a target type
pub fn sql_type(target: TargetType) -> &'static str {
    match target {
        TargetType::String => "TEXT",
        TargetType::Int32 => "INTEGER",
        TargetType::Int64 => "BIGINT",
        TargetType::Decimal => "NUMERIC(18, 2)",
        TargetType::Double => "DOUBLE PRECISION",
        TargetType::Boolean => "BOOLEAN",
        TargetType::DateTime => "TIMESTAMP",
        TargetType::DateTimeOffset => "TIMESTAMPTZ",
        TargetType::Guid => "UUID",
        TargetType::Binary => "BYTEA",
    }
}

/// Quote an identifier, preserving case
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN || name.contains('\0') {
        return Err(EtlError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

pub fn create_table_sql(table: &str, schema: &BatchSchema) -> Result<String> {
    let mut columns = vec![format!(
        "{} BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
        quote_ident(SURROGATE_KEY)?
    )];
    for column in schema.columns() {
        columns.push(format!(
            "{} {} NULL",
            quote_ident(&column.name)?,
            sql_type(column.target_type)
        ));
    }
    Ok(format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(table)?,
        columns.join(",\n    ")
    ))
}
