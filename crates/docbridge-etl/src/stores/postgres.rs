//! PostgreSQL relational sink and staged row source

use crate::batch::{Batch, BatchSchema};
use crate::catalog::TargetType;
use crate::coerce::TypedValue;
use crate::config::{is_plain_identifier, DatabaseConfig};
use crate::error::{EtlError, Result};
use crate::import::{RawRow, RowSource};
use crate::sink::{create_table_sql, quote_ident, RelationalSink};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use docbridge_common::BridgeError;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::query_builder::Separated;
use sqlx::types::{BigDecimal, Uuid};
use sqlx::{QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info};

/// PostgreSQL accepts at most this many bind parameters per statement
pub const MAX_BIND_PARAMS: usize = 65_535;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Rows per INSERT statement for a table with `columns` columns
pub fn rows_per_statement(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).max(1)
}

fn push_typed<'qb, 'args: 'qb>(
    b: &mut Separated<'qb, 'args, Postgres, &'static str>,
    target: TargetType,
    value: Option<&TypedValue>,
) {
    match value {
        Some(TypedValue::String(v)) => b.push_bind(v.clone()),
        Some(TypedValue::Int32(v)) => b.push_bind(*v),
        Some(TypedValue::Int64(v)) => b.push_bind(*v),
        Some(TypedValue::Decimal(v)) => b.push_bind(v.clone()),
        Some(TypedValue::Double(v)) => b.push_bind(*v),
        Some(TypedValue::Boolean(v)) => b.push_bind(*v),
        Some(TypedValue::DateTime(v)) => b.push_bind(*v),
        Some(TypedValue::DateTimeOffset(v)) => b.push_bind(*v),
        Some(TypedValue::Guid(v)) => b.push_bind(*v),
        Some(TypedValue::Binary(v)) => b.push_bind(v.clone()),
        // NULLs still need the column's type or the server infers text
        None => match target {
            TargetType::String => b.push_bind(None::<String>),
            TargetType::Int32 => b.push_bind(None::<i32>),
            TargetType::Int64 => b.push_bind(None::<i64>),
            TargetType::Decimal => b.push_bind(None::<BigDecimal>),
            TargetType::Double => b.push_bind(None::<f64>),
            TargetType::Boolean => b.push_bind(None::<bool>),
            TargetType::DateTime => b.push_bind(None::<NaiveDateTime>),
            TargetType::DateTimeOffset => b.push_bind(None::<DateTime<FixedOffset>>),
            TargetType::Guid => b.push_bind(None::<Uuid>),
            TargetType::Binary => b.push_bind(None::<Vec<u8>>),
        },
    };
}

/// Destination tables in the connection's current schema
pub struct PgSink {
    pool: PgPool,
    bulk_timeout: Duration,
}

impl PgSink {
    pub fn new(pool: PgPool, bulk_timeout: Duration) -> Self {
        Self { pool, bulk_timeout }
    }
}

#[async_trait]
impl RelationalSink for PgSink {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_table(&self, table: &str, schema: &BatchSchema) -> Result<()> {
        let sql = create_table_sql(table, schema)?;
        debug!(table, "{}", sql);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn truncate_table(&self, table: &str) -> Result<()> {
        sqlx::query(&format!("TRUNCATE TABLE {}", quote_ident(table)?))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn bulk_load(&self, table: &str, batch: &Batch) -> Result<u64> {
        let columns = batch.schema.columns();
        let column_list = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let insert = format!("INSERT INTO {} ({}) ", quote_ident(table)?, column_list);

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.bulk_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        let chunk_size = rows_per_statement(columns.len());
        let mut written = 0u64;
        for chunk in batch.rows.chunks(chunk_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(&insert);
            query_builder.push_values(chunk, |mut b, row| {
                for (column, value) in columns.iter().zip(&row.0) {
                    push_typed(&mut b, column.target_type, value.as_ref());
                }
            });
            let result = query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| EtlError::write(table, e.to_string()))?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }
}

/// Staged rows partitioned by a discriminator column
pub struct PgRowSource {
    pool: PgPool,
    table: String,
    discriminator: String,
}

impl PgRowSource {
    /// `table` may be schema-qualified. Identifiers are used unquoted, so
    /// they must be plain (letters, digits, underscores).
    pub fn new(pool: PgPool, table: &str, discriminator: &str) -> Result<Self> {
        if !table.split('.').all(is_plain_identifier) || table.split('.').count() > 2 {
            return Err(EtlError::InvalidIdentifier(table.to_string()));
        }
        if !is_plain_identifier(discriminator) {
            return Err(BridgeError::config(format!(
                "discriminator column '{}' is not a plain identifier",
                discriminator
            ))
            .into());
        }
        Ok(Self {
            pool,
            table: table.to_string(),
            discriminator: discriminator.to_string(),
        })
    }
}

#[async_trait]
impl RowSource for PgRowSource {
    async fn entity_types(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT {d} FROM {t} WHERE {d} IS NOT NULL ORDER BY {d}",
            d = self.discriminator,
            t = self.table
        );
        let names: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(names)
    }

    async fn count(&self, entity_type: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = $1",
            self.table, self.discriminator
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(entity_type)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_page(&self, entity_type: &str, offset: u64, limit: usize) -> Result<Vec<RawRow>> {
        let sql = format!(
            r#"
            SELECT FromID, RAWID, RAWDATE, JSON_RawData, EffectiveFrom
            FROM {}
            WHERE {} = $1
            ORDER BY FromID
            OFFSET $2 LIMIT $3
            "#,
            self.table, self.discriminator
        );
        let offset = i64::try_from(offset)
            .map_err(|_| BridgeError::Parse(format!("offset {} out of range", offset)))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(&sql)
            .bind(entity_type)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<RawRow> {
                let effective_from: DateTime<Utc> = row.try_get(4)?;
                Ok(RawRow {
                    from_id: row.try_get(0)?,
                    raw_id: row.try_get(1)?,
                    raw_date: row.try_get(2)?,
                    json_raw_data: row.try_get(3)?,
                    effective_from: effective_from.fixed_offset(),
                })
            })
            .collect()
    }
}
