//! Batch materialization: projected records to column-typed rows

use crate::catalog::{EntityMapping, TargetType};
use crate::coerce::{coerce, Coerced, TypedValue};
use crate::projector::ProjectedRecord;

/// One destination column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub target_type: TargetType,
}

/// Column layout of a destination table, fixed by the mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSchema {
    columns: Vec<Column>,
}

impl BatchSchema {
    pub fn from_mapping(mapping: &EntityMapping) -> Self {
        Self {
            columns: mapping
                .fields
                .iter()
                .map(|f| Column {
                    name: f.target.clone(),
                    target_type: f.target_type,
                })
                .collect(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One materialized row; `None` is stored as NULL
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRow(pub Vec<Option<TypedValue>>);

/// Rows sharing one schema
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub schema: BatchSchema,
    pub rows: Vec<TypedRow>,
    /// Field values that were present but could not be converted
    pub rejected: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Coerce every projected value into the schema's types. Rows are kept in
/// input order and none is ever dropped.
pub fn materialize(schema: &BatchSchema, records: &[ProjectedRecord]) -> Batch {
    let mut rejected = 0;
    let rows = records
        .iter()
        .map(|record| {
            TypedRow(
                schema
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, column)| {
                        let raw = record.values.get(i).and_then(Option::as_ref);
                        match coerce(raw, column.target_type) {
                            Coerced::Value(v) => Some(v),
                            Coerced::Absent => None,
                            Coerced::Rejected => {
                                rejected += 1;
                                None
                            }
                        }
                    })
                    .collect(),
            )
        })
        .collect();

    Batch {
        schema: schema.clone(),
        rows,
        rejected,
    }
}
