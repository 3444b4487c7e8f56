//! Path projection from nested documents into flat records

use crate::catalog::{EntityMapping, SourcePath};
use crate::value::SourceValue;
use bson::{doc, Document};
use indexmap::IndexSet;

/// One raw value per mapped field, in mapping order. `None` means the path
/// did not resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRecord {
    pub values: Vec<Option<SourceValue>>,
}

impl ProjectedRecord {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Walk a dotted path. Arrays are not indexed, so an array at an
/// intermediate step resolves to missing just like a scalar would.
pub fn resolve<'a>(record: &'a SourceValue, path: &SourcePath) -> Option<&'a SourceValue> {
    path.segments()
        .iter()
        .try_fold(record, |current, segment| current.get(segment))
}

/// Project a document through a mapping
pub fn project(mapping: &EntityMapping, record: &SourceValue) -> ProjectedRecord {
    ProjectedRecord {
        values: mapping
            .fields
            .iter()
            .map(|field| resolve(record, &field.source).cloned())
            .collect(),
    }
}

/// Distinct top-level fields referenced by a mapping, first-seen order
pub fn root_fields(mapping: &EntityMapping) -> Vec<String> {
    mapping
        .fields
        .iter()
        .map(|f| f.source.root().to_string())
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

/// `$project` stage handed to the document store so only referenced
/// subtrees travel over the wire
pub fn projection_stage(mapping: &EntityMapping) -> Document {
    let mut fields = Document::new();
    let roots = root_fields(mapping);
    let selects_id = roots.iter().any(|r| r == "_id");
    for root in roots {
        fields.insert(root, 1);
    }
    if !selects_id {
        fields.insert("_id", 0);
    }
    doc! { "$project": fields }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::{FieldMapping, TargetType};
    use pretty_assertions::assert_eq;

    fn mapping() -> EntityMapping {
        EntityMapping::new(
            "GiftCardPayment",
            "Gift Card Payment transactions",
            vec![
                FieldMapping::new("CardBalance", "Card.CardBalance", TargetType::Decimal).unwrap(),
                FieldMapping::new("FirstName", "$Card.PurchaserDetails.FirstName", TargetType::String)
                    .unwrap(),
                FieldMapping::new("Amount", "Amount", TargetType::Decimal).unwrap(),
                FieldMapping::new("StoreCode", "Store.Code", TargetType::String).unwrap(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_project_nested_and_missing() {
        let record = SourceValue::document([
            (
                "Card",
                SourceValue::document([(
                    "PurchaserDetails",
                    SourceValue::document([("FirstName", SourceValue::from("Ana"))]),
                )]),
            ),
            ("Amount", SourceValue::from("19.99")),
        ]);

        let projected = project(&mapping(), &record);
        assert_eq!(
            projected.values,
            vec![
                None,
                Some(SourceValue::from("Ana")),
                Some(SourceValue::from("19.99")),
                None,
            ]
        );
    }

    #[test]
    fn test_array_at_intermediate_step_is_missing() {
        let record = SourceValue::document([(
            "Store",
            SourceValue::Array(vec![SourceValue::document([("Code", SourceValue::from("S1"))])]),
        )]);
        assert_eq!(project(&mapping(), &record).values[3], None);
    }

    #[test]
    fn test_scalar_at_intermediate_step_is_missing() {
        let record = SourceValue::document([("Card", SourceValue::from(12i32))]);
        assert_eq!(project(&mapping(), &record).values[0], None);
    }

    #[test]
    fn test_explicit_null_is_present() {
        let record = SourceValue::document([("Amount", SourceValue::Null)]);
        assert_eq!(project(&mapping(), &record).values[2], Some(SourceValue::Null));
    }

    #[test]
    fn test_projection_is_idempotent() {
        let record = SourceValue::document([("Amount", SourceValue::from(5i32))]);
        assert_eq!(project(&mapping(), &record), project(&mapping(), &record));
    }

    #[test]
    fn test_projection_stage_selects_roots() {
        let stage = projection_stage(&mapping());
        assert_eq!(
            stage,
            doc! { "$project": { "Card": 1, "Amount": 1, "Store": 1, "_id": 0 } }
        );
    }
}
