//! Field mapping catalog
//!
//! The catalog says, for every entity type (document collection), which
//! relational columns to produce and where in the document each one comes
//! from. It is loaded once from TOML at startup and read-only afterwards.
//!
//! ```toml
//! [[entity]]
//! name = "GiftCardPayment"
//! description = "Gift Card Payment transactions"
//!
//! [[entity.field]]
//! target = "CardBalance"
//! source = "Card.CardBalance"
//! type = "decimal"
//! ```

use docbridge_common::{BridgeError, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// Catalog shipped with the binary, used when no file is configured
pub const BUILTIN_CATALOG: &str = include_str!("../catalog/loyalty.toml");

/// Name of the surrogate key column every destination table gets
pub const SURROGATE_KEY: &str = "Id";

/// Semantic type of a destination column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    String,
    Int32,
    Int64,
    Decimal,
    Double,
    Boolean,
    DateTime,
    DateTimeOffset,
    Guid,
    Binary,
}

impl TargetType {
    pub const ALL: [TargetType; 10] = [
        TargetType::String,
        TargetType::Int32,
        TargetType::Int64,
        TargetType::Decimal,
        TargetType::Double,
        TargetType::Boolean,
        TargetType::DateTime,
        TargetType::DateTimeOffset,
        TargetType::Guid,
        TargetType::Binary,
    ];

    /// Parse a catalog type name, case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => TargetType::String,
            "int32" | "int" => TargetType::Int32,
            "int64" | "long" => TargetType::Int64,
            "decimal" => TargetType::Decimal,
            "double" | "float" => TargetType::Double,
            "boolean" | "bool" => TargetType::Boolean,
            "datetime" => TargetType::DateTime,
            "datetimeoffset" => TargetType::DateTimeOffset,
            "guid" | "uuid" => TargetType::Guid,
            "binary" | "bytes" => TargetType::Binary,
            _ => return None,
        };
        Some(ty)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::String => "string",
            TargetType::Int32 => "int32",
            TargetType::Int64 => "int64",
            TargetType::Decimal => "decimal",
            TargetType::Double => "double",
            TargetType::Boolean => "boolean",
            TargetType::DateTime => "datetime",
            TargetType::DateTimeOffset => "datetimeoffset",
            TargetType::Guid => "guid",
            TargetType::Binary => "binary",
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dotted path into a nested document, e.g. `Card.PurchaserDetails.FirstName`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePath {
    segments: Vec<String>,
}

impl SourcePath {
    /// Parse a dotted path. A leading `$` is accepted and ignored.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim();
        let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed);

        if trimmed.is_empty() {
            return Err(BridgeError::catalog("source path is empty"));
        }

        let segments: Vec<String> = trimmed.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(BridgeError::catalog(format!(
                "source path '{}' has an empty segment",
                path
            )));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// First segment, i.e. the top-level document field the path starts at
    pub fn root(&self) -> &str {
        &self.segments[0]
    }
}

impl std::fmt::Display for SourcePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// One destination column: name, where its value comes from, and its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub target: String,
    pub source: SourcePath,
    pub target_type: TargetType,
}

impl FieldMapping {
    pub fn new(target: impl Into<String>, source: &str, target_type: TargetType) -> Result<Self> {
        let target = target.into();
        if target.trim().is_empty() {
            return Err(BridgeError::catalog("target field name is empty"));
        }
        Ok(Self {
            target,
            source: SourcePath::parse(source)?,
            target_type,
        })
    }
}

/// Mapping for one entity type; field order is destination column order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMapping {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldMapping>,
}

impl EntityMapping {
    /// Build a mapping, enforcing the per-entity invariants
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        fields: Vec<FieldMapping>,
    ) -> Result<Self> {
        let mapping = Self {
            name: name.into(),
            description: description.into(),
            fields,
        };
        mapping.validate()?;
        Ok(mapping)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BridgeError::catalog("entity name is empty"));
        }
        if self.fields.is_empty() {
            return Err(BridgeError::catalog(format!(
                "entity '{}' has no fields",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            let folded = field.target.to_lowercase();
            if folded == SURROGATE_KEY.to_lowercase() {
                return Err(BridgeError::catalog(format!(
                    "entity '{}': target field '{}' collides with the surrogate key column",
                    self.name, field.target
                )));
            }
            if !seen.insert(folded) {
                return Err(BridgeError::catalog(format!(
                    "entity '{}': duplicate target field '{}'",
                    self.name, field.target
                )));
            }
        }

        Ok(())
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.target.as_str())
    }
}

/// Read-only registry of entity mappings, keyed by exact entity name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entities: IndexMap<String, EntityMapping>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "entity")]
    entities: Vec<EntityEntry>,
}

#[derive(Deserialize)]
struct EntityEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "field")]
    fields: Vec<FieldEntry>,
}

#[derive(Deserialize)]
struct FieldEntry {
    target: String,
    source: String,
    #[serde(rename = "type")]
    type_name: String,
}

impl Catalog {
    pub fn new(mappings: Vec<EntityMapping>) -> Result<Self> {
        let mut entities = IndexMap::with_capacity(mappings.len());
        for mapping in mappings {
            if entities.contains_key(&mapping.name) {
                return Err(BridgeError::catalog(format!(
                    "entity '{}' is defined more than once",
                    mapping.name
                )));
            }
            entities.insert(mapping.name.clone(), mapping);
        }
        Ok(Self { entities })
    }

    /// The catalog embedded in the binary
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loading catalog");
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(text)?;

        let mut mappings = Vec::with_capacity(file.entities.len());
        for entry in file.entities {
            let mut fields = Vec::with_capacity(entry.fields.len());
            for field in entry.fields {
                let target_type = TargetType::from_name(&field.type_name).unwrap_or_else(|| {
                    warn!(
                        entity_type = %entry.name,
                        field = %field.target,
                        type_name = %field.type_name,
                        "Unknown field type, storing as string"
                    );
                    TargetType::String
                });
                fields.push(FieldMapping::new(field.target, &field.source, target_type)?);
            }
            let description = entry.description.unwrap_or_else(|| entry.name.clone());
            mappings.push(EntityMapping::new(entry.name, description, fields)?);
        }

        Self::new(mappings)
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityMapping> {
        self.entities.get(entity_type)
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.entities.contains_key(entity_type)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(catalog.len(), 9);

        let payment = catalog.get("GiftCardPayment").unwrap();
        assert_eq!(payment.fields[0].target, "FromID");
        assert_eq!(payment.fields[0].target_type, TargetType::Int64);
        assert_eq!(payment.fields[0].source.to_string(), "_metadata.FromID");

        let balance = payment
            .fields
            .iter()
            .find(|f| f.target == "CardBalance")
            .unwrap();
        assert_eq!(balance.target_type, TargetType::Decimal);
        assert_eq!(balance.source.segments(), ["Card", "CardBalance"]);
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.contains("LoyaltyCardPointsEarn"));
        assert!(!catalog.contains("loyaltycardpointsearn"));
    }

    #[test]
    fn test_source_path_strips_dollar() {
        let path = SourcePath::parse("$Card.PurchaserDetails.FirstName").unwrap();
        assert_eq!(path.root(), "Card");
        assert_eq!(path.segments().len(), 3);
        assert!(SourcePath::parse("Card..FirstName").is_err());
        assert!(SourcePath::parse("$").is_err());
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let text = r#"
            [[entity]]
            name = "Dup"
            [[entity.field]]
            target = "Amount"
            source = "Amount"
            type = "decimal"
            [[entity.field]]
            target = "amount"
            source = "Other"
            type = "string"
        "#;
        let err = Catalog::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("duplicate target field"));
    }

    #[test]
    fn test_surrogate_key_collision_rejected() {
        let field = FieldMapping::new("Id", "_id", TargetType::String).unwrap();
        assert!(EntityMapping::new("Thing", "", vec![field]).is_err());
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let field = FieldMapping::new("A", "A", TargetType::String).unwrap();
        let mapping = EntityMapping::new("Thing", "", vec![field]).unwrap();
        assert!(Catalog::new(vec![mapping.clone(), mapping]).is_err());
    }

    #[test]
    fn test_unknown_type_defaults_to_string() {
        let text = r#"
            [[entity]]
            name = "Loose"
            [[entity.field]]
            target = "Blob"
            source = "Payload.Blob"
            type = "hashmap"
        "#;
        let catalog = Catalog::from_toml_str(text).unwrap();
        let mapping = catalog.get("Loose").unwrap();
        assert_eq!(mapping.fields[0].target_type, TargetType::String);
        assert_eq!(mapping.description, "Loose");
    }

    #[test]
    fn test_type_names() {
        for ty in TargetType::ALL {
            assert_eq!(TargetType::from_name(ty.as_str()), Some(ty));
        }
        assert_eq!(TargetType::from_name("Long"), Some(TargetType::Int64));
        assert_eq!(TargetType::from_name("BOOL"), Some(TargetType::Boolean));
        assert_eq!(TargetType::from_name("money"), None);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(
            &path,
            "[[entity]]\nname = \"One\"\n[[entity.field]]\ntarget = \"A\"\nsource = \"a.b\"\ntype = \"int32\"\n",
        )
        .unwrap();

        let catalog = Catalog::from_file(&path).unwrap();
        assert_eq!(catalog.entity_names().collect::<Vec<_>>(), vec!["One"]);
    }
}
