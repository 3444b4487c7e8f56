//! MongoDB document source and document sink

use crate::catalog::EntityMapping;
use crate::error::Result;
use docbridge_common::BridgeError;
use crate::import::DocumentSink;
use crate::projector::projection_stage;
use crate::source::{DocumentCursor, DocumentSource};
use crate::value::SourceValue;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::{Client, Cursor, Database, IndexModel};
use sqlx::types::BigDecimal;
use std::str::FromStr;
use tracing::{debug, info};
use url::Url;

/// Connect to `url` and select `database`
pub async fn connect(url: &str, database: &str) -> Result<Database> {
    let parsed = Url::parse(url)
        .map_err(|e| BridgeError::config(format!("invalid document store URL: {}", e)))?;
    if !matches!(parsed.scheme(), "mongodb" | "mongodb+srv") {
        return Err(BridgeError::config(format!(
            "document store URL does not have a `mongodb` scheme; url={}",
            url
        ))
        .into());
    }

    let client = Client::with_uri_str(url).await?;
    info!(host = parsed.host_str().unwrap_or("unknown"), database, "Connected to document store");
    Ok(client.database(database))
}

/// Convert a BSON value into the store-neutral representation
pub fn bson_to_source(value: Bson) -> SourceValue {
    match value {
        Bson::Null | Bson::Undefined | Bson::MaxKey | Bson::MinKey => SourceValue::Null,
        Bson::Boolean(b) => SourceValue::Boolean(b),
        Bson::Int32(i) => SourceValue::Int32(i),
        Bson::Int64(i) => SourceValue::Int64(i),
        Bson::Double(d) => SourceValue::Double(d),
        Bson::Decimal128(d) => {
            let text = d.to_string();
            BigDecimal::from_str(&text)
                .map(SourceValue::Decimal)
                .unwrap_or(SourceValue::String(text))
        }
        Bson::String(s) | Bson::Symbol(s) | Bson::JavaScriptCode(s) => SourceValue::String(s),
        Bson::ObjectId(oid) => SourceValue::String(oid.to_hex()),
        Bson::DateTime(dt) => SourceValue::DateTime(dt.to_chrono().fixed_offset()),
        Bson::Timestamp(ts) => SourceValue::Int64(i64::from(ts.time)),
        Bson::Binary(bin) => SourceValue::Binary(bin.bytes),
        Bson::RegularExpression(re) => SourceValue::String(re.pattern),
        Bson::JavaScriptCodeWithScope(code) => SourceValue::String(code.code),
        Bson::Array(items) => SourceValue::Array(items.into_iter().map(bson_to_source).collect()),
        Bson::Document(doc) => document_to_source(doc),
        Bson::DbPointer(_) => SourceValue::Null,
    }
}

pub fn document_to_source(doc: Document) -> SourceValue {
    SourceValue::Document(doc.into_iter().map(|(k, v)| (k, bson_to_source(v))).collect())
}

/// One collection per entity type
pub struct MongoSource {
    database: Database,
}

impl MongoSource {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

struct MongoCursor {
    cursor: Cursor<Document>,
}

#[async_trait]
impl DocumentCursor for MongoCursor {
    async fn next_page(&mut self, max: usize) -> Result<Vec<SourceValue>> {
        let mut page = Vec::with_capacity(max);
        while page.len() < max {
            match self.cursor.try_next().await? {
                Some(doc) => page.push(document_to_source(doc)),
                None => break,
            }
        }
        Ok(page)
    }
}

#[async_trait]
impl DocumentSource for MongoSource {
    async fn entity_types(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .database
            .list_collection_names()
            .await?
            .into_iter()
            .filter(|name| !name.starts_with("system."))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn count(&self, entity_type: &str) -> Result<u64> {
        let count = self
            .database
            .collection::<Document>(entity_type)
            .count_documents(doc! {})
            .await?;
        Ok(count)
    }

    async fn open(&self, entity_type: &str, mapping: &EntityMapping) -> Result<Box<dyn DocumentCursor>> {
        let stage = projection_stage(mapping);
        debug!(entity_type, projection = %stage, "Opening aggregation cursor");

        let cursor = self
            .database
            .collection::<Document>(entity_type)
            .aggregate(vec![stage])
            .await?;
        Ok(Box::new(MongoCursor { cursor }))
    }
}

/// Writes imported documents into per-entity collections
pub struct MongoDocumentSink {
    database: Database,
}

impl MongoDocumentSink {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl DocumentSink for MongoDocumentSink {
    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<u64> {
        let result = self
            .database
            .collection::<Document>(collection)
            .insert_many(docs)
            .ordered(false)
            .await?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn create_index(&self, collection: &str, field_path: &str) -> Result<()> {
        let mut keys = Document::new();
        keys.insert(field_path, 1);
        let model = IndexModel::builder().keys(keys).build();
        self.database
            .collection::<Document>(collection)
            .create_index(model)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use bson::spec::BinarySubtype;
    use bson::Binary;

    #[test]
    fn test_bson_conversion() {
        let oid = ObjectId::new();
        let source = document_to_source(doc! {
            "_id": oid,
            "Card": { "CardBalance": 12.5, "Tags": ["a", 1_i64] },
            "Raw": Bson::Binary(Binary { subtype: BinarySubtype::Generic, bytes: vec![1, 2] }),
            "Missing": Bson::Null,
        });

        assert_eq!(source.get("_id"), Some(&SourceValue::String(oid.to_hex())));
        let card = source.get("Card").unwrap();
        assert_eq!(card.get("CardBalance"), Some(&SourceValue::Double(12.5)));
        assert_eq!(
            card.get("Tags"),
            Some(&SourceValue::Array(vec![SourceValue::from("a"), SourceValue::Int64(1)]))
        );
        assert_eq!(source.get("Raw"), Some(&SourceValue::Binary(vec![1, 2])));
        assert_eq!(source.get("Missing"), Some(&SourceValue::Null));
    }

    #[test]
    fn test_datetime_conversion() {
        let dt = bson::DateTime::from_millis(1_700_000_000_000);
        match bson_to_source(Bson::DateTime(dt)) {
            SourceValue::DateTime(value) => {
                assert_eq!(value.timestamp_millis(), 1_700_000_000_000);
                assert_eq!(value.offset().local_minus_utc(), 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB at DOCBRIDGE_MONGO_URL"]
    async fn test_roundtrip_against_server() {
        let url = std::env::var("DOCBRIDGE_MONGO_URL").unwrap_or_else(|_| "mongodb://localhost:27017".into());
        let database = connect(&url, "docbridge_test").await.unwrap();
        let collection = format!("roundtrip_{}", ObjectId::new().to_hex());

        let sink = MongoDocumentSink::new(database.clone());
        let inserted = sink
            .insert_many(&collection, vec![doc! { "Amount": 5 }, doc! { "Amount": 6 }])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        sink.create_index(&collection, "_metadata.RAWID").await.unwrap();

        let source = MongoSource::new(database.clone());
        assert_eq!(source.count(&collection).await.unwrap(), 2);

        database.collection::<Document>(&collection).drop().await.unwrap();
    }
}
