//! Document-side source used by extraction

use crate::catalog::EntityMapping;
use crate::error::Result;
use crate::value::SourceValue;
use async_trait::async_trait;

/// A store of documents grouped into named entity types
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Entity types currently present in the store
    async fn entity_types(&self) -> Result<Vec<String>>;

    async fn count(&self, entity_type: &str) -> Result<u64>;

    /// Start streaming the documents of one entity type. Implementations may
    /// use the mapping to push a projection down to the store.
    async fn open(
        &self,
        entity_type: &str,
        mapping: &EntityMapping,
    ) -> Result<Box<dyn DocumentCursor>>;
}

/// Forward-only page reader over one entity type
#[async_trait]
pub trait DocumentCursor: Send {
    /// Up to `max` documents; an empty page means the cursor is exhausted
    async fn next_page(&mut self, max: usize) -> Result<Vec<SourceValue>>;
}
