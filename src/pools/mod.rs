//! Content pools
//!
//! A pool stores immutable content keyed by its derived id. The usage bank
//! consumes three of them (name strings, taxon names, references) through
//! [`PoolService`], wherever they are hosted.

pub mod http;
pub mod memory;
pub mod store_pool;

pub use http::HttpPool;
pub use memory::MemoryPool;
pub use store_pool::StorePool;

use crate::error::Result;
use crate::record::{PoolKind, PooledRecord, Upload};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait PoolService: Send + Sync {
    fn kind(&self) -> PoolKind;

    /// Look up a record by id; `None` if the pool does not know it
    async fn resolve(&self, id: &str) -> Result<Option<PooledRecord>>;

    /// Validate and store content, returning the (possibly pre-existing) record
    async fn write(&self, upload: &Upload, user: &str) -> Result<PooledRecord>;
}

/// The three foreign pools a usage refers to
#[derive(Clone)]
pub struct PoolSet {
    pub name_strings: Arc<dyn PoolService>,
    pub taxon_names: Arc<dyn PoolService>,
    pub references: Arc<dyn PoolService>,
}

impl PoolSet {
    pub fn new(
        name_strings: Arc<dyn PoolService>,
        taxon_names: Arc<dyn PoolService>,
        references: Arc<dyn PoolService>,
    ) -> Self {
        Self {
            name_strings,
            taxon_names,
            references,
        }
    }

    /// Three fresh in-memory pools
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryPool::new(PoolKind::NameString)),
            Arc::new(MemoryPool::new(PoolKind::TaxonName)),
            Arc::new(MemoryPool::new(PoolKind::Reference)),
        )
    }

    pub fn get(&self, kind: PoolKind) -> Option<&Arc<dyn PoolService>> {
        match kind {
            PoolKind::NameString => Some(&self.name_strings),
            PoolKind::TaxonName => Some(&self.taxon_names),
            PoolKind::Reference => Some(&self.references),
            PoolKind::Usage => None,
        }
    }
}

/// Best-effort human-readable payload: structured content when present
pub fn readable_payload(record: &PooledRecord) -> String {
    record
        .structured_content
        .clone()
        .unwrap_or_else(|| record.content.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_readable_payload_prefers_structured() {
        let pools = PoolSet::in_memory();
        let plain = pools
            .name_strings
            .write(&Upload::plain("Abax parallelus"), "tester")
            .await
            .unwrap();
        assert_eq!(readable_payload(&plain), "Abax parallelus");

        let structured = pools
            .taxon_names
            .write(&Upload::structured("Abax parallelus", json!({ "genus": "Abax" })), "tester")
            .await
            .unwrap();
        assert_eq!(readable_payload(&structured), r#"{"genus":"Abax"}"#);
    }

    #[test]
    fn test_pool_set_has_no_usage_pool() {
        let pools = PoolSet::in_memory();
        assert!(pools.get(PoolKind::Usage).is_none());
        assert_eq!(pools.get(PoolKind::Reference).unwrap().kind(), PoolKind::Reference);
    }
}
