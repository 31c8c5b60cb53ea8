//! In-memory pool

use super::PoolService;
use crate::error::Result;
use crate::id_generator::ContentIdGenerator;
use crate::record::{validate_upload, PoolKind, PooledRecord, Upload};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Content-addressed pool held in a concurrent map
pub struct MemoryPool {
    kind: PoolKind,
    records: DashMap<String, PooledRecord>,
    generator: Arc<ContentIdGenerator>,
}

impl MemoryPool {
    pub fn new(kind: PoolKind) -> Self {
        Self::with_generator(kind, Arc::new(ContentIdGenerator::default()))
    }

    pub fn with_generator(kind: PoolKind, generator: Arc<ContentIdGenerator>) -> Self {
        Self {
            kind,
            records: DashMap::new(),
            generator,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl PoolService for MemoryPool {
    fn kind(&self) -> PoolKind {
        self.kind
    }

    async fn resolve(&self, id: &str) -> Result<Option<PooledRecord>> {
        let id = id.to_ascii_uppercase();
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn write(&self, upload: &Upload, user: &str) -> Result<PooledRecord> {
        validate_upload(self.kind, upload)?;
        let id = self.generator.derive_id(&upload.content);

        let record = match self.records.entry(id.clone()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                debug!(pool = %self.kind, id = %id, "Stored new record");
                slot.insert(PooledRecord::accept(id, upload, user, Utc::now())?)
                    .value()
                    .clone()
            }
        };
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TnuError;
    use serde_json::json;

    #[tokio::test]
    async fn test_same_content_same_record() {
        let pool = MemoryPool::new(PoolKind::NameString);
        let first = pool.write(&Upload::plain("Carabus"), "alice").await.unwrap();
        let second = pool.write(&Upload::plain("Carabus"), "bob").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.created_by, "alice");
        assert_eq!(pool.len(), 1);
        assert_eq!(first.id, ContentIdGenerator::default().derive_id("Carabus"));
    }

    #[tokio::test]
    async fn test_resolve_ignores_id_case() {
        let pool = MemoryPool::new(PoolKind::NameString);
        let record = pool.write(&Upload::plain("Carabus"), "alice").await.unwrap();
        let found = pool.resolve(&record.id.to_lowercase()).await.unwrap();
        assert_eq!(found, Some(record));
        assert!(pool.resolve(&"0".repeat(32)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validation_gates_apply() {
        let pool = MemoryPool::new(PoolKind::Reference);
        let err = pool
            .write(&Upload::plain("Smith 1999"), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, TnuError::ValidationFailed(_)));

        let err = pool
            .write(&Upload::structured("Smith 1999", json!({ "author": "Jones" })), "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, TnuError::ValidationFailed(_)));
        assert!(pool.is_empty());
    }
}
