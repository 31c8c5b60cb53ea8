//! Pool persisted in the backing store
//!
//! Used for the local usage pool, and for foreign pools when a node hosts
//! them itself.

use super::PoolService;
use crate::error::{Result, TnuError};
use crate::id_generator::ContentIdGenerator;
use crate::record::{validate_upload, PoolKind, PooledRecord, Upload};
use crate::store::{BackingStore, IndexRow, PoolTables};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub struct StorePool {
    tables: PoolTables,
    store: Arc<dyn BackingStore>,
    generator: Arc<ContentIdGenerator>,
}

impl StorePool {
    pub fn new(tables: PoolTables, store: Arc<dyn BackingStore>, generator: Arc<ContentIdGenerator>) -> Self {
        Self {
            tables,
            store,
            generator,
        }
    }

    pub fn tables(&self) -> &PoolTables {
        &self.tables
    }

    /// Point a record at a canonical alias
    pub async fn set_canonical(&self, id: &str, canonical_id: &str, user: &str) -> Result<PooledRecord> {
        let canonical_id = canonical_id.trim().to_ascii_uppercase();
        self.update(id, user, |record, user| record.set_canonical(&canonical_id, user, Utc::now()))
            .await
    }

    /// Flip the soft-delete flag
    pub async fn set_deleted(&self, id: &str, deleted: bool, user: &str) -> Result<PooledRecord> {
        self.update(id, user, |record, user| record.set_deleted(deleted, user, Utc::now()))
            .await
    }

    async fn update<F>(&self, id: &str, user: &str, change: F) -> Result<PooledRecord>
    where
        F: FnOnce(&mut PooledRecord, &str) -> bool + Send,
    {
        let mut record = self
            .resolve(id)
            .await?
            .ok_or_else(|| TnuError::NotFound(format!("{} '{}'", self.tables.kind, id)))?;
        if change(&mut record, user) {
            self.store.update_record(&self.tables, &record).await?;
            info!(pool = %self.tables.kind, id = %record.id, user = %user, "Updated record metadata");
        }
        Ok(record)
    }
}

#[async_trait]
impl PoolService for StorePool {
    fn kind(&self) -> PoolKind {
        self.tables.kind
    }

    async fn resolve(&self, id: &str) -> Result<Option<PooledRecord>> {
        self.store
            .load_record(&self.tables, &id.trim().to_ascii_uppercase())
            .await
    }

    async fn write(&self, upload: &Upload, user: &str) -> Result<PooledRecord> {
        validate_upload(self.tables.kind, upload)?;
        let id = self.generator.derive_id(&upload.content);

        if let Some(existing) = self.store.load_record(&self.tables, &id).await? {
            return Ok(existing);
        }

        let record = PooledRecord::accept(id, upload, user, Utc::now())?;
        let index = IndexRow::for_record(self.tables.kind, &record)?;
        if self.store.insert_record(&self.tables, &record, &index).await? {
            info!(pool = %self.tables.kind, id = %record.id, user = %user, "Stored new record");
            return Ok(record);
        }

        // lost a race against a concurrent writer of the same content
        self.store
            .load_record(&self.tables, &record.id)
            .await?
            .ok_or_else(|| TnuError::BackingStore(format!("record '{}' vanished after insert", record.id)))
    }
}
