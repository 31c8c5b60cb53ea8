//! Relational backing store
//!
//! Pools and the usage repository persist through [`BackingStore`]. SQLite
//! serves single-node deployments and tests, PostgreSQL shared deployments.

pub mod layout;
pub mod postgres;
pub mod sqlite;

pub use layout::{Dialect, IndexRow, PoolTables, SqlValue, TableLayout};
pub use postgres::PgStore;
pub use sqlite::SqliteStore;

use crate::config::TnuConfig;
use crate::error::{Result, TnuError};
use crate::record::PooledRecord;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::error;

#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Short name for log lines
    fn name(&self) -> &'static str;

    /// Create all tables of a layout if missing
    async fn init_schema(&self, layout: &TableLayout) -> Result<()>;

    /// Run a composed SELECT whose columns are [`layout::DATA_COLUMNS`]
    async fn select_records(&self, sql: &str) -> Result<Vec<PooledRecord>>;

    async fn load_record(&self, tables: &PoolTables, id: &str) -> Result<Option<PooledRecord>>;

    /// Insert a record and its index row; returns false if the id already existed
    async fn insert_record(&self, tables: &PoolTables, record: &PooledRecord, index: &IndexRow) -> Result<bool>;

    /// Persist canonical id, audit fields and deleted flag of an existing record
    async fn update_record(&self, tables: &PoolTables, record: &PooledRecord) -> Result<()>;
}

/// Open the store named by the configured database URL
pub async fn open(config: &TnuConfig) -> Result<Arc<dyn BackingStore>> {
    let url = config.database_url.as_str();
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(Arc::new(PgStore::connect(url).await?))
    } else if url == "sqlite::memory:" {
        Ok(Arc::new(SqliteStore::in_memory()?))
    } else if let Some(path) = url.strip_prefix("sqlite://") {
        Ok(Arc::new(SqliteStore::open(path)?))
    } else {
        Err(TnuError::Config(format!("unsupported database URL '{}'", url)))
    }
}

/// Result of a search: the rows found, or the failure that ended it
#[derive(Debug)]
pub struct RecordStream {
    rows: VecDeque<PooledRecord>,
    error: Option<TnuError>,
}

impl RecordStream {
    pub fn from_rows(rows: Vec<PooledRecord>) -> Self {
        Self {
            rows: rows.into(),
            error: None,
        }
    }

    pub fn failed(error: TnuError) -> Self {
        Self {
            rows: VecDeque::new(),
            error: Some(error),
        }
    }

    /// Execute a query, turning a store failure into a failed stream
    pub async fn fetch(store: &dyn BackingStore, sql: &str) -> Self {
        match store.select_records(sql).await {
            Ok(rows) => Self::from_rows(rows),
            Err(e) => {
                error!(store = store.name(), query = %sql, "Search failed: {}", e);
                Self::failed(e)
            }
        }
    }

    pub fn error(&self) -> Option<&TnuError> {
        self.error.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Rows not yet consumed
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    pub fn into_parts(self) -> (Vec<PooledRecord>, Option<TnuError>) {
        (self.rows.into(), self.error)
    }
}

impl Iterator for RecordStream {
    type Item = PooledRecord;

    fn next(&mut self) -> Option<PooledRecord> {
        self.rows.pop_front()
    }
}
