//! SQLite backing store
//!
//! One connection behind a mutex. Every statement runs on the blocking thread
//! pool with the lock held; async tasks never touch the connection directly.

use super::layout::{data_values, id_values, update_values, Dialect, IndexRow, PoolTables, SqlValue, TableLayout};
use super::BackingStore;
use crate::error::{Result, TnuError};
use crate::record::{from_millis, PooledRecord};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)
            .map_err(|e| TnuError::BackingStore(format!("Failed to open {}: {}", path.display(), e)))?;
        info!("Opened SQLite store at {}", path.display());
        Ok(Self::from_connection(db))
    }

    /// Private in-memory database
    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(db: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut conn)
        })
        .await
        .map_err(|e| TnuError::BackingStore(format!("SQLite task failed: {}", e)))?
    }
}

fn to_sql_values(values: Vec<SqlValue>) -> Vec<Value> {
    values
        .into_iter()
        .map(|v| match v {
            SqlValue::Text(Some(s)) => Value::Text(s),
            SqlValue::Int(Some(i)) => Value::Integer(i),
            SqlValue::Text(None) | SqlValue::Int(None) => Value::Null,
        })
        .collect()
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<PooledRecord> {
    Ok(PooledRecord {
        id: row.get(0)?,
        canonical_id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        checksum: row.get(2)?,
        content: row.get(3)?,
        structured_content: row.get(4)?,
        string_type: row.get(5)?,
        created_at: from_millis(row.get(6)?),
        created_by: row.get(7)?,
        updated_at: from_millis(row.get(8)?),
        updated_by: row.get(9)?,
        local_updated_at: from_millis(row.get(10)?),
        deleted: row.get::<_, i64>(11)? != 0,
    })
}

#[async_trait]
impl BackingStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn init_schema(&self, layout: &TableLayout) -> Result<()> {
        let statements = layout.ddl();
        self.with_conn(move |db| {
            for statement in &statements {
                db.execute(statement, [])
                    .map_err(|e| TnuError::BackingStore(format!("Failed to create schema: {}", e)))?;
            }
            Ok(())
        })
        .await
    }

    async fn select_records(&self, sql: &str) -> Result<Vec<PooledRecord>> {
        let sql = sql.to_string();
        self.with_conn(move |db| {
            let mut statement = db.prepare(&sql)?;
            let rows = statement.query_map([], read_record)?;
            let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    async fn load_record(&self, tables: &PoolTables, id: &str) -> Result<Option<PooledRecord>> {
        let sql = tables.select_by_id_sql(Dialect::Sqlite);
        let params = to_sql_values(id_values(id));
        self.with_conn(move |db| {
            let record = db
                .query_row(&sql, params_from_iter(params), read_record)
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn insert_record(&self, tables: &PoolTables, record: &PooledRecord, index: &IndexRow) -> Result<bool> {
        let data_sql = tables.insert_data_sql(Dialect::Sqlite);
        let index_sql = tables.insert_index_sql(index, Dialect::Sqlite);
        let data_params = to_sql_values(data_values(record));
        let index_params = to_sql_values(index.values());
        self.with_conn(move |db| {
            let tx = db.transaction()?;
            let inserted = tx.execute(&data_sql, params_from_iter(data_params))?;
            if inserted > 0 {
                tx.execute(&index_sql, params_from_iter(index_params))?;
            }
            tx.commit()?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn update_record(&self, tables: &PoolTables, record: &PooledRecord) -> Result<()> {
        let sql = tables.update_data_sql(Dialect::Sqlite);
        let params = to_sql_values(update_values(record));
        let missing = format!("{} '{}'", tables.kind, record.id);
        self.with_conn(move |db| {
            let updated = db.execute(&sql, params_from_iter(params))?;
            if updated == 0 {
                return Err(TnuError::NotFound(missing));
            }
            Ok(())
        })
        .await
    }
}
