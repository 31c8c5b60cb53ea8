//! PostgreSQL backing store using sqlx

use super::layout::{data_values, id_values, update_values, Dialect, IndexRow, PoolTables, SqlValue, TableLayout};
use super::BackingStore;
use crate::error::{Result, TnuError};
use crate::record::{from_millis, PooledRecord};
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use std::time::Duration;
use tracing::info;

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str) -> std::result::Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = init_pool(database_url).await?;
        info!("Connected to PostgreSQL store");
        Ok(Self { pool })
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    values: Vec<SqlValue>,
) -> Query<'q, Postgres, PgArguments> {
    for value in values {
        query = match value {
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Int(i) => query.bind(i),
        };
    }
    query
}

fn read_record(row: &PgRow) -> std::result::Result<PooledRecord, sqlx::Error> {
    Ok(PooledRecord {
        id: row.try_get(0)?,
        canonical_id: row.try_get::<Option<String>, _>(1)?.unwrap_or_default(),
        checksum: row.try_get(2)?,
        content: row.try_get(3)?,
        structured_content: row.try_get(4)?,
        string_type: row.try_get(5)?,
        created_at: from_millis(row.try_get(6)?),
        created_by: row.try_get(7)?,
        updated_at: from_millis(row.try_get(8)?),
        updated_by: row.try_get(9)?,
        local_updated_at: from_millis(row.try_get(10)?),
        deleted: row.try_get::<i64, _>(11)? != 0,
    })
}

#[async_trait]
impl BackingStore for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn init_schema(&self, layout: &TableLayout) -> Result<()> {
        for statement in layout.ddl() {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| TnuError::BackingStore(format!("Failed to create schema: {}", e)))?;
        }
        Ok(())
    }

    async fn select_records(&self, sql: &str) -> Result<Vec<PooledRecord>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let records = rows
            .iter()
            .map(read_record)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn load_record(&self, tables: &PoolTables, id: &str) -> Result<Option<PooledRecord>> {
        let sql = tables.select_by_id_sql(Dialect::Postgres);
        let row = bind_all(sqlx::query(&sql), id_values(id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(read_record).transpose()?)
    }

    async fn insert_record(&self, tables: &PoolTables, record: &PooledRecord, index: &IndexRow) -> Result<bool> {
        let data_sql = tables.insert_data_sql(Dialect::Postgres);
        let index_sql = tables.insert_index_sql(index, Dialect::Postgres);

        let mut tx = self.pool.begin().await?;
        let inserted = bind_all(sqlx::query(&data_sql), data_values(record))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if inserted > 0 {
            bind_all(sqlx::query(&index_sql), index.values())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(inserted > 0)
    }

    async fn update_record(&self, tables: &PoolTables, record: &PooledRecord) -> Result<()> {
        let sql = tables.update_data_sql(Dialect::Postgres);
        let updated = bind_all(sqlx::query(&sql), update_values(record))
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(TnuError::NotFound(format!("{} '{}'", tables.kind, record.id)));
        }
        Ok(())
    }
}
