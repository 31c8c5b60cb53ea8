//! Taxon name usage bank
//!
//! Entry point tying the pieces together: usages are stored in the local
//! usage pool, searched through the query composer, and optionally expanded
//! against the three foreign pools.

use crate::codec::{self, CompositeUsageId, MAX_PAGE_NUMBER};
use crate::config::TnuConfig;
use crate::error::{Result, TnuError};
use crate::expand::{EnrichedUsage, ExpandedStream, Expander};
use crate::id_generator::ContentIdGenerator;
use crate::pools::{HttpPool, PoolService, PoolSet, StorePool};
use crate::query::{QueryComposer, UsageQuery};
use crate::record::{check_shape, PoolKind, PooledRecord, Upload};
use crate::store::{self, BackingStore, RecordStream, TableLayout};
use crate::usage_type::{validate_tables, Classification, UsageSubType, UsageType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Steps of a multi-pool usage write, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteStep {
    NameString,
    TaxonName,
    Reference,
    Usage,
}

impl WriteStep {
    fn pool(self) -> PoolKind {
        match self {
            WriteStep::NameString => PoolKind::NameString,
            WriteStep::TaxonName => PoolKind::TaxonName,
            WriteStep::Reference => PoolKind::Reference,
            WriteStep::Usage => PoolKind::Usage,
        }
    }
}

impl fmt::Display for WriteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pool().label())
    }
}

/// Content for all pools a usage touches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageUpload {
    pub name_string: Upload,

    /// Qualified taxon name; without it any sub type is dropped
    #[serde(default)]
    pub taxon_name: Option<Upload>,

    pub reference: Upload,

    /// Usage type code or name
    pub usage_type: String,

    #[serde(default)]
    pub usage_sub_type: Option<String>,

    pub page_number: u32,
}

/// A usage, with or without its references resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UsageView {
    Plain(PooledRecord),
    Expanded(EnrichedUsage),
}

impl UsageView {
    pub fn record(&self) -> &PooledRecord {
        match self {
            UsageView::Plain(record) => record,
            UsageView::Expanded(enriched) => &enriched.record,
        }
    }
}

/// Search result stream
pub enum SearchResults {
    Plain(RecordStream),
    Expanded(ExpandedStream),
}

impl SearchResults {
    pub fn error(&self) -> Option<&TnuError> {
        match self {
            SearchResults::Plain(stream) => stream.error(),
            SearchResults::Expanded(stream) => stream.error(),
        }
    }

    pub fn is_expanded(&self) -> bool {
        matches!(self, SearchResults::Expanded(_))
    }

    /// Drain the stream, expanding each usage if requested
    pub async fn collect(self) -> (Vec<UsageView>, Option<TnuError>) {
        match self {
            SearchResults::Plain(stream) => {
                let (rows, error) = stream.into_parts();
                (rows.into_iter().map(UsageView::Plain).collect(), error)
            }
            SearchResults::Expanded(stream) => {
                let (usages, error) = stream.collect_all().await;
                (usages.into_iter().map(UsageView::Expanded).collect(), error)
            }
        }
    }
}

/// Outcome of a batch upload
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub stored: Vec<PooledRecord>,

    /// Rejected entries with the reason
    pub rejected: Vec<(String, TnuError)>,
}

pub struct TnuBank {
    store: Arc<dyn BackingStore>,
    usages: StorePool,
    pools: PoolSet,
    composer: QueryComposer,
    expander: Expander,
}

impl TnuBank {
    /// Open the configured store and pools
    pub async fn from_config(config: &TnuConfig) -> Result<Self> {
        let store = store::open(config).await?;
        let generator = Arc::new(ContentIdGenerator::new(config.generator_pool_size));
        let layout = config.layout();

        let pool = |kind: PoolKind, url: &Option<String>| -> Result<Arc<dyn PoolService>> {
            let pool: Arc<dyn PoolService> = match url {
                Some(url) => {
                    info!(pool = %kind, url = %url, "Using remote pool");
                    Arc::new(HttpPool::new(kind, url.as_str(), config.resolve_timeout)?)
                }
                None => Arc::new(StorePool::new(
                    layout.tables(kind).clone(),
                    Arc::clone(&store),
                    Arc::clone(&generator),
                )),
            };
            Ok(pool)
        };
        let pools = PoolSet::new(
            pool(PoolKind::NameString, &config.name_string_pool_url)?,
            pool(PoolKind::TaxonName, &config.taxon_name_pool_url)?,
            pool(PoolKind::Reference, &config.reference_pool_url)?,
        );

        Self::new(store, pools, generator, config).await
    }

    /// Assemble a bank from its parts and make sure the schema exists
    pub async fn new(
        store: Arc<dyn BackingStore>,
        pools: PoolSet,
        generator: Arc<ContentIdGenerator>,
        config: &TnuConfig,
    ) -> Result<Self> {
        validate_tables()?;
        let layout = config.layout();
        layout.validate()?;
        store.init_schema(&layout).await?;
        info!(store = store.name(), usages = %layout.usages.data, "Usage bank ready");

        Ok(Self {
            usages: StorePool::new(layout.usages.clone(), Arc::clone(&store), generator),
            composer: QueryComposer::new(layout).with_default_limit(config.default_limit),
            expander: Expander::new(pools.clone(), config.resolve_timeout),
            store,
            pools,
        })
    }

    /// In-memory bank with in-memory pools
    pub async fn in_memory() -> Result<Self> {
        let config = TnuConfig {
            database_url: "sqlite::memory:".to_string(),
            ..TnuConfig::default()
        };
        let store: Arc<dyn BackingStore> = Arc::new(store::SqliteStore::in_memory()?);
        let generator = Arc::new(ContentIdGenerator::new(config.generator_pool_size));
        Self::new(store, PoolSet::in_memory(), generator, &config).await
    }

    pub fn pools(&self) -> &PoolSet {
        &self.pools
    }

    pub fn layout(&self) -> &TableLayout {
        self.composer.layout()
    }

    /// Look up one usage by id
    pub async fn get_usage(&self, id: &str, expand: bool) -> Result<Option<UsageView>> {
        let Some(record) = self.usages.resolve(id).await? else {
            return Ok(None);
        };
        Ok(Some(self.view(record, expand).await))
    }

    /// Look up several usages; unknown ids are skipped
    pub async fn get_usages(&self, ids: &[String], expand: bool) -> Result<Vec<UsageView>> {
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(view) = self.get_usage(id, expand).await? {
                views.push(view);
            }
        }
        Ok(views)
    }

    async fn view(&self, record: PooledRecord, expand: bool) -> UsageView {
        if expand {
            UsageView::Expanded(self.expander.expand(&record).await)
        } else {
            UsageView::Plain(record)
        }
    }

    /// Search usages. Invalid queries fail here; store failures end up on
    /// the returned stream.
    pub async fn find_usages(&self, query: &UsageQuery, expand: bool) -> Result<SearchResults> {
        let sql = self.composer.compile(query)?;
        let stream = RecordStream::fetch(self.store.as_ref(), &sql).await;
        if expand && !stream.is_failed() {
            Ok(SearchResults::Expanded(self.expander.stream(stream)))
        } else {
            Ok(SearchResults::Plain(stream))
        }
    }

    /// Store a usage given as composite identifier string
    pub async fn store_usage(&self, plain: &str, user: &str) -> Result<PooledRecord> {
        let plain = plain.trim();
        check_shape(PoolKind::Usage, &Upload::plain(plain))?;
        let usage = CompositeUsageId::decode(plain)?;
        self.store_decoded(&usage, user).await
    }

    async fn store_decoded(&self, usage: &CompositeUsageId, user: &str) -> Result<PooledRecord> {
        let upload = Upload::structured(usage.encode(), usage.to_structured())
            .with_type(usage.usage_type().code());
        self.usages.write(&upload, user).await
    }

    /// Store a usage assembled from pool ids
    #[allow(clippy::too_many_arguments)]
    pub async fn write_usage_ids(
        &self,
        name_id: &str,
        taxon_name_id: Option<&str>,
        usage_type: &str,
        usage_sub_type: Option<&str>,
        ref_id: &str,
        page_number: u32,
        user: &str,
    ) -> Result<PooledRecord> {
        let usage = CompositeUsageId::from_aliases(
            name_id,
            taxon_name_id,
            usage_type,
            usage_sub_type,
            ref_id,
            page_number,
        )?;
        self.store_decoded(&usage, user).await
    }

    /// Write content to the foreign pools, then store the usage. Not atomic:
    /// a failure leaves earlier steps' records in place and names the step.
    pub async fn write_usage(&self, upload: &UsageUpload, user: &str) -> Result<PooledRecord> {
        // classification and page are checked before anything is written
        let usage_type = UsageType::from_alias(&upload.usage_type)?;
        let usage_sub_type = match (&upload.taxon_name, &upload.usage_sub_type) {
            (Some(_), Some(alias)) => Some(UsageSubType::from_alias(alias)?),
            _ => None,
        };
        let usage_sub_type =
            codec::check_classification(usage_type, usage_sub_type, upload.taxon_name.is_some())?;
        if upload.page_number < 1 || upload.page_number > MAX_PAGE_NUMBER {
            return Err(TnuError::ValidationFailed(format!(
                "'{}' is not a valid page number",
                upload.page_number
            )));
        }

        let name_string = self
            .write_step(WriteStep::NameString, &self.pools.name_strings, &upload.name_string, user)
            .await?;
        let taxon_name = match &upload.taxon_name {
            Some(taxon) => Some(
                self.write_step(WriteStep::TaxonName, &self.pools.taxon_names, taxon, user)
                    .await?,
            ),
            None => None,
        };
        let reference = self
            .write_step(WriteStep::Reference, &self.pools.references, &upload.reference, user)
            .await?;

        let stored = async {
            let usage = CompositeUsageId::new(
                &name_string.id,
                taxon_name.as_ref().map(|t| t.id.as_str()),
                usage_type,
                usage_sub_type,
                &reference.id,
                upload.page_number,
            )?;
            self.store_decoded(&usage, user).await
        }
        .await;
        let record = stored.map_err(|e| step_failed(WriteStep::Usage, e))?;
        info!(step = %WriteStep::Usage, id = %record.id, "Stored usage {}", record.content);
        Ok(record)
    }

    async fn write_step(
        &self,
        step: WriteStep,
        pool: &Arc<dyn PoolService>,
        upload: &Upload,
        user: &str,
    ) -> Result<PooledRecord> {
        let record = pool
            .write(upload, user)
            .await
            .map_err(|e| step_failed(step, e))?;
        info!(step = %step, id = %record.id, "Wrote pool record");
        Ok(record)
    }

    /// Store many usage strings; invalid ones are reported, not fatal
    pub async fn store_usages<I, S>(&self, batch: I, user: &str) -> BatchOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut outcome = BatchOutcome::default();
        for plain in batch {
            let plain = plain.as_ref();
            match self.store_usage(plain, user).await {
                Ok(record) => outcome.stored.push(record),
                Err(e) => {
                    warn!("Skipping usage '{}': {}", plain, e);
                    outcome.rejected.push((plain.to_string(), e));
                }
            }
        }
        info!(
            stored = outcome.stored.len(),
            rejected = outcome.rejected.len(),
            "Batch upload finished"
        );
        outcome
    }

    /// Declare the canonical alias of a usage; an empty id or the usage's own
    /// id makes it self-canonical again
    pub async fn set_canonical(&self, id: &str, canonical_id: &str, user: &str) -> Result<PooledRecord> {
        let canonical_id = canonical_id.trim();
        if !canonical_id.is_empty() && !codec::is_hex_id(canonical_id) {
            return Err(TnuError::ValidationFailed(format!(
                "'{}' is not a valid canonical id",
                canonical_id
            )));
        }
        self.usages.set_canonical(id, canonical_id, user).await
    }

    pub async fn delete_usage(&self, id: &str, user: &str) -> Result<PooledRecord> {
        self.usages.set_deleted(id, true, user).await
    }

    pub async fn restore_usage(&self, id: &str, user: &str) -> Result<PooledRecord> {
        self.usages.set_deleted(id, false, user).await
    }
}

fn step_failed(step: WriteStep, error: TnuError) -> TnuError {
    warn!(step = %step, "Usage write failed: {}", error);
    TnuError::PoolWrite {
        step,
        reason: error.to_string(),
    }
}
