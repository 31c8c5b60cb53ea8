use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tnu_bank::id_generator::ContentIdGenerator;
use tnu_bank::pools::{MemoryPool, PoolService, PoolSet, StorePool};
use tnu_bank::record::{PoolKind, PooledRecord, Upload};
use tnu_bank::store::{BackingStore, SqliteStore};
use tnu_bank::usage_type::Classification;
use tnu_bank::{
    CompositeUsageId, PrimaryRank, SearchResults, TextCombine, TnuBank, TnuConfig, TnuError, UsageQuery, UsageUpload,
    UsageView, WriteStep,
};

/// Bank whose three pools live in the same SQLite database as the usages,
/// so searches can join them
async fn sqlite_bank() -> TnuBank {
    let config = TnuConfig {
        database_url: "sqlite::memory:".to_string(),
        ..TnuConfig::default()
    };
    let store: Arc<dyn BackingStore> = Arc::new(SqliteStore::in_memory().unwrap());
    let generator = Arc::new(ContentIdGenerator::new(2));
    let layout = config.layout();
    let pool = |kind: PoolKind| -> Arc<dyn PoolService> {
        Arc::new(StorePool::new(
            layout.tables(kind).clone(),
            Arc::clone(&store),
            Arc::clone(&generator),
        ))
    };
    let pools = PoolSet::new(
        pool(PoolKind::NameString),
        pool(PoolKind::TaxonName),
        pool(PoolKind::Reference),
    );
    TnuBank::new(store, pools, generator, &config).await.unwrap()
}

fn abax_upload() -> UsageUpload {
    UsageUpload {
        name_string: Upload::plain("Abax parallelus"),
        taxon_name: Some(
            Upload::structured(
                "Abax parallelus",
                json!({ "genus": "Abax", "species": "parallelus" }),
            )
            .with_type("species"),
        ),
        reference: Upload::structured(
            "Smith, J. 1999. Carabidae of Europe",
            json!({ "author": "Smith, J.", "year": 1999, "title": "Carabidae of Europe" }),
        ),
        usage_type: "nomenclature usage".to_string(),
        usage_sub_type: Some("original description".to_string()),
        page_number: 7,
    }
}

fn carabus_upload() -> UsageUpload {
    UsageUpload {
        name_string: Upload::plain("Carabus auratus"),
        taxon_name: None,
        reference: Upload::structured(
            "Miller, A. 2004. Ground beetles",
            json!({ "author": "Miller, A.", "year": 2004, "title": "Ground beetles" }),
        ),
        usage_type: "GU".to_string(),
        usage_sub_type: None,
        page_number: 12,
    }
}

async fn search_ids(bank: &TnuBank, query: UsageQuery) -> Vec<String> {
    let results = bank.find_usages(&query, false).await.unwrap();
    let (views, error) = results.collect().await;
    assert!(error.is_none(), "search failed: {:?}", error);
    views.iter().map(|v| v.record().content.clone()).collect()
}

struct OfflinePool(PoolKind);

#[async_trait]
impl PoolService for OfflinePool {
    fn kind(&self) -> PoolKind {
        self.0
    }

    async fn resolve(&self, _id: &str) -> tnu_bank::Result<Option<PooledRecord>> {
        Err(TnuError::Pool("connection refused".to_string()))
    }

    async fn write(&self, _upload: &Upload, _user: &str) -> tnu_bank::Result<PooledRecord> {
        Err(TnuError::Pool("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_write_and_search_by_structured_predicates() {
    let bank = sqlite_bank().await;
    let abax = bank.write_usage(&abax_upload(), "alice").await.unwrap();
    let carabus = bank.write_usage(&carabus_upload(), "bob").await.unwrap();

    let usage = CompositeUsageId::decode(&abax.content).unwrap();
    assert_eq!(usage.usage_type().code(), "NU");
    assert_eq!(usage.usage_sub_type().map(|s| s.code()), Some("OD"));
    assert_eq!(usage.page_number(), 7);

    let only_abax = vec![abax.content.clone()];
    let only_carabus = vec![carabus.content.clone()];

    assert_eq!(search_ids(&bank, UsageQuery::new().name_string("parallelus")).await, only_abax);
    assert_eq!(search_ids(&bank, UsageQuery::new().epithet(PrimaryRank::Genus, "ABAX")).await, only_abax);
    assert_eq!(search_ids(&bank, UsageQuery::new().rank("species")).await, only_abax);
    assert_eq!(search_ids(&bank, UsageQuery::new().author("smith")).await, only_abax);
    assert_eq!(search_ids(&bank, UsageQuery::new().year("2004")).await, only_carabus);
    assert_eq!(search_ids(&bank, UsageQuery::new().bib_ref("Ground")).await, only_carabus);
    assert_eq!(search_ids(&bank, UsageQuery::new().page_number(12)).await, only_carabus);
    assert_eq!(search_ids(&bank, UsageQuery::new().usage_type("original description")).await, only_abax);
    assert_eq!(search_ids(&bank, UsageQuery::new().usage_type("GU")).await, only_carabus);
    assert_eq!(search_ids(&bank, UsageQuery::new().user("ali")).await, only_abax);
    assert!(search_ids(&bank, UsageQuery::new().user("carol")).await.is_empty());
}

#[tokio::test]
async fn test_full_text_search_spans_pools() {
    let bank = sqlite_bank().await;
    let abax = bank.write_usage(&abax_upload(), "alice").await.unwrap();
    let carabus = bank.write_usage(&carabus_upload(), "alice").await.unwrap();

    // a usage without taxon name still matches through the left joins
    let mut any = search_ids(&bank, UsageQuery::new().text("abax").text("beetles")).await;
    any.sort();
    let mut expected = vec![abax.content.clone(), carabus.content.clone()];
    expected.sort();
    assert_eq!(any, expected);

    let all = UsageQuery::new().text("abax").text("europe").combine(TextCombine::All);
    assert_eq!(search_ids(&bank, all).await, vec![abax.content.clone()]);

    let none = UsageQuery::new().text("abax").text("beetles").combine(TextCombine::All);
    assert!(search_ids(&bank, none).await.is_empty());
}

#[tokio::test]
async fn test_search_limit_and_self_canonical() {
    let bank = sqlite_bank().await;
    let abax = bank.write_usage(&abax_upload(), "alice").await.unwrap();
    let carabus = bank.write_usage(&carabus_upload(), "alice").await.unwrap();

    assert_eq!(search_ids(&bank, UsageQuery::new().user("alice").limit(1)).await.len(), 1);

    bank.set_canonical(&carabus.id, &abax.id, "alice").await.unwrap();
    let canonical = search_ids(&bank, UsageQuery::new().user("alice").self_canonical_only()).await;
    assert_eq!(canonical, vec![abax.content.clone()]);
}

#[tokio::test]
async fn test_invalid_searches_fail_before_running() {
    let bank = TnuBank::in_memory().await.unwrap();
    assert!(matches!(
        bank.find_usages(&UsageQuery::new(), false).await,
        Err(TnuError::EmptyQuery)
    ));
    assert!(matches!(
        bank.find_usages(&UsageQuery::new().usage_type("holotype"), false).await,
        Err(TnuError::InvalidAlias { .. })
    ));
}

#[tokio::test]
async fn test_expanded_search_resolves_payloads() {
    let bank = sqlite_bank().await;
    bank.write_usage(&abax_upload(), "alice").await.unwrap();

    let results = bank
        .find_usages(&UsageQuery::new().author("smith"), true)
        .await
        .unwrap();
    assert!(results.is_expanded());
    let (views, error) = results.collect().await;
    assert!(error.is_none());
    assert_eq!(views.len(), 1);

    let UsageView::Expanded(enriched) = &views[0] else {
        panic!("expected an expanded usage");
    };
    assert!(enriched.is_complete());
    assert_eq!(
        enriched.name_string.as_ref().unwrap().payload.as_deref(),
        Some("Abax parallelus")
    );
    assert!(enriched.taxon_name.as_ref().unwrap().is_resolved());
    assert!(enriched.reference.as_ref().unwrap().is_resolved());
}

#[tokio::test]
async fn test_unreachable_taxon_pool_leaves_identifier_only() {
    let memory = PoolSet::in_memory();
    let pools = PoolSet::new(
        memory.name_strings.clone(),
        Arc::new(OfflinePool(PoolKind::TaxonName)),
        memory.references.clone(),
    );
    let config = TnuConfig::default();
    let store: Arc<dyn BackingStore> = Arc::new(SqliteStore::in_memory().unwrap());
    let bank = TnuBank::new(store, pools, Arc::new(ContentIdGenerator::new(1)), &config)
        .await
        .unwrap();

    let name = bank.pools().name_strings.write(&Upload::plain("Abax parallelus"), "alice").await.unwrap();
    let reference = bank
        .pools()
        .references
        .write(&Upload::structured("Smith 1999", json!({ "author": "Smith", "year": 1999 })), "alice")
        .await
        .unwrap();
    let taxon_id = "B".repeat(32);
    let record = bank
        .write_usage_ids(&name.id, Some(&taxon_id), "NU", None, &reference.id, 3, "alice")
        .await
        .unwrap();

    let Some(UsageView::Expanded(enriched)) = bank.get_usage(&record.id, true).await.unwrap() else {
        panic!("expected an expanded usage");
    };
    assert!(!enriched.is_complete());
    assert!(enriched.unresolved(PoolKind::TaxonName));
    assert!(!enriched.unresolved(PoolKind::NameString));
    assert!(!enriched.unresolved(PoolKind::Reference));

    let taxon = enriched.taxon_name.as_ref().unwrap();
    assert_eq!(taxon.id, taxon_id);
    assert!(!taxon.is_resolved());
    assert_eq!(
        enriched.reference.as_ref().unwrap().payload.as_deref(),
        Some(r#"{"author":"Smith","year":1999}"#)
    );

    // writing through the offline pool names the failed step
    let mut upload = abax_upload();
    upload.reference = Upload::structured("Smith 1999", json!({ "author": "Smith", "year": 1999 }));
    let err = bank.write_usage(&upload, "alice").await.unwrap_err();
    assert!(matches!(err, TnuError::PoolWrite { step: WriteStep::TaxonName, .. }));
}

#[tokio::test]
async fn test_delete_and_restore_keep_record() {
    let bank = TnuBank::in_memory().await.unwrap();
    let record = bank
        .write_usage_ids(&"A".repeat(32), None, "GU", None, &"C".repeat(32), 2, "alice")
        .await
        .unwrap();

    let deleted = bank.delete_usage(&record.id, "bob").await.unwrap();
    assert!(deleted.deleted);
    assert_eq!(deleted.updated_by, "bob");
    assert_eq!(deleted.created_by, "alice");

    let view = bank.get_usage(&record.id, false).await.unwrap().unwrap();
    assert!(view.record().deleted);

    let restored = bank.restore_usage(&record.id, "carol").await.unwrap();
    assert!(!restored.deleted);

    let missing = "F".repeat(32);
    assert!(bank.get_usage(&missing, false).await.unwrap().is_none());
    assert!(matches!(
        bank.delete_usage(&missing, "bob").await,
        Err(TnuError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_batch_upload_reports_rejections() {
    let bank = TnuBank::in_memory().await.unwrap();
    let good = format!("{}-GU@{}:1", "A".repeat(32), "C".repeat(32));
    let outcome = bank
        .store_usages(vec![good.clone(), "garbage".to_string(), format!("{}-GU@{}:0", "A".repeat(32), "C".repeat(32))], "alice")
        .await;
    assert_eq!(outcome.stored.len(), 1);
    assert_eq!(outcome.stored[0].content, good);
    assert_eq!(outcome.rejected.len(), 2);
    assert_eq!(outcome.rejected[0].0, "garbage");

    let views = bank
        .get_usages(&[outcome.stored[0].id.clone(), "0".repeat(32)], false)
        .await
        .unwrap();
    assert_eq!(views.len(), 1);
}

#[tokio::test]
async fn test_plain_search_results_are_not_expanded() {
    let bank = sqlite_bank().await;
    bank.write_usage(&carabus_upload(), "alice").await.unwrap();
    let results = bank.find_usages(&UsageQuery::new().page_number(12), false).await.unwrap();
    assert!(matches!(results, SearchResults::Plain(_)));
    assert!(results.error().is_none());
}

#[test]
fn test_memory_pool_kinds() {
    let pool = MemoryPool::new(PoolKind::Reference);
    assert_eq!(pool.kind(), PoolKind::Reference);
    assert!(pool.is_empty());
}

#[tokio::test]
async fn test_invalid_classification_rejected_before_pool_writes() {
    let bank = TnuBank::in_memory().await.unwrap();
    let name_id = ContentIdGenerator::default().derive_id("Abax parallelus");

    let mut generic_with_sub_type = abax_upload();
    generic_with_sub_type.usage_type = "GU".to_string();
    let err = bank.write_usage(&generic_with_sub_type, "alice").await.unwrap_err();
    assert!(matches!(err, TnuError::ValidationFailed(_)), "unexpected error: {:?}", err);

    let mut name_string_with_taxon = abax_upload();
    name_string_with_taxon.usage_sub_type = Some("NS".to_string());
    let err = bank.write_usage(&name_string_with_taxon, "alice").await.unwrap_err();
    assert!(matches!(err, TnuError::ValidationFailed(_)), "unexpected error: {:?}", err);

    assert!(bank.pools().name_strings.resolve(&name_id).await.unwrap().is_none());
    let reference_id = ContentIdGenerator::default().derive_id("Smith, J. 1999. Carabidae of Europe");
    assert!(bank.pools().references.resolve(&reference_id).await.unwrap().is_none());
}
