//! ABOUTME: Integration tests for the read-through view cache
//! ABOUTME: Verifies write-back after a miss and invalidation after every kind of write

mod common;

use async_trait::async_trait;
use common::*;
use mx_config::{CacheBackend, CacheConfig};
use mx_core::{Error, Result};
use mx_db::{
    CacheService, CacheStore, DataContext, DataSession, Filter, MemoryContext, Value, View,
    ViewModel, ViewRepository,
};
use std::sync::Arc;

/// Store that refuses every operation
struct OfflineStore;

#[async_trait]
impl CacheStore for OfflineStore {
    async fn get(&self, _folder: &str, _key: &str) -> Result<Option<String>> {
        Err(Error::Cache("store offline".to_string()))
    }

    async fn set(&self, _folder: &str, _key: &str, _json: String) -> Result<()> {
        Err(Error::Cache("store offline".to_string()))
    }

    async fn remove(&self, _folder: &str, _key: &str) -> Result<()> {
        Err(Error::Cache("store offline".to_string()))
    }

    async fn clear_folder(&self, _folder: &str) -> Result<()> {
        Err(Error::Cache("store offline".to_string()))
    }
}

async fn cached_repo<C: DataContext>(ctx: C) -> ViewRepository<C, ArticleView> {
    ViewRepository::new(ctx).unwrap().with_cache(memory_cache())
}

async fn check_read_through<C: DataContext>(ctx: C) {
    let repo = cached_repo(ctx).await;
    let view = ArticleView::new(article(3, "en-us", "Home"));
    assert!(repo.create_model(&view, None).await.is_succeed);

    let cache = repo.cache().unwrap();
    assert!(cache.lookup(view.model()).await.unwrap().is_none());

    let fetched = repo
        .get_single_model(&Filter::eq("id", 3), None)
        .await
        .data
        .unwrap();
    cache.service().flush().await;

    let stored = cache.lookup(view.model()).await.unwrap();
    assert_eq!(stored, Some(fetched.clone()));
    assert_eq!(cache.service().metrics().misses.get(), 1);

    // Second read is served from the cache and re-expanded
    let again = repo
        .get_single_model(&Filter::eq("id", 3), None)
        .await
        .data
        .unwrap();
    assert_eq!(again, fetched);
    assert_eq!(cache.service().metrics().hits.get(), 1);
}

async fn check_edit_invalidates<C: DataContext>(ctx: C) {
    let repo = cached_repo(ctx).await;
    let original = article(5, "en-us", "Before");
    repo.create_model(&ArticleView::new(original.clone()), None).await;
    repo.get_first_model(&Filter::eq("id", 5), None).await;
    let cache = repo.cache().unwrap();
    cache.service().flush().await;
    assert!(cache.lookup(&original).await.unwrap().is_some());

    let mut edited = original.clone();
    edited.title = "After".to_string();
    assert!(repo.edit_model(&ArticleView::new(edited.clone()), None).await.is_succeed);
    cache.service().flush().await;

    let entry = cache.lookup(&original).await.unwrap();
    assert!(entry.map_or(true, |v| v.model.title == "After"));

    let read = repo
        .get_first_model(&Filter::eq("id", 5), None)
        .await
        .data
        .unwrap();
    assert_eq!(read.heading, "AFTER");
}

async fn check_remove_and_update_fields_invalidate<C: DataContext>(ctx: C) {
    let repo = cached_repo(ctx).await;
    for id in 1..=3 {
        repo.create_model(&ArticleView::new(article(id, "en-us", "Cached")), None)
            .await;
    }
    let warmed = repo.get_model_list(None, None).await.data.unwrap();
    assert_eq!(warmed.items.len(), 3);
    let cache = repo.cache().unwrap();
    cache.service().flush().await;

    let updated = repo
        .update_fields(&Filter::le("id", 2), &[("views", Value::from(999))], None)
        .await;
    assert_eq!(updated.data, Some(2));
    assert!(cache.lookup(&article(1, "en-us", "")).await.unwrap().is_none());
    assert!(cache.lookup(&article(2, "en-us", "")).await.unwrap().is_none());
    assert!(cache.lookup(&article(3, "en-us", "")).await.unwrap().is_some());

    let removed = repo.remove_model(&article(3, "en-us", ""), false, None).await;
    assert!(removed.is_succeed);
    assert!(cache.lookup(&article(3, "en-us", "")).await.unwrap().is_none());

    let first = repo
        .get_first_model(&Filter::eq("id", 1), None)
        .await
        .data
        .unwrap();
    assert_eq!(first.model.views, 999);
}

async fn check_borrowed_reads_do_not_fill_cache<C: DataContext>(ctx: C) {
    let repo = cached_repo(ctx.clone()).await;
    let committed = article(6, "en-us", "Committed");
    assert!(repo
        .create_model(&ArticleView::new(committed.clone()), None)
        .await
        .is_succeed);

    let mut outer = ctx.begin().await.unwrap();
    let draft = ArticleView::new(article(6, "en-us", "Uncommitted"));
    assert!(repo.edit_model(&draft, Some(&mut outer)).await.is_succeed);
    let seen = repo
        .get_single_model(&Filter::eq("id", 6), Some(&mut outer))
        .await
        .data
        .unwrap();
    assert_eq!(seen.heading, "UNCOMMITTED");

    let cache = repo.cache().unwrap();
    cache.service().flush().await;
    assert!(cache.lookup(&committed).await.unwrap().is_none());
    outer.rollback().await.unwrap();

    let read = repo
        .get_single_model(&Filter::eq("id", 6), None)
        .await
        .data
        .unwrap();
    assert_eq!(read.heading, "COMMITTED");
    cache.service().flush().await;
    let stored = cache.lookup(&committed).await.unwrap().unwrap();
    assert_eq!(stored.model.title, "Committed");
}

#[tokio::test]
async fn test_read_through_memory() {
    check_read_through(MemoryContext::new()).await;
}

#[tokio::test]
async fn test_read_through_sqlite() {
    let (ctx, _dir) = sqlite_context().await;
    check_read_through(ctx).await;
}

#[tokio::test]
async fn test_edit_invalidates_memory() {
    check_edit_invalidates(MemoryContext::new()).await;
}

#[tokio::test]
async fn test_edit_invalidates_sqlite() {
    let (ctx, _dir) = sqlite_context().await;
    check_edit_invalidates(ctx).await;
}

#[tokio::test]
async fn test_remove_and_update_fields_invalidate_memory() {
    check_remove_and_update_fields_invalidate(MemoryContext::new()).await;
}

#[tokio::test]
async fn test_remove_and_update_fields_invalidate_sqlite() {
    let (ctx, _dir) = sqlite_context().await;
    check_remove_and_update_fields_invalidate(ctx).await;
}

#[tokio::test]
async fn test_borrowed_reads_do_not_fill_cache_memory() {
    check_borrowed_reads_do_not_fill_cache(MemoryContext::new()).await;
}

#[tokio::test]
async fn test_borrowed_reads_do_not_fill_cache_sqlite() {
    let (ctx, _dir) = sqlite_context().await;
    check_borrowed_reads_do_not_fill_cache(ctx).await;
}

#[tokio::test]
async fn test_cache_store_failures_do_not_fail_operations() {
    let service = CacheService::new(Arc::new(OfflineStore), 16).unwrap();
    let repo = ViewRepository::<MemoryContext, ArticleView>::new(MemoryContext::new())
        .unwrap()
        .with_cache(service);
    let home = article(1, "en-us", "Home");

    assert!(repo
        .create_model(&ArticleView::new(home.clone()), None)
        .await
        .is_succeed);

    let read = repo.get_single_model(&Filter::eq("id", 1), None).await;
    assert!(read.is_succeed);
    assert_eq!(read.data.unwrap().heading, "HOME");

    let mut edited = home.clone();
    edited.title = "Start".to_string();
    let edit = repo.edit_model(&ArticleView::new(edited), None).await;
    assert!(edit.is_succeed);
    assert!(edit.exception.is_none());

    let removed = repo.remove_model(&home, false, None).await;
    assert!(removed.is_succeed);
    assert_eq!(repo.count(&Filter::All, None).await.data, Some(0));

    let metrics = repo.cache().unwrap().service().metrics().clone();
    repo.cache().unwrap().service().flush().await;
    assert_eq!(metrics.misses.get(), 1);
    assert_eq!(metrics.hits.get(), 0);
    assert_eq!(metrics.write_failures.get(), 1);
    assert_eq!(metrics.writes.get(), 0);
    // create, edit, and remove each tried to invalidate
    assert_eq!(metrics.invalidation_failures.get(), 3);
}

#[tokio::test]
async fn test_uncacheable_views_are_not_written() {
    let repo = cached_repo(MemoryContext::new()).await;
    let mut draft = article(8, "en-us", "Draft");
    draft.published = false;
    repo.create_model(&ArticleView::new(draft.clone()), None).await;

    let read = repo.get_first_model(&Filter::eq("id", 8), None).await;
    assert!(read.is_succeed);

    let cache = repo.cache().unwrap();
    cache.service().flush().await;
    assert!(cache.lookup(&draft).await.unwrap().is_none());
    assert_eq!(cache.service().metrics().writes.get(), 0);
}

#[tokio::test]
async fn test_cached_hit_reexpands_related_data() {
    let ctx = MemoryContext::new();
    let repo = cached_repo(ctx).await;
    let view = ArticleView::new(article(2, "en-us", "History"));
    repo.save_model(&view, true, None).await;

    let first = repo.parse_view(view.model(), None).await.data.unwrap();
    assert_eq!(first.revision_count, 1);
    repo.cache().unwrap().service().flush().await;

    // A child row written behind the cache's back shows up on the next hit
    let models = repo.models();
    let mut session = models.context().begin().await.unwrap();
    let mut fresh = ArticleView::new(view.model().clone());
    fresh
        .save_sub_models(view.model(), &mut session)
        .await
        .unwrap();
    session.commit().await.unwrap();

    let second = repo.parse_view(view.model(), None).await.data.unwrap();
    assert_eq!(second.revision_count, 2);
    assert_eq!(repo.cache().unwrap().service().metrics().hits.get(), 1);
}

#[tokio::test]
async fn test_file_cache_backend_and_clear() {
    let dir = test_support::scratch_dir();
    let config = CacheConfig {
        enabled: true,
        backend: CacheBackend::File,
        directory: dir.path().join("cache").display().to_string(),
        ..CacheConfig::default()
    };
    let service = CacheService::from_config(&config).unwrap().unwrap();
    let repo = ViewRepository::<MemoryContext, ArticleView>::new(MemoryContext::new())
        .unwrap()
        .with_cache(service);

    let home = article(1, "en-us", "Home");
    repo.create_model(&ArticleView::new(home.clone()), None).await;
    repo.parse_view(&home, None).await;
    let cache = repo.cache().unwrap();
    cache.service().flush().await;

    let entry = dir
        .path()
        .join("cache")
        .join(cache.folder())
        .join("_1_en-us.json");
    assert!(entry.exists());

    assert_eq!(repo.remove_cache(&home).await.data, Some(true));
    assert!(!entry.exists());

    repo.parse_view(&home, None).await;
    assert_eq!(repo.clear_cache().await.data, Some(true));
    assert!(cache.lookup(&home).await.unwrap().is_none());
}

#[tokio::test]
async fn test_uncached_repository_reports_no_cache() {
    let repo = ViewRepository::<MemoryContext, ArticleView>::new(MemoryContext::new()).unwrap();
    assert!(!repo.is_cached());
    assert_eq!(repo.clear_cache().await.data, Some(false));
    assert_eq!(
        repo.remove_cache(&article(1, "en-us", "x")).await.data,
        Some(false)
    );
}
