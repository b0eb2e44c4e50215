//! ABOUTME: Integration tests for the synchronous repository facades
//! ABOUTME: Plain #[test] functions; the facades own their runtime

mod common;

use common::*;
use mx_core::telemetry;
use mx_db::{
    BlockingModelRepository, BlockingViewRepository, Filter, MemoryContext, ModelRepository,
    PagingRequest, View, ViewRepository,
};

fn init() {
    telemetry::init_tracing("test", "mixrepo-blocking");
}

#[test]
fn test_blocking_view_repository_with_cache() {
    init();
    let repo = BlockingViewRepository::build(|| async {
        let cache = memory_cache();
        let repo = ViewRepository::<MemoryContext, ArticleView>::new(MemoryContext::new())?;
        Ok::<_, mx_core::Error>(repo.with_cache(cache))
    })
    .unwrap();

    let home = ArticleView::new(article(1, "en-us", "Home"));
    assert!(repo.create_model(&home, None).is_succeed);

    let read = repo.get_single_model(&Filter::eq("id", 1), None);
    assert_eq!(read.data.unwrap().heading, "HOME");
    repo.flush_cache();

    let cache = repo.inner().cache().unwrap();
    assert_eq!(cache.service().metrics().writes.get(), 1);

    let mut edited = home.model().clone();
    edited.title = "Start".to_string();
    assert!(repo.edit_model(&ArticleView::new(edited), None).is_succeed);
    let read = repo.get_first_model(&Filter::eq("id", 1), None);
    assert_eq!(read.data.unwrap().heading, "START");

    assert!(repo.remove_model(home.model(), true, None).is_succeed);
    assert_eq!(repo.count(&Filter::All, None).data, Some(0));
}

#[test]
fn test_blocking_caller_session_spans_calls() {
    init();
    let repo = BlockingViewRepository::<MemoryContext, ArticleView>::new(
        ViewRepository::new(MemoryContext::new()).unwrap(),
    )
    .unwrap();

    let mut session = repo.begin_session().unwrap();
    let views: Vec<ArticleView> = (1..=4)
        .map(|id| ArticleView::new(article(id, "en-us", "Batch")))
        .collect();
    assert!(repo.save_list_model(&views, false, Some(&mut session)).is_succeed);
    repo.rollback(session).unwrap();
    assert_eq!(repo.count(&Filter::All, None).data, Some(0));

    let mut session = repo.begin_session().unwrap();
    assert!(repo.save_list_model(&views, false, Some(&mut session)).is_succeed);
    repo.commit(session).unwrap();

    let page = repo
        .get_model_list(Some(&PagingRequest::page(None, 3, 1)), None)
        .data
        .unwrap();
    assert_eq!(page.total_page, 2);
    assert_eq!(page.items.len(), 1);
}

#[test]
fn test_blocking_model_repository() {
    init();
    let repo = BlockingModelRepository::new(
        ModelRepository::<MemoryContext, Article>::new(MemoryContext::new()).unwrap(),
    )
    .unwrap();

    let first = repo.save_model(&article(1, "en-us", "One"), None);
    let second = repo.save_model(&article(1, "en-us", "One"), None);
    assert!(first.is_succeed && second.is_succeed);
    assert_eq!(repo.count(&Filter::All, None).data, Some(1));

    let missing = repo.get_single_model(&Filter::eq("id", 2), None);
    assert!(!missing.is_succeed);
    assert!(missing.exception.is_none());

    let updated = repo.update_fields(
        &Filter::All,
        &[("title", mx_db::Value::from("Uno"))],
        None,
    );
    assert_eq!(updated.data, Some(1));
    assert_eq!(
        repo.get_first_model(&Filter::All, None).data.unwrap().title,
        "Uno"
    );
}
